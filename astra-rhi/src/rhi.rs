use std::ffi::CStr;
use std::rc::Rc;

use ash::vk;

use crate::core::{
    allocator::RhiAllocator,
    command_pool::RhiCommandPool,
    command_queue::{RhiQueue, RhiQueueFamily},
    device::RhiDevice,
    instance::RhiInstance,
    physical_device::RhiPhysicalDevice,
};

/// Vulkan 的根对象，将 instance/device/queue/allocator 捆绑在一起
///
/// 设备协商是一次性的前置步骤，后续所有组件都从这里拿到一个可用的 device
pub struct Rhi {
    pub vk_pf: ash::Entry,
    pub instance: RhiInstance,
    pub physical_device: Rc<RhiPhysicalDevice>,
    pub device: Rc<RhiDevice>,

    pub graphics_queue: RhiQueue,

    pub allocator: Rc<RhiAllocator>,

    /// 临时的 graphics command pool，主要用于一次性的命令缓冲区
    pub graphics_command_pool: Rc<RhiCommandPool>,
}

// 创建与销毁
impl Rhi {
    const ENGINE_NAME: &'static str = "Astra";

    pub fn new(app_name: String, instance_extra_exts: Vec<&'static CStr>) -> Self {
        let vk_pf = unsafe { ash::Entry::load().unwrap() };

        let instance = RhiInstance::new(&vk_pf, app_name, Self::ENGINE_NAME.to_string(), instance_extra_exts);

        let physical_device = Rc::new(RhiPhysicalDevice::new_discrete_physical_device(instance.handle()));

        let graphics_queue_family_index =
            physical_device.find_queue_family_index(vk::QueueFlags::GRAPHICS).expect("no graphics queue family");
        let graphics_queue_family = RhiQueueFamily {
            queue_family_index: graphics_queue_family_index,
            queue_flags: physical_device.queue_family_properties[graphics_queue_family_index as usize].queue_flags,
        };

        let queue_priorities = [1.0_f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_queue_family_index)
            .queue_priorities(&queue_priorities);

        let device = Rc::new(RhiDevice::new(
            &vk_pf,
            &instance,
            physical_device.clone(),
            std::slice::from_ref(&queue_create_info),
        ));

        let graphics_queue = RhiQueue {
            handle: unsafe { device.get_device_queue(graphics_queue_family_index, 0) },
            queue_family: graphics_queue_family.clone(),
            device: device.clone(),
        };
        device.debug_utils().set_object_debug_name(graphics_queue.handle(), "graphics-queue");

        let allocator = Rc::new(RhiAllocator::new(&instance, physical_device.clone(), device.clone()));

        let graphics_command_pool = Rc::new(RhiCommandPool::new(
            device.clone(),
            graphics_queue_family,
            vk::CommandPoolCreateFlags::empty(),
            "rhi-graphics",
        ));

        Self {
            vk_pf,
            instance,
            physical_device,
            device,
            graphics_queue,
            allocator,
            graphics_command_pool,
        }
    }

    /// 销毁顺序：command pool → allocator → device → instance
    ///
    /// 调用之前需要保证所有引用 device/allocator 的资源都已经销毁
    pub fn destroy(self) {
        let Self {
            vk_pf: _vk_pf,
            instance,
            physical_device: _physical_device,
            device,
            graphics_queue,
            allocator,
            graphics_command_pool,
        } = self;

        drop(graphics_queue);
        drop(graphics_command_pool);
        drop(allocator);

        unsafe {
            device.handle.destroy_device(None);
        }
        // debug messenger 跟随最后一个 Rc<RhiDevice> 释放，发生在 instance 销毁之前
        drop(device);

        instance.destroy();
    }
}

// getter
impl Rhi {
    #[inline]
    pub fn device(&self) -> &RhiDevice {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> &RhiPhysicalDevice {
        &self.physical_device
    }

    #[inline]
    pub fn graphics_queue_family(&self) -> RhiQueueFamily {
        self.graphics_queue.queue_family()
    }

    #[inline]
    pub fn rt_pipeline_props(&self) -> &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'_> {
        &self.physical_device.rt_pipeline_props
    }

    pub fn wait_idle(&self) {
        unsafe {
            self.device.device_wait_idle().unwrap();
        }
    }
}
