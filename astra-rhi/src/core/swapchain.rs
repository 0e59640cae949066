use std::rc::Rc;

use ash::vk;
use itertools::Itertools;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::core::command_queue::RhiQueue;
use crate::core::device::RhiDevice;
use crate::core::synchronize::RhiSemaphore;
use crate::rhi::Rhi;

/// window surface，生命周期比 swapchain 更长：
/// resize 时只重建 swapchain，surface 保持不变
pub struct RhiSurface {
    pub(crate) handle: vk::SurfaceKHR,
    pf: ash::khr::surface::Instance,
}

impl RhiSurface {
    pub fn new(rhi: &Rhi, window: &winit::window::Window) -> Self {
        let surface_pf = ash::khr::surface::Instance::new(&rhi.vk_pf, rhi.instance.handle());

        let surface = unsafe {
            ash_window::create_surface(
                &rhi.vk_pf,
                rhi.instance.handle(),
                window.display_handle().unwrap().as_raw(),
                window.window_handle().unwrap().as_raw(),
                None,
            )
            .unwrap()
        };
        rhi.device.debug_utils().set_object_debug_name(surface, "main-surface");

        RhiSurface {
            handle: surface,
            pf: surface_pf,
        }
    }
}

impl Drop for RhiSurface {
    fn drop(&mut self) {
        log::info!("destroying surface");
        unsafe { self.pf.destroy_surface(self.handle, None) }
    }
}

/// acquire 的结果：surface out-of-date 是可恢复的信号，不是错误
pub enum RhiAcquireResult {
    Success(u32),
    OutOfDate,
}

pub enum RhiPresentResult {
    Success,
    OutOfDate,
}

/// # 状态
/// 窗口 resize 或 device 报告 out-of-date 之后，swapchain 即为 stale，
/// 必须整体重建后才能再次 acquire/present
pub struct RhiSwapchain {
    swapchain_pf: ash::khr::swapchain::Device,
    swapchain_handle: vk::SwapchainKHR,

    device: Rc<RhiDevice>,

    /// 这里的 image 并非手动创建的，因此无法使用 RhiImage 类型
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,

    pub extent: vk::Extent2D,
    pub color_format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
}

impl RhiSwapchain {
    const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    const PREFERRED_PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::FIFO;

    pub fn new(rhi: &Rhi, surface: &RhiSurface) -> Self {
        let pdevice = rhi.physical_device().handle;

        let present_mode = Self::init_present_mode(rhi, surface, Self::PREFERRED_PRESENT_MODE);
        let (format, color_space) = Self::init_format_and_colorspace(rhi, surface, Self::PREFERRED_FORMAT);

        let surface_capabilities =
            unsafe { surface.pf.get_physical_device_surface_capabilities(pdevice, surface.handle).unwrap() };

        // current_extent 反映的是当前窗口尺寸
        let extent = surface_capabilities.current_extent;
        log::info!("surface capability extent: {:?}", extent);

        let (swapchain_handle, swapchain_pf) =
            Self::create_handle(rhi, surface, &surface_capabilities, format, color_space, extent, present_mode);

        let (images, image_views) = Self::create_images_and_views(rhi, swapchain_handle, &swapchain_pf, format);

        Self {
            swapchain_pf,
            swapchain_handle,
            images,
            image_views,
            extent,
            color_format: format,
            present_mode,
            device: rhi.device.clone(),
        }
    }

    fn create_handle(
        rhi: &Rhi,
        surface: &RhiSurface,
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        format: vk::Format,
        color_space: vk::ColorSpaceKHR,
        extent: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
    ) -> (vk::SwapchainKHR, ash::khr::swapchain::Device) {
        // max_image_count == 0，表示不限制 image 数量
        let image_count = if surface_capabilities.max_image_count == 0 {
            surface_capabilities.min_image_count + 1
        } else {
            u32::min(surface_capabilities.max_image_count, surface_capabilities.min_image_count + 1)
        };

        log::info!("swapchain image count: {}", image_count);
        log::info!("swapchain format: {:?}", format);
        log::info!("swapchain present mode: {:?}", present_mode);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(format)
            .image_color_space(color_space)
            .image_extent(extent)
            .image_array_layers(1)
            // TRANSFER_DST：draw image 通过 blit 写入 swapchain image
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(surface_capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true);

        unsafe {
            let swapchain_pf = ash::khr::swapchain::Device::new(rhi.instance.handle(), rhi.device());
            let swapchain_handle = swapchain_pf.create_swapchain(&create_info, None).unwrap();
            rhi.device.debug_utils().set_object_debug_name(swapchain_handle, "main-swapchain");

            (swapchain_handle, swapchain_pf)
        }
    }

    fn create_images_and_views(
        rhi: &Rhi,
        swapchain_handle: vk::SwapchainKHR,
        swapchain_pf: &ash::khr::swapchain::Device,
        format: vk::Format,
    ) -> (Vec<vk::Image>, Vec<vk::ImageView>) {
        let swapchain_images = unsafe { swapchain_pf.get_swapchain_images(swapchain_handle).unwrap() };

        let image_views = swapchain_images
            .iter()
            .map(|img| {
                let create_info = vk::ImageViewCreateInfo::default()
                    .image(*img)
                    .format(format)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .layer_count(1)
                            .level_count(1),
                    );

                unsafe { rhi.device().create_image_view(&create_info, None).unwrap() }
            })
            .collect_vec();

        let images = swapchain_images;

        for i in 0..images.len() {
            rhi.device.debug_utils().set_object_debug_name(images[i], format!("swapchain-image-{}", i));
            rhi.device.debug_utils().set_object_debug_name(image_views[i], format!("swapchain-image-view-{}", i));
        }

        (images, image_views)
    }

    /// 找到一个合适的 present mode
    ///
    /// @param present_mode: 优先使用的 present mode
    fn init_present_mode(rhi: &Rhi, surface: &RhiSurface, present_mode: vk::PresentModeKHR) -> vk::PresentModeKHR {
        unsafe {
            surface
                .pf
                .get_physical_device_surface_present_modes(rhi.physical_device().handle, surface.handle)
                .unwrap()
                .iter()
                .find_or_first(|p| **p == present_mode)
                .copied()
                .unwrap()
        }
    }

    /// 找到合适的 format 和 colorspace
    ///
    /// panic: 如果没有找到，就 panic
    fn init_format_and_colorspace(
        rhi: &Rhi,
        surface: &RhiSurface,
        format: vk::SurfaceFormatKHR,
    ) -> (vk::Format, vk::ColorSpaceKHR) {
        let surface_format = unsafe {
            surface
                .pf
                .get_physical_device_surface_formats(rhi.physical_device().handle, surface.handle)
                .unwrap()
                .into_iter()
                .find(|f| *f == format)
                .unwrap()
        };

        (surface_format.format, surface_format.color_space)
    }

    /// acquire 一张可以渲染的 image
    ///
    /// out-of-date 以返回值的形式交给调用者，由 render loop 走 RESIZE 恢复
    pub fn acquire_next_image(&self, semaphore: &RhiSemaphore, timeout_ns: u64) -> RhiAcquireResult {
        let result = unsafe {
            self.swapchain_pf.acquire_next_image(
                self.swapchain_handle,
                timeout_ns,
                semaphore.handle(),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, _is_suboptimal)) => RhiAcquireResult::Success(image_index),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => RhiAcquireResult::OutOfDate,
            Err(e) => panic!("failed to acquire swapchain image: {:?}", e),
        }
    }

    pub fn present(&self, queue: &RhiQueue, image_index: u32, wait_semaphore: &RhiSemaphore) -> RhiPresentResult {
        let wait_semaphores = [wait_semaphore.handle()];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .image_indices(std::slice::from_ref(&image_index))
            .swapchains(std::slice::from_ref(&self.swapchain_handle));

        let result = unsafe { self.swapchain_pf.queue_present(queue.handle(), &present_info) };
        match result {
            Ok(_is_suboptimal) => RhiPresentResult::Success,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => RhiPresentResult::OutOfDate,
            Err(e) => panic!("failed to present swapchain image: {:?}", e),
        }
    }
}

impl Drop for RhiSwapchain {
    fn drop(&mut self) {
        log::info!("destroying swapchain");
        unsafe {
            for view in &self.image_views {
                self.device.destroy_image_view(*view, None);
            }
            self.swapchain_pf.destroy_swapchain(self.swapchain_handle, None);
        }
    }
}
