use std::ffi::c_void;
use std::rc::Rc;

use ash::vk;
use itertools::Itertools;

use crate::core::device::RhiDevice;
use crate::rhi::Rhi;

pub struct RhiDescriptorPoolCreateInfo {
    inner: vk::DescriptorPoolCreateInfo<'static>,
    _pool_sizes: Vec<vk::DescriptorPoolSize>,
}

impl RhiDescriptorPoolCreateInfo {
    #[inline]
    pub fn new(flags: vk::DescriptorPoolCreateFlags, max_sets: u32, pool_sizes: Vec<vk::DescriptorPoolSize>) -> Self {
        let inner = vk::DescriptorPoolCreateInfo {
            flags,
            max_sets,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        Self {
            inner,
            _pool_sizes: pool_sizes,
        }
    }
}

pub struct RhiDescriptorPool {
    handle: vk::DescriptorPool,
    _info: RhiDescriptorPoolCreateInfo,

    device: Rc<RhiDevice>,
    name: String,
}
impl Drop for RhiDescriptorPool {
    fn drop(&mut self) {
        log::info!("Destroying RhiDescriptorPool: {}", self.name);
        unsafe { self.device.destroy_descriptor_pool(self.handle, None) };
    }
}
impl RhiDescriptorPool {
    #[inline]
    pub fn new(rhi: &Rhi, ci: RhiDescriptorPoolCreateInfo, name: &str) -> Self {
        let pool = unsafe { rhi.device.create_descriptor_pool(&ci.inner, None).unwrap() };
        rhi.device.debug_utils().set_object_debug_name(pool, name);
        Self {
            handle: pool,
            _info: ci,
            device: rhi.device.clone(),
            name: name.to_string(),
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }

    /// 分配一个 descriptor set
    ///
    /// # Destroy
    /// set 跟随 descriptor pool 一起销毁
    pub fn alloc_descriptor_set(&self, layout: &RhiDescriptorSetLayout, debug_name: &str) -> vk::DescriptorSet {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.handle)
            .set_layouts(std::slice::from_ref(&layout.layout));
        let descriptor_set = unsafe { self.device.allocate_descriptor_sets(&alloc_info).unwrap()[0] };
        self.device.debug_utils().set_object_debug_name(descriptor_set, debug_name);
        descriptor_set
    }
}

/// 描述符集布局的 builder
///
/// binding 的数量只有在 asset 加载之后才能确定（纹理数组的长度），
/// 因此 layout 在运行时构建，而不是编译期
#[derive(Default)]
pub struct RhiDescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl RhiDescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// builder
    #[inline]
    pub fn add_binding(self, binding: u32, ty: vk::DescriptorType) -> Self {
        self.add_binding_array(binding, ty, 1)
    }

    /// builder
    /// descriptor_count > 1 时表示一个数组 binding
    #[inline]
    pub fn add_binding_array(mut self, binding: u32, ty: vk::DescriptorType, descriptor_count: u32) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(descriptor_count),
        );
        self
    }

    pub fn build(self, rhi: &Rhi, stage_flags: vk::ShaderStageFlags, debug_name: &str) -> RhiDescriptorSetLayout {
        let bindings = self.bindings.into_iter().map(|b| b.stage_flags(stage_flags)).collect_vec();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        let layout = unsafe { rhi.device.create_descriptor_set_layout(&create_info, None).unwrap() };
        rhi.device.debug_utils().set_object_debug_name(layout, debug_name);
        RhiDescriptorSetLayout {
            layout,
            _device: rhi.device.clone(),
        }
    }
}

pub struct RhiDescriptorSetLayout {
    layout: vk::DescriptorSetLayout,

    _device: Rc<RhiDevice>,
}
impl Drop for RhiDescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            log::info!("Destroying RhiDescriptorSetLayout");
            self._device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
impl RhiDescriptorSetLayout {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn handle_ref(&self) -> &vk::DescriptorSetLayout {
        &self.layout
    }
}

enum RhiDescriptorWrite {
    AccelerationStructure { binding: u32, index: usize },
    StorageImage { binding: u32, index: usize },
    StorageBuffer { binding: u32, index: usize },
    SampledImages { binding: u32, start: usize, count: usize },
}

/// 将资源写入 descriptor set 的 writer
///
/// 真实的 binding 数量和纹理数组的容量是两个独立的参数：
/// 数组 binding 只占用 1 个 binding，但需要 capacity 份 image info 的辅助存储
pub struct RhiDescriptorWriter {
    set: vk::DescriptorSet,

    declared_binding_count: usize,
    bindless_array_capacity: usize,

    image_infos: Vec<vk::DescriptorImageInfo>,
    buffer_infos: Vec<vk::DescriptorBufferInfo>,
    accel_handles: Vec<vk::AccelerationStructureKHR>,

    writes: Vec<RhiDescriptorWrite>,
}

impl RhiDescriptorWriter {
    pub fn new(declared_binding_count: usize, bindless_array_capacity: usize, set: vk::DescriptorSet) -> Self {
        Self {
            set,
            declared_binding_count,
            bindless_array_capacity,
            image_infos: Vec::with_capacity(declared_binding_count + bindless_array_capacity),
            buffer_infos: Vec::with_capacity(declared_binding_count),
            accel_handles: Vec::with_capacity(1),
            writes: Vec::with_capacity(declared_binding_count),
        }
    }

    pub fn write_acceleration_structure(&mut self, binding: u32, handle: vk::AccelerationStructureKHR) {
        self.accel_handles.push(handle);
        self.writes.push(RhiDescriptorWrite::AccelerationStructure {
            binding,
            index: self.accel_handles.len() - 1,
        });
    }

    pub fn write_storage_image(&mut self, binding: u32, image_view: vk::ImageView) {
        self.image_infos.push(
            vk::DescriptorImageInfo::default().image_view(image_view).image_layout(vk::ImageLayout::GENERAL),
        );
        self.writes.push(RhiDescriptorWrite::StorageImage {
            binding,
            index: self.image_infos.len() - 1,
        });
    }

    pub fn write_storage_buffer(&mut self, binding: u32, buffer: vk::Buffer) {
        self.buffer_infos
            .push(vk::DescriptorBufferInfo::default().buffer(buffer).offset(0).range(vk::WHOLE_SIZE));
        self.writes.push(RhiDescriptorWrite::StorageBuffer {
            binding,
            index: self.buffer_infos.len() - 1,
        });
    }

    pub fn write_sampled_images(&mut self, binding: u32, image_infos: &[vk::DescriptorImageInfo]) {
        assert!(
            image_infos.len() <= self.bindless_array_capacity,
            "sampled image count {} exceeds declared capacity {}",
            image_infos.len(),
            self.bindless_array_capacity
        );
        let start = self.image_infos.len();
        self.image_infos.extend_from_slice(image_infos);
        self.writes.push(RhiDescriptorWrite::SampledImages {
            binding,
            start,
            count: image_infos.len(),
        });
    }

    /// 一次性提交所有的 descriptor write
    pub fn write(self, device: &RhiDevice) {
        assert_eq!(
            self.writes.len(),
            self.declared_binding_count,
            "descriptor writes do not match the declared binding count"
        );

        // acceleration structure 的 write 通过 pNext 链传递
        let accel_writes = self
            .accel_handles
            .iter()
            .map(|handle| {
                vk::WriteDescriptorSetAccelerationStructureKHR::default()
                    .acceleration_structures(std::slice::from_ref(handle))
            })
            .collect_vec();

        let writes = self
            .writes
            .iter()
            .map(|write| match write {
                RhiDescriptorWrite::AccelerationStructure { binding, index } => vk::WriteDescriptorSet {
                    dst_set: self.set,
                    dst_binding: *binding,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                    p_next: &accel_writes[*index] as *const _ as *const c_void,
                    ..Default::default()
                },
                RhiDescriptorWrite::StorageImage { binding, index } => vk::WriteDescriptorSet {
                    dst_set: self.set,
                    dst_binding: *binding,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
                    p_image_info: &self.image_infos[*index],
                    ..Default::default()
                },
                RhiDescriptorWrite::StorageBuffer { binding, index } => vk::WriteDescriptorSet {
                    dst_set: self.set,
                    dst_binding: *binding,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                    p_buffer_info: &self.buffer_infos[*index],
                    ..Default::default()
                },
                RhiDescriptorWrite::SampledImages { binding, start, count } => vk::WriteDescriptorSet {
                    dst_set: self.set,
                    dst_binding: *binding,
                    descriptor_count: *count as u32,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    p_image_info: &self.image_infos[*start],
                    ..Default::default()
                },
            })
            .collect_vec();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_separates_binding_count_from_array_capacity() {
        let writer = RhiDescriptorWriter::new(5, 16, vk::DescriptorSet::null());
        assert_eq!(writer.declared_binding_count, 5);
        assert_eq!(writer.bindless_array_capacity, 16);
        // 辅助存储按照 binding 数量 + 数组容量预留
        assert!(writer.image_infos.capacity() >= 5 + 16);
    }

    #[test]
    fn test_writer_records_one_entry_per_binding() {
        let infos = vec![vk::DescriptorImageInfo::default(); 3];

        let mut writer = RhiDescriptorWriter::new(3, 8, vk::DescriptorSet::null());
        writer.write_storage_image(1, vk::ImageView::null());
        writer.write_storage_buffer(2, vk::Buffer::null());
        writer.write_sampled_images(4, &infos);

        // 数组 binding 占用 3 份辅助存储，但只算 1 个 binding
        assert_eq!(writer.writes.len(), 3);
        assert_eq!(writer.image_infos.len(), 4);
    }

    #[test]
    #[should_panic]
    fn test_writer_rejects_oversized_image_array() {
        let infos = vec![vk::DescriptorImageInfo::default(); 4];
        let mut writer = RhiDescriptorWriter::new(1, 2, vk::DescriptorSet::null());
        writer.write_sampled_images(0, &infos);
    }
}
