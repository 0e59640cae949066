use ash::vk;
use astra_rhi::core::descriptor::{
    RhiDescriptorLayoutBuilder, RhiDescriptorPool, RhiDescriptorPoolCreateInfo, RhiDescriptorSetLayout,
    RhiDescriptorWriter,
};
use astra_rhi::rhi::Rhi;

use crate::renderer::gpu_scene::GpuScene;

/// 描述符绑定的布局，和 shader 侧一一对应
const TLAS_BINDING: u32 = 0;
const OUTPUT_IMAGE_BINDING: u32 = 1;
const GEOMETRY_NODES_BINDING: u32 = 2;
const MATERIALS_BINDING: u32 = 3;
const TEXTURES_BINDING: u32 = 4;

/// 实际写入的 binding 数量：1 AS + 1 storage image + 2 storage buffer + 1 纹理数组
const DECLARED_BINDING_COUNT: usize = 5;

/// 向 shader 暴露 TLAS、输出 image、geometry/material buffer 和纹理数组的 descriptor set
pub struct RtDescriptorSet {
    pub layout: RhiDescriptorSetLayout,
    set: vk::DescriptorSet,
}

impl RtDescriptorSet {
    /// layout 在 asset 加载之后创建：纹理数组的长度此时才可知
    pub fn new(rhi: &Rhi, pool: &RhiDescriptorPool, gpu_scene: &GpuScene, output_image_view: vk::ImageView) -> Self {
        let texture_count = gpu_scene.texture_count();

        let layout = RhiDescriptorLayoutBuilder::new()
            .add_binding(TLAS_BINDING, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .add_binding(OUTPUT_IMAGE_BINDING, vk::DescriptorType::STORAGE_IMAGE)
            .add_binding(GEOMETRY_NODES_BINDING, vk::DescriptorType::STORAGE_BUFFER)
            .add_binding(MATERIALS_BINDING, vk::DescriptorType::STORAGE_BUFFER)
            .add_binding_array(TEXTURES_BINDING, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, texture_count as u32)
            .build(
                rhi,
                vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR,
                "rt-descriptor-layout",
            );

        let set = pool.alloc_descriptor_set(&layout, "rt-descriptor-set");

        // binding 数量和数组容量是两个独立的参数
        let mut writer = RhiDescriptorWriter::new(DECLARED_BINDING_COUNT, texture_count, set);
        writer.write_acceleration_structure(TLAS_BINDING, gpu_scene.tlas().handle());
        writer.write_storage_image(OUTPUT_IMAGE_BINDING, output_image_view);
        writer.write_storage_buffer(GEOMETRY_NODES_BINDING, gpu_scene.geometry_nodes_buffer().handle());
        writer.write_storage_buffer(MATERIALS_BINDING, gpu_scene.materials_buffer().handle());
        writer.write_sampled_images(TEXTURES_BINDING, &gpu_scene.texture_descriptor_infos());
        writer.write(rhi.device());

        Self { layout, set }
    }

    #[inline]
    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }
}

/// descriptor pool 的容量：1 AS + 1 storage image + 2 storage buffer + N 纹理
pub fn create_descriptor_pool(rhi: &Rhi, texture_count: usize) -> RhiDescriptorPool {
    let pool_sizes = vec![
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            descriptor_count: 1,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count: 1,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 2,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: texture_count as u32,
        },
    ];

    RhiDescriptorPool::new(
        rhi,
        RhiDescriptorPoolCreateInfo::new(vk::DescriptorPoolCreateFlags::empty(), 1, pool_sizes),
        "rt-descriptor-pool",
    )
}
