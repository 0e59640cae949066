use std::rc::Rc;

use anyhow::Context;
use ash::vk;
use astra_rhi::core::buffer::RhiBuffer;
use astra_rhi::core::descriptor::RhiDescriptorSetLayout;
use astra_rhi::core::device::RhiDevice;
use astra_rhi::core::shader::RhiShaderModule;
use astra_rhi::rhi::Rhi;
use itertools::Itertools;

/// 每一帧推送给 shader 的常量，布局与 shader 侧保持二进制一致
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PushConstants {
    pub light_color: [f32; 4],
    pub view: [f32; 16],
    pub inv_projection: [f32; 16],
    pub frame_index: u32,
}

/// shader stage 的声明顺序：raygen，miss，closest hit
///
/// 顺序是有含义的：shader group 的下标直接决定 SBT region 的分配
const SHADER_STAGES: [(vk::ShaderStageFlags, &str); 3] = [
    (vk::ShaderStageFlags::RAYGEN_KHR, "shaders/raygen.spv"),
    (vk::ShaderStageFlags::MISS_KHR, "shaders/miss.spv"),
    (vk::ShaderStageFlags::CLOSEST_HIT_KHR, "shaders/closest_hit.spv"),
];

pub const SHADER_GROUP_COUNT: u32 = 3;

const RAYGEN_GROUP: usize = 0;
const MISS_GROUP: usize = 1;
const HIT_GROUP: usize = 2;

pub struct RtPipeline {
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,

    device: Rc<RhiDevice>,
}

impl RtPipeline {
    const MAX_RECURSION_DEPTH: u32 = 2;

    /// 构建 ray tracing pipeline
    ///
    /// shader 文件缺失属于配置错误，报告给上层并终止启动
    pub fn new(rhi: &Rhi, descriptor_set_layout: &RhiDescriptorSetLayout) -> anyhow::Result<Self> {
        let shader_modules = SHADER_STAGES
            .iter()
            .map(|(_, path)| RhiShaderModule::new(rhi.device.clone(), std::path::Path::new(path)))
            .collect::<anyhow::Result<Vec<_>>>()
            .context("failed to load a raytracing shader")?;

        let stage_infos = SHADER_STAGES
            .iter()
            .zip(shader_modules.iter())
            .map(|((stage, _), shader_module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .module(shader_module.handle())
                    .stage(*stage)
                    .name(c"main")
            })
            .collect_vec();

        // group 0 = general (raygen)，group 1 = general (miss)，group 2 = triangles hit
        let shader_groups = [
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(RAYGEN_GROUP as u32)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR),
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(MISS_GROUP as u32)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR),
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                .general_shader(vk::SHADER_UNUSED_KHR)
                .closest_hit_shader(HIT_GROUP as u32)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR),
        ];

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(Self::push_constant_stages())
            .offset(0)
            .size(size_of::<PushConstants>() as u32);

        let pipeline_layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(std::slice::from_ref(descriptor_set_layout.handle_ref()))
            .push_constant_ranges(std::slice::from_ref(&push_constant_range));

        let pipeline_layout = unsafe { rhi.device.create_pipeline_layout(&pipeline_layout_ci, None).unwrap() };

        let pipeline_ci = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stage_infos)
            .groups(&shader_groups)
            .layout(pipeline_layout)
            .max_pipeline_ray_recursion_depth(Self::MAX_RECURSION_DEPTH);

        let pipeline = unsafe {
            rhi.device
                .rt_pipeline_pf()
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&pipeline_ci),
                    None,
                )
                .unwrap()[0]
        };
        rhi.device.debug_utils().set_object_debug_name(pipeline, "rt-pipeline");

        // shader module 只在 pipeline 创建期间存活
        shader_modules.into_iter().for_each(|module| module.destroy());

        Ok(Self {
            pipeline,
            pipeline_layout,
            device: rhi.device.clone(),
        })
    }

    #[inline]
    pub fn push_constant_stages() -> vk::ShaderStageFlags {
        vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// 需要手动调用该函数释放资源，前置条件：device idle
    pub fn destroy(self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}

/// round x up to a multiple of align
///
/// * align must be a power of 2
pub fn align_up(x: u32, align: u32) -> u32 {
    (x + (align - 1)) & !(align - 1)
}

/// 将 pipeline 返回的 handle blob 按 group 切分
///
/// region 和 group 的对应是按位置固定的：region\[i\] 持有 group i 的 handle。
/// 打乱 group 的顺序而不同步调整这里，ray dispatch 会静默地执行错误的 shader
pub fn sbt_region_handles(blob: &[u8], group_count: usize, handle_size: usize) -> Vec<&[u8]> {
    assert_eq!(blob.len(), group_count * handle_size);
    blob.chunks_exact(handle_size).collect_vec()
}

/// 三段固定的 SBT region（raygen/miss/hit），每段一个 GPU buffer，
/// 内容是从 pipeline 中原样拷贝的 per-group handle
///
/// callable region 存在但始终为空
pub struct ShaderBindingTable {
    raygen_region: vk::StridedDeviceAddressRegionKHR,
    miss_region: vk::StridedDeviceAddressRegionKHR,
    hit_region: vk::StridedDeviceAddressRegionKHR,
    callable_region: vk::StridedDeviceAddressRegionKHR,

    _region_buffers: Vec<RhiBuffer>,
}

impl ShaderBindingTable {
    pub fn new(rhi: &Rhi, pipeline: &RtPipeline) -> Self {
        let rt_pipeline_props = rhi.rt_pipeline_props();
        let handle_size = rt_pipeline_props.shader_group_handle_size;
        let handle_alignment = rt_pipeline_props.shader_group_handle_alignment;
        let handle_size_aligned = align_up(handle_size, handle_alignment);

        let blob = unsafe {
            rhi.device
                .rt_pipeline_pf()
                .get_ray_tracing_shader_group_handles(
                    pipeline.handle(),
                    0,
                    SHADER_GROUP_COUNT,
                    (SHADER_GROUP_COUNT * handle_size) as usize,
                )
                .unwrap()
        };

        // NOTE: region 的顺序和 pipeline 中 shader group 的声明顺序一致
        let region_names = ["sbt-raygen", "sbt-miss", "sbt-hit"];
        let region_buffers = sbt_region_handles(&blob, SHADER_GROUP_COUNT as usize, handle_size as usize)
            .into_iter()
            .zip(region_names)
            .map(|(handle, name)| {
                let mut buffer = RhiBuffer::new_sbt_region_buffer(rhi, handle_size as vk::DeviceSize, name);
                buffer.transfer_data_by_mem_map(handle);
                buffer
            })
            .collect_vec();

        // trace dispatch 消费的是 stride（对齐后的），而不是 buffer 的分配大小
        let make_region = |buffer: &RhiBuffer| {
            vk::StridedDeviceAddressRegionKHR::default()
                .device_address(buffer.device_address())
                .stride(handle_size_aligned as vk::DeviceSize)
                .size(handle_size_aligned as vk::DeviceSize)
        };

        Self {
            raygen_region: make_region(&region_buffers[0]),
            miss_region: make_region(&region_buffers[1]),
            hit_region: make_region(&region_buffers[2]),
            callable_region: vk::StridedDeviceAddressRegionKHR::default(),
            _region_buffers: region_buffers,
        }
    }

    #[inline]
    pub fn raygen_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.raygen_region
    }

    #[inline]
    pub fn miss_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.miss_region
    }

    #[inline]
    pub fn hit_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.hit_region
    }

    #[inline]
    pub fn callable_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.callable_region
    }

    /// 需要手动调用该函数释放资源，前置条件：device idle
    pub fn destroy(self) {
        drop(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constants_layout_is_binary_stable() {
        // vec4(16) + mat4(64) + mat4(64) + uint(4)
        assert_eq!(size_of::<PushConstants>(), 148);
        assert_eq!(std::mem::offset_of!(PushConstants, light_color), 0);
        assert_eq!(std::mem::offset_of!(PushConstants, view), 16);
        assert_eq!(std::mem::offset_of!(PushConstants, inv_projection), 80);
        assert_eq!(std::mem::offset_of!(PushConstants, frame_index), 144);
    }

    #[test]
    fn test_align_up_rounds_to_multiple() {
        for align in [1_u32, 2, 4, 8, 16, 32, 64, 128] {
            for x in [0_u32, 1, 15, 16, 17, 31, 32, 33, 100, 255] {
                let aligned = align_up(x, align);
                assert_eq!(aligned % align, 0);
                assert!(aligned >= x);
                // 向上取整不会跨过一个完整的 align
                assert!(aligned < x + align);
            }
        }
    }

    #[test]
    fn test_sbt_regions_keep_group_order() {
        let handle_size = 4_usize;
        // group 0/1/2 各有一个可区分的 handle
        let blob: Vec<u8> = vec![
            0xA0, 0xA1, 0xA2, 0xA3, //
            0xB0, 0xB1, 0xB2, 0xB3, //
            0xC0, 0xC1, 0xC2, 0xC3,
        ];
        let regions = sbt_region_handles(&blob, 3, handle_size);

        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0], &blob[0..4]);
        assert_eq!(regions[1], &blob[4..8]);
        assert_eq!(regions[2], &blob[8..12]);
    }

    #[test]
    #[should_panic]
    fn test_sbt_region_handles_rejects_truncated_blob() {
        let blob = vec![0_u8; 11];
        sbt_region_handles(&blob, 3, 4);
    }
}
