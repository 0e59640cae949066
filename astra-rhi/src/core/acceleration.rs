//! Ray Tracing 所需的加速结构

use std::rc::Rc;

use ash::vk;
use itertools::Itertools;

use crate::{
    core::{buffer::RhiBuffer, command_buffer::RhiCommandBuffer, device::RhiDevice},
    rhi::Rhi,
};

/// BLAS/TLAS 的统一封装
///
/// # Destroy
/// 需要手动 destroy；并且只能在 device idle 之后进行，
/// TLAS 只能引用仍然存活的 BLAS
pub struct RhiAcceleration {
    acceleration_structure: vk::AccelerationStructureKHR,
    _buffer: RhiBuffer,

    device: Rc<RhiDevice>,
}
impl RhiAcceleration {
    /// 同步构建 blas，基于单个 geometry 的 vertex/index buffer
    ///
    /// # 构建过程
    ///
    /// 1. 查询构建 blas 所需的尺寸
    /// 2. 分配 scratch buffer 和 result buffer
    /// 3. 录制 build 命令，geometry 数据通过 device address 直接引用
    /// 4. 提交并阻塞等待构建完成
    ///
    /// 构建失败是致命的：加速结构的构建属于一次性的 setup，不是可重试的路径
    pub fn build_blas_sync(
        rhi: &Rhi,
        vertex_buffer: &RhiBuffer,
        index_buffer: &RhiBuffer,
        primitive_count: u32,
        vertex_count: u32,
        vertex_stride: vk::DeviceSize,
        transform_buffer: &RhiBuffer,
        debug_name: impl AsRef<str>,
    ) -> Self {
        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                triangles: vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                    .vertex_format(vk::Format::R32G32B32_SFLOAT)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: vertex_buffer.device_address(),
                    })
                    .vertex_stride(vertex_stride)
                    .max_vertex(vertex_count - 1)
                    .index_type(vk::IndexType::UINT32)
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: index_buffer.device_address(),
                    })
                    .transform_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: transform_buffer.device_address(),
                    }),
            });
        let range_info = vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(primitive_count);

        // 使用部分完整的 AccelerationStructureBuildGeometryInfo 来查询所需的资源大小
        let mut build_geometry_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .geometries(std::slice::from_ref(&geometry))
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD);

        // blas 所需的尺寸信息
        let size_info = unsafe {
            let mut size_info = vk::AccelerationStructureBuildSizesInfoKHR::default();
            rhi.device().acceleration_structure_pf().get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_geometry_info,
                &[primitive_count],
                &mut size_info,
            );
            size_info
        };

        let acceleration = Self::new(
            rhi,
            size_info.acceleration_structure_size,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            format!("{}-blas", debug_name.as_ref()),
        );

        let scratch_buffer = RhiBuffer::new_acceleration_scratch_buffer(
            rhi,
            size_info.build_scratch_size,
            format!("{}-blas-scratch-buffer", debug_name.as_ref()),
        );

        // 填充 build geometry info 的剩余部分以 build blas
        build_geometry_info.dst_acceleration_structure = acceleration.acceleration_structure;
        build_geometry_info.scratch_data = vk::DeviceOrHostAddressKHR {
            device_address: scratch_buffer.device_address(),
        };

        // 同步等待 build 完成，scratch buffer 在此之后才能释放
        RhiCommandBuffer::one_time_exec(
            rhi,
            rhi.graphics_command_pool.clone(),
            &rhi.graphics_queue,
            |cmd| {
                cmd.build_acceleration_structure(&build_geometry_info, std::slice::from_ref(&range_info));
            },
            "build-blas",
        );

        acceleration
    }

    /// 同步构建 tlas
    ///
    /// # 构建过程
    /// 1. 上传 instance 数组
    /// 2. 查询构建 tlas 所需的尺寸
    /// 3. 构建 tlas
    ///
    /// 前置条件：instances 引用的所有 blas 都已经构建完成且仍然存活
    pub fn build_tlas_sync(
        rhi: &Rhi,
        instances: &[vk::AccelerationStructureInstanceKHR],
        debug_name: impl AsRef<str>,
    ) -> Self {
        let mut acceleration_instance_buffer = RhiBuffer::new_acceleration_instance_buffer(
            rhi,
            size_of_val(instances) as vk::DeviceSize,
            format!("{}-acceleration-instance-buffer", debug_name.as_ref()),
        );
        acceleration_instance_buffer.transfer_data_sync(rhi, instances);

        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                    // false: data 是 &[vk::AccelerationStructureInstanceKHR]
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: acceleration_instance_buffer.device_address(),
                    }),
            });
        let range_info = vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(instances.len() as u32);

        let mut build_geometry_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .geometries(std::slice::from_ref(&geometry));

        // 获得 AccelerationStructure 所需的尺寸
        let size_info = unsafe {
            let mut size_info = vk::AccelerationStructureBuildSizesInfoKHR::default();
            rhi.device().acceleration_structure_pf().get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_geometry_info,
                &[instances.len() as u32],
                &mut size_info,
            );

            size_info
        };

        let acceleration = Self::new(
            rhi,
            size_info.acceleration_structure_size,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            format!("{}-tlas", debug_name.as_ref()),
        );

        let scratch_buffer = RhiBuffer::new_acceleration_scratch_buffer(
            rhi,
            size_info.build_scratch_size,
            format!("{}-tlas-scratch-buffer", debug_name.as_ref()),
        );

        // 补全剩下的 build info
        build_geometry_info.dst_acceleration_structure = acceleration.acceleration_structure;
        build_geometry_info.scratch_data.device_address = scratch_buffer.device_address();

        // 正式构建 TLAS，构建完成后 device handle 即可被 descriptor write 使用
        RhiCommandBuffer::one_time_exec(
            rhi,
            rhi.graphics_command_pool.clone(),
            &rhi.graphics_queue,
            |cmd| {
                cmd.build_acceleration_structure(&build_geometry_info, std::slice::from_ref(&range_info));
            },
            "build-tlas",
        );

        acceleration
    }

    /// 根据 blas 数组生成 instance 记录，每个 instance 都可以有自己的 transform
    ///
    /// 当前的场景只使用同一个 transform，但 instance 记录本身是 per-instance 的
    pub fn tlas_instances(
        blas_addresses: &[vk::DeviceAddress],
        transform: vk::TransformMatrixKHR,
    ) -> Vec<vk::AccelerationStructureInstanceKHR> {
        blas_addresses
            .iter()
            .map(|addr| vk::AccelerationStructureInstanceKHR {
                transform,
                instance_custom_index_and_mask: vk::Packed24_8::new(0, 0xFF),
                instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                    0,
                    vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
                ),
                acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                    device_handle: *addr,
                },
            })
            .collect_vec()
    }

    /// 创建 AccelerationStructure 以及 buffer
    fn new(rhi: &Rhi, size: vk::DeviceSize, ty: vk::AccelerationStructureTypeKHR, debug_name: impl AsRef<str>) -> Self {
        let buffer = RhiBuffer::new_acceleration_buffer(rhi, size, debug_name.as_ref());

        let create_info = vk::AccelerationStructureCreateInfoKHR::default() //
            .ty(ty)
            .size(size)
            .buffer(buffer.handle());

        let acceleration_structure = unsafe {
            rhi.device().acceleration_structure_pf().create_acceleration_structure(&create_info, None).unwrap()
        };
        rhi.device().debug_utils().set_object_debug_name(acceleration_structure, debug_name);

        Self {
            device: rhi.device.clone(),
            acceleration_structure,
            _buffer: buffer,
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.acceleration_structure
    }

    #[inline]
    pub fn get_device_address(&self) -> vk::DeviceAddress {
        unsafe {
            self.device.acceleration_structure_pf().get_acceleration_structure_device_address(
                &vk::AccelerationStructureDeviceAddressInfoKHR::default()
                    .acceleration_structure(self.acceleration_structure),
            )
        }
    }

    #[inline]
    pub fn destroy(self) {
        drop(self)
    }
}
impl Drop for RhiAcceleration {
    fn drop(&mut self) {
        unsafe {
            self.device.acceleration_structure_pf().destroy_acceleration_structure(self.acceleration_structure, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: vk::TransformMatrixKHR = vk::TransformMatrixKHR {
        matrix: [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        ],
    };

    #[test]
    fn test_tlas_instance_count_matches_blas_count() {
        let addresses = vec![0x1000_u64, 0x2000, 0x3000];
        let instances = RhiAcceleration::tlas_instances(&addresses, IDENTITY);
        assert_eq!(instances.len(), addresses.len());
    }

    #[test]
    fn test_tlas_instances_keep_blas_order() {
        let addresses = vec![0xAAAA_u64, 0xBBBB];
        let instances = RhiAcceleration::tlas_instances(&addresses, IDENTITY);
        // acceleration_structure_reference 是 union，读取需要 unsafe
        unsafe {
            assert_eq!(instances[0].acceleration_structure_reference.device_handle, 0xAAAA);
            assert_eq!(instances[1].acceleration_structure_reference.device_handle, 0xBBBB);
        }
    }

    #[test]
    fn test_tlas_instances_visible_to_all_rays() {
        let instances = RhiAcceleration::tlas_instances(&[0x1_u64], IDENTITY);
        assert_eq!(instances[0].instance_custom_index_and_mask.high_8(), 0xFF);
    }
}
