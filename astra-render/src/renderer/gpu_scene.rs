use ash::vk;
use astra_rhi::core::acceleration::RhiAcceleration;
use astra_rhi::core::buffer::RhiBuffer;
use astra_rhi::core::image::RhiImage2D;
use astra_rhi::core::texture::RhiTexture2D;
use astra_rhi::rhi::Rhi;
use itertools::Itertools;

use crate::resource::gltf_loader::{SceneData, Vertex};

/// shader 通过下标访问的 geometry 记录，每个 primitive 一条
///
/// 数量和顺序在场景加载时固定，之后不再变化
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GeometryNode {
    pub vertex_buffer_address: u64,
    pub index_buffer_address: u64,
    pub material_index: u32,
    pub _padding: u32,
}

/// 纯函数：按声明顺序打包 geometry 记录
pub fn pack_geometry_nodes(records: &[(u64, u64, u32)]) -> Vec<GeometryNode> {
    records
        .iter()
        .map(|(vertex_address, index_address, material_index)| GeometryNode {
            vertex_buffer_address: *vertex_address,
            index_buffer_address: *index_address,
            material_index: *material_index,
            _padding: 0,
        })
        .collect_vec()
}

const IDENTITY_TRANSFORM: vk::TransformMatrixKHR = vk::TransformMatrixKHR {
    matrix: [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0,
    ],
};

/// 上传完成的单个 primitive
struct GpuPrimitive {
    vertex_buffer: RhiBuffer,
    index_buffer: RhiBuffer,
    primitive_count: u32,
    vertex_count: u32,
    material_index: u32,
}

/// 场景的 GPU 侧表示：geometry buffer、material buffer、纹理，
/// 以及每个 primitive 一个 BLAS 和单个 TLAS
///
/// 启动之后全部不可变，所有 frame slot 可以无锁共享读取
pub struct GpuScene {
    primitives: Vec<GpuPrimitive>,
    _transform_buffer: RhiBuffer,

    geometry_nodes_buffer: RhiBuffer,
    materials_buffer: RhiBuffer,
    textures: Vec<RhiTexture2D>,

    blases: Vec<RhiAcceleration>,
    tlas: Option<RhiAcceleration>,
}

impl GpuScene {
    pub fn new(rhi: &Rhi, scene: &SceneData) -> Self {
        // 1. 上传所有 primitive 的 vertex/index buffer
        let primitives = scene
            .meshes
            .iter()
            .enumerate()
            .flat_map(|(mesh_idx, mesh)| {
                mesh.primitives.iter().enumerate().map(move |(prim_idx, prim)| (mesh_idx, prim_idx, prim))
            })
            .map(|(mesh_idx, prim_idx, prim)| {
                let name = format!("mesh-{mesh_idx}-primitive-{prim_idx}");

                let mut vertex_buffer =
                    RhiBuffer::new_vertex_buffer(rhi, size_of_val(prim.vertices.as_slice()), format!("{name}-vertex"));
                vertex_buffer.transfer_data_sync(rhi, &prim.vertices);

                let mut index_buffer =
                    RhiBuffer::new_index_buffer(rhi, size_of_val(prim.indices.as_slice()), format!("{name}-index"));
                index_buffer.transfer_data_sync(rhi, &prim.indices);

                GpuPrimitive {
                    vertex_buffer,
                    index_buffer,
                    primitive_count: prim.triangle_count(),
                    vertex_count: prim.vertices.len() as u32,
                    material_index: prim.material_index,
                }
            })
            .collect_vec();
        log::info!("uploaded {} primitives", primitives.len());

        // BLAS build 通过 device address 读取 transform
        let transform_buffer = RhiBuffer::new_device_buffer_with_data(
            rhi,
            std::slice::from_ref(&IDENTITY_TRANSFORM),
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            "shared-transform",
        );

        // 2. geometry 记录打包进单个 buffer，shader 按下标访问
        let geometry_records = primitives
            .iter()
            .map(|p| (p.vertex_buffer.device_address(), p.index_buffer.device_address(), p.material_index))
            .collect_vec();
        let geometry_nodes = pack_geometry_nodes(&geometry_records);
        let geometry_nodes_buffer = RhiBuffer::new_device_buffer_with_data(
            rhi,
            &geometry_nodes,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            "geometry-nodes",
        );

        let materials_buffer = RhiBuffer::new_device_buffer_with_data(
            rhi,
            &scene.materials,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            "materials",
        );

        let textures = scene
            .textures
            .iter()
            .map(|tex| {
                let image = RhiImage2D::from_rgba8(rhi, tex.width, tex.height, &tex.rgba8, &tex.name);
                RhiTexture2D::new(rhi, image, &tex.name)
            })
            .collect_vec();

        // 3. 每个 primitive 一个 BLAS，逐个同步构建
        let blases = primitives
            .iter()
            .enumerate()
            .map(|(idx, prim)| {
                RhiAcceleration::build_blas_sync(
                    rhi,
                    &prim.vertex_buffer,
                    &prim.index_buffer,
                    prim.primitive_count,
                    prim.vertex_count,
                    size_of::<Vertex>() as vk::DeviceSize,
                    &transform_buffer,
                    format!("primitive-{idx}"),
                )
            })
            .collect_vec();

        // 4. 单个 TLAS 引用所有 BLAS，此时 BLAS 均已构建完成
        let blas_addresses = blases.iter().map(|blas| blas.get_device_address()).collect_vec();
        let instances = RhiAcceleration::tlas_instances(&blas_addresses, IDENTITY_TRANSFORM);
        let tlas = RhiAcceleration::build_tlas_sync(rhi, &instances, "scene");

        log::info!("built {} blas + 1 tlas ({} instances)", blases.len(), instances.len());

        Self {
            primitives,
            _transform_buffer: transform_buffer,
            geometry_nodes_buffer,
            materials_buffer,
            textures,
            blases,
            tlas: Some(tlas),
        }
    }

    #[inline]
    pub fn tlas(&self) -> &RhiAcceleration {
        self.tlas.as_ref().unwrap()
    }

    #[inline]
    pub fn geometry_nodes_buffer(&self) -> &RhiBuffer {
        &self.geometry_nodes_buffer
    }

    #[inline]
    pub fn materials_buffer(&self) -> &RhiBuffer {
        &self.materials_buffer
    }

    #[inline]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn blas_count(&self) -> usize {
        self.blases.len()
    }

    pub fn texture_descriptor_infos(&self) -> Vec<vk::DescriptorImageInfo> {
        self.textures
            .iter()
            .map(|tex| tex.descriptor_image_info(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
            .collect_vec()
    }

    /// 销毁的第一阶段：TLAS 必须先于它引用的 BLAS 销毁
    ///
    /// 前置条件：device idle
    pub fn destroy_acceleration(&mut self) {
        if let Some(tlas) = self.tlas.take() {
            tlas.destroy();
        }
        for blas in std::mem::take(&mut self.blases).into_iter() {
            blas.destroy();
        }
    }

    /// 销毁的第二阶段：geometry 记录、场景资源
    pub fn destroy_resources(mut self) {
        assert!(self.tlas.is_none(), "acceleration structures must be destroyed first");
        drop(std::mem::take(&mut self.primitives));
        drop(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_node_layout_is_binary_stable() {
        // uint64(8) + uint64(8) + uint(4) + pad(4)
        assert_eq!(size_of::<GeometryNode>(), 24);
        assert_eq!(std::mem::offset_of!(GeometryNode, vertex_buffer_address), 0);
        assert_eq!(std::mem::offset_of!(GeometryNode, index_buffer_address), 8);
        assert_eq!(std::mem::offset_of!(GeometryNode, material_index), 16);
    }

    #[test]
    fn test_pack_geometry_nodes_keeps_declaration_order() {
        let records = vec![(0x100_u64, 0x200_u64, 7_u32), (0x300, 0x400, 2)];
        let nodes = pack_geometry_nodes(&records);

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].vertex_buffer_address, 0x100);
        assert_eq!(nodes[0].index_buffer_address, 0x200);
        assert_eq!(nodes[0].material_index, 7);
        assert_eq!(nodes[1].vertex_buffer_address, 0x300);
        assert_eq!(nodes[1].material_index, 2);
    }
}
