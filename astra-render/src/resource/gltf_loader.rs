//! 导入 gltf 格式的模型
//!
//! gltf 的格式，参考 https://www.khronos.org/files/gltf20-reference-guide.pdf

use anyhow::Context;
use itertools::Itertools;

/// 与 closest hit shader 共享的顶点布局
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// material buffer 中的一项，std430 布局
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Material {
    pub base_color_factor: [f32; 4],
    pub emissive_factor: [f32; 4],
    /// 纹理数组中的下标，-1 表示没有纹理
    pub base_color_texture: i32,
    pub _padding: [i32; 3],
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color_factor: [1.0, 1.0, 1.0, 1.0],
            emissive_factor: [0.0, 0.0, 0.0, 0.0],
            base_color_texture: -1,
            _padding: [0; 3],
        }
    }
}

/// 一个可独立渲染的 primitive：平铺的 vertex/index 数组 + material 下标
pub struct PrimitiveData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material_index: u32,
}

impl PrimitiveData {
    #[inline]
    pub fn triangle_count(&self) -> u32 {
        self.indices.len() as u32 / 3
    }
}

pub struct MeshData {
    pub primitives: Vec<PrimitiveData>,
}

pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba8: Vec<u8>,
    pub name: String,
}

/// 资产加载的输出，Geometry Builder 和 Descriptor Binder 原样消费
pub struct SceneData {
    pub meshes: Vec<MeshData>,
    pub materials: Vec<Material>,
    pub textures: Vec<TextureData>,
}

impl SceneData {
    /// 所有 mesh 的 primitive 总数，等于需要构建的 BLAS 数量
    #[inline]
    pub fn primitive_count(&self) -> usize {
        self.meshes.iter().map(|m| m.primitives.len()).sum()
    }
}

/// 从 gltf 文件中载入模型
///
/// 支持 mesh 和 material，不支持 skin，动画
pub struct GltfLoader {
    gltf_doc: gltf::Document,
    buffers: Vec<gltf::buffer::Data>,
    images: Vec<gltf::image::Data>,
}

impl GltfLoader {
    pub fn load(path: &std::path::Path) -> anyhow::Result<SceneData> {
        let (doc, buffers, images) =
            gltf::import(path).with_context(|| format!("failed to open gltf file: {}", path.display()))?;

        let loader = Self {
            gltf_doc: doc,
            buffers,
            images,
        };

        let materials = loader.process_materials();
        let textures = loader.process_textures()?;
        let meshes = loader.process_meshes()?;

        let scene = SceneData {
            meshes,
            materials,
            textures,
        };
        log::info!(
            "scene loaded: {} meshes, {} primitives, {} materials, {} textures",
            scene.meshes.len(),
            scene.primitive_count(),
            scene.materials.len(),
            scene.textures.len()
        );
        Ok(scene)
    }

    fn process_materials(&self) -> Vec<Material> {
        let materials = self
            .gltf_doc
            .materials()
            .filter(|m| m.index().is_some())
            .map(|m| {
                let pbr = m.pbr_metallic_roughness();
                let emissive = m.emissive_factor();
                Material {
                    base_color_factor: pbr.base_color_factor(),
                    emissive_factor: [emissive[0], emissive[1], emissive[2], 0.0],
                    base_color_texture: pbr
                        .base_color_texture()
                        .map_or(-1, |info| info.texture().source().index() as i32),
                    _padding: [0; 3],
                }
            })
            .collect_vec();

        // material buffer 不能为空，shader 中的 index 0 总是有效的
        if materials.is_empty() { vec![Material::default()] } else { materials }
    }

    fn process_textures(&self) -> anyhow::Result<Vec<TextureData>> {
        let mut textures = self
            .images
            .iter()
            .enumerate()
            .map(|(idx, image)| {
                let rgba8 = convert_to_rgba8(image.format, &image.pixels)
                    .with_context(|| format!("unsupported texture format in image #{idx}"))?;
                Ok(TextureData {
                    width: image.width,
                    height: image.height,
                    rgba8,
                    name: format!("gltf-texture-{idx}"),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        // 纹理数组的长度不能是 0，descriptor array 至少要有一个元素
        if textures.is_empty() {
            textures.push(TextureData {
                width: 1,
                height: 1,
                rgba8: vec![255, 255, 255, 255],
                name: "fallback-white".to_string(),
            });
        }
        Ok(textures)
    }

    /// gltf 的一个 mesh 中可以有多个 primitive，每个 primitive 都是单独可渲染的，
    /// 这里将每个 primitive 平铺为自己的 vertex/index 数组
    fn process_meshes(&self) -> anyhow::Result<Vec<MeshData>> {
        self.gltf_doc
            .meshes()
            .map(|mesh| {
                let primitives = mesh
                    .primitives()
                    .map(|primitive| self.process_primitive(&primitive))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Ok(MeshData { primitives })
            })
            .collect()
    }

    fn process_primitive(&self, primitive: &gltf::Primitive) -> anyhow::Result<PrimitiveData> {
        let reader = primitive.reader(|buffer| self.buffers.get(buffer.index()).map(|data| data.0.as_slice()));

        let positions = reader.read_positions().context("primitive has no positions")?.collect_vec();
        let normals = reader.read_normals().map(|iter| iter.collect_vec()).unwrap_or_default();
        let uvs = reader.read_tex_coords(0).map(|iter| iter.into_f32().collect_vec()).unwrap_or_default();

        let vertices = positions
            .iter()
            .enumerate()
            .map(|(idx, pos)| Vertex {
                position: *pos,
                normal: normals.get(idx).copied().unwrap_or([0.0, 1.0, 0.0]),
                uv: uvs.get(idx).copied().unwrap_or([0.0, 0.0]),
            })
            .collect_vec();

        let indices =
            reader.read_indices().context("primitive has no indices")?.into_u32().collect_vec();

        Ok(PrimitiveData {
            vertices,
            indices,
            material_index: primitive.material().index().unwrap_or(0) as u32,
        })
    }
}

/// 将 gltf 图像数据统一转换为 RGBA8
fn convert_to_rgba8(format: gltf::image::Format, pixels: &[u8]) -> Option<Vec<u8>> {
    match format {
        gltf::image::Format::R8G8B8A8 => Some(pixels.to_vec()),
        gltf::image::Format::R8G8B8 => {
            Some(pixels.chunks_exact(3).flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255]).collect())
        }
        gltf::image::Format::R8 => Some(pixels.iter().flat_map(|r| [*r, *r, *r, 255]).collect()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_is_binary_stable() {
        // position(12) + normal(12) + uv(8)
        assert_eq!(size_of::<Vertex>(), 32);
        assert_eq!(std::mem::offset_of!(Vertex, position), 0);
        assert_eq!(std::mem::offset_of!(Vertex, normal), 12);
        assert_eq!(std::mem::offset_of!(Vertex, uv), 24);
    }

    #[test]
    fn test_material_layout_matches_std430() {
        assert_eq!(size_of::<Material>(), 48);
        assert_eq!(std::mem::offset_of!(Material, base_color_texture), 32);
    }

    #[test]
    fn test_rgb8_gains_opaque_alpha() {
        let rgba = convert_to_rgba8(gltf::image::Format::R8G8B8, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(rgba, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn test_r8_replicates_to_grey() {
        let rgba = convert_to_rgba8(gltf::image::Format::R8, &[7]).unwrap();
        assert_eq!(rgba, vec![7, 7, 7, 255]);
    }
}
