use std::mem::offset_of;
use std::rc::Rc;

use anyhow::Context;
use ash::vk;
use astra_rhi::core::buffer::{RhiBuffer, RhiBufferCreateInfo};
use astra_rhi::core::command_buffer::RhiCommandBuffer;
use astra_rhi::core::descriptor::{
    RhiDescriptorLayoutBuilder, RhiDescriptorPool, RhiDescriptorPoolCreateInfo, RhiDescriptorSetLayout,
    RhiDescriptorWriter,
};
use astra_rhi::core::device::RhiDevice;
use astra_rhi::core::image::RhiImage2D;
use astra_rhi::core::shader::RhiShaderModule;
use astra_rhi::core::texture::RhiTexture2D;
use astra_rhi::rhi::Rhi;

use crate::renderer::frame_context::FRAMES_IN_FLIGHT;

/// scale + translate，将 imgui 的屏幕坐标映射到 NDC
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct GuiPushConstants {
    scale: [f32; 2],
    translate: [f32; 2],
}

/// imgui 绘制所需的 vertex buffer 和 index buffer
///
/// host 可见，每帧重写；slot 的 fence 保证上一次使用已经完成
struct GuiMesh {
    vertex_buffer: RhiBuffer,
    index_buffer: RhiBuffer,
}

impl GuiMesh {
    fn from_draw_data(rhi: &Rhi, draw_data: &imgui::DrawData, slot: usize) -> Self {
        let mut vertices: Vec<imgui::DrawVert> = Vec::with_capacity(draw_data.total_vtx_count as usize);
        let mut indices: Vec<imgui::DrawIdx> = Vec::with_capacity(draw_data.total_idx_count as usize);
        for draw_list in draw_data.draw_lists() {
            vertices.extend_from_slice(draw_list.vtx_buffer());
            indices.extend_from_slice(draw_list.idx_buffer());
        }

        let host_visible = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ..Default::default()
        };

        let mut vertex_buffer = RhiBuffer::new(
            rhi,
            RhiBufferCreateInfo::new(size_of_val(vertices.as_slice()) as vk::DeviceSize, vk::BufferUsageFlags::VERTEX_BUFFER),
            &host_visible,
            format!("imgui-vertex-{slot}"),
        );
        vertex_buffer.transfer_data_by_mem_map(&vertices);

        let mut index_buffer = RhiBuffer::new(
            rhi,
            RhiBufferCreateInfo::new(size_of_val(indices.as_slice()) as vk::DeviceSize, vk::BufferUsageFlags::INDEX_BUFFER),
            &host_visible,
            format!("imgui-index-{slot}"),
        );
        index_buffer.transfer_data_by_mem_map(&indices);

        Self {
            vertex_buffer,
            index_buffer,
        }
    }
}

/// 将 imgui 的 draw data 画进 presentable image 的 pass
///
/// widget 逻辑不在这里，pass 只消费编译好的 draw data
pub struct GuiPass {
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,

    _font_texture: RhiTexture2D,
    _descriptor_pool: RhiDescriptorPool,
    _descriptor_layout: RhiDescriptorSetLayout,
    font_descriptor_set: vk::DescriptorSet,

    /// 每个 frame slot 一份 mesh 数据
    meshes: Vec<Option<GuiMesh>>,

    device: Rc<RhiDevice>,
}

impl GuiPass {
    const VERTEX_SHADER_PATH: &'static str = "shaders/imgui.vert.spv";
    const FRAGMENT_SHADER_PATH: &'static str = "shaders/imgui.frag.spv";

    pub fn new(rhi: &Rhi, imgui_ctx: &mut imgui::Context, color_format: vk::Format) -> anyhow::Result<Self> {
        let font_texture = Self::create_font_texture(rhi, imgui_ctx);

        let descriptor_pool = RhiDescriptorPool::new(
            rhi,
            RhiDescriptorPoolCreateInfo::new(
                vk::DescriptorPoolCreateFlags::empty(),
                1,
                vec![vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: 1,
                }],
            ),
            "imgui",
        );
        let descriptor_layout = RhiDescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .build(rhi, vk::ShaderStageFlags::FRAGMENT, "imgui-descriptor-layout");
        let font_descriptor_set = descriptor_pool.alloc_descriptor_set(&descriptor_layout, "imgui-font-set");

        let mut writer = RhiDescriptorWriter::new(1, 1, font_descriptor_set);
        writer.write_sampled_images(
            0,
            std::slice::from_ref(&font_texture.descriptor_image_info(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)),
        );
        writer.write(rhi.device());

        let (pipeline, pipeline_layout) = Self::create_pipeline(rhi, &descriptor_layout, color_format)?;

        Ok(Self {
            pipeline,
            pipeline_layout,
            _font_texture: font_texture,
            _descriptor_pool: descriptor_pool,
            _descriptor_layout: descriptor_layout,
            font_descriptor_set,
            meshes: (0..FRAMES_IN_FLIGHT).map(|_| None).collect(),
            device: rhi.device.clone(),
        })
    }

    /// 将字体 atlas 上传为 texture
    fn create_font_texture(rhi: &Rhi, imgui_ctx: &mut imgui::Context) -> RhiTexture2D {
        let fonts = imgui_ctx.fonts();
        let atlas_texture = fonts.build_rgba32_texture();

        let image =
            RhiImage2D::from_rgba8(rhi, atlas_texture.width, atlas_texture.height, atlas_texture.data, "imgui-fonts");
        let texture = RhiTexture2D::new(rhi, image, "imgui-fonts");

        fonts.tex_id = imgui::TextureId::from(0_usize);
        texture
    }

    fn create_pipeline(
        rhi: &Rhi,
        descriptor_layout: &RhiDescriptorSetLayout,
        color_format: vk::Format,
    ) -> anyhow::Result<(vk::Pipeline, vk::PipelineLayout)> {
        let vertex_shader = RhiShaderModule::new(rhi.device.clone(), std::path::Path::new(Self::VERTEX_SHADER_PATH))
            .context("failed to load imgui vertex shader")?;
        let fragment_shader =
            RhiShaderModule::new(rhi.device.clone(), std::path::Path::new(Self::FRAGMENT_SHADER_PATH))
                .context("failed to load imgui fragment shader")?;

        let stage_infos = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader.handle())
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_shader.handle())
                .name(c"main"),
        ];

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(size_of::<GuiPushConstants>() as u32);
        let pipeline_layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(std::slice::from_ref(descriptor_layout.handle_ref()))
            .push_constant_ranges(std::slice::from_ref(&push_constant_range));
        let pipeline_layout = unsafe { rhi.device.create_pipeline_layout(&pipeline_layout_ci, None).unwrap() };

        let binding_desc = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<imgui::DrawVert>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attribute_desc = [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(imgui::DrawVert, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(imgui::DrawVert, uv) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R8G8B8A8_UNORM,
                offset: offset_of!(imgui::DrawVert, col) as u32,
            },
        ];

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_desc)
            .vertex_attribute_descriptions(&attribute_desc);

        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let rasterizer_info = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE);

        let viewports = [Default::default()];
        let scissors = [Default::default()];
        let viewport_info = vk::PipelineViewportStateCreateInfo::default().viewports(&viewports).scissors(&scissors);

        let multisampling_info = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(
                vk::ColorComponentFlags::R
                    | vk::ColorComponentFlags::G
                    | vk::ColorComponentFlags::B
                    | vk::ColorComponentFlags::A,
            )
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)];
        let color_blending_info = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&color_blend_attachments)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        let dynamic_states = [vk::DynamicState::SCISSOR, vk::DynamicState::VIEWPORT];
        let dynamic_states_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_attachment_formats = [color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_attachment_formats);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly_info)
            .rasterization_state(&rasterizer_info)
            .viewport_state(&viewport_info)
            .multisample_state(&multisampling_info)
            .color_blend_state(&color_blending_info)
            .dynamic_state(&dynamic_states_info)
            .layout(pipeline_layout)
            .push_next(&mut rendering_info);

        let pipeline = unsafe {
            rhi.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
                .unwrap()[0]
        };
        rhi.device.debug_utils().set_object_debug_name(pipeline, "imgui-pipeline");

        vertex_shader.destroy();
        fragment_shader.destroy();

        Ok((pipeline, pipeline_layout))
    }

    /// 将 draw data 画进 target image，调用时 target 需要处于 color attachment layout
    pub fn draw(
        &mut self,
        rhi: &Rhi,
        cmd: &RhiCommandBuffer,
        draw_data: &imgui::DrawData,
        target_view: vk::ImageView,
        target_extent: vk::Extent2D,
        slot: usize,
    ) {
        if draw_data.total_vtx_count == 0 {
            return;
        }

        // 覆盖上一次该 slot 的 mesh；slot 的 fence 保证 GPU 已经用完了它
        self.meshes[slot] = Some(GuiMesh::from_draw_data(rhi, draw_data, slot));
        let mesh = self.meshes[slot].as_ref().unwrap();

        let attachment_info = vk::RenderingAttachmentInfo::default()
            .image_view(target_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE);
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target_extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&attachment_info));

        cmd.begin_label("ui-pass", glam::vec4(0.0, 0.5, 1.0, 1.0));
        cmd.cmd_begin_rendering(&rendering_info);

        cmd.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline_layout,
            0,
            &[self.font_descriptor_set],
            &[],
        );

        cmd.cmd_set_viewport(
            0,
            &[vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: draw_data.display_size[0] * draw_data.framebuffer_scale[0],
                height: draw_data.display_size[1] * draw_data.framebuffer_scale[1],
                min_depth: 0.0,
                max_depth: 1.0,
            }],
        );

        // 屏幕坐标 → NDC
        let scale = [2.0 / draw_data.display_size[0], 2.0 / draw_data.display_size[1]];
        let push_constants = GuiPushConstants {
            scale,
            translate: [
                -1.0 - draw_data.display_pos[0] * scale[0],
                -1.0 - draw_data.display_pos[1] * scale[1],
            ],
        };
        cmd.cmd_push_constants(
            self.pipeline_layout,
            vk::ShaderStageFlags::VERTEX,
            0,
            bytemuck::bytes_of(&push_constants),
        );

        cmd.cmd_bind_vertex_buffers(0, &[&mesh.vertex_buffer], &[0]);
        // imgui 的 DrawIdx 是 u16
        cmd.cmd_bind_index_buffer(&mesh.index_buffer, 0, vk::IndexType::UINT16);

        let clip_offset = draw_data.display_pos;
        let clip_scale = draw_data.framebuffer_scale;

        let mut vertex_base = 0_i32;
        let mut index_base = 0_u32;
        for draw_list in draw_data.draw_lists() {
            for command in draw_list.commands() {
                if let imgui::DrawCmd::Elements { count, cmd_params } = command {
                    let clip_rect = cmd_params.clip_rect;
                    let clip_x = ((clip_rect[0] - clip_offset[0]) * clip_scale[0]).max(0.0);
                    let clip_y = ((clip_rect[1] - clip_offset[1]) * clip_scale[1]).max(0.0);
                    let clip_w = (clip_rect[2] - clip_offset[0]) * clip_scale[0] - clip_x;
                    let clip_h = (clip_rect[3] - clip_offset[1]) * clip_scale[1] - clip_y;

                    cmd.cmd_set_scissor(
                        0,
                        &[vk::Rect2D {
                            offset: vk::Offset2D {
                                x: clip_x as i32,
                                y: clip_y as i32,
                            },
                            extent: vk::Extent2D {
                                width: clip_w.max(0.0) as u32,
                                height: clip_h.max(0.0) as u32,
                            },
                        }],
                    );

                    cmd.draw_indexed(
                        count as u32,
                        index_base + cmd_params.idx_offset as u32,
                        1,
                        0,
                        vertex_base + cmd_params.vtx_offset as i32,
                    );
                }
            }
            vertex_base += draw_list.vtx_buffer().len() as i32;
            index_base += draw_list.idx_buffer().len() as u32;
        }

        cmd.end_rendering();
        cmd.end_label();
    }

    /// 需要手动调用该函数释放资源，前置条件：device idle
    pub fn destroy(self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}
