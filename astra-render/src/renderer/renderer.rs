use std::ffi::CStr;

use anyhow::Context;
use ash::vk;
use astra_rhi::core::descriptor::RhiDescriptorPool;
use astra_rhi::core::image::{RhiImage2D, RhiImage2DView, RhiImageCreateInfo, RhiImageViewCreateInfo};
use astra_rhi::core::swapchain::{RhiAcquireResult, RhiPresentResult, RhiSurface, RhiSwapchain};
use astra_rhi::core::synchronize::RhiImageBarrier;
use astra_rhi::rhi::Rhi;
use itertools::Itertools;
use raw_window_handle::HasDisplayHandle;

use crate::gui::gui_pass::GuiPass;
use crate::platform::camera::Camera;
use crate::renderer::frame_context::{slot_index, FrameContext, FRAME_FENCE_TIMEOUT_NS};
use crate::renderer::gpu_scene::GpuScene;
use crate::renderer::rt_descriptors::{create_descriptor_pool, RtDescriptorSet};
use crate::renderer::rt_pipeline::{PushConstants, RtPipeline, ShaderBindingTable};
use crate::resource::gltf_loader::GltfLoader;

const DEFAULT_SCENE_PATH: &str = "assets/scene.glb";

/// 顶层的渲染器：持有启动之后不可变的场景/管线资源，
/// 以及唯一的 per-frame 可变状态（frame ring 和 swapchain）
pub struct Renderer {
    pub rhi: Rhi,

    surface: RhiSurface,
    swapchain: Option<RhiSwapchain>,
    /// 窗口 resize 或 device 报告 out-of-date 之后置位，
    /// 下一帧开始时重建 swapchain
    surface_stale: bool,

    draw_image: RhiImage2D,
    draw_image_view: RhiImage2DView,

    frame_ctx: FrameContext,

    descriptor_pool: RhiDescriptorPool,
    rt_descriptors: RtDescriptorSet,
    rt_pipeline: RtPipeline,
    sbt: ShaderBindingTable,

    gpu_scene: GpuScene,
}

// init
impl Renderer {
    const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

    pub fn new(window: &winit::window::Window) -> anyhow::Result<Self> {
        let instance_exts = Self::required_instance_exts(window)?;
        let rhi = Rhi::new("astra".to_string(), instance_exts);

        let surface = RhiSurface::new(&rhi, window);
        let swapchain = RhiSwapchain::new(&rhi, &surface);

        // trace 的输出 image，之后 blit 到 swapchain image 上
        let draw_image = RhiImage2D::new(
            &rhi,
            RhiImageCreateInfo::new_image_2d_info(
                swapchain.extent,
                Self::DRAW_IMAGE_FORMAT,
                vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ),
            &vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            "draw-image",
        );
        let draw_image_view = RhiImage2DView::new(
            &rhi,
            draw_image.handle(),
            RhiImageViewCreateInfo::new_image_view_2d_info(Self::DRAW_IMAGE_FORMAT, vk::ImageAspectFlags::COLOR),
            "draw-image-view",
        );

        let scene_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_SCENE_PATH.to_string());
        let scene = GltfLoader::load(std::path::Path::new(&scene_path))
            .with_context(|| format!("failed to load scene: {scene_path}"))?;

        let gpu_scene = GpuScene::new(&rhi, &scene);

        let descriptor_pool = create_descriptor_pool(&rhi, gpu_scene.texture_count());
        let rt_descriptors = RtDescriptorSet::new(&rhi, &descriptor_pool, &gpu_scene, draw_image_view.handle());

        let rt_pipeline = RtPipeline::new(&rhi, &rt_descriptors.layout)?;
        let sbt = ShaderBindingTable::new(&rhi, &rt_pipeline);

        let frame_ctx = FrameContext::new(&rhi);

        Ok(Self {
            rhi,
            surface,
            swapchain: Some(swapchain),
            surface_stale: false,
            draw_image,
            draw_image_view,
            frame_ctx,
            descriptor_pool,
            rt_descriptors,
            rt_pipeline,
            sbt,
            gpu_scene,
        })
    }

    fn required_instance_exts(window: &winit::window::Window) -> anyhow::Result<Vec<&'static CStr>> {
        let raw_exts = ash_window::enumerate_required_extensions(window.display_handle()?.as_raw())
            .context("display is not supported by vulkan")?;
        Ok(raw_exts.iter().map(|ext| unsafe { CStr::from_ptr(*ext) }).collect_vec())
    }
}

// getter
impl Renderer {
    #[inline]
    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.as_ref().unwrap().color_format
    }

    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_ctx.frame_index()
    }

    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.draw_image.extent();
        extent.width as f32 / extent.height as f32
    }

    pub fn wait_idle(&self) {
        self.rhi.wait_idle();
    }
}

// phase call
impl Renderer {
    /// 窗口层发来的「surface 需要重建」信号
    #[inline]
    pub fn on_window_resize(&mut self) {
        self.surface_stale = true;
    }

    /// 累积计数清零
    #[inline]
    pub fn reset_accumulation(&mut self) {
        self.frame_ctx.reset_frame_index();
    }

    /// 一帧的状态机：ACQUIRE → RECORD → SUBMIT → PRESENT
    ///
    /// acquire 或 present 报告 out-of-date 时走 RESIZE：
    /// 等待 device idle，重建 swapchain，并以同一 frame index 重试
    pub fn render_frame(
        &mut self,
        camera: &Camera,
        light_color: [f32; 4],
        draw_data: &imgui::DrawData,
        gui_pass: &mut GuiPass,
    ) {
        // RESIZE：这是唯一会修改 swapchain 的路径，device idle 保证没有
        // frame slot 还引用着旧的 swapchain
        if self.surface_stale {
            self.rhi.wait_idle();
            self.swapchain = None;
            self.swapchain = Some(RhiSwapchain::new(&self.rhi, &self.surface));
            self.surface_stale = false;
        }
        let swapchain = self.swapchain.as_ref().unwrap();

        // 观察到 slot 的 fence signaled 之后，才允许复用它的 command buffer
        self.frame_ctx.wait_current_fence();

        // ACQUIRE
        let slot = self.frame_ctx.current_slot();
        let image_index = match swapchain.acquire_next_image(slot.image_acquired_semaphore(), FRAME_FENCE_TIMEOUT_NS) {
            RhiAcquireResult::Success(image_index) => image_index,
            RhiAcquireResult::OutOfDate => {
                // fence 尚未 reset，跳过的帧不推进计数，重试是安全的
                self.surface_stale = true;
                return;
            }
        };

        // RECORD
        let cmd = self.frame_ctx.begin_record();
        let frame_index = self.frame_ctx.frame_index();
        let aspect_ratio = self.aspect_ratio();

        let push_constants = PushConstants {
            light_color,
            view: camera.view_matrix().to_cols_array(),
            inv_projection: camera.inv_projection_matrix(aspect_ratio).to_cols_array(),
            frame_index: frame_index as u32,
        };

        let draw_extent = self.draw_image.extent();
        let present_image = swapchain.images[image_index as usize];

        // 输出 image 进入 general layout，供 raygen 写入
        cmd.image_memory_barrier(std::slice::from_ref(
            &RhiImageBarrier::new()
                .image(self.draw_image.handle())
                .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::empty())
                .dst_mask(
                    vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                    vk::AccessFlags2::SHADER_WRITE | vk::AccessFlags2::SHADER_READ,
                )
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL)
                .image_aspect_flag(vk::ImageAspectFlags::COLOR),
        ));

        cmd.begin_label("ray-trace", glam::vec4(0.0, 1.0, 0.0, 1.0));
        {
            cmd.cmd_bind_pipeline(vk::PipelineBindPoint::RAY_TRACING_KHR, self.rt_pipeline.handle());
            cmd.bind_descriptor_sets(
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.rt_pipeline.layout(),
                0,
                &[self.rt_descriptors.set()],
                &[],
            );
            cmd.cmd_push_constants(
                self.rt_pipeline.layout(),
                RtPipeline::push_constant_stages(),
                0,
                bytemuck::bytes_of(&push_constants),
            );
            cmd.trace_rays(
                self.sbt.raygen_region(),
                self.sbt.miss_region(),
                self.sbt.hit_region(),
                self.sbt.callable_region(),
                [draw_extent.width, draw_extent.height, 1],
            );
        }
        cmd.end_label();

        // trace 完成后，将输出 image blit 到 presentable image 上
        cmd.image_memory_barrier(&[
            RhiImageBarrier::new()
                .image(self.draw_image.handle())
                .src_mask(vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR, vk::AccessFlags2::SHADER_WRITE)
                .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ)
                .layout_transfer(vk::ImageLayout::GENERAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .image_aspect_flag(vk::ImageAspectFlags::COLOR),
            RhiImageBarrier::new()
                .image(present_image)
                .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::empty())
                .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .image_aspect_flag(vk::ImageAspectFlags::COLOR),
        ]);

        cmd.cmd_blit_image(self.draw_image.handle(), draw_extent, present_image, swapchain.extent);

        cmd.image_memory_barrier(std::slice::from_ref(
            &RhiImageBarrier::new()
                .image(present_image)
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                .dst_mask(
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                )
                .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .image_aspect_flag(vk::ImageAspectFlags::COLOR),
        ));

        // 外部构建好的 UI draw data 画进同一张 presentable image
        gui_pass.draw(
            &self.rhi,
            cmd,
            draw_data,
            swapchain.image_views[image_index as usize],
            swapchain.extent,
            slot_index(frame_index),
        );

        cmd.image_memory_barrier(std::slice::from_ref(
            &RhiImageBarrier::new()
                .image(present_image)
                .src_mask(
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                )
                .dst_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::empty())
                .layout_transfer(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR)
                .image_aspect_flag(vk::ImageAspectFlags::COLOR),
        ));

        // SUBMIT
        self.frame_ctx.end_and_submit(&self.rhi.graphics_queue);

        // PRESENT
        let slot = self.frame_ctx.current_slot();
        match swapchain.present(&self.rhi.graphics_queue, image_index, slot.render_finished_semaphore()) {
            RhiPresentResult::Success => {}
            RhiPresentResult::OutOfDate => {
                self.surface_stale = true;
            }
        }

        self.frame_ctx.advance_frame();
    }
}

// 手动 drop
impl Renderer {
    /// 严格按依赖顺序的 teardown；全程只有一次 device idle 等待，
    /// 在销毁任何资源之前
    pub fn destroy(mut self) {
        self.rhi.wait_idle();

        let Self {
            rhi,
            surface,
            swapchain,
            surface_stale: _,
            draw_image,
            draw_image_view,
            frame_ctx,
            descriptor_pool,
            rt_descriptors,
            rt_pipeline,
            sbt,
            mut gpu_scene,
        } = self;

        // TLAS → BLAS
        gpu_scene.destroy_acceleration();
        // SBT regions
        sbt.destroy();
        // geometry 记录 + 场景资源
        gpu_scene.destroy_resources();
        // pipeline 和它的 layout
        rt_pipeline.destroy();
        // descriptor set layout（set 跟随 pool 释放）
        drop(rt_descriptors);
        // frame slots
        frame_ctx.destroy();
        // 输出 image
        drop(draw_image_view);
        drop(draw_image);
        // descriptor 分配器
        drop(descriptor_pool);
        // presentable surface
        drop(swapchain);
        drop(surface);
        // allocator、device、instance
        rhi.destroy();
    }
}
