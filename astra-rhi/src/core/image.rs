use std::rc::Rc;

use ash::vk;
use vk_mem::Alloc;

use crate::{
    core::{allocator::RhiAllocator, buffer::RhiBuffer, command_buffer::RhiCommandBuffer, device::RhiDevice, synchronize::RhiImageBarrier},
    rhi::Rhi,
};

pub struct RhiImageCreateInfo {
    inner: vk::ImageCreateInfo<'static>,
}

impl RhiImageCreateInfo {
    #[inline]
    pub fn new_image_2d_info(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            inner: vk::ImageCreateInfo {
                image_type: vk::ImageType::TYPE_2D,
                format,
                extent: extent.into(),
                mip_levels: 1,
                array_layers: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                tiling: vk::ImageTiling::OPTIMAL,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                // spec 上面说，这里只能是 UNDEFINED 或者 PREINITIALIZED
                initial_layout: vk::ImageLayout::UNDEFINED,
                ..Default::default()
            },
        }
    }

    #[inline]
    pub fn create_info(&self) -> &vk::ImageCreateInfo<'_> {
        &self.inner
    }

    /// getter
    #[inline]
    pub fn extent(&self) -> &vk::Extent3D {
        &self.inner.extent
    }

    /// getter
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.inner.format
    }
}

pub struct RhiImageViewCreateInfo {
    inner: vk::ImageViewCreateInfo<'static>,
}

impl RhiImageViewCreateInfo {
    #[inline]
    pub fn new_image_view_2d_info(format: vk::Format, aspect: vk::ImageAspectFlags) -> Self {
        Self {
            inner: vk::ImageViewCreateInfo {
                format,
                view_type: vk::ImageViewType::TYPE_2D,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    level_count: 1,
                    layer_count: 1,
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }
}

pub struct RhiImage2D {
    handle: vk::Image,

    allocation: vk_mem::Allocation,

    _name: String,
    image_info: RhiImageCreateInfo,

    allocator: Rc<RhiAllocator>,
}
impl Drop for RhiImage2D {
    fn drop(&mut self) {
        unsafe { self.allocator.destroy_image(self.handle, &mut self.allocation) }
    }
}
// getter
impl RhiImage2D {
    #[inline]
    pub fn width(&self) -> u32 {
        self.image_info.extent().width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image_info.extent().height
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width(),
            height: self.height(),
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.image_info.format()
    }
}
impl RhiImage2D {
    pub fn new(
        rhi: &Rhi,
        image_info: RhiImageCreateInfo,
        alloc_info: &vk_mem::AllocationCreateInfo,
        debug_name: &str,
    ) -> Self {
        let (image, alloc) = unsafe { rhi.allocator.create_image(image_info.create_info(), alloc_info).unwrap() };
        rhi.device.debug_utils().set_object_debug_name(image, debug_name);
        Self {
            _name: debug_name.to_string(),

            handle: image,
            allocation: alloc,

            image_info,
            allocator: rhi.allocator.clone(),
        }
    }

    /// 根据 RGBA8_UNORM 的 data 创建 image，同步上传
    pub fn from_rgba8(rhi: &Rhi, width: u32, height: u32, data: &[u8], name: impl AsRef<str>) -> Self {
        let image = Self::new(
            rhi,
            RhiImageCreateInfo::new_image_2d_info(
                vk::Extent2D { width, height },
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            ),
            &vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            name.as_ref(),
        );

        RhiCommandBuffer::one_time_exec(
            rhi,
            rhi.graphics_command_pool.clone(),
            &rhi.graphics_queue,
            |cmd| image.transfer_data(rhi, cmd, data),
            name.as_ref(),
        );

        image
    }

    /// 1. transition the image layout
    /// 2. copy the buffer into the image
    /// 3. transition the layout 为了让 shader 可读
    pub fn transfer_data(&self, rhi: &Rhi, command_buffer: &RhiCommandBuffer, data: &[u8]) -> RhiBuffer {
        assert_eq!(data.len(), 4 * (self.width() * self.height()) as usize);

        let mut stage_buffer =
            RhiBuffer::new_stage_buffer(rhi, size_of_val(data) as vk::DeviceSize, "image-stage-buffer");
        stage_buffer.transfer_data_by_mem_map(data);

        let image_barrier = RhiImageBarrier::new()
            .image(self.handle)
            .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::empty())
            .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .image_aspect_flag(vk::ImageAspectFlags::COLOR);
        command_buffer.image_memory_barrier(std::slice::from_ref(&image_barrier));

        let buffer_image_copy = vk::BufferImageCopy2::default()
            .buffer_offset(0)
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: self.width(),
                height: self.height(),
                depth: 1,
            })
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            });
        command_buffer.cmd_copy_buffer_to_image(
            &vk::CopyBufferToImageInfo2::default()
                .src_buffer(stage_buffer.handle())
                .dst_image(self.handle)
                .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .regions(std::slice::from_ref(&buffer_image_copy)),
        );

        let image_barrier = RhiImageBarrier::new()
            .image(self.handle)
            .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .dst_mask(
                vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                vk::AccessFlags2::SHADER_READ,
            )
            .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_aspect_flag(vk::ImageAspectFlags::COLOR);
        command_buffer.image_memory_barrier(std::slice::from_ref(&image_barrier));

        stage_buffer
    }
}

pub struct RhiImage2DView {
    handle: vk::ImageView,

    _name: String,

    device: Rc<RhiDevice>,
}
impl Drop for RhiImage2DView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.handle, None);
        }
    }
}
impl RhiImage2DView {
    pub fn new(rhi: &Rhi, image: vk::Image, mut info: RhiImageViewCreateInfo, name: impl AsRef<str>) -> Self {
        info.inner.image = image;
        let handle = unsafe { rhi.device.create_image_view(&info.inner, None).unwrap() };
        rhi.device.debug_utils().set_object_debug_name(handle, name.as_ref());
        Self {
            handle,
            _name: name.as_ref().to_string(),
            device: rhi.device.clone(),
        }
    }

    /// getter
    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }
}
