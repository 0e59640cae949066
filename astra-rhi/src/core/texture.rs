use ash::vk;

use crate::{
    core::{
        image::{RhiImage2D, RhiImage2DView, RhiImageViewCreateInfo},
        sampler::{RhiSampler, RhiSamplerCreateInfo},
    },
    rhi::Rhi,
};

/// image + view + sampler 的组合，用于 combined image sampler 描述符
pub struct RhiTexture2D {
    image: RhiImage2D,
    sampler: RhiSampler,
    image_view: RhiImage2DView,
}

impl RhiTexture2D {
    #[inline]
    pub fn new(rhi: &Rhi, image: RhiImage2D, name: &str) -> Self {
        let sampler = RhiSampler::new(rhi, &RhiSamplerCreateInfo::new(), name);

        let image_view = RhiImage2DView::new(
            rhi,
            image.handle(),
            RhiImageViewCreateInfo::new_image_view_2d_info(image.format(), vk::ImageAspectFlags::COLOR),
            name,
        );

        Self {
            image,
            sampler,
            image_view,
        }
    }

    #[inline]
    pub fn sampler(&self) -> &RhiSampler {
        &self.sampler
    }

    #[inline]
    pub fn image_view(&self) -> &RhiImage2DView {
        &self.image_view
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    #[inline]
    pub fn descriptor_image_info(&self, layout: vk::ImageLayout) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .sampler(self.sampler.handle())
            .image_view(self.image_view.handle())
            .image_layout(layout)
    }
}
