use std::rc::Rc;

use anyhow::Context;
use ash::vk;

use crate::core::device::RhiDevice;

pub struct RhiShaderModule {
    pub handle: vk::ShaderModule,

    device: Rc<RhiDevice>,
}

impl RhiShaderModule {
    /// # param
    /// * path - spv shader 文件路径
    ///
    /// shader 文件缺失或损坏属于配置错误，向上层报告而不是直接 panic
    pub fn new(device: Rc<RhiDevice>, path: &std::path::Path) -> anyhow::Result<Self> {
        let mut file =
            std::fs::File::open(path).with_context(|| format!("missing shader artifact: {}", path.display()))?;
        let shader_code =
            ash::util::read_spv(&mut file).with_context(|| format!("corrupt shader artifact: {}", path.display()))?;

        let shader_module_info = vk::ShaderModuleCreateInfo::default().code(&shader_code);

        unsafe {
            let shader_module = device.create_shader_module(&shader_module_info, None)?;
            device.debug_utils().set_object_debug_name(shader_module, path.to_str().unwrap_or("shader"));
            Ok(Self {
                handle: shader_module,
                device,
            })
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    pub fn destroy(self) {
        unsafe {
            self.device.destroy_shader_module(self.handle, None);
        }
    }
}
