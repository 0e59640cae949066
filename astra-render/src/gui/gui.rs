//! 参考 imgui-rs-vulkan-renderer

/// imgui context 和 winit 的胶水
///
/// UI 的 widget 逻辑和 draw data 的生成都发生在这里，
/// 渲染器只消费编译好的 draw data
pub struct Gui {
    pub imgui_ctx: imgui::Context,
    pub platform: imgui_winit_support::WinitPlatform,
}

impl Gui {
    pub fn new(window: &winit::window::Window) -> Self {
        let mut imgui_ctx = imgui::Context::create();
        // disable automatic saving .ini file
        imgui_ctx.set_ini_filename(None);

        let mut platform = imgui_winit_support::WinitPlatform::new(&mut imgui_ctx);
        platform.attach_window(imgui_ctx.io_mut(), window, imgui_winit_support::HiDpiMode::Rounded);

        let hidpi_factor = platform.hidpi_factor();
        let font_size = (13.0 * hidpi_factor) as f32;
        imgui_ctx.fonts().add_font(&[imgui::FontSource::DefaultFontData {
            config: Some(imgui::FontConfig {
                size_pixels: font_size,
                ..Default::default()
            }),
        }]);
        imgui_ctx.io_mut().font_global_scale = (1.0 / hidpi_factor) as f32;

        Self { imgui_ctx, platform }
    }

    /// 接受 window 的事件
    pub fn handle_event(&mut self, window: &winit::window::Window, event: &winit::event::WindowEvent) {
        self.platform.handle_event::<()>(
            self.imgui_ctx.io_mut(),
            window,
            &winit::event::Event::WindowEvent {
                window_id: window.id(),
                event: event.clone(),
            },
        );
    }

    /// # Phase: IO
    /// 1. 可能会修改鼠标位置
    /// 2. 更新 imgui 的 delta time
    pub fn prepare_frame(&mut self, window: &winit::window::Window, duration: std::time::Duration) {
        self.platform.prepare_frame(self.imgui_ctx.io_mut(), window).unwrap();
        self.imgui_ctx.io_mut().update_delta_time(duration);
    }

    /// # Phase: Update
    ///
    /// 构建 ui 并编译为 draw data
    pub fn build_frame(
        &mut self,
        window: &winit::window::Window,
        ui_func: impl FnOnce(&mut imgui::Ui),
    ) -> &imgui::DrawData {
        let ui = self.imgui_ctx.new_frame();
        ui_func(ui);

        // 看源码可知：imgui 可能会隐藏鼠标指针
        self.platform.prepare_render(ui, window);
        self.imgui_ctx.render()
    }
}
