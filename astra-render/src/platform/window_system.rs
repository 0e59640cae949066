use ash::vk;
use winit::event_loop::ActiveEventLoop;

pub struct WindowCreateInfo {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

pub struct MainWindow {
    window: winit::window::Window,
}

impl MainWindow {
    pub fn new(event_loop: &ActiveEventLoop, create_info: WindowCreateInfo) -> Self {
        let window_attributes = winit::window::Window::default_attributes()
            .with_title(create_info.title)
            .with_inner_size(winit::dpi::LogicalSize::new(create_info.width, create_info.height));

        let window = event_loop.create_window(window_attributes).unwrap();

        Self { window }
    }

    #[inline]
    pub fn window(&self) -> &winit::window::Window {
        &self.window
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}
