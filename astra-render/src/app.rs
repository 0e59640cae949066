use astra_crate_tools::init_log::init_log;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::WindowId;

use crate::gui::gui::Gui;
use crate::gui::gui_pass::GuiPass;
use crate::platform::camera::Camera;
use crate::platform::timer::Timer;
use crate::platform::window_system::{MainWindow, WindowCreateInfo};
use crate::renderer::renderer::Renderer;
use crate::ui::{draw_ui, UiState};

/// winit 的事件胶水：窗口事件、resize 信号和每帧的 redraw 都从这里进入渲染器
pub struct AstraApp {
    window: Option<MainWindow>,
    renderer: Option<Renderer>,
    gui: Option<Gui>,
    gui_pass: Option<GuiPass>,

    camera: Camera,
    ui_state: UiState,
    timer: Timer,
}

impl AstraApp {
    pub fn run() {
        init_log();

        let event_loop = winit::event_loop::EventLoop::new().unwrap();

        let mut app = Self {
            window: None,
            renderer: None,
            gui: None,
            gui_pass: None,
            camera: Camera::default(),
            ui_state: UiState::default(),
            timer: Timer::default(),
        };
        event_loop.run_app(&mut app).unwrap();

        log::info!("end run.");
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) {
        let window = MainWindow::new(
            event_loop,
            WindowCreateInfo {
                width: 1280,
                height: 720,
                title: "astra".to_string(),
            },
        );

        // setup 失败属于前置条件错误：输出诊断并立即退出
        let renderer = match Renderer::new(window.window()) {
            Ok(renderer) => renderer,
            Err(e) => {
                log::error!("renderer setup failed: {:#}", e);
                std::process::exit(1);
            }
        };

        let mut gui = Gui::new(window.window());
        let gui_pass = match GuiPass::new(&renderer.rhi, &mut gui.imgui_ctx, renderer.swapchain_format()) {
            Ok(gui_pass) => gui_pass,
            Err(e) => {
                log::error!("gui setup failed: {:#}", e);
                std::process::exit(1);
            }
        };

        self.window = Some(window);
        self.renderer = Some(renderer);
        self.gui = Some(gui);
        self.gui_pass = Some(gui_pass);
    }

    fn draw_frame(&mut self) {
        let window = self.window.as_ref().unwrap();
        let renderer = self.renderer.as_mut().unwrap();
        let gui = self.gui.as_mut().unwrap();
        let gui_pass = self.gui_pass.as_mut().unwrap();

        self.timer.tick();

        if self.ui_state.reset_accumulation {
            renderer.reset_accumulation();
            self.ui_state.reset_accumulation = false;
        }

        gui.prepare_frame(window.window(), self.timer.delta_time);

        let frame_time_ms = self.timer.delta_time_ms();
        let camera = &mut self.camera;
        let ui_state = &mut self.ui_state;
        let draw_data = gui.build_frame(window.window(), |ui| {
            draw_ui(ui, ui_state, camera, frame_time_ms);
        });

        renderer.render_frame(&self.camera, self.ui_state.light_color, draw_data, gui_pass);
    }

    /// 销毁顺序：gui pass 先于 renderer，renderer 的 teardown 内部是严格有序的
    fn shutdown(&mut self) {
        if let Some(renderer) = self.renderer.as_ref() {
            renderer.wait_idle();
        }
        if let Some(gui_pass) = self.gui_pass.take() {
            gui_pass.destroy();
        }
        drop(self.gui.take());
        if let Some(renderer) = self.renderer.take() {
            renderer.destroy();
        }
        drop(self.window.take());
    }
}

impl ApplicationHandler for AstraApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        log::info!("winit event: resumed");
        if self.renderer.is_none() {
            self.init(event_loop);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let (Some(window), Some(gui)) = (self.window.as_ref(), self.gui.as_mut()) else {
            return;
        };
        gui.handle_event(window.window(), &event);

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                log::info!("window was resized, new size is: {}x{}", new_size.width, new_size.height);
                self.renderer.as_mut().unwrap().on_window_resize();
            }
            WindowEvent::RedrawRequested => {
                self.draw_frame();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.window().request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!("loop exiting");
        self.shutdown();
    }
}
