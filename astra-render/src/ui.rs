use crate::platform::camera::Camera;

/// UI 上可调的参数
pub struct UiState {
    pub light_color: [f32; 4],
    pub reset_accumulation: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            light_color: [20.0, 20.0, 10.0, 0.0],
            reset_accumulation: false,
        }
    }
}

/// debug 窗口：帧时间、光源颜色、相机参数、累积重置
pub fn draw_ui(ui: &imgui::Ui, state: &mut UiState, camera: &mut Camera, frame_time_ms: f32) {
    ui.window("background").build(|| {
        ui.text(format!("Frame time: {:.2} ms", frame_time_ms));

        ui.input_float4("color", &mut state.light_color).build();

        let mut position: [f32; 3] = camera.position.into();
        if ui.input_float3("pos", &mut position).build() {
            camera.position = position.into();
        }
        ui.input_float("theta", &mut camera.yaw).step(0.01).step_fast(0.1).build();
        ui.input_float("phi", &mut camera.pitch).step(0.01).step_fast(0.1).build();

        ui.checkbox("reset", &mut state.reset_accumulation);
    });
}
