/// 简单的 Euler 相机：平移 + yaw/pitch
///
/// 矩阵直接交给 raygen shader 使用：view 是 camera-to-world 变换，
/// projection 只以逆矩阵的形式进入 shader
pub struct Camera {
    pub position: glam::Vec3,

    /// 弧度
    pub yaw: f32,
    /// 弧度
    pub pitch: f32,
}

impl Camera {
    const FOV_Y_DEG: f32 = 90.0;

    pub fn view_matrix(&self) -> glam::Mat4 {
        let mut view = glam::Mat4::from_translation(self.position)
            * glam::Mat4::from_rotation_y(self.yaw)
            * glam::Mat4::from_rotation_x(self.pitch);

        // vulkan 的 NDC 的 y 轴朝下
        view.y_axis.y *= -1.0;
        view
    }

    pub fn inv_projection_matrix(&self, aspect_ratio: f32) -> glam::Mat4 {
        let projection = glam::Mat4::perspective_rh(Self::FOV_Y_DEG.to_radians(), aspect_ratio, 100.0, 0.1);
        projection.inverse()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: glam::Vec3::new(0.0, 2.0, 5.0),
            yaw: 0.0,
            pitch: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_matrix_carries_camera_position() {
        let camera = Camera {
            position: glam::Vec3::new(1.0, 2.0, 3.0),
            yaw: 0.0,
            pitch: 0.0,
        };
        let view = camera.view_matrix();
        assert_eq!(view.w_axis.truncate(), camera.position);
    }

    #[test]
    fn test_inv_projection_round_trip() {
        let camera = Camera::default();
        let aspect = 16.0 / 9.0;
        let projection = glam::Mat4::perspective_rh(90.0_f32.to_radians(), aspect, 100.0, 0.1);
        let round_trip = projection * camera.inv_projection_matrix(aspect);

        let diff = (round_trip - glam::Mat4::IDENTITY).to_cols_array();
        assert!(diff.iter().all(|v| v.abs() < 1e-5));
    }
}
