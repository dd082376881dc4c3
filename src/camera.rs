use crate::particle_system::RenderUniforms;
use cgmath::{Matrix4, Point3, Rad, Vector3};
use std::f32::consts::PI;

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

pub struct CameraMotion {
    pub angular_speed: f32,
    pub linear_speed: f32,
}

impl Default for CameraMotion {
    fn default() -> CameraMotion {
        CameraMotion {
            angular_speed: 1.0,
            linear_speed: 1.0,
        }
    }
}

pub struct CameraState {
    pub center: Point3<f32>,

    // Camera in spherical coordinates, y up.
    pub phi: f32,    // Longitude around the y axis.
    pub theta: f32,  // Polar angle from +y.
    pub radius: f32, // Radial distance.
    pub fov: f32,
}

impl Default for CameraState {
    fn default() -> CameraState {
        CameraState {
            center: Point3::new(0.0, 1.0, 0.0),
            phi: -PI / 2.0,
            theta: PI / 2.5,
            radius: 12.0,
            fov: PI / 4.0,
        }
    }
}

impl CameraState {
    pub fn pos(&self) -> Point3<f32> {
        self.center
            + Vector3::new(
                self.radius * self.theta.sin() * self.phi.cos(),
                self.radius * self.theta.cos(),
                self.radius * self.theta.sin() * self.phi.sin(),
            )
    }

    pub fn up(&self) -> Vector3<f32> {
        // The global-frame vector that maps to up in the camera's frame.
        let up_theta = self.theta - PI / 2.0;
        Vector3::new(
            up_theta.sin() * self.phi.cos(),
            up_theta.cos(),
            up_theta.sin() * self.phi.sin(),
        )
    }

    pub fn update(&mut self, dt: f32, input_state: &crate::InputState, motion: &CameraMotion) {
        if input_state.cam_in && !input_state.cam_out {
            self.radius -= self.radius * (motion.linear_speed * dt);
        } else if !input_state.cam_in && input_state.cam_out {
            self.radius += self.radius * (motion.linear_speed * dt);
        }
        if input_state.cam_up && !input_state.cam_down {
            self.theta -= motion.angular_speed * dt;
        } else if !input_state.cam_up && input_state.cam_down {
            self.theta += motion.angular_speed * dt;
        }
        if input_state.cam_left && !input_state.cam_right {
            self.phi += motion.angular_speed * dt;
        } else if !input_state.cam_left && input_state.cam_right {
            self.phi -= motion.angular_speed * dt;
        }
        self.phi %= 2.0 * PI;
        // Keep the polar angle clear of the poles so look_at stays stable.
        self.theta = self.theta.max(0.05).min(PI - 0.05);
    }
}

pub struct Camera {
    pub motion_params: CameraMotion,
    pub screen_size: (u32, u32),
    pub state: CameraState,
}

impl Default for Camera {
    fn default() -> Camera {
        Camera {
            motion_params: CameraMotion::default(),
            screen_size: (1280, 720),
            state: CameraState::default(),
        }
    }
}

impl Camera {
    pub fn update_state(&mut self, dt: f32, input_state: &crate::InputState) {
        self.state.update(dt, input_state, &self.motion_params);
    }

    /// View-projection plus the camera basis vectors the billboards expand
    /// along.
    pub fn to_render_uniforms(&self) -> RenderUniforms {
        let aspect = self.screen_size.0 as f32 / self.screen_size.1 as f32;
        let projection = cgmath::perspective(Rad(self.state.fov), aspect, 0.1, 10000.0);
        let view = Matrix4::look_at_rh(self.state.pos(), self.state.center, self.state.up());
        let view_proj = OPENGL_TO_WGPU_MATRIX * projection * view;

        // Rows of the rotation part of the view matrix are the camera's
        // right and up axes in world coordinates.
        let camera_right = [view.x.x, view.y.x, view.z.x, 0.0];
        let camera_up = [view.x.y, view.y.y, view.z.y, 0.0];
        RenderUniforms {
            view_proj: view_proj.into(),
            camera_right,
            camera_up,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::InnerSpace;

    #[test]
    fn orbit_position_stays_on_sphere() {
        let mut camera = Camera::default();
        let input = crate::InputState {
            cam_left: true,
            ..Default::default()
        };
        for _ in 0..100 {
            camera.update_state(0.016, &input);
            let offset = camera.state.pos() - camera.state.center;
            assert!((offset.magnitude() - camera.state.radius).abs() < 1e-3);
        }
    }

    #[test]
    fn billboard_axes_are_orthonormal() {
        let camera = Camera::default();
        let uniforms = camera.to_render_uniforms();
        let right = Vector3::new(
            uniforms.camera_right[0],
            uniforms.camera_right[1],
            uniforms.camera_right[2],
        );
        let up = Vector3::new(
            uniforms.camera_up[0],
            uniforms.camera_up[1],
            uniforms.camera_up[2],
        );
        assert!((right.magnitude() - 1.0).abs() < 1e-4);
        assert!((up.magnitude() - 1.0).abs() < 1e-4);
        assert!(right.dot(up).abs() < 1e-4);
    }

    #[test]
    fn theta_clamps_at_poles() {
        let mut camera = Camera::default();
        let input = crate::InputState {
            cam_up: true,
            ..Default::default()
        };
        for _ in 0..1000 {
            camera.update_state(0.1, &input);
        }
        assert!(camera.state.theta >= 0.05);
    }
}
