pub mod buffer_util;
pub mod camera;
pub mod cpu_pipeline;
pub mod emission;
pub mod fps_estimator;
pub mod particle_system;
pub mod shader_utils;
pub mod sim_params;

#[derive(Debug, Copy, Clone, Default)]
pub struct InputState {
    pub cam_in: bool,
    pub cam_out: bool,
    pub cam_up: bool,
    pub cam_down: bool,
    pub cam_left: bool,
    pub cam_right: bool,
    pub pause: bool,
}

#[cfg(test)]
mod tests {
    #[test]
    fn shaders_are_built() {
        assert!(!crate::include_shader!("kickoff.wgsl").is_empty());
        assert!(!crate::include_shader!("emit.wgsl").is_empty());
        assert!(!crate::include_shader!("simulate.wgsl").is_empty());
        assert!(!crate::include_shader!("particle_render.wgsl").is_empty());
    }
}
