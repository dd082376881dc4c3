use serde::{Deserialize, Serialize};

// Sample count of the baked size/color lookup textures.
pub const GRADIENT_SAMPLES: usize = 32;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmitterShape {
    Sphere,
    Box,
    Cone,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DirectionMode {
    /// Every particle launches along the configured direction.
    Single,
    /// Particles launch away from the emitter center.
    Outward,
}

// Parameters that define the simulation. These don't change at runtime.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimParams {
    pub fps: f64,

    #[serde(default)]
    pub particle_system_params: ParticleSystemParams,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ParticleSystemParams {
    /// Particles per second, time-accurate across variable frame durations.
    pub emission_rate: u32,
    pub min_lifetime: f32,
    pub max_lifetime: f32,
    pub min_speed: f32,
    pub max_speed: f32,

    pub shape: EmitterShape,
    pub shape_radius: f32,
    /// Half angle of the cone launch spread, radians. Ignored by the other
    /// shapes.
    pub cone_angle: f32,
    pub direction_mode: DirectionMode,
    pub direction: [f32; 3],
    pub emitter_position: [f32; 3],

    pub gravity_enabled: bool,
    pub gravity: [f32; 3],
    pub constant_velocity: [f32; 3],
    pub viscosity: f32,

    pub collision_enabled: bool,
    pub restitution: f32,

    /// Size multiplier keyframes over normalized age, uniformly spaced.
    #[serde(default = "default_size_curve")]
    pub size_curve: Vec<f32>,
    /// RGBA keyframes over normalized age, uniformly spaced.
    #[serde(default = "default_color_gradient")]
    pub color_gradient: Vec<[f32; 4]>,
}

fn default_size_curve() -> Vec<f32> {
    vec![1.0]
}

fn default_color_gradient() -> Vec<[f32; 4]> {
    vec![[1.0, 1.0, 1.0, 1.0], [1.0, 1.0, 1.0, 0.0]]
}

impl Default for ParticleSystemParams {
    fn default() -> Self {
        ParticleSystemParams {
            emission_rate: 100000,
            min_lifetime: 2.0,
            max_lifetime: 4.0,
            min_speed: 2.0,
            max_speed: 8.0,
            shape: EmitterShape::Sphere,
            shape_radius: 0.5,
            cone_angle: 0.4,
            direction_mode: DirectionMode::Outward,
            direction: [0.0, 1.0, 0.0],
            emitter_position: [0.0, 0.0, 0.0],
            gravity_enabled: true,
            gravity: [0.0, -9.8, 0.0],
            constant_velocity: [0.0, 0.0, 0.0],
            viscosity: 0.1,
            collision_enabled: false,
            restitution: 0.5,
            size_curve: default_size_curve(),
            color_gradient: default_color_gradient(),
        }
    }
}

impl ParticleSystemParams {
    pub fn shape_id(&self) -> u32 {
        match self.shape {
            EmitterShape::Sphere => 0,
            EmitterShape::Box => 1,
            EmitterShape::Cone => 2,
        }
    }

    pub fn direction_mode_id(&self) -> u32 {
        match self.direction_mode {
            DirectionMode::Single => 0,
            DirectionMode::Outward => 1,
        }
    }
}

impl Default for SimParams {
    fn default() -> Self {
        SimParams {
            fps: 60.0,
            particle_system_params: ParticleSystemParams::default(),
        }
    }
}

impl std::str::FromStr for SimParams {
    type Err = toml::de::Error;
    fn from_str(serialized: &str) -> Result<Self, Self::Err> {
        let params = toml::from_str(serialized)?;
        Ok(params)
    }
}

pub fn get_sim_config_from_default_file() -> SimParams {
    let config_data = include_str!("../sim_config.toml");
    match config_data.parse() {
        Ok(params) => params,
        Err(e) => {
            log::error!("Failed to parse config file({}): {:?}", "../sim_config.toml", e);
            SimParams::default()
        }
    }
}

// Resample uniformly spaced keyframes into a fixed-size table with linear
// interpolation. An empty key list falls back to a constant 1.0.
pub fn bake_scalar_curve(keys: &[f32], samples: usize) -> Vec<f32> {
    (0..samples)
        .map(|i| {
            let t = i as f32 / (samples - 1).max(1) as f32;
            sample_keys(keys, t).unwrap_or(1.0)
        })
        .collect()
}

// Resample an RGBA gradient into a fixed-size rgba8 table. An empty key list
// falls back to opaque white.
pub fn bake_gradient(keys: &[[f32; 4]], samples: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples * 4);
    for i in 0..samples {
        let t = i as f32 / (samples - 1).max(1) as f32;
        for channel in 0..4 {
            let per_channel: Vec<f32> = keys.iter().map(|k| k[channel]).collect();
            let value = sample_keys(&per_channel, t).unwrap_or(1.0);
            out.push((value.max(0.0).min(1.0) * 255.0).round() as u8);
        }
    }
    out
}

fn sample_keys(keys: &[f32], t: f32) -> Option<f32> {
    match keys.len() {
        0 => None,
        1 => Some(keys[0]),
        n => {
            let x = t.max(0.0).min(1.0) * (n - 1) as f32;
            let i0 = x.floor() as usize;
            let i1 = (i0 + 1).min(n - 1);
            let frac = x - i0 as f32;
            Some(keys[i0] * (1.0 - frac) + keys[i1] * frac)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke() {
        let params = SimParams::default();
        let serialized = toml::to_string(&params).unwrap();
        let deserialized: SimParams = toml::from_str(&serialized).unwrap();
        assert_eq!(
            params.particle_system_params.emission_rate,
            deserialized.particle_system_params.emission_rate
        );
        assert_eq!(params.particle_system_params.shape, deserialized.particle_system_params.shape);
        assert_eq!(
            params.particle_system_params.direction_mode,
            deserialized.particle_system_params.direction_mode
        );
    }

    #[test]
    fn default_file_parses() {
        let params = get_sim_config_from_default_file();
        assert!(params.particle_system_params.emission_rate >= 1);
        assert!(
            params.particle_system_params.min_lifetime
                <= params.particle_system_params.max_lifetime
        );
    }

    #[test]
    fn scalar_curve_endpoints() {
        let table = bake_scalar_curve(&[0.0, 1.0], 32);
        assert_eq!(table.len(), 32);
        assert!((table[0] - 0.0).abs() < 1e-6);
        assert!((table[31] - 1.0).abs() < 1e-6);
        // Midpoint of a linear ramp.
        assert!((table[16] - 16.0 / 31.0).abs() < 1e-5);
    }

    #[test]
    fn scalar_curve_degenerate() {
        assert_eq!(bake_scalar_curve(&[], 4), vec![1.0; 4]);
        assert_eq!(bake_scalar_curve(&[2.5], 4), vec![2.5; 4]);
    }

    #[test]
    fn gradient_bakes_rgba8() {
        let table = bake_gradient(&[[1.0, 0.0, 0.0, 1.0], [0.0, 0.0, 1.0, 0.0]], 32);
        assert_eq!(table.len(), 32 * 4);
        assert_eq!(&table[0..4], &[255, 0, 0, 255]);
        assert_eq!(&table[31 * 4..32 * 4], &[0, 0, 255, 0]);
    }
}
