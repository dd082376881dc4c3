use crate::buffer_util::{
    make_default_uniform_buffer, make_storage_buffer, make_storage_buffer_init,
    make_uniform_buffer, SizedBuffer,
};
use crate::emission::EmissionBudget;
use crate::shader_utils;
use crate::sim_params::{bake_gradient, bake_scalar_curve, ParticleSystemParams, GRADIENT_SAMPLES};
use rand::{Rng, SeedableRng};
use std::borrow::Cow;

/// Pool capacity. The dead stack, alive index lists, and the particle buffer
/// are all sized to this at startup; allocation never grows past it.
pub const MAX_PARTICLES: u32 = 1_000_000;

// This needs to match the workgroup size value in build.rs.
pub const PARTICLE_GROUP_SIZE: u32 = 256;

pub fn dispatch_size(count: u32) -> u32 {
    (count + PARTICLE_GROUP_SIZE - 1) / PARTICLE_GROUP_SIZE
}

// 64 bytes. lifetime is (age, max_age, spawn_seed, unused).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Particle {
    pub position_size: [f32; 4],
    pub velocity: [f32; 4],
    pub lifetime: [f32; 4],
    pub color: [f32; 4],
}

// Per-frame values written by the host before the kickoff pass. gravity.w
// carries the viscosity coefficient; view_proj and target_size describe the
// collision depth target, not the presentation camera.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub dt: f32,
    pub emit_requested: u32,
    pub collision_enabled: u32,
    pub restitution: f32,
    pub seed: [u32; 4],
    pub gravity: [f32; 4],
    pub constant_velocity: [f32; 4],
    pub view_proj: [[f32; 4]; 4],
    pub target_size: [f32; 4],
}

impl Default for FrameUniforms {
    fn default() -> Self {
        FrameUniforms {
            dt: 0.0,
            emit_requested: 0,
            collision_enabled: 0,
            restitution: 0.0,
            seed: [0; 4],
            gravity: [0.0; 4],
            constant_velocity: [0.0; 4],
            view_proj: cgmath::Matrix4::from_scale(1.0f32).into(),
            target_size: [1.0, 1.0, 0.0, 0.0],
        }
    }
}

// Static emitter description, written once at startup. origin.w is the shape
// radius, direction.w the cone half angle, speed and lifetime hold their
// (min, max) ranges in xy.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EmitterUniforms {
    pub origin: [f32; 4],
    pub direction: [f32; 4],
    pub speed: [f32; 4],
    pub lifetime: [f32; 4],
    pub shape: u32,
    pub direction_mode: u32,
    pub pad: [u32; 2],
}

impl EmitterUniforms {
    fn from_params(params: &ParticleSystemParams) -> EmitterUniforms {
        let d = params.direction;
        let len = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
        let dir = if len > 1e-6 {
            [d[0] / len, d[1] / len, d[2] / len]
        } else {
            [0.0, 1.0, 0.0]
        };
        let p = params.emitter_position;
        EmitterUniforms {
            origin: [p[0], p[1], p[2], params.shape_radius],
            direction: [dir[0], dir[1], dir[2], params.cone_angle],
            speed: [params.min_speed, params.max_speed, 0.0, 0.0],
            lifetime: [params.min_lifetime, params.max_lifetime, 0.0, 0.0],
            shape: params.shape_id(),
            direction_mode: params.direction_mode_id(),
            pad: [0; 2],
        }
    }
}

// The four lifecycle counters. The draw instance count lives in DrawArgs
// instead so the render pass can consume it in place.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Counters {
    pub dead: u32,
    pub pre_sim: u32,
    pub post_sim: u32,
    pub emit: u32,
}

impl Counters {
    pub fn initial(capacity: u32) -> Counters {
        Counters {
            dead: capacity,
            pre_sim: 0,
            post_sim: 0,
            emit: 0,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DispatchArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl Default for DrawArgs {
    fn default() -> Self {
        // Four-vertex triangle strip billboard.
        DrawArgs {
            vertex_count: 4,
            instance_count: 0,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

// Every slot starts dead, so the stack simply holds all indices in order.
pub fn initial_dead_list(capacity: u32) -> Vec<u32> {
    (0..capacity).collect()
}

fn validate_params(params: &ParticleSystemParams) -> anyhow::Result<()> {
    if params.emission_rate < 1 {
        anyhow::bail!("emission_rate must be at least 1");
    }
    if !(params.min_lifetime > 0.0) || params.max_lifetime < params.min_lifetime {
        anyhow::bail!(
            "invalid lifetime range: [{}, {}]",
            params.min_lifetime,
            params.max_lifetime
        );
    }
    if params.min_speed < 0.0 || params.max_speed < params.min_speed {
        anyhow::bail!(
            "invalid speed range: [{}, {}]",
            params.min_speed,
            params.max_speed
        );
    }
    let steady_state = f64::from(params.emission_rate) * f64::from(params.max_lifetime);
    if steady_state > f64::from(MAX_PARTICLES) {
        log::warn!(
            "emission_rate * max_lifetime ({:.0}) exceeds the pool capacity {}; emission will saturate",
            steady_state,
            MAX_PARTICLES
        );
    }
    Ok(())
}

pub struct ParticleSystem {
    pub params: ParticleSystemParams,
    budget: EmissionBudget,
    seed_rng: rand::rngs::SmallRng,
    frame_index: u64,

    collision_view_proj: [[f32; 4]; 4],
    collision_target_size: [f32; 2],

    frame_uniforms: SizedBuffer,
    emitter_uniforms: SizedBuffer,
    particle_buffer: SizedBuffer,
    dead_list_buffer: SizedBuffer,
    alive_list_buffers: [SizedBuffer; 2],
    counters_buffer: SizedBuffer,
    emit_args_buffer: SizedBuffer,
    sim_args_buffer: SizedBuffer,
    draw_args_buffer: SizedBuffer,

    kickoff_pipeline: wgpu::ComputePipeline,
    emit_pipeline: wgpu::ComputePipeline,
    simulate_pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    // One bind group per frame parity; they differ only in which alive list
    // plays the pre-sim role and which the post-sim role.
    bind_groups: [wgpu::BindGroup; 2],
    // The dispatch-args buffers are bound only to the kickoff pass. The
    // emission and simulation dispatches consume them as indirect arguments,
    // and wgpu requires that to be the buffer's only usage in that dispatch.
    args_bind_group: wgpu::BindGroup,
    depth_target: wgpu::TextureView,
    normal_target: wgpu::TextureView,

    staging_belt: wgpu::util::StagingBelt,
}

impl ParticleSystem {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        params: &ParticleSystemParams,
    ) -> anyhow::Result<ParticleSystem> {
        validate_params(params)?;

        let frame_uniforms =
            make_default_uniform_buffer::<FrameUniforms>(device, "Frame uniforms");
        let emitter_uniforms = make_uniform_buffer(
            device,
            "Emitter uniforms",
            &EmitterUniforms::from_params(params),
        );

        let particle_buffer = make_storage_buffer(
            device,
            "Particle pool",
            u64::from(MAX_PARTICLES) * std::mem::size_of::<Particle>() as u64,
        );
        let dead_list_buffer = make_storage_buffer_init(
            device,
            "Dead index stack",
            bytemuck::cast_slice(&initial_dead_list(MAX_PARTICLES)),
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        let alive_list_size = u64::from(MAX_PARTICLES) * std::mem::size_of::<u32>() as u64;
        let alive_list_buffers = [
            make_storage_buffer(device, "Alive indices A", alive_list_size),
            make_storage_buffer(device, "Alive indices B", alive_list_size),
        ];
        let counters_buffer = make_storage_buffer_init(
            device,
            "Lifecycle counters",
            bytemuck::bytes_of(&Counters::initial(MAX_PARTICLES)),
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        let indirect_usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::INDIRECT
            | wgpu::BufferUsages::COPY_DST;
        let emit_args_buffer = make_storage_buffer_init(
            device,
            "Emission dispatch args",
            bytemuck::bytes_of(&DispatchArgs::default()),
            indirect_usage,
        );
        let sim_args_buffer = make_storage_buffer_init(
            device,
            "Simulation dispatch args",
            bytemuck::bytes_of(&DispatchArgs::default()),
            indirect_usage,
        );
        let draw_args_buffer = make_storage_buffer_init(
            device,
            "Draw args",
            bytemuck::bytes_of(&DrawArgs::default()),
            indirect_usage,
        );

        let bind_group_layout = make_bind_group_layout(device);
        let args_bind_group_layout = make_args_bind_group_layout(device);
        let kickoff_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Kickoff layout"),
            bind_group_layouts: &[&bind_group_layout, &args_bind_group_layout],
            push_constant_ranges: &[],
        });
        let phase_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Particle lifecycle layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let kickoff_pipeline = make_compute_pipeline(
            device,
            &kickoff_layout,
            "Kickoff",
            crate::include_shader!("kickoff.wgsl"),
        );
        let emit_pipeline = make_compute_pipeline(
            device,
            &phase_layout,
            "Emission",
            crate::include_shader!("emit.wgsl"),
        );
        let simulate_pipeline = make_compute_pipeline(
            device,
            &phase_layout,
            "Simulation",
            crate::include_shader!("simulate.wgsl"),
        );

        // Collaborators that own real depth/normal targets swap these out
        // through set_collision_targets.
        let depth_target =
            shader_utils::create_placeholder_target(device, queue, [f32::MAX, 0.0, 0.0, 0.0]);
        let normal_target =
            shader_utils::create_placeholder_target(device, queue, [0.0, 1.0, 0.0, 0.0]);

        let bind_groups = make_bind_groups(
            device,
            &bind_group_layout,
            &frame_uniforms,
            &emitter_uniforms,
            &particle_buffer,
            &dead_list_buffer,
            &alive_list_buffers,
            &counters_buffer,
            &draw_args_buffer,
            &depth_target,
            &normal_target,
        );
        let args_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Dispatch args"),
            layout: &args_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: emit_args_buffer.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: sim_args_buffer.buffer.as_entire_binding(),
                },
            ],
        });

        Ok(ParticleSystem {
            params: params.clone(),
            budget: EmissionBudget::new(params.emission_rate),
            seed_rng: rand::rngs::SmallRng::from_entropy(),
            frame_index: 0,
            collision_view_proj: cgmath::Matrix4::from_scale(1.0f32).into(),
            collision_target_size: [1.0, 1.0],
            frame_uniforms,
            emitter_uniforms,
            particle_buffer,
            dead_list_buffer,
            alive_list_buffers,
            counters_buffer,
            emit_args_buffer,
            sim_args_buffer,
            draw_args_buffer,
            kickoff_pipeline,
            emit_pipeline,
            simulate_pipeline,
            bind_group_layout,
            bind_groups,
            args_bind_group,
            depth_target,
            normal_target,
            staging_belt: wgpu::util::StagingBelt::new(256),
        })
    }

    /// Which alive list currently holds the pre-sim set.
    pub fn parity(&self) -> usize {
        (self.frame_index & 1) as usize
    }

    /// Point the collision compare at real depth/normal targets. view_proj
    /// must be the transform those targets were rendered with.
    pub fn set_collision_targets(
        &mut self,
        device: &wgpu::Device,
        depth_target: wgpu::TextureView,
        normal_target: wgpu::TextureView,
        view_proj: [[f32; 4]; 4],
        target_size: (u32, u32),
    ) {
        self.depth_target = depth_target;
        self.normal_target = normal_target;
        self.collision_view_proj = view_proj;
        self.collision_target_size = [target_size.0 as f32, target_size.1 as f32];
        self.bind_groups = make_bind_groups(
            device,
            &self.bind_group_layout,
            &self.frame_uniforms,
            &self.emitter_uniforms,
            &self.particle_buffer,
            &self.dead_list_buffer,
            &self.alive_list_buffers,
            &self.counters_buffer,
            &self.draw_args_buffer,
            &self.depth_target,
            &self.normal_target,
        );
    }

    /// Record one frame of the lifecycle: kickoff, then indirect emission,
    /// then indirect simulation. Rendering the same frame afterwards picks
    /// up the post-sim set this frame's simulation writes.
    pub fn encode_frame(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        dt: f32,
    ) {
        // Flip roles: the set simulation filled last frame is this frame's
        // pre-sim input. Skipped frames keep the parity, so a paused app
        // keeps redrawing the last post-sim set.
        self.frame_index += 1;

        let emit_requested = self.budget.advance(f64::from(dt));
        let p = &self.params;
        let gravity = if p.gravity_enabled {
            [p.gravity[0], p.gravity[1], p.gravity[2], p.viscosity]
        } else {
            [0.0, 0.0, 0.0, p.viscosity]
        };
        let uniforms = FrameUniforms {
            dt,
            emit_requested,
            collision_enabled: p.collision_enabled as u32,
            restitution: p.restitution,
            seed: [
                self.seed_rng.gen(),
                self.seed_rng.gen(),
                self.seed_rng.gen(),
                self.frame_index as u32,
            ],
            gravity,
            constant_velocity: [
                p.constant_velocity[0],
                p.constant_velocity[1],
                p.constant_velocity[2],
                0.0,
            ],
            view_proj: self.collision_view_proj,
            target_size: [
                self.collision_target_size[0],
                self.collision_target_size[1],
                0.0,
                0.0,
            ],
        };
        self.staging_belt
            .write_buffer(
                encoder,
                &self.frame_uniforms.buffer,
                0,
                wgpu::BufferSize::new(self.frame_uniforms.size).unwrap(),
                device,
            )
            .copy_from_slice(bytemuck::bytes_of(&uniforms));
        self.staging_belt.finish();

        let bind_group = &self.bind_groups[self.parity()];
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Kickoff pass"),
            });
            pass.set_pipeline(&self.kickoff_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.set_bind_group(1, &self.args_bind_group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Emission pass"),
            });
            pass.set_pipeline(&self.emit_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups_indirect(&self.emit_args_buffer.buffer, 0);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Simulation pass"),
            });
            pass.set_pipeline(&self.simulate_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups_indirect(&self.sim_args_buffer.buffer, 0);
        }
    }

    /// Reclaim staging memory once the submission is in flight.
    pub fn after_queue_submission(&mut self) {
        self.staging_belt.recall();
    }
}

fn make_compute_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    label: &str,
    source: &str,
) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module: &module,
        entry_point: "main",
    })
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn make_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let uniform_entry = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Particle lifecycle bindings"),
        entries: &[
            uniform_entry(0),
            uniform_entry(1),
            storage_entry(2),
            storage_entry(3),
            storage_entry(4),
            storage_entry(5),
            storage_entry(6),
            storage_entry(9),
            texture_entry(10),
            texture_entry(11),
        ],
    })
}

fn make_args_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Dispatch args bindings"),
        entries: &[storage_entry(0), storage_entry(1)],
    })
}

#[allow(clippy::too_many_arguments)]
fn make_bind_groups(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    frame_uniforms: &SizedBuffer,
    emitter_uniforms: &SizedBuffer,
    particle_buffer: &SizedBuffer,
    dead_list_buffer: &SizedBuffer,
    alive_list_buffers: &[SizedBuffer; 2],
    counters_buffer: &SizedBuffer,
    draw_args_buffer: &SizedBuffer,
    depth_target: &wgpu::TextureView,
    normal_target: &wgpu::TextureView,
) -> [wgpu::BindGroup; 2] {
    let make = |label, pre: &SizedBuffer, post: &SizedBuffer| {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_uniforms.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: emitter_uniforms.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: particle_buffer.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: dead_list_buffer.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: pre.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: post.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: counters_buffer.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 9,
                    resource: draw_args_buffer.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 10,
                    resource: wgpu::BindingResource::TextureView(depth_target),
                },
                wgpu::BindGroupEntry {
                    binding: 11,
                    resource: wgpu::BindingResource::TextureView(normal_target),
                },
            ],
        })
    };
    [
        make(
            "Particle lifecycle (even)",
            &alive_list_buffers[0],
            &alive_list_buffers[1],
        ),
        make(
            "Particle lifecycle (odd)",
            &alive_list_buffers[1],
            &alive_list_buffers[0],
        ),
    ]
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RenderUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub camera_right: [f32; 4],
    pub camera_up: [f32; 4],
}

impl Default for RenderUniforms {
    fn default() -> Self {
        RenderUniforms {
            view_proj: cgmath::Matrix4::from_scale(1.0f32).into(),
            camera_right: [1.0, 0.0, 0.0, 0.0],
            camera_up: [0.0, 1.0, 0.0, 0.0],
        }
    }
}

/// Instanced billboard renderer over the post-sim alive set. Issues a single
/// draw_indirect against the args the simulation pass populated.
pub struct ParticleRenderer {
    render_pipeline: wgpu::RenderPipeline,
    bind_groups: [wgpu::BindGroup; 2],
    uniform_buffer: SizedBuffer,
}

impl ParticleRenderer {
    pub fn init(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        system: &ParticleSystem,
        target_format: wgpu::TextureFormat,
    ) -> ParticleRenderer {
        let uniform_buffer =
            make_default_uniform_buffer::<RenderUniforms>(device, "Particle render uniforms");

        let scale_lut = shader_utils::create_scale_lut_texture(
            device,
            queue,
            &bake_scalar_curve(&system.params.size_curve, GRADIENT_SAMPLES),
        );
        let color_lut = shader_utils::create_color_lut_texture(
            device,
            queue,
            &bake_gradient(&system.params.color_gradient, GRADIENT_SAMPLES),
        );
        let lut_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("LUT sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let read_only_storage = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Particle render bindings"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    read_only_storage(1),
                    read_only_storage(2),
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                            view_dimension: wgpu::TextureViewDimension::D1,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 4,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D1,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 5,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let make = |label, post: &SizedBuffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: system.particle_buffer.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: post.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(&scale_lut),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: wgpu::BindingResource::TextureView(&color_lut),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: wgpu::BindingResource::Sampler(&lut_sampler),
                    },
                ],
            })
        };
        // Indexed by the system's parity: on an even frame the post-sim set
        // lands in list B, on an odd frame in list A.
        let bind_groups = [
            make("Particle render (even)", &system.alive_list_buffers[1]),
            make("Particle render (odd)", &system.alive_list_buffers[0]),
        ];

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle render"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(crate::include_shader!(
                "particle_render.wgsl"
            ))),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Particle render layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let blend_component = wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        };
        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Particle render pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: "vs_main",
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: Some(wgpu::BlendState {
                        color: blend_component,
                        alpha: blend_component,
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        ParticleRenderer {
            render_pipeline,
            bind_groups,
            uniform_buffer,
        }
    }

    pub fn update_uniforms(&self, queue: &wgpu::Queue, uniforms: &RenderUniforms) {
        queue.write_buffer(&self.uniform_buffer.buffer, 0, bytemuck::bytes_of(uniforms));
    }

    pub fn render<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>, system: &'a ParticleSystem) {
        pass.set_pipeline(&self.render_pipeline);
        pass.set_bind_group(0, &self.bind_groups[system.parity()], &[]);
        pass.draw_indirect(&system.draw_args_buffer.buffer, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_struct_sizes() {
        assert_eq!(std::mem::size_of::<Particle>(), 64);
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 144);
        assert_eq!(std::mem::size_of::<EmitterUniforms>(), 80);
        assert_eq!(std::mem::size_of::<Counters>(), 16);
        assert_eq!(std::mem::size_of::<DispatchArgs>(), 12);
        assert_eq!(std::mem::size_of::<DrawArgs>(), 16);
        assert_eq!(std::mem::size_of::<RenderUniforms>(), 96);
    }

    #[test]
    fn dead_list_starts_full() {
        let list = initial_dead_list(8);
        assert_eq!(list, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        let counters = Counters::initial(8);
        assert_eq!(counters.dead, 8);
        assert_eq!(counters.pre_sim, 0);
        assert_eq!(counters.post_sim, 0);
    }

    #[test]
    fn draw_args_default_is_quad() {
        let args = DrawArgs::default();
        assert_eq!(args.vertex_count, 4);
        assert_eq!(args.instance_count, 0);
    }

    #[test]
    fn dispatch_rounds_up() {
        assert_eq!(dispatch_size(0), 0);
        assert_eq!(dispatch_size(1), 1);
        assert_eq!(dispatch_size(PARTICLE_GROUP_SIZE), 1);
        assert_eq!(dispatch_size(PARTICLE_GROUP_SIZE + 1), 2);
        assert_eq!(dispatch_size(MAX_PARTICLES), 3907);
    }

    #[test]
    fn dispatch_args_bound_only_in_kickoff() {
        // The emission and simulation passes consume these buffers through
        // dispatch_workgroups_indirect; wgpu rejects a dispatch whose
        // indirect buffer is also one of its read-write storage bindings,
        // so only the kickoff kernel may declare them.
        let kickoff = crate::include_shader!("kickoff.wgsl");
        assert!(kickoff.contains("@group(1) @binding(0) var<storage, read_write> emit_args"));
        assert!(kickoff.contains("@group(1) @binding(1) var<storage, read_write> sim_args"));
        for kernel in [
            crate::include_shader!("emit.wgsl"),
            crate::include_shader!("simulate.wgsl"),
        ] {
            assert!(!kernel.contains("emit_args"));
            assert!(!kernel.contains("sim_args"));
        }
    }

    #[test]
    fn param_validation() {
        let mut params = ParticleSystemParams::default();
        assert!(validate_params(&params).is_ok());
        params.emission_rate = 0;
        assert!(validate_params(&params).is_err());
        params.emission_rate = 100;
        params.min_lifetime = 3.0;
        params.max_lifetime = 2.0;
        assert!(validate_params(&params).is_err());
        params.max_lifetime = 4.0;
        params.min_speed = 5.0;
        params.max_speed = 1.0;
        assert!(validate_params(&params).is_err());
    }

    #[test]
    fn emitter_uniforms_pack_ranges() {
        let params = ParticleSystemParams::default();
        let uniforms = EmitterUniforms::from_params(&params);
        assert_eq!(uniforms.speed[0], params.min_speed);
        assert_eq!(uniforms.speed[1], params.max_speed);
        assert_eq!(uniforms.lifetime[0], params.min_lifetime);
        assert_eq!(uniforms.lifetime[1], params.max_lifetime);
        assert_eq!(uniforms.origin[3], params.shape_radius);
        // The direction is normalized on the way in.
        let d = uniforms.direction;
        let len = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
        assert!((len - 1.0).abs() < 1e-5);
    }
}
