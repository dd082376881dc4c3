// Host-side rendition of the lifecycle kernels, used to test the counter and
// index-list protocol without a GPU. It mirrors the kernel semantics step for
// step: the same clamp in kickoff, the same underflow-compensated dead-stack
// pop, the same inclusive expiry compare, the same same-frame simulation of
// newly emitted particles. Collision response is left out; it depends on the
// scene depth target and is exercised visually instead.

use crate::emission::EmissionBudget;
use crate::particle_system::{dispatch_size, DispatchArgs, DrawArgs, Particle};
use crate::sim_params::{DirectionMode, EmitterShape, ParticleSystemParams};
use std::sync::atomic::{AtomicU32, Ordering};

pub fn pcg3d(seed: [u32; 3]) -> [u32; 3] {
    let mut v = seed;
    for x in v.iter_mut() {
        *x = x.wrapping_mul(1664525).wrapping_add(1013904223);
    }
    v[0] = v[0].wrapping_add(v[1].wrapping_mul(v[2]));
    v[1] = v[1].wrapping_add(v[2].wrapping_mul(v[0]));
    v[2] = v[2].wrapping_add(v[0].wrapping_mul(v[1]));
    for x in v.iter_mut() {
        *x ^= *x >> 16;
    }
    v[0] = v[0].wrapping_add(v[1].wrapping_mul(v[2]));
    v[1] = v[1].wrapping_add(v[2].wrapping_mul(v[0]));
    v[2] = v[2].wrapping_add(v[0].wrapping_mul(v[1]));
    v
}

pub fn rand3(seed: [u32; 3]) -> [f32; 3] {
    let v = pcg3d(seed);
    let scale = 1.0 / u32::MAX as f64;
    [
        (f64::from(v[0]) * scale) as f32,
        (f64::from(v[1]) * scale) as f32,
        (f64::from(v[2]) * scale) as f32,
    ]
}

struct LifecycleCounters {
    dead: AtomicU32,
    pre_sim: AtomicU32,
    post_sim: AtomicU32,
    emit: AtomicU32,
}

impl LifecycleCounters {
    fn new(capacity: u32) -> LifecycleCounters {
        LifecycleCounters {
            dead: AtomicU32::new(capacity),
            pre_sim: AtomicU32::new(0),
            post_sim: AtomicU32::new(0),
            emit: AtomicU32::new(0),
        }
    }
}

fn sample_unit_sphere(r: [f32; 2]) -> cgmath::Vector3<f32> {
    let z = 1.0 - 2.0 * r[0];
    let phi = std::f32::consts::TAU * r[1];
    let s = (1.0 - z * z).max(0.0).sqrt();
    cgmath::Vector3::new(s * phi.cos(), s * phi.sin(), z)
}

fn perpendicular(d: cgmath::Vector3<f32>) -> cgmath::Vector3<f32> {
    use cgmath::InnerSpace;
    if d.z.abs() < 0.9 {
        d.cross(cgmath::Vector3::unit_z()).normalize()
    } else {
        d.cross(cgmath::Vector3::unit_x()).normalize()
    }
}

pub struct CpuPipeline {
    capacity: u32,
    params: ParticleSystemParams,
    budget: EmissionBudget,
    frame_index: u64,
    seed: [u32; 3],

    pub particles: Vec<Particle>,
    dead_list: Vec<u32>,
    alive_lists: [Vec<u32>; 2],
    counters: LifecycleCounters,
    pub emit_args: DispatchArgs,
    pub sim_args: DispatchArgs,
    pub draw_args: DrawArgs,

    pub emitted_total: u64,
    pub expired_total: u64,
}

impl CpuPipeline {
    pub fn new(capacity: u32, params: &ParticleSystemParams) -> CpuPipeline {
        CpuPipeline {
            capacity,
            params: params.clone(),
            budget: EmissionBudget::new(params.emission_rate),
            frame_index: 0,
            seed: [0x9e3779b9, 0x85ebca6b, 0xc2b2ae35],
            particles: vec![
                Particle {
                    position_size: [0.0; 4],
                    velocity: [0.0; 4],
                    lifetime: [0.0; 4],
                    color: [0.0; 4],
                };
                capacity as usize
            ],
            dead_list: (0..capacity).collect(),
            alive_lists: [vec![0; capacity as usize], vec![0; capacity as usize]],
            counters: LifecycleCounters::new(capacity),
            emit_args: DispatchArgs::default(),
            sim_args: DispatchArgs::default(),
            draw_args: DrawArgs::default(),
            emitted_total: 0,
            expired_total: 0,
        }
    }

    pub fn parity(&self) -> usize {
        (self.frame_index & 1) as usize
    }

    pub fn dead_depth(&self) -> u32 {
        self.counters.dead.load(Ordering::Relaxed)
    }

    pub fn post_sim_count(&self) -> u32 {
        self.counters.post_sim.load(Ordering::Relaxed)
    }

    pub fn draw_instances(&self) -> u32 {
        self.draw_args.instance_count
    }

    /// Run one full frame: emission budget, kickoff, emission, simulation,
    /// then the role swap.
    pub fn step(&mut self, dt: f32) {
        let requested = self.budget.advance(f64::from(dt));
        self.step_with_emission(dt, requested);
    }

    /// Like step, but with the emission request supplied directly. Tests use
    /// this to drive exhaustion without configuring absurd rates.
    pub fn step_with_emission(&mut self, dt: f32, emit_requested: u32) {
        self.kickoff(emit_requested);
        self.emit();
        self.simulate(dt);
        self.frame_index += 1;
    }

    fn kickoff(&mut self, emit_requested: u32) {
        let dead = self.counters.dead.load(Ordering::Relaxed);
        let emit = emit_requested.min(dead);
        self.counters.emit.store(emit, Ordering::Relaxed);

        let survivors = self.counters.post_sim.load(Ordering::Relaxed);
        self.counters.pre_sim.store(survivors, Ordering::Relaxed);
        self.counters.post_sim.store(0, Ordering::Relaxed);

        self.emit_args = DispatchArgs {
            x: dispatch_size(emit),
            y: 1,
            z: 1,
        };
        self.sim_args = DispatchArgs {
            x: dispatch_size(survivors + emit),
            y: 1,
            z: 1,
        };
        self.draw_args = DrawArgs::default();
    }

    fn alloc_index(&self) -> Option<u32> {
        let depth = self.counters.dead.fetch_sub(1, Ordering::Relaxed);
        if depth == 0 || depth > 0x7fff_ffff {
            self.counters.dead.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Some(self.dead_list[(depth - 1) as usize])
    }

    fn release_index(&mut self, index: u32) {
        let depth = self.counters.dead.fetch_add(1, Ordering::Relaxed);
        self.dead_list[depth as usize] = index;
    }

    fn emit(&mut self) {
        use cgmath::InnerSpace;
        let emit = self.counters.emit.load(Ordering::Relaxed);
        let parity = self.parity();
        for gid in 0..emit {
            let index = match self.alloc_index() {
                Some(index) => index,
                None => continue,
            };

            let r0 = rand3([gid, self.seed[0], self.seed[1]]);
            let r1 = rand3([self.seed[2], gid, self.seed[0]]);

            let p = &self.params;
            let radius = p.shape_radius;
            let origin = cgmath::Vector3::from(p.emitter_position);
            let mut position = origin;
            let mut axis = cgmath::Vector3::from(p.direction).normalize();
            match p.shape {
                EmitterShape::Sphere => {
                    position += sample_unit_sphere([r0[0], r0[1]]) * radius * r0[2].cbrt();
                }
                EmitterShape::Box => {
                    position += cgmath::Vector3::new(
                        r0[0] * 2.0 - 1.0,
                        r0[1] * 2.0 - 1.0,
                        r0[2] * 2.0 - 1.0,
                    ) * radius;
                }
                EmitterShape::Cone => {
                    let u = perpendicular(axis);
                    let v = axis.cross(u);
                    let theta = std::f32::consts::TAU * r0[0];
                    let radial = u * theta.cos() + v * theta.sin();
                    position += radial * radius * r0[1].sqrt();
                    let tilt = p.cone_angle * r0[2];
                    axis = (axis * tilt.cos() + radial * tilt.sin()).normalize();
                }
            }

            let direction = match p.direction_mode {
                DirectionMode::Outward => {
                    let offset = position - origin;
                    if offset.magnitude() > 1e-5 {
                        offset.normalize()
                    } else {
                        sample_unit_sphere([r1[0], r1[1]])
                    }
                }
                DirectionMode::Single => axis,
            };

            let speed = p.min_speed + (p.max_speed - p.min_speed) * r1[1];
            let max_age = p.min_lifetime + (p.max_lifetime - p.min_lifetime) * r1[2];
            let velocity = direction * speed;

            self.particles[index as usize] = Particle {
                position_size: [position.x, position.y, position.z, 1.0],
                velocity: [velocity.x, velocity.y, velocity.z, 0.0],
                lifetime: [0.0, max_age, 0.0, 0.0],
                color: [1.0, 1.0, 1.0, 1.0],
            };

            let slot = self.counters.pre_sim.fetch_add(1, Ordering::Relaxed);
            self.alive_lists[parity][slot as usize] = index;
            self.emitted_total += 1;
        }
    }

    fn simulate(&mut self, dt: f32) {
        let parity = self.parity();
        let pre_sim = self.counters.pre_sim.load(Ordering::Relaxed);
        let gravity = if self.params.gravity_enabled {
            self.params.gravity
        } else {
            [0.0; 3]
        };
        let viscosity = self.params.viscosity;
        let constant_velocity = self.params.constant_velocity;
        for gid in 0..pre_sim {
            let index = self.alive_lists[parity][gid as usize];
            let mut particle = self.particles[index as usize];

            particle.lifetime[0] += dt;
            if particle.lifetime[0] >= particle.lifetime[1] {
                self.particles[index as usize] = particle;
                self.release_index(index);
                self.expired_total += 1;
                continue;
            }

            let damping = 1.0 + viscosity * dt;
            for axis in 0..3 {
                particle.velocity[axis] = (particle.velocity[axis] + gravity[axis] * dt) / damping;
                particle.position_size[axis] +=
                    (particle.velocity[axis] + constant_velocity[axis]) * dt;
            }
            self.particles[index as usize] = particle;

            let slot = self.counters.post_sim.fetch_add(1, Ordering::Relaxed);
            self.alive_lists[parity ^ 1][slot as usize] = index;
            self.draw_args.instance_count += 1;
        }
    }

    /// The list holding the most recent post-sim set. step() ends with the
    /// role swap, so this is the list the next frame reads as pre-sim.
    pub fn post_list(&self) -> &[u32] {
        &self.alive_lists[self.parity()][..self.post_sim_count() as usize]
    }

    /// Every slot index must sit in exactly one of the dead stack and the
    /// post-sim alive set.
    pub fn assert_partition(&self) {
        let dead = self.dead_depth() as usize;
        let post = self.post_sim_count() as usize;
        assert_eq!(
            dead + post,
            self.capacity as usize,
            "dead ({}) + alive ({}) != capacity ({})",
            dead,
            post,
            self.capacity
        );
        let mut seen = vec![false; self.capacity as usize];
        for &index in self.dead_list[..dead].iter().chain(self.post_list().iter()) {
            assert!(!seen[index as usize], "index {} appears twice", index);
            seen[index as usize] = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_lifetime_params(rate: u32, lifetime: f32) -> ParticleSystemParams {
        ParticleSystemParams {
            emission_rate: rate,
            min_lifetime: lifetime,
            max_lifetime: lifetime,
            gravity_enabled: false,
            viscosity: 0.0,
            constant_velocity: [0.0; 3],
            ..ParticleSystemParams::default()
        }
    }

    #[test]
    fn partition_and_conservation_hold_across_frames() {
        let params = ParticleSystemParams {
            emission_rate: 40,
            min_lifetime: 0.1,
            max_lifetime: 0.5,
            ..ParticleSystemParams::default()
        };
        let mut pipeline = CpuPipeline::new(64, &params);
        for _ in 0..100 {
            pipeline.step(1.0 / 60.0);
            pipeline.assert_partition();
            let alive = pipeline.emitted_total - pipeline.expired_total;
            assert_eq!(u64::from(pipeline.post_sim_count()), alive);
            assert_eq!(
                u64::from(pipeline.dead_depth()),
                u64::from(64u32) - alive
            );
        }
    }

    #[test]
    fn emission_clamps_at_exhaustion() {
        let params = fixed_lifetime_params(1, 100.0);
        let mut pipeline = CpuPipeline::new(8, &params);
        // Request far more than the pool holds in a single frame.
        pipeline.step_with_emission(0.01, 20);
        assert_eq!(pipeline.post_sim_count(), 8);
        assert_eq!(pipeline.dead_depth(), 0);
        assert_eq!(pipeline.draw_instances(), 8);
        pipeline.assert_partition();
        // With nothing dead, further requests clamp to zero.
        pipeline.step_with_emission(0.01, 20);
        assert_eq!(pipeline.emit_args.x, 0);
        assert_eq!(pipeline.post_sim_count(), 8);
        pipeline.assert_partition();
    }

    #[test]
    fn empty_stack_pop_is_compensated() {
        // Drive the allocator directly, past the point the kickoff clamp
        // normally stops at. The pre-decrement on an empty stack wraps; the
        // pop must restore the depth and hand back nothing.
        let params = fixed_lifetime_params(1, 1.0);
        let mut pipeline = CpuPipeline::new(4, &params);
        for _ in 0..4 {
            assert!(pipeline.alloc_index().is_some());
        }
        assert_eq!(pipeline.dead_depth(), 0);
        assert_eq!(pipeline.alloc_index(), None);
        assert_eq!(pipeline.dead_depth(), 0);
        // The stack still works after the compensated underflow.
        pipeline.release_index(2);
        assert_eq!(pipeline.dead_depth(), 1);
        assert_eq!(pipeline.alloc_index(), Some(2));
    }

    #[test]
    fn expiry_is_inclusive() {
        // dt equal to the lifetime: the particle is born and expires within
        // the same frame, so it never reaches a draw.
        let params = fixed_lifetime_params(1, 1.0);
        let mut pipeline = CpuPipeline::new(4, &params);
        pipeline.step_with_emission(1.0, 1);
        assert_eq!(pipeline.emitted_total, 1);
        assert_eq!(pipeline.expired_total, 1);
        assert_eq!(pipeline.post_sim_count(), 0);
        assert_eq!(pipeline.draw_instances(), 0);
        assert_eq!(pipeline.dead_depth(), 4);
        pipeline.assert_partition();
    }

    #[test]
    fn freed_indices_are_reused() {
        let params = fixed_lifetime_params(1, 0.5);
        let mut pipeline = CpuPipeline::new(2, &params);
        for _ in 0..20 {
            pipeline.step_with_emission(0.3, 1);
            pipeline.assert_partition();
            assert!(pipeline.dead_depth() <= 2);
        }
        // Twenty emissions through a two-slot pool only works if expired
        // indices circulate back through the stack.
        assert_eq!(pipeline.emitted_total, 20);
    }

    #[test]
    fn sixteen_slot_lifecycle() {
        // One particle per frame, each living exactly 2s of simulated time
        // in 0.25s steps. A particle ages 8 times before the inclusive
        // compare retires it, and is drawn for the 7 frames before that.
        let params = fixed_lifetime_params(4, 2.0);
        let mut pipeline = CpuPipeline::new(16, &params);
        for frame in 1..=7u32 {
            pipeline.step(0.25);
            assert_eq!(pipeline.post_sim_count(), frame);
            assert_eq!(pipeline.draw_instances(), frame);
            pipeline.assert_partition();
        }
        // From the eighth frame on, one birth is balanced by one expiry.
        for _ in 8..=40 {
            pipeline.step(0.25);
            assert_eq!(pipeline.post_sim_count(), 7);
            assert_eq!(pipeline.draw_instances(), 7);
            assert_eq!(pipeline.dead_depth(), 9);
            pipeline.assert_partition();
        }
    }

    #[test]
    fn kickoff_args_stable_in_steady_state() {
        let params = fixed_lifetime_params(4, 2.0);
        let mut pipeline = CpuPipeline::new(16, &params);
        for _ in 0..10 {
            pipeline.step(0.25);
        }
        let emit_args = pipeline.emit_args;
        let sim_args = pipeline.sim_args;
        for _ in 0..10 {
            pipeline.step(0.25);
            assert_eq!(pipeline.emit_args.x, emit_args.x);
            assert_eq!(pipeline.sim_args.x, sim_args.x);
        }
        // Sixteen slots never need more than one workgroup.
        assert_eq!(sim_args.x, 1);
        assert_eq!(sim_args.y, 1);
        assert_eq!(sim_args.z, 1);
    }

    #[test]
    fn kickoff_without_work_is_idempotent() {
        let params = fixed_lifetime_params(1, 100.0);
        let mut pipeline = CpuPipeline::new(8, &params);
        pipeline.step_with_emission(0.1, 3);
        // No emission and no aging: argument derivation must be a pure
        // function of the unchanged counters.
        pipeline.step_with_emission(0.0, 0);
        let emit_args = pipeline.emit_args;
        let sim_args = pipeline.sim_args;
        let instances = pipeline.draw_args.instance_count;
        pipeline.step_with_emission(0.0, 0);
        assert_eq!(pipeline.emit_args.x, emit_args.x);
        assert_eq!(pipeline.sim_args.x, sim_args.x);
        assert_eq!(pipeline.draw_args.instance_count, instances);
    }

    #[test]
    fn survivors_carry_between_parities() {
        let params = fixed_lifetime_params(2, 10.0);
        let mut pipeline = CpuPipeline::new(32, &params);
        // 2/s over 0.5s frames is one birth per frame; nothing expires.
        pipeline.step(0.5);
        pipeline.step(0.5);
        pipeline.step(0.5);
        assert_eq!(pipeline.post_sim_count(), 3);
        // The surviving indices moved lists each frame without loss.
        pipeline.assert_partition();
    }

    #[test]
    fn emitted_lifetimes_stay_in_range() {
        let params = ParticleSystemParams {
            emission_rate: 100,
            min_lifetime: 1.0,
            max_lifetime: 3.0,
            ..ParticleSystemParams::default()
        };
        let mut pipeline = CpuPipeline::new(256, &params);
        pipeline.step_with_emission(0.01, 100);
        assert_eq!(pipeline.post_sim_count(), 100);
        for &index in pipeline.post_list() {
            let max_age = pipeline.particles[index as usize].lifetime[1];
            assert!((1.0..=3.0).contains(&max_age), "max_age {}", max_age);
        }
    }

    #[test]
    fn pcg3d_matches_reference_properties() {
        // Deterministic and sensitive to every seed lane.
        assert_eq!(pcg3d([1, 2, 3]), pcg3d([1, 2, 3]));
        assert_ne!(pcg3d([1, 2, 3]), pcg3d([2, 2, 3]));
        assert_ne!(pcg3d([1, 2, 3]), pcg3d([1, 3, 3]));
        assert_ne!(pcg3d([1, 2, 3]), pcg3d([1, 2, 4]));
        let r = rand3([7, 11, 13]);
        for v in r {
            assert!((0.0..=1.0).contains(&v));
        }
    }
}
