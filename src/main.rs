use log::{error, info};
use winit::{
    event::{Event, WindowEvent},
    event_loop::ControlFlow,
};

gflags::define! {
    --width: u32 = 1280
}
gflags::define! {
    --height: u32 = 720
}
gflags::define! {
    --config: &str = "sim_config.toml"
}
gflags::define! {
    --log_filter: &str = "info"
}
gflags::define! {
    -h, --help = false
}

fn read_config_from_file(path: &str) -> anyhow::Result<ember::sim_params::SimParams> {
    let params = std::fs::read_to_string(path)?.parse()?;
    Ok(params)
}

fn get_sim_config() -> ember::sim_params::SimParams {
    match read_config_from_file(CONFIG.flag) {
        Ok(params) => params,
        Err(e) => {
            error!("Failed to parse config file({}): {:?}", CONFIG.flag, e);
            ember::sim_params::get_sim_config_from_default_file()
        }
    }
}

struct Gpu {
    surface: wgpu::Surface,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
}

fn init_gpu(window: &winit::window::Window) -> anyhow::Result<Gpu> {
    let instance = wgpu::Instance::new(wgpu::Backends::all());
    let surface = unsafe { instance.create_surface(window) };
    let adapter = futures::executor::block_on(instance.request_adapter(
        &wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        },
    ))
    .ok_or_else(|| anyhow::anyhow!("no suitable graphics adapter"))?;
    info!("Adapter: {:?}", adapter.get_info());

    let (device, queue) = futures::executor::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: None,
            features: wgpu::Features::empty(),
            limits: wgpu::Limits::default(),
        },
        None,
    ))?;

    let size = window.inner_size();
    let config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format: surface.get_supported_formats(&adapter)[0],
        width: size.width,
        height: size.height,
        present_mode: wgpu::PresentMode::Fifo,
        alpha_mode: wgpu::CompositeAlphaMode::Auto,
    };
    surface.configure(&device, &config);
    Ok(Gpu {
        surface,
        device,
        queue,
        config,
    })
}

fn main() {
    gflags::parse();
    if HELP.flag {
        gflags::print_help_and_exit(0);
    }
    scrub_log::init_with_filter_string(LOG_FILTER.flag).unwrap();
    ember::shader_utils::list_shaders();

    let sim_params = get_sim_config();
    info!("Config: {:?}", sim_params);

    let event_loop = winit::event_loop::EventLoop::new();
    let window = winit::window::WindowBuilder::new()
        .with_title("ember")
        .with_inner_size(winit::dpi::PhysicalSize::new(WIDTH.flag, HEIGHT.flag))
        .build(&event_loop)
        .expect("failed to create window");

    let Gpu {
        surface,
        device,
        queue,
        mut config,
    } = match init_gpu(&window) {
        Ok(gpu) => gpu,
        Err(e) => {
            error!("Failed to initialize graphics: {:?}", e);
            std::process::exit(1);
        }
    };

    let mut particle_system = match ember::particle_system::ParticleSystem::new(
        &device,
        &queue,
        &sim_params.particle_system_params,
    ) {
        Ok(system) => system,
        Err(e) => {
            error!("Invalid particle system config: {:?}", e);
            std::process::exit(1);
        }
    };
    let particle_renderer = ember::particle_system::ParticleRenderer::init(
        &device,
        &queue,
        &particle_system,
        config.format,
    );

    let mut camera = ember::camera::Camera {
        screen_size: (config.width, config.height),
        ..Default::default()
    };
    let mut fps = ember::fps_estimator::FpsEstimator::new(sim_params.fps);
    let mut input_state = ember::InputState::default();
    let mut prev_input_state = input_state;
    let mut paused = false;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,
                WindowEvent::Resized(size) => {
                    config.width = size.width.max(1);
                    config.height = size.height.max(1);
                    surface.configure(&device, &config);
                    camera.screen_size = (config.width, config.height);
                }
                WindowEvent::KeyboardInput { input, .. } => {
                    macro_rules! bind_keys {
                        ($input:expr, $($pat:pat => $result:expr),*) => (
                            match $input {
                                $(
                                    winit::event::KeyboardInput {
                                        virtual_keycode: Some($pat),
                                        state,
                                        ..
                                    } => match state {
                                        winit::event::ElementState::Pressed => $result = true,
                                        winit::event::ElementState::Released => $result = false,
                                    }
                                ),*
                                _ => (),
                            }
                        );
                    }
                    bind_keys!(input,
                        winit::event::VirtualKeyCode::A => input_state.cam_left,
                        winit::event::VirtualKeyCode::D => input_state.cam_right,
                        winit::event::VirtualKeyCode::W => input_state.cam_up,
                        winit::event::VirtualKeyCode::S => input_state.cam_down,
                        winit::event::VirtualKeyCode::R => input_state.cam_in,
                        winit::event::VirtualKeyCode::F => input_state.cam_out,
                        winit::event::VirtualKeyCode::P => input_state.pause);
                    if input
                        .virtual_keycode
                        .map_or(false, |k| k == winit::event::VirtualKeyCode::Escape)
                    {
                        *control_flow = ControlFlow::Exit;
                    }
                }
                _ => (),
            },
            Event::MainEventsCleared => window.request_redraw(),
            Event::RedrawRequested(_) => {
                let dt = fps.tick().as_secs_f32();
                if input_state.pause && !prev_input_state.pause {
                    paused = !paused;
                }
                prev_input_state = input_state;
                camera.update_state(dt, &input_state);

                let frame = match surface.get_current_texture() {
                    Ok(frame) => frame,
                    Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                        surface.configure(&device, &config);
                        return;
                    }
                    Err(e) => {
                        error!("Dropped frame: {:?}", e);
                        return;
                    }
                };
                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                let mut encoder =
                    device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });

                if !paused {
                    particle_system.encode_frame(&device, &mut encoder, dt);
                }
                particle_renderer.update_uniforms(&queue, &camera.to_render_uniforms());
                {
                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("Particle pass"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: &view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                                store: true,
                            },
                        })],
                        depth_stencil_attachment: None,
                    });
                    particle_renderer.render(&mut pass, &particle_system);
                }

                queue.submit(Some(encoder.finish()));
                frame.present();
                particle_system.after_queue_submission();
            }
            _ => (),
        }
    });
}
