use lazy_static::lazy_static;
use log::info;
use std::num::NonZeroU32;

// Input path in the source tree, and also the output path in the output
// directory. This needs to match the path in build.rs
static SHADER_PATH: &str = "shaders";
lazy_static! {
    pub static ref SHADER_OUTPUT_DIR: std::path::PathBuf =
        std::path::Path::new(env!("OUT_DIR")).join(std::path::Path::new(SHADER_PATH));
}

pub fn list_shaders() {
    for entry in walkdir::WalkDir::new(SHADER_OUTPUT_DIR.as_path())
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| !e.file_type().is_dir())
    {
        info!("Found shader: {}", entry.path().display());
    }
}

// Include templated shader text by specifying a path relative to the shader
// source directory.
#[macro_export]
macro_rules! include_shader {
    ( $shader_name:expr ) => {
        include_str!(concat!(env!("OUT_DIR"), "/", "shaders", "/", $shader_name))
    };
}

// One-row r32float texture holding the baked size-over-age table. Sampled
// with textureLoad; r32float is not filterable without an extra feature.
pub fn create_scale_lut_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    values: &[f32],
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Scale LUT"),
        size: wgpu::Extent3d {
            width: values.len() as u32,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D1,
        format: wgpu::TextureFormat::R32Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    });
    queue.write_texture(
        texture.as_image_copy(),
        bytemuck::cast_slice(values),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: NonZeroU32::new(values.len() as u32 * 4),
            rows_per_image: None,
        },
        wgpu::Extent3d {
            width: values.len() as u32,
            height: 1,
            depth_or_array_layers: 1,
        },
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

// One-row rgba8 texture holding the baked color-over-age gradient.
pub fn create_color_lut_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    rgba8: &[u8],
) -> wgpu::TextureView {
    let width = (rgba8.len() / 4) as u32;
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Color LUT"),
        size: wgpu::Extent3d {
            width,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D1,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    });
    queue.write_texture(
        texture.as_image_copy(),
        rgba8,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: NonZeroU32::new(width * 4),
            rows_per_image: None,
        },
        wgpu::Extent3d {
            width,
            height: 1,
            depth_or_array_layers: 1,
        },
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

// 1x1 rgba32float placeholder bound in place of the collision depth/normal
// targets whenever a collaborator has not supplied them.
pub fn create_placeholder_target(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texel: [f32; 4],
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Placeholder target"),
        size: wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba32Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    });
    queue.write_texture(
        texture.as_image_copy(),
        bytemuck::cast_slice(&texel),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: NonZeroU32::new(16),
            rows_per_image: None,
        },
        wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

#[cfg(test)]
mod tests {
    #[test]
    fn templates_rendered() {
        let kickoff = include_shader!("kickoff.wgsl");
        assert!(kickoff.contains("fn main"));
        // The tera variable must have been substituted away.
        assert!(!kickoff.contains("workgroup_size }}"));
        let emit = include_shader!("emit.wgsl");
        assert!(emit.contains("alloc_index"));
        let simulate = include_shader!("simulate.wgsl");
        assert!(simulate.contains("release_index"));
    }
}
