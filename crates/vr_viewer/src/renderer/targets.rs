//! Per-eye render targets: one colour image per swapchain image, each with its
//! own depth attachment, since swapchains only hand out colour.

use anyhow::{anyhow, Result};
use xr_frame::format::{gl, vk};
use xr_frame::SwapchainInfo;

/// Maps a runtime swapchain format code onto the matching wgpu format.
pub fn texture_format(code: i64) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;
    Some(match code {
        vk::R8G8B8A8_UNORM | gl::RGBA8 => F::Rgba8Unorm,
        vk::R8G8B8A8_SRGB | gl::SRGB8_ALPHA8 => F::Rgba8UnormSrgb,
        vk::B8G8R8A8_UNORM => F::Bgra8Unorm,
        vk::B8G8R8A8_SRGB => F::Bgra8UnormSrgb,
        gl::RGB10_A2 => F::Rgb10a2Unorm,
        gl::RGBA16F => F::Rgba16Float,
        _ => return None,
    })
}

pub struct EyeImage {
    // Private textures – keep alive for the lifetime of the views.
    _color_tex: wgpu::Texture,
    _depth_tex: wgpu::Texture,

    pub color: wgpu::TextureView,
    pub depth: wgpu::TextureView,
}

pub struct EyeTargets {
    pub color_fmt: wgpu::TextureFormat,
    pub depth_fmt: wgpu::TextureFormat,
    /// `[view][image]`
    images: Vec<Vec<EyeImage>>,
}

impl EyeTargets {
    pub fn new(device: &wgpu::Device, swapchains: &[SwapchainInfo]) -> Result<Self> {
        let first = swapchains
            .first()
            .ok_or_else(|| anyhow!("Compositor reported no swapchains"))?;
        let color_fmt = texture_format(first.format)
            .ok_or_else(|| anyhow!("Swapchain format {} has no GPU equivalent", first.format))?;
        let depth_fmt = wgpu::TextureFormat::Depth32Float;

        let mut images = Vec::with_capacity(swapchains.len());
        for (view, info) in swapchains.iter().enumerate() {
            let tex_size = wgpu::Extent3d {
                width: info.width.max(1),
                height: info.height.max(1),
                depth_or_array_layers: 1,
            };

            // Helper to create a texture with the given parameters.
            let create_tex = |label: &str, format, usage| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size: tex_size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage,
                    view_formats: &[],
                })
            };

            let ring = (0..info.image_count)
                .map(|image| {
                    let color_tex = create_tex(
                        &format!("Eye {view} Color {image}"),
                        color_fmt,
                        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                    );
                    let depth_tex = create_tex(
                        &format!("Eye {view} Depth {image}"),
                        depth_fmt,
                        wgpu::TextureUsages::RENDER_ATTACHMENT,
                    );
                    EyeImage {
                        color: color_tex.create_view(&wgpu::TextureViewDescriptor::default()),
                        depth: depth_tex.create_view(&wgpu::TextureViewDescriptor::default()),
                        _color_tex: color_tex,
                        _depth_tex: depth_tex,
                    }
                })
                .collect();
            images.push(ring);
        }

        log::debug!(
            "Eye targets: {} views x {} images, {:?}",
            images.len(),
            first.image_count,
            color_fmt
        );
        Ok(Self {
            color_fmt,
            depth_fmt,
            images,
        })
    }

    pub fn image(&self, view: usize, image: u32) -> Option<&EyeImage> {
        self.images.get(view)?.get(image as usize)
    }
}
