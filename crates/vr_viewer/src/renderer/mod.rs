//! Per-eye rendering of the sorted triangle stream. Owns the eye targets and
//! the scene pipeline; shares the GPU context with the sort backend.

pub mod context;
pub mod pipelines;
pub mod targets;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use glam::Vec4;
use xr_frame::{EyeTarget, SwapchainInfo};

use self::{
    context::GfxContext,
    pipelines::scene::{EyeUniforms, ScenePipeline},
    targets::EyeTargets,
};
use crate::plugin::{EyeSink, SortedFrame};

/// Background behind everything, also the fog colour.
pub const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.184,
    g: 0.310,
    b: 0.310,
    a: 1.0,
};

pub struct Renderer {
    pub gfx:       Arc<GfxContext>,
    pub targets:   EyeTargets,
    pub scene:     ScenePipeline,
    /// Game units beyond which geometry is fully fogged.
    draw_distance: f32,
}

impl Renderer {
    pub fn new(gfx: Arc<GfxContext>, swapchains: &[SwapchainInfo], draw_distance: f32) -> Result<Self> {
        let targets = EyeTargets::new(&gfx.device, swapchains)?;
        let scene = ScenePipeline::new(&gfx.device, targets.color_fmt, targets.depth_fmt)?;
        Ok(Self {
            gfx,
            targets,
            scene,
            draw_distance,
        })
    }
}

impl EyeSink<wgpu::Buffer> for Renderer {
    fn draw_eye(&mut self, target: &EyeTarget<'_>, frame: &SortedFrame<'_, wgpu::Buffer>) -> Result<()> {
        let image = self
            .targets
            .image(target.view, target.image)
            .ok_or_else(|| anyhow!("No render target for view {} image {}", target.view, target.image))?;

        let camera = frame.camera.position;
        self.scene.write_uniforms(
            &self.gfx.queue,
            &EyeUniforms {
                view_proj: target.transforms.view_proj,
                fog_color: Vec4::new(CLEAR_COLOR.r as f32, CLEAR_COLOR.g as f32, CLEAR_COLOR.b as f32, 1.0),
                camera:    Vec4::new(camera.x, camera.y, camera.z, self.draw_distance),
            },
        );

        let mut encoder = self
            .gfx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Eye Encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Eye Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &image.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &image.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let vertices = frame.buffers.out_vertices.handle();
            let uvs = frame.buffers.out_uvs.handle();
            if let (Some(vertices), Some(uvs)) = (vertices, uvs) {
                if frame.vertex_count > 0 {
                    self.scene.draw(&mut pass, vertices, uvs, frame.vertex_count);
                }
            }
        }

        self.gfx.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}
