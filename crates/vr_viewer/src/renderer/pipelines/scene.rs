use glam::{Mat4, Vec4};
use trisort::GpuError;

pub const SCENE_WGSL: &str = include_str!("../../../shaders/scene.wgsl");

/// Must match the layout of `EyeUniforms` in `scene.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EyeUniforms {
    pub view_proj: Mat4,  // 64 B
    pub fog_color: Vec4,  // +16
    /// Game camera position, draw distance in `w`.
    pub camera:    Vec4,  // +16 -> 96
}

const _: [(); 96] = [(); core::mem::size_of::<EyeUniforms>()];

/// Draws the sorted vertex stream: position and packed colour from one
/// buffer, uvs from the other, both 16 bytes per vertex.
pub struct ScenePipeline {
    pipeline:       wgpu::RenderPipeline,
    bind_group:     wgpu::BindGroup,
    uniform_buffer: wgpu::Buffer,
}

impl ScenePipeline {
    pub fn new(
        device:    &wgpu::Device,
        color_fmt: wgpu::TextureFormat,
        depth_fmt: wgpu::TextureFormat,
    ) -> Result<Self, GpuError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label:              Some("Eye Uniform Buffer"),
            size:               std::mem::size_of::<EyeUniforms>() as u64,
            usage:              wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label:   Some("Eye BGL"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding:    0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty:                 wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size:   wgpu::BufferSize::new(std::mem::size_of::<EyeUniforms>() as u64),
                },
                count: None,
            }],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label:   Some("Eye Bind Group"),
            layout:  &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding:  0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label:  Some("shaders/scene.wgsl"),
            source: wgpu::ShaderSource::Wgsl(SCENE_WGSL.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label:                Some("Scene Pipeline Layout"),
            bind_group_layouts:   &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let vbuf_layouts = [
            // Sorted positions with packed colour in w
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<[i32; 4]>() as u64,
                step_mode:    wgpu::VertexStepMode::Vertex,
                attributes:   &[wgpu::VertexAttribute {
                    shader_location: 0,
                    offset:          0,
                    format:          wgpu::VertexFormat::Sint32x4,
                }],
            },
            // Sorted uvs
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<[f32; 4]>() as u64,
                step_mode:    wgpu::VertexStepMode::Vertex,
                attributes:   &[wgpu::VertexAttribute {
                    shader_location: 1,
                    offset:          0,
                    format:          wgpu::VertexFormat::Float32x4,
                }],
            },
        ];

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label:  Some("Scene Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module:              &shader,
                entry_point:         "vs_main",
                buffers:             &vbuf_layouts,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module:      &shader,
                entry_point: "fs_main",
                targets:     &[Some(wgpu::ColorTargetState {
                    format:     color_fmt,
                    blend:      Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            // Sorted output carries both windings; nothing is culled.
            primitive: wgpu::PrimitiveState {
                topology:  wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format:              depth_fmt,
                depth_write_enabled: true,
                depth_compare:       wgpu::CompareFunction::LessEqual,
                stencil:             wgpu::StencilState::default(),
                bias:                wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview:   None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::Shader(err.to_string()));
        }

        Ok(Self {
            pipeline,
            bind_group,
            uniform_buffer,
        })
    }

    pub fn write_uniforms(&self, queue: &wgpu::Queue, uniforms: &EyeUniforms) {
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));
    }

    pub fn draw<'a>(
        &'a self,
        rpass:        &mut wgpu::RenderPass<'a>,
        vertices:     &'a wgpu::Buffer,
        uvs:          &'a wgpu::Buffer,
        vertex_count: u32,
    ) {
        rpass.set_pipeline(&self.pipeline);
        rpass.set_bind_group(0, &self.bind_group, &[]);
        rpass.set_vertex_buffer(0, vertices.slice(..));
        rpass.set_vertex_buffer(1, uvs.slice(..));
        rpass.draw(0..vertex_count, 0..1);
    }
}
