// Compute pipelines for the three sort kernels in `sort.wgsl`. All three share
// one bind group layout, so a bind group built for one bucket fits any of them.

use trisort::{Bucket, GpuError};

pub const SORT_WGSL: &str = include_str!("../../../shaders/sort.wgsl");

pub struct SortPipelines {
    pub layout: wgpu::BindGroupLayout,
    unordered:  wgpu::ComputePipeline,
    small:      wgpu::ComputePipeline,
    large:      wgpu::ComputePipeline,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty:                 wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size:   None,
        },
        count: None,
    }
}

impl SortPipelines {
    pub fn new(device: &wgpu::Device) -> Result<Self, GpuError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label:  Some("shaders/sort.wgsl"),
            source: wgpu::ShaderSource::Wgsl(SORT_WGSL.into()),
        });

        // Binding order matches `SortPass::bindings`.
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label:   Some("Sort BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding:    0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty:                 wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size:   wgpu::BufferSize::new(trisort::uniforms::SORT_UNIFORM_SIZE),
                    },
                    count: None,
                },
                storage_entry(1, true),  // models
                storage_entry(2, true),  // scene vertices
                storage_entry(3, true),  // scene uvs
                storage_entry(4, true),  // frame vertices
                storage_entry(5, true),  // frame uvs
                storage_entry(6, true),  // tile heights
                storage_entry(7, false), // sorted vertices
                storage_entry(8, false), // sorted uvs
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label:                Some("Sort Pipeline Layout"),
            bind_group_layouts:   &[&layout],
            push_constant_ranges: &[],
        });

        let create = |entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label:               Some(entry_point),
                layout:              Some(&pipeline_layout),
                module:              &shader,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            })
        };
        let unordered = create("unordered");
        let small = create("small");
        let large = create("large");

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::Shader(err.to_string()));
        }
        log::debug!("Sort pipelines compiled");

        Ok(Self {
            layout,
            unordered,
            small,
            large,
        })
    }

    pub fn pipeline(&self, bucket: Bucket) -> &wgpu::ComputePipeline {
        match bucket {
            Bucket::Unordered => &self.unordered,
            Bucket::Small => &self.small,
            Bucket::Large => &self.large,
        }
    }
}
