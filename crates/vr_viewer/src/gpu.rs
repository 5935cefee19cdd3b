//! wgpu backend for the sort pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use trisort::{Bucket, BufferDesc, BufferRole, GpuBuffer, GpuDevice, GpuError, SortPass};

use crate::renderer::context::GfxContext;
use crate::renderer::pipelines::sort::SortPipelines;

/// Usage flags for a buffer role.
pub fn buffer_usages(role: BufferRole) -> wgpu::BufferUsages {
    use wgpu::BufferUsages as U;
    match role {
        BufferRole::Geometry | BufferRole::Models | BufferRole::Heights => U::STORAGE | U::COPY_DST,
        BufferRole::SortedOutput => U::STORAGE | U::VERTEX | U::COPY_SRC,
        BufferRole::Uniform => U::UNIFORM | U::COPY_DST,
    }
}

/// Runs the sort kernels on the GPU. Bind groups are rebuilt only when one of
/// the bound buffers has been reallocated.
pub struct WgpuDevice {
    gfx: Arc<GfxContext>,
    pipelines: SortPipelines,
    bind_groups: HashMap<Bucket, ([u64; 9], wgpu::BindGroup)>,
}

impl WgpuDevice {
    pub fn new(gfx: Arc<GfxContext>) -> Result<Self, GpuError> {
        let pipelines = SortPipelines::new(&gfx.device)?;
        Ok(Self {
            gfx,
            pipelines,
            bind_groups: HashMap::new(),
        })
    }

    pub fn gfx(&self) -> &Arc<GfxContext> {
        &self.gfx
    }

    fn ensure_bind_group(&mut self, pass: &SortPass<'_, wgpu::Buffer>) -> Result<(), GpuError> {
        let bindings = pass.bindings();
        let key = bindings.map(|b| b.generation());
        let fresh = matches!(self.bind_groups.get(&pass.bucket), Some((k, _)) if *k == key);

        if !fresh {
            let mut entries = Vec::with_capacity(bindings.len());
            for (binding, buffer) in bindings.iter().enumerate() {
                let handle = buffer
                    .handle()
                    .ok_or_else(|| GpuError::Unallocated(buffer.name().to_owned()))?;
                entries.push(wgpu::BindGroupEntry {
                    binding: binding as u32,
                    resource: handle.as_entire_binding(),
                });
            }
            let label = format!("Sort Bind Group ({})", pass.bucket);
            let group = self.gfx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&label),
                layout: &self.pipelines.layout,
                entries: &entries,
            });
            log::trace!("Rebuilt {} sort bind group", pass.bucket);
            self.bind_groups.insert(pass.bucket, (key, group));
        }
        Ok(())
    }
}

impl GpuDevice for WgpuDevice {
    type Buffer = wgpu::Buffer;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<wgpu::Buffer, GpuError> {
        let device = &self.gfx.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.name),
            size: desc.size,
            usage: buffer_usages(desc.role),
            mapped_at_creation: false,
        });
        let invalid = pollster::block_on(device.pop_error_scope());
        let oom = pollster::block_on(device.pop_error_scope());
        if let Some(err) = oom.or(invalid) {
            buffer.destroy();
            return Err(GpuError::Allocation {
                name: desc.name.to_owned(),
                bytes: desc.size,
                reason: err.to_string(),
            });
        }
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: wgpu::Buffer) {
        buffer.destroy();
    }

    fn write_buffer(
        &mut self,
        buffer: &GpuBuffer<wgpu::Buffer>,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let handle = buffer
            .handle()
            .ok_or_else(|| GpuError::Unallocated(buffer.name().to_owned()))?;
        if offset + data.len() as u64 > handle.size() {
            return Err(GpuError::OutOfBounds {
                name: buffer.name().to_owned(),
                offset,
                len: data.len() as u64,
                size: handle.size(),
            });
        }
        self.gfx.queue.write_buffer(handle, offset, data);
        Ok(())
    }

    fn dispatch_sort(&mut self, pass: &SortPass<'_, wgpu::Buffer>) -> Result<(), GpuError> {
        let max_groups = self.gfx.device.limits().max_compute_workgroups_per_dimension;
        if pass.model_count > max_groups {
            return Err(GpuError::Dispatch(format!(
                "{} models in the {} bucket exceed {} workgroups",
                pass.model_count, pass.bucket, max_groups
            )));
        }

        self.ensure_bind_group(pass)?;
        let bind_group = self
            .bind_groups
            .get(&pass.bucket)
            .map(|(_, group)| group)
            .ok_or_else(|| GpuError::Dispatch(format!("no bind group for {} bucket", pass.bucket)))?;
        let pipeline = self.pipelines.pipeline(pass.bucket);
        let device = &self.gfx.device;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Sort Encoder"),
        });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Sort Pass"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(pipeline);
            cpass.set_bind_group(0, bind_group, &[]);
            cpass.dispatch_workgroups(pass.model_count, 1, 1);
        }
        self.gfx.queue.submit(std::iter::once(encoder.finish()));

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::Dispatch(format!("{} bucket: {}", pass.bucket, err)));
        }
        Ok(())
    }

    fn sync_compute(&mut self) -> Result<(), GpuError> {
        self.gfx.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_output_is_readable_as_vertices() {
        let usage = buffer_usages(BufferRole::SortedOutput);
        assert!(usage.contains(wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::VERTEX));
        assert!(!buffer_usages(BufferRole::Geometry).contains(wgpu::BufferUsages::VERTEX));
        assert!(buffer_usages(BufferRole::Uniform).contains(wgpu::BufferUsages::UNIFORM));
    }
}
