//! Growable GPU-resident buffers.
//!
//! Buffers grow to the next power of two (never below 1 KiB) and never shrink
//! while live. A resize invalidates the old contents, so callers always follow
//! it with a full rewrite; [`GpuBuffer::upload`] does exactly that.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::bucket::Bucket;
use crate::device::{BufferDesc, BufferRole, GpuDevice};
use crate::error::GpuError;

/// Smallest allocation handed to the device.
pub const MIN_BUFFER_SIZE: u64 = 1024;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Size a buffer grows to when `required` bytes do not fit.
pub fn grown_size(required: u64) -> Option<u64> {
    required
        .checked_next_power_of_two()
        .map(|size| size.max(MIN_BUFFER_SIZE))
}

#[derive(Debug)]
pub struct GpuBuffer<B> {
    name: String,
    role: BufferRole,
    handle: Option<B>,
    /// Bytes allocated, `-1` while unallocated.
    size: i64,
    /// Unique per allocation. Backends key bind groups on it.
    generation: u64,
}

impl<B> GpuBuffer<B> {
    pub fn new(name: impl Into<String>, role: BufferRole) -> Self {
        Self {
            name: name.into(),
            role,
            handle: None,
            size: -1,
            generation: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> BufferRole {
        self.role
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn handle(&self) -> Option<&B> {
        self.handle.as_ref()
    }

    pub fn is_allocated(&self) -> bool {
        self.handle.is_some()
    }

    /// Grows the allocation so at least `required` bytes fit.
    ///
    /// Returns `true` when the buffer was reallocated (old contents gone).
    pub fn ensure_capacity<D>(&mut self, device: &mut D, required: u64) -> Result<bool, GpuError>
    where
        D: GpuDevice<Buffer = B>,
    {
        if self.size >= 0 && required <= self.size as u64 {
            return Ok(false);
        }

        let new_size = grown_size(required).ok_or_else(|| GpuError::Allocation {
            name: self.name.clone(),
            bytes: required,
            reason: "size overflows u64".into(),
        })?;
        log::trace!("Buffer resize: {} {} -> {}", self.name, self.size, new_size);

        let fresh = device.create_buffer(&BufferDesc {
            name: &self.name,
            size: new_size,
            role: self.role,
        })?;
        if let Some(old) = self.handle.replace(fresh) {
            device.destroy_buffer(old);
        }
        self.size = new_size as i64;
        self.generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Ensures capacity, then writes `data` at offset 0.
    pub fn upload<D>(&mut self, device: &mut D, data: &[u8]) -> Result<bool, GpuError>
    where
        D: GpuDevice<Buffer = B>,
    {
        let resized = self.ensure_capacity(device, data.len() as u64)?;
        if !data.is_empty() {
            device.write_buffer(self, 0, data)?;
        }
        Ok(resized)
    }

    /// Releases the device allocation. Safe to call repeatedly.
    pub fn destroy<D>(&mut self, device: &mut D)
    where
        D: GpuDevice<Buffer = B>,
    {
        if let Some(handle) = self.handle.take() {
            device.destroy_buffer(handle);
        }
        self.size = -1;
        self.generation = 0;
    }
}

/// Every per-frame buffer the sort passes and the draw share.
#[derive(Debug)]
pub struct SortBuffers<B> {
    pub frame_vertices: GpuBuffer<B>,
    pub frame_uvs: GpuBuffer<B>,
    pub models: [GpuBuffer<B>; 3],
    pub out_vertices: GpuBuffer<B>,
    pub out_uvs: GpuBuffer<B>,
    pub uniforms: GpuBuffer<B>,
}

impl<B> SortBuffers<B> {
    pub fn new() -> Self {
        Self {
            frame_vertices: GpuBuffer::new("frame vertices", BufferRole::Geometry),
            frame_uvs: GpuBuffer::new("frame uvs", BufferRole::Geometry),
            models: Bucket::ALL
                .map(|b| GpuBuffer::new(format!("{} models", b.label()), BufferRole::Models)),
            out_vertices: GpuBuffer::new("sorted vertices", BufferRole::SortedOutput),
            out_uvs: GpuBuffer::new("sorted uvs", BufferRole::SortedOutput),
            uniforms: GpuBuffer::new("sort uniforms", BufferRole::Uniform),
        }
    }

    pub fn models(&self, bucket: Bucket) -> &GpuBuffer<B> {
        &self.models[bucket.index()]
    }

    pub fn destroy<D>(&mut self, device: &mut D)
    where
        D: GpuDevice<Buffer = B>,
    {
        self.frame_vertices.destroy(device);
        self.frame_uvs.destroy(device);
        for models in &mut self.models {
            models.destroy(device);
        }
        self.out_vertices.destroy(device);
        self.out_uvs.destroy(device);
        self.uniforms.destroy(device);
    }
}

impl<B> Default for SortBuffers<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuDevice;

    #[test]
    fn growth_policy() {
        assert_eq!(grown_size(0), Some(1024));
        assert_eq!(grown_size(1), Some(1024));
        assert_eq!(grown_size(1024), Some(1024));
        assert_eq!(grown_size(1025), Some(2048));
        assert_eq!(grown_size(70_000), Some(131_072));
        assert_eq!(grown_size(u64::MAX), None);
    }

    #[test]
    fn size_is_monotonic_power_of_two() {
        let mut device = CpuDevice::new();
        let mut buf = GpuBuffer::new("test", BufferRole::Geometry);
        assert_eq!(buf.size(), -1);

        let mut last = buf.size();
        for required in [10u64, 5000, 200, 0, 4096, 9000, 1, 70_000, 3] {
            buf.ensure_capacity(&mut device, required).unwrap();
            let size = buf.size();
            assert!(size >= last);
            assert!(size >= 1024);
            assert!((size as u64).is_power_of_two());
            assert!(size as u64 >= required);
            last = size;
        }
        assert_eq!(device.live_buffers(), 1);
    }

    #[test]
    fn resize_bumps_generation_only_when_reallocating() {
        let mut device = CpuDevice::new();
        let mut buf = GpuBuffer::new("test", BufferRole::Geometry);

        assert!(buf.upload(&mut device, &[1u8; 100]).unwrap());
        let first = buf.generation();
        assert!(!buf.upload(&mut device, &[2u8; 1024]).unwrap());
        assert_eq!(buf.generation(), first);
        assert!(buf.upload(&mut device, &[3u8; 1025]).unwrap());
        assert_ne!(buf.generation(), first);
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut device = CpuDevice::new();
        let mut buffers = SortBuffers::new();
        buffers.uniforms.ensure_capacity(&mut device, 64).unwrap();
        buffers.out_vertices.ensure_capacity(&mut device, 64).unwrap();
        assert_eq!(device.live_buffers(), 2);

        buffers.destroy(&mut device);
        buffers.destroy(&mut device);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(buffers.uniforms.size(), -1);
    }
}
