//! The seam between the sort pipeline and whatever executes it.
//!
//! The wgpu backend lives in the viewer; [`crate::cpu::CpuDevice`] runs the
//! same kernels on the CPU.

use crate::bucket::Bucket;
use crate::buffer::GpuBuffer;
use crate::error::GpuError;

/// What a buffer is bound as. Backends derive their usage flags from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Read-only vertex or uv input to the sort kernels.
    Geometry,
    /// Per-bucket model descriptors.
    Models,
    /// Tile height field used for hill skew.
    Heights,
    /// Written by the sort kernels, read by the draw.
    SortedOutput,
    Uniform,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub role: BufferRole,
}

/// Every binding one bucket's sort pass reads or writes.
pub struct SortPass<'a, B> {
    pub bucket: Bucket,
    pub model_count: u32,
    pub models: &'a GpuBuffer<B>,
    pub scene_vertices: &'a GpuBuffer<B>,
    pub scene_uvs: &'a GpuBuffer<B>,
    pub tile_heights: &'a GpuBuffer<B>,
    pub frame_vertices: &'a GpuBuffer<B>,
    pub frame_uvs: &'a GpuBuffer<B>,
    pub out_vertices: &'a GpuBuffer<B>,
    pub out_uvs: &'a GpuBuffer<B>,
    pub uniforms: &'a GpuBuffer<B>,
}

impl<B> SortPass<'_, B> {
    /// Buffers in binding order, as laid out in `sort.wgsl`.
    pub fn bindings(&self) -> [&GpuBuffer<B>; 9] {
        [
            self.uniforms,
            self.models,
            self.scene_vertices,
            self.scene_uvs,
            self.frame_vertices,
            self.frame_uvs,
            self.tile_heights,
            self.out_vertices,
            self.out_uvs,
        ]
    }
}

/// Minimal device surface the dispatcher and scene manager need.
///
/// Writes and dispatches are queued in call order on a single queue, so a
/// write issued before `dispatch_sort` is visible to that pass.
pub trait GpuDevice {
    type Buffer;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<Self::Buffer, GpuError>;

    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    /// Unsynchronised sub-range write.
    fn write_buffer(
        &mut self,
        buffer: &GpuBuffer<Self::Buffer>,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GpuError>;

    fn dispatch_sort(&mut self, pass: &SortPass<'_, Self::Buffer>) -> Result<(), GpuError>;

    /// Blocks until every queued compute pass has finished.
    fn sync_compute(&mut self) -> Result<(), GpuError>;
}
