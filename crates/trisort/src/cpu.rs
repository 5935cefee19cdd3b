//! Software [`GpuDevice`] running the sort kernels on the CPU.
//!
//! Used where no compute-capable adapter exists and throughout the tests.
//! Buffer contents live in plain byte vectors; every operation can be recorded
//! as a [`DeviceEvent`] so tests can check ordering.

use std::cmp::Ordering;

use crate::bucket::Bucket;
use crate::buffer::GpuBuffer;
use crate::descriptor::{ModelDescriptor, ModelFlags};
use crate::device::{BufferDesc, GpuDevice, SortPass};
use crate::error::GpuError;
use crate::scene::sample_height_words;
use crate::submission::{Uv, Vertex};
use crate::uniforms::{rotate, CameraUniform, TrigTables, TABLES_OFFSET, TRIG_TABLE_LEN};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CpuBuffer(usize);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    Create { name: String, size: u64 },
    Write { name: String, offset: u64, len: u64 },
    Destroy { name: String },
    Dispatch { bucket: Bucket, models: u32 },
    Sync,
}

struct Slot {
    name: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
pub struct CpuDevice {
    slots: Vec<Option<Slot>>,
    events: Vec<DeviceEvent>,
    recording: bool,
    memory_limit: Option<u64>,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that keeps a log of every call.
    pub fn recording() -> Self {
        Self {
            recording: true,
            ..Self::default()
        }
    }

    /// Fails allocations once live buffers would exceed `bytes`.
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn live_buffers(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn live_bytes(&self) -> u64 {
        self.slots.iter().flatten().map(|s| s.bytes.len() as u64).sum()
    }

    pub fn events(&self) -> &[DeviceEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<DeviceEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn read_bytes(&self, buffer: &GpuBuffer<CpuBuffer>) -> Result<&[u8], GpuError> {
        let id = buffer
            .handle()
            .ok_or_else(|| GpuError::Unallocated(buffer.name().to_owned()))?;
        self.slot(*id).map(|s| s.bytes.as_slice())
    }

    /// The first `count` records of a buffer.
    pub fn read<T: bytemuck::Pod>(&self, buffer: &GpuBuffer<CpuBuffer>, count: usize) -> Result<Vec<T>, GpuError> {
        let bytes = self.read_bytes(buffer)?;
        let stride = std::mem::size_of::<T>();
        if count * stride > bytes.len() {
            return Err(GpuError::OutOfBounds {
                name: buffer.name().to_owned(),
                offset: 0,
                len: (count * stride) as u64,
                size: bytes.len() as u64,
            });
        }
        Ok(pod_records(&bytes[..count * stride]))
    }

    fn slot(&self, id: CpuBuffer) -> Result<&Slot, GpuError> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| GpuError::Unallocated(format!("cpu buffer #{}", id.0)))
    }

    fn slot_mut(&mut self, id: CpuBuffer) -> Result<&mut Slot, GpuError> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| GpuError::Unallocated(format!("cpu buffer #{}", id.0)))
    }

    fn record(&mut self, event: DeviceEvent) {
        if self.recording {
            self.events.push(event);
        }
    }

    fn whole<T: bytemuck::Pod>(&self, buffer: &GpuBuffer<CpuBuffer>) -> Result<Vec<T>, GpuError> {
        self.read_bytes(buffer).map(pod_records)
    }

    fn run_sort(&mut self, pass: &SortPass<'_, CpuBuffer>) -> Result<(), GpuError> {
        let models: Vec<ModelDescriptor> = self.read(pass.models, pass.model_count as usize)?;
        let scene_vertices: Vec<Vertex> = self.whole(pass.scene_vertices)?;
        let scene_uvs: Vec<Uv> = self.whole(pass.scene_uvs)?;
        let frame_vertices: Vec<Vertex> = self.whole(pass.frame_vertices)?;
        let frame_uvs: Vec<Uv> = self.whole(pass.frame_uvs)?;
        let heights: Vec<i32> = self.whole(pass.tile_heights)?;
        let (camera, tables) = read_uniforms(self.read_bytes(pass.uniforms)?)?;

        let out_vertices = *pass
            .out_vertices
            .handle()
            .ok_or_else(|| GpuError::Unallocated(pass.out_vertices.name().to_owned()))?;
        let out_uvs = *pass
            .out_uvs
            .handle()
            .ok_or_else(|| GpuError::Unallocated(pass.out_uvs.name().to_owned()))?;

        for model in &models {
            let flags = ModelFlags::from_bits(model.flags);
            let (vertices, uvs) = if flags.is_scene_resident() {
                (&scene_vertices, &scene_uvs)
            } else {
                (&frame_vertices, &frame_uvs)
            };
            let triangles = (model.triangle_count.max(0) as u32).min(pass.bucket.capacity()) as usize;

            let mut placed = Vec::with_capacity(triangles * 3);
            let mut depths = Vec::with_capacity(triangles);
            for t in 0..triangles {
                let mut centroid = [0.0f32; 3];
                for k in 0..3 {
                    let idx = model.vertex_offset as usize + t * 3 + k;
                    let v = *vertices.get(idx).ok_or_else(|| {
                        GpuError::Dispatch(format!("vertex {idx} outside {} bucket input", pass.bucket))
                    })?;
                    let p = place_vertex(model, flags, v, &tables, &heights);
                    centroid[0] += p[0] as f32;
                    centroid[1] += p[1] as f32;
                    centroid[2] += p[2] as f32;
                    placed.push(p);
                }
                depths.push(view_depth(&camera, [centroid[0] / 3.0, centroid[1] / 3.0, centroid[2] / 3.0]));
            }

            let mut order: Vec<usize> = (0..triangles).collect();
            if pass.bucket != Bucket::Unordered {
                order.sort_by(|&a, &b| {
                    depths[b]
                        .partial_cmp(&depths[a])
                        .unwrap_or(Ordering::Equal)
                        .then(a.cmp(&b))
                });
            }

            for (rank, &t) in order.iter().enumerate() {
                for k in 0..3 {
                    let dst = (model.output_offset as u64 + (rank * 3 + k) as u64) * 16;
                    let uv = if model.uv_offset < 0 {
                        [0.0; 4]
                    } else {
                        let idx = model.uv_offset as usize + t * 3 + k;
                        *uvs.get(idx).ok_or_else(|| {
                            GpuError::Dispatch(format!("uv {idx} outside {} bucket input", pass.bucket))
                        })?
                    };
                    self.write_at(out_vertices, dst, bytemuck::bytes_of(&placed[t * 3 + k]))?;
                    self.write_at(out_uvs, dst, bytemuck::bytes_of(&uv))?;
                }
            }
        }
        Ok(())
    }

    fn write_at(&mut self, id: CpuBuffer, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        let slot = self.slot_mut(id)?;
        let end = offset as usize + data.len();
        if end > slot.bytes.len() {
            return Err(GpuError::OutOfBounds {
                name: slot.name.clone(),
                offset,
                len: data.len() as u64,
                size: slot.bytes.len() as u64,
            });
        }
        slot.bytes[offset as usize..end].copy_from_slice(data);
        Ok(())
    }
}

impl GpuDevice for CpuDevice {
    type Buffer = CpuBuffer;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<CpuBuffer, GpuError> {
        if let Some(limit) = self.memory_limit {
            if self.live_bytes() + desc.size > limit {
                return Err(GpuError::Allocation {
                    name: desc.name.to_owned(),
                    bytes: desc.size,
                    reason: format!("cpu device limited to {limit} bytes"),
                });
            }
        }
        self.record(DeviceEvent::Create {
            name: desc.name.to_owned(),
            size: desc.size,
        });
        let slot = Slot {
            name: desc.name.to_owned(),
            bytes: vec![0; desc.size as usize],
        };
        let id = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some(slot);
                free
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        Ok(CpuBuffer(id))
    }

    fn destroy_buffer(&mut self, buffer: CpuBuffer) {
        if let Some(slot) = self.slots.get_mut(buffer.0).and_then(Option::take) {
            self.record(DeviceEvent::Destroy { name: slot.name });
        }
    }

    fn write_buffer(
        &mut self,
        buffer: &GpuBuffer<CpuBuffer>,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let id = *buffer
            .handle()
            .ok_or_else(|| GpuError::Unallocated(buffer.name().to_owned()))?;
        self.write_at(id, offset, data)?;
        self.record(DeviceEvent::Write {
            name: buffer.name().to_owned(),
            offset,
            len: data.len() as u64,
        });
        Ok(())
    }

    fn dispatch_sort(&mut self, pass: &SortPass<'_, CpuBuffer>) -> Result<(), GpuError> {
        self.record(DeviceEvent::Dispatch {
            bucket: pass.bucket,
            models: pass.model_count,
        });
        self.run_sort(pass)
    }

    fn sync_compute(&mut self) -> Result<(), GpuError> {
        self.record(DeviceEvent::Sync);
        Ok(())
    }
}

fn pod_records<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

fn read_uniforms(bytes: &[u8]) -> Result<(CameraUniform, TrigTables), GpuError> {
    let table_bytes = TRIG_TABLE_LEN * 4;
    let start = TABLES_OFFSET as usize;
    if bytes.len() < start + 2 * table_bytes {
        return Err(GpuError::Dispatch("uniform block too small".into()));
    }
    let camera: CameraUniform = bytemuck::pod_read_unaligned(&bytes[..start]);
    let mut tables = TrigTables {
        sine: [0; TRIG_TABLE_LEN],
        cosine: [0; TRIG_TABLE_LEN],
    };
    let sine: Vec<i32> = pod_records(&bytes[start..start + table_bytes]);
    let cosine: Vec<i32> = pod_records(&bytes[start + table_bytes..start + 2 * table_bytes]);
    tables.sine.copy_from_slice(&sine);
    tables.cosine.copy_from_slice(&cosine);
    Ok((camera, tables))
}

/// Model space to world space, as `place_vertex` in `sort.wgsl`.
fn place_vertex(
    model: &ModelDescriptor,
    flags: ModelFlags,
    v: Vertex,
    tables: &TrigTables,
    heights: &[i32],
) -> Vertex {
    let (x, z) = rotate(tables, flags.orientation(), v[0], v[2]);
    let wx = x + model.x;
    let wz = z + model.z;
    let wy = if flags.is_hillskew() {
        v[1] + sample_height_words(heights, flags.plane() as i32, wx, wz)
    } else {
        v[1] + model.y
    };
    [wx, wy, wz, v[3]]
}

/// Distance along the camera's view direction. Larger is further away.
pub fn view_depth(camera: &CameraUniform, point: [f32; 3]) -> f32 {
    let dx = point[0] - camera.camera_x;
    let dy = point[1] - camera.camera_y;
    let dz = point[2] - camera.camera_z;
    let (sy, cy) = camera.yaw.sin_cos();
    let (sp, cp) = camera.pitch.sin_cos();
    let forward = cy * dz + sy * dx;
    sp * dy + cp * forward
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BufferRole;

    #[test]
    fn depth_grows_along_view_direction() {
        let camera = CameraUniform::default();
        assert!(view_depth(&camera, [0.0, 0.0, 100.0]) > view_depth(&camera, [0.0, 0.0, 10.0]));

        let turned = CameraUniform {
            yaw: std::f32::consts::FRAC_PI_2,
            ..Default::default()
        };
        assert!(view_depth(&turned, [100.0, 0.0, 0.0]) > view_depth(&turned, [10.0, 0.0, 0.0]));
    }

    #[test]
    fn writes_are_bounds_checked() {
        let mut device = CpuDevice::recording();
        let mut buf = GpuBuffer::new("small", BufferRole::Geometry);
        buf.ensure_capacity(&mut device, 16).unwrap();
        assert!(device.write_buffer(&buf, 1020, &[0u8; 8]).is_err());
        device.write_buffer(&buf, 1016, &[7u8; 8]).unwrap();
        assert_eq!(device.read_bytes(&buf).unwrap()[1023], 7);
        assert_eq!(device.events().len(), 2);
    }

    #[test]
    fn memory_limit_fails_allocation() {
        let mut device = CpuDevice::new().with_memory_limit(2048);
        let mut a = GpuBuffer::new("a", BufferRole::Geometry);
        let mut b = GpuBuffer::new("b", BufferRole::Geometry);
        a.ensure_capacity(&mut device, 2000).unwrap();
        let err = b.ensure_capacity(&mut device, 10).unwrap_err();
        assert!(matches!(err, GpuError::Allocation { .. }));
        assert_eq!(b.size(), -1);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut device = CpuDevice::new();
        let first = device
            .create_buffer(&BufferDesc { name: "x", size: 8, role: BufferRole::Uniform })
            .unwrap();
        device.destroy_buffer(first);
        let second = device
            .create_buffer(&BufferDesc { name: "y", size: 8, role: BufferRole::Uniform })
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(device.live_buffers(), 1);
    }
}
