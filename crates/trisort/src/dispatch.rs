//! Per-frame drawable bucketing and the three sort dispatches.
//!
//! A frame goes `begin_frame` -> `submit_*` for every drawable in host order ->
//! `finish_frame` -> `dispatch`. After `dispatch` returns, the sorted output
//! buffers hold `output_vertices` vertices ready to be bound for drawing.

use crate::bucket::{classify, clip_triangles, Bucket, DrawKind, Residency, MAX_TRIANGLE};
use crate::buffer::SortBuffers;
use crate::cursor::FrameCursor;
use crate::descriptor::{ModelDescriptor, ModelFlags};
use crate::device::{GpuDevice, SortPass};
use crate::error::SortError;
use crate::host::{DrawRequest, GroundTile, HostCallbacks, ModelGeometry};
use crate::scene::{ActiveScene, LOCAL_COORD_BITS};
use crate::submission::{GeometryBuffer, UvBuffer, VertexBuffer};
use crate::uniforms::{CameraUniform, TrigTables, SORT_UNIFORM_SIZE, TABLES_OFFSET, TRIG_TABLE_LEN};

/// Bytes per output vertex (and per output uv).
pub const OUTPUT_STRIDE: u64 = 16;

/// Initial CPU-side capacities; everything grows on demand.
#[derive(Clone, Debug)]
pub struct SortConfig {
    pub vertex_capacity: usize,
    pub models_per_bucket: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            vertex_capacity: 64 * 1024,
            models_per_bucket: 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub unordered: u32,
    pub small: u32,
    pub large: u32,
    pub output_vertices: u32,
}

impl DispatchSummary {
    pub fn models(&self, bucket: Bucket) -> u32 {
        match bucket {
            Bucket::Unordered => self.unordered,
            Bucket::Small => self.small,
            Bucket::Large => self.large,
        }
    }

    pub fn total_models(&self) -> u32 {
        self.unordered + self.small + self.large
    }
}

pub struct SortDispatcher {
    vertices: VertexBuffer,
    uvs: UvBuffer,
    models: [GeometryBuffer<ModelDescriptor>; 3],
    cursor: FrameCursor,
    camera: CameraUniform,
    tables: TrigTables,
    /// Uniform allocation the trig tables were last written into.
    tables_generation: u64,
}

impl SortDispatcher {
    pub fn new(config: &SortConfig) -> Self {
        Self {
            vertices: VertexBuffer::with_capacity("frame vertices", config.vertex_capacity),
            uvs: UvBuffer::with_capacity("frame uvs", config.vertex_capacity),
            models: [
                GeometryBuffer::with_capacity("unordered models", config.models_per_bucket),
                GeometryBuffer::with_capacity("small models", config.models_per_bucket),
                GeometryBuffer::with_capacity("large models", config.models_per_bucket),
            ],
            cursor: FrameCursor::new(),
            camera: CameraUniform::default(),
            tables: TrigTables::new(),
            tables_generation: 0,
        }
    }

    /// Clears last frame's submissions and records this frame's camera.
    pub fn begin_frame(&mut self, camera: CameraUniform) {
        self.vertices.clear();
        self.uvs.clear();
        for models in &mut self.models {
            models.clear();
        }
        self.cursor.reset();
        self.camera = camera;
    }

    pub fn camera(&self) -> &CameraUniform {
        &self.camera
    }

    /// Output vertices reserved so far this frame.
    pub fn output_vertices(&self) -> u32 {
        self.cursor.used()
    }

    pub fn model_count(&self, bucket: Bucket) -> usize {
        self.models[bucket.index()].len()
    }

    /// Queues a flat scene tile. Tiles from a scene that is not active are skipped.
    pub fn submit_ground_tile(
        &mut self,
        scene_id: u32,
        tile: &GroundTile,
    ) -> Result<Option<Bucket>, SortError> {
        let slot = tile.slot();
        if slot.scene_id != scene_id {
            log::trace!("Skipping tile from scene {} (active {})", slot.scene_id, scene_id);
            return Ok(None);
        }
        let Some(bucket) = classify(DrawKind::GroundTile, tile.triangle_count()) else {
            return Ok(None);
        };
        let triangles = clip(tile.triangle_count());
        let (tile_x, tile_z) = tile.tile();
        let output_offset = self.cursor.reserve(triangles * 3)?;

        self.models[bucket.index()].append(ModelDescriptor {
            vertex_offset: slot.vertex_offset as i32,
            uv_offset: slot.uv_offset,
            triangle_count: triangles as i32,
            output_offset: output_offset as i32,
            flags: ModelFlags::new(true, false, 0, 0).bits(),
            x: tile_x << LOCAL_COORD_BITS,
            y: 0,
            z: tile_z << LOCAL_COORD_BITS,
        })?;
        Ok(Some(bucket))
    }

    /// Queues a model placed at `draw`.
    ///
    /// When `unskewed` is given its scene placement is used for the offsets and
    /// the kernel re-projects vertex heights onto the ground.
    pub fn submit_model(
        &mut self,
        scene_id: u32,
        model: &dyn ModelGeometry,
        unskewed: Option<&dyn ModelGeometry>,
        draw: &DrawRequest,
        host: &mut dyn HostCallbacks,
    ) -> Result<Option<Bucket>, SortError> {
        if model.face_count() == 0 || !host.is_visible(model, draw) {
            return Ok(None);
        }
        host.register_click_region(model, draw);

        let (offset_model, hillskew) = match unskewed {
            Some(u) => (u, true),
            None => (model, false),
        };

        match offset_model.scene_slot() {
            Some(slot) if slot.scene_id == scene_id && offset_model.face_count() > 0 => {
                let faces = offset_model.face_count();
                let Some(bucket) = classify(DrawKind::Model(Residency::Scene), faces) else {
                    return Ok(None);
                };
                let triangles = clip(faces);
                let output_offset = self.cursor.reserve(triangles * 3)?;
                self.models[bucket.index()].append(ModelDescriptor {
                    vertex_offset: slot.vertex_offset as i32,
                    uv_offset: slot.uv_offset,
                    triangle_count: triangles as i32,
                    output_offset: output_offset as i32,
                    flags: ModelFlags::new(true, hillskew, draw.plane(), draw.orientation).bits(),
                    x: draw.x,
                    y: draw.y,
                    z: draw.z,
                })?;
                Ok(Some(bucket))
            }
            _ => self.push_transient(model, draw),
        }
    }

    fn push_transient(
        &mut self,
        model: &dyn ModelGeometry,
        draw: &DrawRequest,
    ) -> Result<Option<Bucket>, SortError> {
        let vertex_start = self.vertices.len();
        let uv_start = self.uvs.len();
        model.push_geometry(&mut self.vertices, &mut self.uvs)?;

        let pushed = self.vertices.len() - vertex_start;
        let kept = pushed.min(MAX_TRIANGLE as usize * 3) / 3 * 3;
        if kept < pushed {
            log::trace!("Clipping transient model: {} -> {} vertices", pushed, kept);
        }
        self.vertices.truncate(vertex_start + kept)?;

        let uv_offset = if model.has_uvs() {
            self.uvs.truncate(uv_start + kept)?;
            uv_start as i32
        } else {
            self.uvs.truncate(uv_start)?;
            -1
        };

        // Route by what was actually pushed so the bucket bound holds for the descriptor.
        let triangles = (kept / 3) as u32;
        let Some(bucket) = classify(DrawKind::Model(Residency::Transient), triangles) else {
            return Ok(None);
        };
        let output_offset = self.cursor.reserve(triangles * 3)?;
        self.models[bucket.index()].append(ModelDescriptor {
            vertex_offset: vertex_start as i32,
            uv_offset,
            triangle_count: triangles as i32,
            output_offset: output_offset as i32,
            flags: ModelFlags::new(false, false, draw.plane(), draw.orientation).bits(),
            x: draw.x,
            y: draw.y,
            z: draw.z,
        })?;
        Ok(Some(bucket))
    }

    /// Ends the scene walk: no more submissions until the next `begin_frame`.
    pub fn finish_frame(&mut self) -> Result<(), SortError> {
        self.vertices.flip()?;
        self.uvs.flip()?;
        for models in &mut self.models {
            models.flip()?;
        }
        Ok(())
    }

    /// Uploads this frame's data, runs one sort pass per non-empty bucket and
    /// waits for them to finish.
    pub fn dispatch<D>(
        &mut self,
        device: &mut D,
        buffers: &mut SortBuffers<D::Buffer>,
        scene: &ActiveScene<D::Buffer>,
    ) -> Result<DispatchSummary, SortError>
    where
        D: GpuDevice,
    {
        buffers.frame_vertices.upload(device, self.vertices.as_bytes()?)?;
        buffers.frame_uvs.upload(device, self.uvs.as_bytes()?)?;
        for bucket in Bucket::ALL {
            let i = bucket.index();
            buffers.models[i].upload(device, self.models[i].as_bytes()?)?;
        }

        let output_bytes = self.cursor.used() as u64 * OUTPUT_STRIDE;
        buffers.out_vertices.ensure_capacity(device, output_bytes)?;
        buffers.out_uvs.ensure_capacity(device, output_bytes)?;

        buffers.uniforms.ensure_capacity(device, SORT_UNIFORM_SIZE)?;
        device.write_buffer(&buffers.uniforms, 0, bytemuck::bytes_of(&self.camera))?;
        if buffers.uniforms.generation() != self.tables_generation {
            let table_bytes = (TRIG_TABLE_LEN * 4) as u64;
            device.write_buffer(&buffers.uniforms, TABLES_OFFSET, bytemuck::cast_slice(&self.tables.sine))?;
            device.write_buffer(
                &buffers.uniforms,
                TABLES_OFFSET + table_bytes,
                bytemuck::cast_slice(&self.tables.cosine),
            )?;
            self.tables_generation = buffers.uniforms.generation();
        }

        let mut summary = DispatchSummary {
            output_vertices: self.cursor.used(),
            ..Default::default()
        };
        for bucket in Bucket::ALL {
            let count = self.models[bucket.index()].len() as u32;
            match bucket {
                Bucket::Unordered => summary.unordered = count,
                Bucket::Small => summary.small = count,
                Bucket::Large => summary.large = count,
            }
            if count == 0 {
                continue;
            }
            device.dispatch_sort(&SortPass {
                bucket,
                model_count: count,
                models: buffers.models(bucket),
                scene_vertices: &scene.vertices,
                scene_uvs: &scene.uvs,
                tile_heights: &scene.heights,
                frame_vertices: &buffers.frame_vertices,
                frame_uvs: &buffers.frame_uvs,
                out_vertices: &buffers.out_vertices,
                out_uvs: &buffers.out_uvs,
                uniforms: &buffers.uniforms,
            })?;
        }
        device.sync_compute()?;

        log::debug!(
            "Sort dispatch: {} unordered, {} small, {} large, {} vertices",
            summary.unordered,
            summary.small,
            summary.large,
            summary.output_vertices
        );
        Ok(summary)
    }
}

#[inline]
fn clip(triangles: u32) -> u32 {
    let clipped = clip_triangles(triangles);
    if clipped < triangles {
        log::trace!("Clipping drawable: {} -> {} triangles", triangles, clipped);
    }
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{AlwaysVisible, SceneSlot};

    struct Mesh {
        faces: u32,
        uvs: bool,
        slot: Option<SceneSlot>,
    }

    impl ModelGeometry for Mesh {
        fn face_count(&self) -> u32 {
            self.faces
        }

        fn has_uvs(&self) -> bool {
            self.uvs
        }

        fn scene_slot(&self) -> Option<SceneSlot> {
            self.slot
        }

        fn push_geometry(&self, vertices: &mut VertexBuffer, uvs: &mut UvBuffer) -> Result<(), SortError> {
            for i in 0..self.faces as i32 * 3 {
                vertices.append([i, 0, 0, 0])?;
                if self.uvs {
                    uvs.append([0.5; 4])?;
                }
            }
            Ok(())
        }
    }

    /// Reports its full-detail face count but pushes a reduced mesh.
    struct Reduced {
        reported: u32,
        pushed: u32,
    }

    impl ModelGeometry for Reduced {
        fn face_count(&self) -> u32 {
            self.reported
        }

        fn has_uvs(&self) -> bool {
            false
        }

        fn scene_slot(&self) -> Option<SceneSlot> {
            None
        }

        fn push_geometry(&self, vertices: &mut VertexBuffer, _uvs: &mut UvBuffer) -> Result<(), SortError> {
            for i in 0..self.pushed as i32 * 3 {
                vertices.append([i, 0, 0, 0])?;
            }
            Ok(())
        }
    }

    struct Hidden;

    impl HostCallbacks for Hidden {
        fn is_visible(&mut self, _: &dyn ModelGeometry, _: &DrawRequest) -> bool {
            false
        }

        fn register_click_region(&mut self, _: &dyn ModelGeometry, _: &DrawRequest) {
            panic!("click region registered for an invisible model");
        }
    }

    fn descriptors(d: &mut SortDispatcher, bucket: Bucket) -> Vec<ModelDescriptor> {
        d.models[bucket.index()].as_slice().unwrap().to_vec()
    }

    #[test]
    fn zero_triangle_models_produce_nothing() {
        let mut d = SortDispatcher::new(&SortConfig::default());
        d.begin_frame(CameraUniform::default());
        let empty = Mesh { faces: 0, uvs: false, slot: None };
        let draw = DrawRequest::default();
        assert_eq!(d.submit_model(0, &empty, None, &draw, &mut AlwaysVisible).unwrap(), None);

        let tile = GroundTile::Shaped {
            slot: SceneSlot { scene_id: 0, vertex_offset: 0, uv_offset: -1 },
            vertex_count: 2,
            tile_x: 0,
            tile_z: 0,
        };
        assert_eq!(d.submit_ground_tile(0, &tile).unwrap(), None);
        d.finish_frame().unwrap();

        for bucket in Bucket::ALL {
            assert!(descriptors(&mut d, bucket).is_empty());
        }
        assert_eq!(d.output_vertices(), 0);
    }

    #[test]
    fn invisible_models_skip_callbacks_and_offsets() {
        let mut d = SortDispatcher::new(&SortConfig::default());
        d.begin_frame(CameraUniform::default());
        let mesh = Mesh { faces: 4, uvs: true, slot: None };
        let got = d.submit_model(0, &mesh, None, &DrawRequest::default(), &mut Hidden).unwrap();
        assert_eq!(got, None);
        assert_eq!(d.output_vertices(), 0);
    }

    #[test]
    fn transient_without_uvs_marks_uv_offset() {
        let mut d = SortDispatcher::new(&SortConfig::default());
        d.begin_frame(CameraUniform::default());
        let textured = Mesh { faces: 2, uvs: true, slot: None };
        let plain = Mesh { faces: 3, uvs: false, slot: None };
        let draw = DrawRequest { x: 10, y: 20, z: 30, orientation: 256, hash: 1 << 14 };
        d.submit_model(0, &textured, None, &draw, &mut AlwaysVisible).unwrap();
        d.submit_model(0, &plain, None, &draw, &mut AlwaysVisible).unwrap();
        d.finish_frame().unwrap();

        let small = descriptors(&mut d, Bucket::Small);
        assert_eq!(small.len(), 2);
        assert_eq!(small[0].uv_offset, 0);
        assert_eq!(small[0].vertex_offset, 0);
        assert_eq!(small[1].uv_offset, -1);
        assert_eq!(small[1].vertex_offset, 6);
        assert_eq!(small[1].output_offset, 6);
        assert_eq!(small[1].x, 10);

        let flags = ModelFlags::from_bits(small[1].flags);
        assert!(!flags.is_scene_resident());
        assert_eq!(flags.plane(), 1);
        assert_eq!(flags.orientation(), 256);
    }

    #[test]
    fn unskewed_variant_supplies_offsets_and_sets_hillskew() {
        let mut d = SortDispatcher::new(&SortConfig::default());
        d.begin_frame(CameraUniform::default());
        let skewed = Mesh { faces: 8, uvs: false, slot: None };
        let flat = Mesh {
            faces: 8,
            uvs: false,
            slot: Some(SceneSlot { scene_id: 3, vertex_offset: 99, uv_offset: -1 }),
        };
        let draw = DrawRequest::default();
        d.submit_model(3, &skewed, Some(&flat), &draw, &mut AlwaysVisible).unwrap();
        d.finish_frame().unwrap();

        let small = descriptors(&mut d, Bucket::Small);
        assert_eq!(small[0].vertex_offset, 99);
        let flags = ModelFlags::from_bits(small[0].flags);
        assert!(flags.is_scene_resident());
        assert!(flags.is_hillskew());
    }

    #[test]
    fn stale_scene_slot_falls_back_to_frame_geometry() {
        let mut d = SortDispatcher::new(&SortConfig::default());
        d.begin_frame(CameraUniform::default());
        let mesh = Mesh {
            faces: 2,
            uvs: false,
            slot: Some(SceneSlot { scene_id: 1, vertex_offset: 40, uv_offset: -1 }),
        };
        d.submit_model(2, &mesh, None, &DrawRequest::default(), &mut AlwaysVisible).unwrap();
        d.finish_frame().unwrap();

        let small = descriptors(&mut d, Bucket::Small);
        assert_eq!(small[0].vertex_offset, 0);
        assert!(!ModelFlags::from_bits(small[0].flags).is_scene_resident());
        assert_eq!(d.vertices.len(), 6);
    }

    #[test]
    fn ground_tiles_go_unordered_at_tile_position() {
        let mut d = SortDispatcher::new(&SortConfig::default());
        d.begin_frame(CameraUniform::default());
        let slot = SceneSlot { scene_id: 1, vertex_offset: 12, uv_offset: 12 };
        let paint = GroundTile::Paint { slot, tile_x: 3, tile_z: 5 };
        assert_eq!(d.submit_ground_tile(1, &paint).unwrap(), Some(Bucket::Unordered));
        assert_eq!(d.submit_ground_tile(2, &paint).unwrap(), None);
        d.finish_frame().unwrap();

        let tiles = descriptors(&mut d, Bucket::Unordered);
        assert_eq!(tiles.len(), 1);
        assert_eq!((tiles[0].x, tiles[0].z), (384, 640));
        assert_eq!(tiles[0].triangle_count, 2);
        assert_eq!(tiles[0].flags, i32::MIN);
        assert_eq!(d.output_vertices(), 6);
    }

    #[test]
    fn submitting_after_finish_fails() {
        let mut d = SortDispatcher::new(&SortConfig::default());
        d.begin_frame(CameraUniform::default());
        d.finish_frame().unwrap();
        let mesh = Mesh { faces: 1, uvs: false, slot: None };
        assert!(d.submit_model(0, &mesh, None, &DrawRequest::default(), &mut AlwaysVisible).is_err());
        assert!(d.finish_frame().is_err());
    }

    #[test]
    fn transient_bucket_follows_pushed_triangles() {
        let mut d = SortDispatcher::new(&SortConfig::default());
        d.begin_frame(CameraUniform::default());
        let draw = DrawRequest::default();
        let reduced = Reduced { reported: 600, pushed: 10 };
        assert_eq!(d.submit_model(0, &reduced, None, &draw, &mut AlwaysVisible).unwrap(), Some(Bucket::Small));

        let nothing = Reduced { reported: 40, pushed: 0 };
        assert_eq!(d.submit_model(0, &nothing, None, &draw, &mut AlwaysVisible).unwrap(), None);
        d.finish_frame().unwrap();

        let small = descriptors(&mut d, Bucket::Small);
        assert_eq!(small.len(), 1);
        assert_eq!(small[0].triangle_count, 10);
        assert!(descriptors(&mut d, Bucket::Large).is_empty());
        assert_eq!(d.output_vertices(), 30);
    }
}
