//! Static scene geometry with an off-path "next" scene.
//!
//! A new scene is prepared on the CPU by [`SceneBuffers::load_scene`] while the
//! active one keeps rendering, then made current by [`SceneBuffers::swap_scene`].
//! The active scene is one struct, so its id and buffers always change together.

use crate::buffer::GpuBuffer;
use crate::device::{BufferRole, GpuDevice};
use crate::error::SortError;
use crate::submission::{UvBuffer, VertexBuffer};
use crate::uniforms::CameraUniform;

/// Local coordinate units per tile edge.
pub const TILE_SIZE: i32 = 128;
pub const LOCAL_COORD_BITS: u32 = 7;
/// Bounding radius of a tile around its centre column, about 64 * sqrt(2).
pub const TILE_RADIUS: f32 = 96.0;
/// Tiles whose padded depth falls below this are behind or at the camera.
pub const TILE_NEAR_DEPTH: f32 = 50.0;
/// Leading words of the GPU height field: planes, size, two words padding.
pub const HEIGHT_HEADER_WORDS: usize = 4;

/// Per-corner ground heights, `planes x size x size`, stored `>> 3`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileHeightField {
    planes: usize,
    size: usize,
    heights: Vec<i32>,
}

impl TileHeightField {
    pub fn flat(planes: usize, size: usize) -> Self {
        Self {
            planes,
            size,
            heights: vec![0; planes * size * size],
        }
    }

    /// Builds a field from world-unit heights, keeping the `>> 3` storage.
    pub fn from_fn(planes: usize, size: usize, mut height: impl FnMut(usize, usize, usize) -> i32) -> Self {
        let mut heights = Vec::with_capacity(planes * size * size);
        for plane in 0..planes {
            for z in 0..size {
                for x in 0..size {
                    heights.push(height(plane, x, z) >> 3);
                }
            }
        }
        Self { planes, size, heights }
    }

    pub fn planes(&self) -> usize {
        self.planes
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// World-unit height at a tile corner.
    pub fn get(&self, plane: usize, x: usize, z: usize) -> Result<i32, SortError> {
        let idx = self.index(plane, x, z)?;
        Ok(self.heights[idx] << 3)
    }

    pub fn set(&mut self, plane: usize, x: usize, z: usize, height: i32) -> Result<(), SortError> {
        let idx = self.index(plane, x, z)?;
        self.heights[idx] = height >> 3;
        Ok(())
    }

    /// Interpolated ground height under a local-coordinate point.
    pub fn sample(&self, plane: usize, x: i32, z: i32) -> i32 {
        bilinear(self.planes as i32, self.size as i32, plane as i32, x, z, |idx| {
            self.heights.get(idx).copied().unwrap_or(0)
        })
    }

    /// Header followed by the stored heights, as uploaded to the kernels.
    pub fn to_gpu_words(&self) -> Vec<i32> {
        let mut words = Vec::with_capacity(HEIGHT_HEADER_WORDS + self.heights.len());
        words.extend_from_slice(&[self.planes as i32, self.size as i32, 0, 0]);
        words.extend_from_slice(&self.heights);
        words
    }

    fn index(&self, plane: usize, x: usize, z: usize) -> Result<usize, SortError> {
        if plane >= self.planes || x >= self.size || z >= self.size {
            return Err(SortError::HeightOutOfRange {
                plane,
                x,
                z,
                planes: self.planes,
                size: self.size,
            });
        }
        Ok((plane * self.size + z) * self.size + x)
    }
}

/// Bilinear ground height over the GPU height-field layout.
///
/// Mirrors `ground_height` in `sort.wgsl`. Points outside the field clamp to
/// its edge; an empty field is flat at zero.
pub fn sample_height_words(words: &[i32], plane: i32, x: i32, z: i32) -> i32 {
    if words.len() < HEIGHT_HEADER_WORDS {
        return 0;
    }
    bilinear(words[0], words[1], plane, x, z, |idx| {
        words.get(HEIGHT_HEADER_WORDS + idx).copied().unwrap_or(0)
    })
}

/// Interpolates stored corner heights; `stored` takes a header-less index.
fn bilinear(planes: i32, size: i32, plane: i32, x: i32, z: i32, stored: impl Fn(usize) -> i32) -> i32 {
    if size < 2 || planes < 1 {
        return 0;
    }
    let plane = plane.clamp(0, planes - 1);
    let tx = (x >> LOCAL_COORD_BITS).clamp(0, size - 2);
    let tz = (z >> LOCAL_COORD_BITS).clamp(0, size - 2);
    let fx = x & (TILE_SIZE - 1);
    let fz = z & (TILE_SIZE - 1);

    let at = |cx: i32, cz: i32| -> i32 { stored(((plane * size + cz) * size + cx) as usize) << 3 };
    let south = (fx * at(tx + 1, tz) + (TILE_SIZE - fx) * at(tx, tz)) >> LOCAL_COORD_BITS;
    let north = (at(tx, tz + 1) * (TILE_SIZE - fx) + fx * at(tx + 1, tz + 1)) >> LOCAL_COORD_BITS;
    (north * fz + (TILE_SIZE - fz) * south) >> LOCAL_COORD_BITS
}

/// Whether any part of a tile can land on screen.
///
/// The tile is treated as a sphere of [`TILE_RADIUS`] around its centre at the
/// height of its lowest corner (largest `y`, since `y` points down). It is
/// rejected when behind the near depth, fully left or right of the view, or
/// wholly above the top edge. The bottom edge is not tested, so tall models
/// standing on an off-screen tile are never lost.
pub fn tile_in_frustum(
    field: &TileHeightField,
    plane: usize,
    tile_x: i32,
    tile_z: i32,
    camera: &CameraUniform,
) -> bool {
    let (Ok(cx), Ok(cz)) = (usize::try_from(tile_x), usize::try_from(tile_z)) else {
        return false;
    };
    let ground = [(cx, cz), (cx + 1, cz), (cx, cz + 1), (cx + 1, cz + 1)]
        .into_iter()
        .map(|(x, z)| field.get(plane, x, z).unwrap_or(0))
        .max()
        .unwrap_or(0);

    let half = (TILE_SIZE / 2) as f32;
    let dx = (tile_x << LOCAL_COORD_BITS) as f32 + half - camera.camera_x;
    let dz = (tile_z << LOCAL_COORD_BITS) as f32 + half - camera.camera_z;
    let dy = ground as f32 - camera.camera_y;
    let (sy, cy) = camera.yaw.sin_cos();
    let (sp, cp) = camera.pitch.sin_cos();

    let forward = cy * dz + sy * dx;
    let depth = sp * dy + cp * forward + cp * TILE_RADIUS;
    if depth <= TILE_NEAR_DEPTH {
        return false;
    }

    let zoom = camera.zoom as f32;
    let half_width = camera.center_x as f32 * depth;
    let across = cy * dx - sy * dz;
    if (across - TILE_RADIUS) * zoom >= half_width || (across + TILE_RADIUS) * zoom <= -half_width {
        return false;
    }

    let below = cp * dy - sp * forward;
    (below + sp * TILE_RADIUS) * zoom > -(camera.center_y as f32) * depth
}

/// Host side of scene loading.
pub trait SceneSource {
    /// Appends the scene's static geometry. Models placed here should record
    /// `scene_id` together with their offsets so later submissions can be
    /// matched against the active scene.
    fn upload_scene(
        &mut self,
        scene_id: u32,
        vertices: &mut VertexBuffer,
        uvs: &mut UvBuffer,
    ) -> Result<(), SortError>;

    fn tile_heights(&self) -> TileHeightField;
}

/// A fully built scene that has not reached the GPU yet.
#[derive(Debug)]
pub struct PreparedScene {
    pub id: u32,
    pub vertices: VertexBuffer,
    pub uvs: UvBuffer,
    pub heights: TileHeightField,
}

impl PreparedScene {
    fn empty(id: u32) -> Result<Self, SortError> {
        let mut vertices = VertexBuffer::new("scene vertices");
        let mut uvs = UvBuffer::new("scene uvs");
        vertices.flip()?;
        uvs.flip()?;
        Ok(Self {
            id,
            vertices,
            uvs,
            heights: TileHeightField::flat(0, 0),
        })
    }
}

#[derive(Debug)]
pub struct ActiveScene<B> {
    pub id: u32,
    pub vertices: GpuBuffer<B>,
    pub uvs: GpuBuffer<B>,
    pub heights: GpuBuffer<B>,
}

impl<B> ActiveScene<B> {
    fn upload<D>(device: &mut D, prepared: &PreparedScene) -> Result<Self, SortError>
    where
        D: GpuDevice<Buffer = B>,
    {
        let mut scene = Self {
            id: prepared.id,
            vertices: GpuBuffer::new(format!("scene {} vertices", prepared.id), BufferRole::Geometry),
            uvs: GpuBuffer::new(format!("scene {} uvs", prepared.id), BufferRole::Geometry),
            heights: GpuBuffer::new(format!("scene {} heights", prepared.id), BufferRole::Heights),
        };
        let heights = prepared.heights.to_gpu_words();
        let result = (|| -> Result<(), SortError> {
            scene.vertices.upload(device, prepared.vertices.as_bytes()?)?;
            scene.uvs.upload(device, prepared.uvs.as_bytes()?)?;
            scene.heights.upload(device, bytemuck::cast_slice(&heights))?;
            Ok(())
        })();
        if let Err(e) = result {
            scene.destroy(device);
            return Err(e);
        }
        Ok(scene)
    }

    pub fn destroy<D>(&mut self, device: &mut D)
    where
        D: GpuDevice<Buffer = B>,
    {
        self.vertices.destroy(device);
        self.uvs.destroy(device);
        self.heights.destroy(device);
    }
}

/// The active scene plus at most one prepared successor.
pub struct SceneBuffers<B> {
    active: ActiveScene<B>,
    pending: Option<PreparedScene>,
    next_id: u32,
}

impl<B> SceneBuffers<B> {
    /// Starts with an empty scene 0 so the kernels always have a scene bound.
    pub fn new<D>(device: &mut D) -> Result<Self, SortError>
    where
        D: GpuDevice<Buffer = B>,
    {
        let active = ActiveScene::upload(device, &PreparedScene::empty(0)?)?;
        Ok(Self {
            active,
            pending: None,
            next_id: 1,
        })
    }

    pub fn active(&self) -> &ActiveScene<B> {
        &self.active
    }

    pub fn pending_id(&self) -> Option<u32> {
        self.pending.as_ref().map(|p| p.id)
    }

    /// Builds the next scene under a fresh id. The active scene is untouched;
    /// a scene prepared earlier but never swapped in is dropped.
    pub fn load_scene(&mut self, source: &mut dyn SceneSource) -> Result<u32, SortError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut vertices = VertexBuffer::new("scene vertices");
        let mut uvs = UvBuffer::new("scene uvs");
        source.upload_scene(id, &mut vertices, &mut uvs)?;
        vertices.flip()?;
        uvs.flip()?;
        let heights = source.tile_heights();

        log::debug!(
            "Prepared scene {}: {} vertices, {} uvs, {} height planes",
            id,
            vertices.len(),
            uvs.len(),
            heights.planes()
        );
        let prepared = PreparedScene { id, vertices, uvs, heights };
        if let Some(stale) = self.pending.replace(prepared) {
            log::debug!("Discarding prepared scene {} before it became active", stale.id);
        }
        Ok(id)
    }

    /// Uploads the prepared scene to fresh storage, makes it active, then
    /// frees the previous scene. Returns `false` when nothing was pending.
    pub fn swap_scene<D>(&mut self, device: &mut D) -> Result<bool, SortError>
    where
        D: GpuDevice<Buffer = B>,
    {
        let Some(prepared) = self.pending.take() else {
            return Ok(false);
        };
        let fresh = ActiveScene::upload(device, &prepared)?;
        let mut old = std::mem::replace(&mut self.active, fresh);
        old.destroy(device);
        log::info!("Scene {} active (replaced scene {})", self.active.id, old.id);
        Ok(true)
    }

    pub fn destroy<D>(&mut self, device: &mut D)
    where
        D: GpuDevice<Buffer = B>,
    {
        self.pending = None;
        self.active.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuDevice;

    struct Quad(i32);

    impl SceneSource for Quad {
        fn upload_scene(
            &mut self,
            _scene_id: u32,
            vertices: &mut VertexBuffer,
            uvs: &mut UvBuffer,
        ) -> Result<(), SortError> {
            for i in 0..6 {
                vertices.append([i, self.0, i, 0])?;
                uvs.append([0.0; 4])?;
            }
            Ok(())
        }

        fn tile_heights(&self) -> TileHeightField {
            TileHeightField::flat(1, 4)
        }
    }

    #[test]
    fn heights_store_shifted_values() {
        let field = TileHeightField::from_fn(1, 2, |_, x, z| -((x + z) as i32) * 240);
        assert_eq!(field.get(0, 1, 1).unwrap(), -480);
        assert_eq!(field.to_gpu_words()[..4], [1, 2, 0, 0]);
        assert_eq!(field.to_gpu_words()[4 + 3], -480 >> 3);
        assert!(field.get(1, 0, 0).is_err());
    }

    #[test]
    fn sample_interpolates_between_corners() {
        let field = TileHeightField::from_fn(1, 2, |_, x, _| x as i32 * 128);
        assert_eq!(field.sample(0, 0, 0), 0);
        assert_eq!(field.sample(0, 64, 0), 64);
        assert_eq!(field.sample(0, 64, 100), 64);
        // Clamped to the last tile.
        assert_eq!(field.sample(0, 127, 0), 127);
        assert_eq!(TileHeightField::flat(0, 0).sample(0, 10, 10), 0);
    }

    #[test]
    fn swap_with_nothing_pending_is_noop() {
        let mut device = CpuDevice::new();
        let mut scenes = SceneBuffers::new(&mut device).unwrap();
        assert_eq!(scenes.active().id, 0);
        assert!(!scenes.swap_scene(&mut device).unwrap());
        assert_eq!(scenes.active().id, 0);
    }

    #[test]
    fn swap_frees_previous_storage() {
        let mut device = CpuDevice::new();
        let mut scenes = SceneBuffers::new(&mut device).unwrap();
        let live = device.live_buffers();

        let id = scenes.load_scene(&mut Quad(5)).unwrap();
        assert_eq!(scenes.active().id, 0);
        assert!(scenes.swap_scene(&mut device).unwrap());
        assert_eq!(scenes.active().id, id);
        assert_eq!(scenes.active().vertices.name(), format!("scene {id} vertices"));
        assert_eq!(device.live_buffers(), live);

        scenes.destroy(&mut device);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn sample_matches_the_uploaded_layout() {
        let field = TileHeightField::from_fn(2, 5, |plane, x, z| -((x * 37 + z * 91 + plane * 400) as i32 % 300));
        let words = field.to_gpu_words();
        for plane in 0..2 {
            for (x, z) in [(0, 0), (70, 300), (511, 20), (255, 511), (-40, 900)] {
                assert_eq!(field.sample(plane, x, z), sample_height_words(&words, plane as i32, x, z));
            }
        }
    }

    fn looking_north() -> CameraUniform {
        // 64 tiles of flat ground; the camera sits above tile (32, 20) facing +z.
        CameraUniform {
            yaw: 0.0,
            pitch: 0.3,
            center_x: 720,
            center_y: 800,
            zoom: 512,
            camera_x: 32.0 * 128.0 + 64.0,
            camera_y: -600.0,
            camera_z: 20.0 * 128.0 + 64.0,
        }
    }

    #[test]
    fn tiles_ahead_are_kept_and_behind_are_culled() {
        let field = TileHeightField::flat(1, 65);
        let camera = looking_north();
        assert!(tile_in_frustum(&field, 0, 32, 25, &camera));
        assert!(!tile_in_frustum(&field, 0, 32, 12, &camera));
        // Far off to the side of a forward-looking camera.
        assert!(!tile_in_frustum(&field, 0, 63, 22, &camera));
        assert!(!tile_in_frustum(&field, 0, -1, 25, &camera));
    }

    #[test]
    fn raised_tile_above_the_view_is_culled() {
        let camera = looking_north();
        let mut field = TileHeightField::flat(1, 65);
        assert!(tile_in_frustum(&field, 0, 32, 24, &camera));

        // Lift the tile well above eye level (y points down): still ahead of
        // the camera, but wholly over the top edge.
        for (x, z) in [(32, 24), (33, 24), (32, 25), (33, 25)] {
            field.set(0, x, z, -2_100).unwrap();
        }
        assert!(!tile_in_frustum(&field, 0, 32, 24, &camera));
    }
}
