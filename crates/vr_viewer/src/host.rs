//! A small procedural world standing in for the host engine.
//!
//! It owns a height-mapped tile grid, static props uploaded with each scene
//! and a few walkers whose geometry is pushed every frame. The camera orbits
//! the middle of the map.

use glam::Vec3;
use trisort::scene::{LOCAL_COORD_BITS, TILE_SIZE};
use trisort::{
    tile_in_frustum, CameraUniform, DrawRequest, GroundTile, HostCallbacks, ModelGeometry,
    SceneSlot, SceneSource, SortDispatcher, SortError, TileHeightField, Uv, UvBuffer, Vertex,
    VertexBuffer,
};
use xr_frame::GameCamera;

use crate::plugin::HostEngine;

/// Packs a colour the way the scene shader decodes it.
pub fn pack_hsl(hue: u8, saturation: u8, lightness: u8) -> i32 {
    (((hue as i32) & 63) << 10) | (((saturation as i32) & 7) << 7) | ((lightness as i32) & 127)
}

#[derive(Clone, Debug, Default)]
pub struct DemoModel {
    faces: Vec<[Vertex; 3]>,
    uvs: Option<Vec<[Uv; 3]>>,
    slot: Option<SceneSlot>,
}

impl DemoModel {
    pub fn new(faces: Vec<[Vertex; 3]>) -> Self {
        Self {
            faces,
            uvs: None,
            slot: None,
        }
    }

    /// Planar uvs from the x/z footprint.
    pub fn with_planar_uvs(mut self) -> Self {
        let uvs = self
            .faces
            .iter()
            .map(|face| face.map(|v| [v[0] as f32 / 128.0, v[2] as f32 / 128.0, 0.0, 0.0]))
            .collect();
        self.uvs = Some(uvs);
        self
    }

    /// Axis-aligned box standing on the origin, 12 faces. `height` grows upwards (negative y).
    pub fn cuboid(half_width: i32, height: i32, color: i32) -> Self {
        let (w, h) = (half_width, -height);
        let corners = [
            [-w, 0, -w],
            [w, 0, -w],
            [w, 0, w],
            [-w, 0, w],
            [-w, h, -w],
            [w, h, -w],
            [w, h, w],
            [-w, h, w],
        ];
        let quads = [
            [0, 1, 2, 3],
            [4, 7, 6, 5],
            [0, 4, 5, 1],
            [1, 5, 6, 2],
            [2, 6, 7, 3],
            [3, 7, 4, 0],
        ];
        let vertex = |i: usize| [corners[i][0], corners[i][1], corners[i][2], color];
        let faces = quads
            .iter()
            .flat_map(|q| [[vertex(q[0]), vertex(q[1]), vertex(q[2])], [vertex(q[0]), vertex(q[2]), vertex(q[3])]])
            .collect();
        Self::new(faces)
    }

    /// Half sphere of `rings * segments * 2` faces, shaded darker towards the base.
    pub fn dome(radius: i32, rings: u32, segments: u32, hue: u8) -> Self {
        let point = |ring: u32, seg: u32| -> [i32; 3] {
            let polar = std::f32::consts::FRAC_PI_2 * ring as f32 / rings as f32;
            let azimuth = std::f32::consts::TAU * seg as f32 / segments as f32;
            let r = radius as f32 * polar.sin();
            [
                (r * azimuth.cos()) as i32,
                -(radius as f32 * polar.cos()) as i32,
                (r * azimuth.sin()) as i32,
            ]
        };
        let mut faces = Vec::with_capacity((rings * segments * 2) as usize);
        for ring in 0..rings {
            let color = pack_hsl(hue, 4, (90 - ring * 50 / rings.max(1)) as u8);
            let v = |p: [i32; 3]| [p[0], p[1], p[2], color];
            for seg in 0..segments {
                let a = point(ring, seg);
                let b = point(ring, seg + 1);
                let c = point(ring + 1, seg + 1);
                let d = point(ring + 1, seg);
                faces.push([v(a), v(b), v(c)]);
                faces.push([v(a), v(c), v(d)]);
            }
        }
        Self::new(faces)
    }
}

impl ModelGeometry for DemoModel {
    fn face_count(&self) -> u32 {
        self.faces.len() as u32
    }

    fn has_uvs(&self) -> bool {
        self.uvs.is_some()
    }

    fn scene_slot(&self) -> Option<SceneSlot> {
        self.slot
    }

    fn push_geometry(&self, vertices: &mut VertexBuffer, uvs: &mut UvBuffer) -> Result<(), SortError> {
        for face in &self.faces {
            vertices.extend_from_slice(face)?;
        }
        if let Some(face_uvs) = &self.uvs {
            for face in face_uvs {
                uvs.extend_from_slice(face)?;
            }
        }
        Ok(())
    }
}

/// Square draw-distance culling around the camera, plus counts of culled
/// drawables and of the click regions the host would hand to its picking code.
#[derive(Clone, Debug, Default)]
pub struct Culler {
    center_x: i32,
    center_z: i32,
    range: i32,
    pub click_regions: u64,
    pub culled: u64,
}

impl Culler {
    pub fn new(range: i32) -> Self {
        Self {
            range,
            ..Self::default()
        }
    }

    pub fn focus(&mut self, camera: &GameCamera) {
        self.center_x = camera.position.x as i32;
        self.center_z = camera.position.z as i32;
    }

    pub fn in_range(&self, x: i32, z: i32) -> bool {
        (x - self.center_x).abs() <= self.range && (z - self.center_z).abs() <= self.range
    }
}

impl HostCallbacks for Culler {
    fn is_visible(&mut self, _model: &dyn ModelGeometry, draw: &DrawRequest) -> bool {
        let visible = self.in_range(draw.x, draw.z);
        if !visible {
            self.culled += 1;
        }
        visible
    }

    fn register_click_region(&mut self, _model: &dyn ModelGeometry, _draw: &DrawRequest) {
        self.click_regions += 1;
    }
}

#[derive(Clone, Debug)]
pub struct WorldConfig {
    /// Tiles per map edge.
    pub size: u32,
    /// Walkers pushed as per-frame geometry.
    pub walkers: u32,
    /// Tiles from the camera beyond which nothing is submitted.
    pub draw_distance: u32,
    /// Load and swap a fresh scene every this many ticks.
    pub reload_every: Option<u64>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            size: 64,
            walkers: 32,
            draw_distance: 25,
            reload_every: None,
        }
    }
}

struct Prop {
    model: DemoModel,
    x: i32,
    z: i32,
    orientation: u16,
    /// Follows the terrain vertex by vertex.
    skewed: bool,
}

struct Walker {
    model: DemoModel,
    x: i32,
    z: i32,
    heading: u16,
    speed: i32,
}

pub struct DemoWorld {
    config: WorldConfig,
    heights: TileHeightField,
    tiles: Vec<GroundTile>,
    props: Vec<Prop>,
    walkers: Vec<Walker>,
    culler: Culler,
    ticks: u64,
    /// Bumped on every reload so successive scenes look different.
    palette: u8,
}

impl DemoWorld {
    pub fn new(config: WorldConfig) -> Self {
        let size = config.size.max(2) as usize;
        let heights = TileHeightField::from_fn(1, size + 1, |_, x, z| {
            let h = (x as f32 * 0.31).sin() * 90.0 + (z as f32 * 0.23).cos() * 70.0;
            -(h.abs() as i32)
        });

        let extent = size as i32 * TILE_SIZE;
        let mut props = Vec::new();
        for i in (3..size as i32).step_by(7) {
            for j in (5..size as i32).step_by(9) {
                props.push(Prop {
                    model: DemoModel::cuboid(24, 180, pack_hsl(14, 5, 40)),
                    x: i * TILE_SIZE + TILE_SIZE / 2,
                    z: j * TILE_SIZE + TILE_SIZE / 2,
                    orientation: ((i * 97 + j * 31) & 0x7ff) as u16,
                    skewed: false,
                });
            }
        }
        // One large hill-hugging dome in the middle of the map.
        props.push(Prop {
            model: DemoModel::dome(384, 24, 16, 28),
            x: extent / 2,
            z: extent / 2,
            orientation: 0,
            skewed: true,
        });

        let walkers = (0..config.walkers)
            .map(|i| {
                let model = DemoModel::cuboid(16, 64, pack_hsl((i * 5) as u8, 6, 70));
                Walker {
                    model: if i % 2 == 0 { model.with_planar_uvs() } else { model },
                    x: (i as i32 * 389) % extent,
                    z: (i as i32 * 733) % extent,
                    heading: ((i * 263) & 0x7ff) as u16,
                    speed: 4 + (i as i32 % 5),
                }
            })
            .collect();

        let culler = Culler::new(config.draw_distance as i32 * TILE_SIZE);
        Self {
            config,
            heights,
            tiles: Vec::new(),
            props,
            walkers,
            culler,
            ticks: 0,
            palette: 0,
        }
    }

    pub fn culler(&self) -> &Culler {
        &self.culler
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    fn extent(&self) -> i32 {
        self.config.size.max(2) as i32 * TILE_SIZE
    }

    fn corner(&self, x: usize, z: usize) -> i32 {
        self.heights.get(0, x, z).unwrap_or(0)
    }
}

impl SceneSource for DemoWorld {
    fn upload_scene(
        &mut self,
        scene_id: u32,
        vertices: &mut VertexBuffer,
        uvs: &mut UvBuffer,
    ) -> Result<(), SortError> {
        let size = self.config.size.max(2) as usize;
        let mut tiles = Vec::with_capacity(size * size);
        for tz in 0..size {
            for tx in 0..size {
                let h = [
                    self.corner(tx, tz),
                    self.corner(tx + 1, tz),
                    self.corner(tx + 1, tz + 1),
                    self.corner(tx, tz + 1),
                ];
                let shade = (40 + (h[0].abs() / 4).min(60)) as u8;
                let color = pack_hsl(self.palette.wrapping_add(18), 3, shade);
                let t = TILE_SIZE;
                let c = [[0, h[0], 0, color], [t, h[1], 0, color], [t, h[2], t, color], [0, h[3], t, color]];

                let slot = SceneSlot {
                    scene_id,
                    vertex_offset: vertices.len() as u32,
                    uv_offset: -1,
                };
                let (tile_x, tile_z) = (tx as i32, tz as i32);
                if (tx + tz) % 9 == 0 {
                    // Shaped tile: a fan of four triangles around the centre.
                    let mid_y = (h[0] + h[1] + h[2] + h[3]) / 4;
                    let mid = [t / 2, mid_y, t / 2, pack_hsl(self.palette.wrapping_add(8), 2, shade)];
                    for k in 0..4 {
                        vertices.extend_from_slice(&[c[k], c[(k + 1) % 4], mid])?;
                    }
                    tiles.push(GroundTile::Shaped {
                        slot,
                        vertex_count: 12,
                        tile_x,
                        tile_z,
                    });
                } else {
                    vertices.extend_from_slice(&[c[0], c[1], c[2], c[0], c[2], c[3]])?;
                    tiles.push(GroundTile::Paint { slot, tile_x, tile_z });
                }
            }
        }

        for prop in &mut self.props {
            let vertex_offset = vertices.len() as u32;
            let uv_offset = if prop.model.has_uvs() { uvs.len() as i32 } else { -1 };
            prop.model.push_geometry(vertices, uvs)?;
            prop.model.slot = Some(SceneSlot {
                scene_id,
                vertex_offset,
                uv_offset,
            });
        }

        log::info!(
            "Built scene {}: {} tiles, {} props, {} vertices",
            scene_id,
            tiles.len(),
            self.props.len(),
            vertices.len()
        );
        self.tiles = tiles;
        Ok(())
    }

    fn tile_heights(&self) -> TileHeightField {
        self.heights.clone()
    }
}

impl HostEngine for DemoWorld {
    fn tick(&mut self) -> bool {
        self.ticks += 1;
        let extent = self.extent();
        for walker in &mut self.walkers {
            let angle = walker.heading as f32 * std::f32::consts::TAU / 2048.0;
            walker.x = (walker.x + (angle.sin() * walker.speed as f32) as i32).rem_euclid(extent);
            walker.z = (walker.z + (angle.cos() * walker.speed as f32) as i32).rem_euclid(extent);
            walker.heading = (walker.heading + 3) & 0x7ff;
        }

        let reload = matches!(self.config.reload_every, Some(n) if n > 0 && self.ticks % n == 0);
        if reload {
            self.palette = self.palette.wrapping_add(11);
        }
        reload
    }

    fn camera(&self) -> GameCamera {
        let extent = self.extent() as f32;
        let center = Vec3::new(extent / 2.0, 0.0, extent / 2.0);
        let angle = self.ticks as f32 * 0.002;
        let radius = extent / 3.0;
        let x = center.x + angle.sin() * radius;
        let z = center.z + angle.cos() * radius;
        let ground = self.heights.sample(0, x as i32, z as i32) as f32;
        GameCamera {
            yaw: (center.x - x).atan2(center.z - z),
            pitch: 0.3,
            position: Vec3::new(x, ground - 600.0, z),
        }
    }

    fn scene_source(&mut self) -> &mut dyn SceneSource {
        self
    }

    fn walk_scene(&mut self, scene_id: u32, dispatcher: &mut SortDispatcher) -> Result<(), SortError> {
        let camera = self.camera();
        let Self {
            tiles,
            props,
            walkers,
            culler,
            heights,
            ..
        } = self;
        culler.focus(&camera);
        let view: CameraUniform = *dispatcher.camera();

        for tile in tiles.iter() {
            let (tx, tz) = tile.tile();
            let center = TILE_SIZE / 2;
            if !culler.in_range((tx << LOCAL_COORD_BITS) + center, (tz << LOCAL_COORD_BITS) + center) {
                continue;
            }
            if tile_in_frustum(heights, 0, tx, tz, &view) {
                dispatcher.submit_ground_tile(scene_id, tile)?;
            } else {
                culler.culled += 1;
            }
        }

        for (i, prop) in props.iter().enumerate() {
            let draw = DrawRequest {
                x: prop.x,
                y: heights.sample(0, prop.x, prop.z),
                z: prop.z,
                orientation: prop.orientation,
                hash: (i as u64) << 20,
            };
            let unskewed = prop.skewed.then_some(&prop.model as &dyn ModelGeometry);
            dispatcher.submit_model(scene_id, &prop.model, unskewed, &draw, &mut *culler)?;
        }

        for (i, walker) in walkers.iter().enumerate() {
            let draw = DrawRequest {
                x: walker.x,
                y: heights.sample(0, walker.x, walker.z),
                z: walker.z,
                orientation: walker.heading,
                hash: ((i as u64) << 20) | 1,
            };
            dispatcher.submit_model(scene_id, &walker.model, None, &draw, &mut *culler)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuboid_and_dome_face_counts() {
        assert_eq!(DemoModel::cuboid(10, 20, 0).face_count(), 12);
        let dome = DemoModel::dome(100, 24, 16, 0);
        assert_eq!(dome.face_count(), 768);
        assert!(!dome.has_uvs());
        assert!(DemoModel::cuboid(1, 1, 0).with_planar_uvs().has_uvs());
    }

    #[test]
    fn packed_colour_fields() {
        let c = pack_hsl(63, 7, 127);
        assert_eq!(c, 0xffff);
        assert_eq!(pack_hsl(1, 0, 0), 1 << 10);
    }

    #[test]
    fn scene_upload_records_slots_for_props() {
        let mut world = DemoWorld::new(WorldConfig {
            size: 8,
            walkers: 2,
            ..Default::default()
        });
        let mut vertices = VertexBuffer::new("v");
        let mut uvs = UvBuffer::new("u");
        world.upload_scene(5, &mut vertices, &mut uvs).unwrap();

        assert_eq!(world.tiles.len(), 64);
        assert!(world.props.iter().all(|p| p.model.scene_slot().map(|s| s.scene_id) == Some(5)));
        // Shaped tiles carry four triangles.
        assert!(world.tiles.iter().any(|t| t.triangle_count() == 4));
    }

    #[test]
    fn culler_counts_hidden_drawables() {
        let mut culler = Culler::new(128);
        let model = DemoModel::cuboid(1, 1, 0);
        let near = DrawRequest { x: 64, z: -64, ..Default::default() };
        let far = DrawRequest { x: 1000, ..Default::default() };
        assert!(culler.is_visible(&model, &near));
        assert!(!culler.is_visible(&model, &far));
        assert_eq!(culler.culled, 1);
    }

    #[test]
    fn reload_schedule() {
        let mut world = DemoWorld::new(WorldConfig {
            size: 4,
            walkers: 1,
            reload_every: Some(3),
            ..Default::default()
        });
        let reloads: Vec<bool> = (0..6).map(|_| world.tick()).collect();
        assert_eq!(reloads, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn tiles_behind_the_camera_are_not_submitted() {
        let mut world = DemoWorld::new(WorldConfig {
            size: 16,
            walkers: 0,
            ..Default::default()
        });
        let mut vertices = VertexBuffer::new("v");
        let mut uvs = UvBuffer::new("u");
        world.upload_scene(1, &mut vertices, &mut uvs).unwrap();

        let camera = world.camera();
        let mut dispatcher = SortDispatcher::new(&trisort::SortConfig::default());
        dispatcher.begin_frame(CameraUniform {
            yaw: camera.yaw,
            pitch: camera.pitch,
            center_x: 720,
            center_y: 800,
            zoom: 512,
            camera_x: camera.position.x,
            camera_y: camera.position.y,
            camera_z: camera.position.z,
        });
        world.walk_scene(1, &mut dispatcher).unwrap();

        let drawn = dispatcher.model_count(trisort::Bucket::Unordered);
        assert!(drawn > 0);
        assert!(drawn < world.tiles.len());
        assert!(world.culler().culled > 0);
    }
}
