//! What the host engine hands the dispatcher for each drawable.

use crate::error::SortError;
use crate::submission::{UvBuffer, VertexBuffer};

/// Bit position of the render plane inside a draw hash.
pub const HASH_PLANE_SHIFT: u32 = 14;

/// World placement of one drawable this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawRequest {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// 1/2048 turns about the vertical axis.
    pub orientation: u16,
    pub hash: u64,
}

impl DrawRequest {
    pub fn plane(&self) -> u8 {
        ((self.hash >> HASH_PLANE_SHIFT) & 3) as u8
    }
}

/// Where a model's geometry sits inside an uploaded scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SceneSlot {
    pub scene_id: u32,
    pub vertex_offset: u32,
    /// `-1` when the model has no uvs.
    pub uv_offset: i32,
}

/// A host model, either already in the scene buffers or pushed per frame.
pub trait ModelGeometry {
    fn face_count(&self) -> u32;

    fn has_uvs(&self) -> bool;

    /// Placement in a scene upload, if the model was part of one.
    fn scene_slot(&self) -> Option<SceneSlot>;

    /// Appends three vertices per face and, when `has_uvs`, three uvs per face.
    fn push_geometry(&self, vertices: &mut VertexBuffer, uvs: &mut UvBuffer) -> Result<(), SortError>;
}

/// Per-drawable hooks into the host.
pub trait HostCallbacks {
    /// Visibility test run before anything is submitted.
    fn is_visible(&mut self, model: &dyn ModelGeometry, draw: &DrawRequest) -> bool;

    /// Fire-and-forget notification for mouse picking.
    fn register_click_region(&mut self, model: &dyn ModelGeometry, draw: &DrawRequest);
}

/// Callbacks that see everything and record nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysVisible;

impl HostCallbacks for AlwaysVisible {
    fn is_visible(&mut self, _model: &dyn ModelGeometry, _draw: &DrawRequest) -> bool {
        true
    }

    fn register_click_region(&mut self, _model: &dyn ModelGeometry, _draw: &DrawRequest) {}
}

/// A flat ground tile, uploaded with the scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroundTile {
    /// Two-triangle coloured quad.
    Paint { slot: SceneSlot, tile_x: i32, tile_z: i32 },
    /// Shaped tile with `vertex_count / 3` triangles.
    Shaped {
        slot: SceneSlot,
        vertex_count: u32,
        tile_x: i32,
        tile_z: i32,
    },
}

impl GroundTile {
    pub fn slot(&self) -> SceneSlot {
        match *self {
            GroundTile::Paint { slot, .. } | GroundTile::Shaped { slot, .. } => slot,
        }
    }

    pub fn triangle_count(&self) -> u32 {
        match *self {
            GroundTile::Paint { .. } => 2,
            GroundTile::Shaped { vertex_count, .. } => vertex_count / 3,
        }
    }

    pub fn tile(&self) -> (i32, i32) {
        match *self {
            GroundTile::Paint { tile_x, tile_z, .. } | GroundTile::Shaped { tile_x, tile_z, .. } => {
                (tile_x, tile_z)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_from_hash() {
        let draw = DrawRequest {
            hash: (2 << 14) | 0x3fff,
            ..Default::default()
        };
        assert_eq!(draw.plane(), 2);
        let draw = DrawRequest {
            hash: 7 << 14,
            ..Default::default()
        };
        assert_eq!(draw.plane(), 3);
    }
}
