//! GPU-facing model descriptors and their packed flag word.

/// One drawable's work item for a sort pass.
/// Must match the layout of `ModelInfo` in `sort.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, Default, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// First vertex in the scene or frame vertex buffer (see `ModelFlags::SCENE_BUFFER`).
    pub vertex_offset: i32,
    /// First uv record, or `-1` when the model is untextured.
    pub uv_offset: i32,
    pub triangle_count: i32,
    /// First vertex slot in the sorted output buffers.
    pub output_offset: i32,
    pub flags: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

const _: [(); 32] = [(); core::mem::size_of::<ModelDescriptor>()];

/// Packed per-model flags read by the sort kernels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModelFlags(u32);

impl ModelFlags {
    /// Geometry lives in the active scene's buffers rather than the frame buffers.
    pub const SCENE_BUFFER: u32 = 1 << 31;
    /// Vertex heights are re-projected onto the tile height field.
    pub const HILLSKEW: u32 = 1 << 26;
    pub const PLANE_SHIFT: u32 = 24;
    pub const PLANE_MASK: u32 = 0b11;
    pub const ORIENTATION_MASK: u32 = 0x7ff;

    pub fn new(scene_resident: bool, hillskew: bool, plane: u8, orientation: u16) -> Self {
        let mut bits = (orientation as u32) & Self::ORIENTATION_MASK;
        bits |= ((plane as u32) & Self::PLANE_MASK) << Self::PLANE_SHIFT;
        if hillskew {
            bits |= Self::HILLSKEW;
        }
        if scene_resident {
            bits |= Self::SCENE_BUFFER;
        }
        Self(bits)
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits as u32)
    }

    /// The flag word as stored in [`ModelDescriptor::flags`].
    #[inline(always)]
    pub fn bits(self) -> i32 {
        self.0 as i32
    }

    #[inline(always)]
    pub fn is_scene_resident(self) -> bool {
        self.0 & Self::SCENE_BUFFER != 0
    }

    #[inline(always)]
    pub fn is_hillskew(self) -> bool {
        self.0 & Self::HILLSKEW != 0
    }

    #[inline(always)]
    pub fn plane(self) -> u8 {
        ((self.0 >> Self::PLANE_SHIFT) & Self::PLANE_MASK) as u8
    }

    #[inline(always)]
    pub fn orientation(self) -> u16 {
        (self.0 & Self::ORIENTATION_MASK) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_word_layout() {
        let flags = ModelFlags::new(true, false, 0, 0);
        assert_eq!(flags.bits(), i32::MIN);

        let flags = ModelFlags::new(false, true, 3, 1536);
        assert_eq!(flags.bits(), (1 << 26) | (3 << 24) | 1536);
        assert!(flags.is_hillskew());
        assert!(!flags.is_scene_resident());
        assert_eq!(flags.plane(), 3);
        assert_eq!(flags.orientation(), 1536);
    }

    #[test]
    fn orientation_wraps_to_eleven_bits() {
        assert_eq!(ModelFlags::new(false, false, 0, 2048 + 5).orientation(), 5);
        assert_eq!(ModelFlags::new(false, false, 7, 0).plane(), 3);
    }
}
