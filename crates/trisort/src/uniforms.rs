//! Sort-pass uniform block: per-frame camera followed by fixed trig tables.

use std::f64::consts::PI;

/// Entries per turn in the fixed-point trig tables.
pub const TRIG_TABLE_LEN: usize = 2048;
/// Fixed-point scale of the trig tables.
pub const TRIG_ONE: i32 = 65536;

/// Per-frame camera state read by the sort kernels.
/// Must match the head of `Uniforms` in `sort.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, Default, PartialEq)]
pub struct CameraUniform {
    /// Radians.
    pub yaw: f32,
    /// Radians.
    pub pitch: f32,
    pub center_x: i32,
    pub center_y: i32,
    pub zoom: i32,
    pub camera_x: f32,
    pub camera_y: f32,
    pub camera_z: f32,
}

const _: [(); 32] = [(); core::mem::size_of::<CameraUniform>()];

#[derive(Clone)]
pub struct TrigTables {
    pub sine: [i32; TRIG_TABLE_LEN],
    pub cosine: [i32; TRIG_TABLE_LEN],
}

impl TrigTables {
    pub fn new() -> Self {
        let mut sine = [0; TRIG_TABLE_LEN];
        let mut cosine = [0; TRIG_TABLE_LEN];
        let step = 2.0 * PI / TRIG_TABLE_LEN as f64;
        for i in 0..TRIG_TABLE_LEN {
            let angle = i as f64 * step;
            sine[i] = (TRIG_ONE as f64 * angle.sin()) as i32;
            cosine[i] = (TRIG_ONE as f64 * angle.cos()) as i32;
        }
        Self { sine, cosine }
    }
}

impl Default for TrigTables {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offset of the sine table inside the uniform buffer.
pub const TABLES_OFFSET: u64 = core::mem::size_of::<CameraUniform>() as u64;
/// Total uniform block size: camera, sine, cosine.
pub const SORT_UNIFORM_SIZE: u64 = TABLES_OFFSET + 2 * (TRIG_TABLE_LEN * 4) as u64;

/// Rotates a model-space point about the vertical axis by `orientation`
/// (1/2048 turns), in the same fixed point the kernels use.
#[inline(always)]
pub fn rotate(tables: &TrigTables, orientation: u16, x: i32, z: i32) -> (i32, i32) {
    if orientation == 0 {
        return (x, z);
    }
    let o = orientation as usize & (TRIG_TABLE_LEN - 1);
    let (s, c) = (tables.sine[o], tables.cosine[o]);
    ((z * s + x * c) >> 16, (z * c - x * s) >> 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_hit_cardinal_points() {
        let t = TrigTables::new();
        assert_eq!(t.sine[0], 0);
        assert_eq!(t.cosine[0], TRIG_ONE);
        assert_eq!(t.sine[512], TRIG_ONE);
        assert_eq!(t.cosine[1024], -TRIG_ONE);
    }

    #[test]
    fn quarter_turn_rotation() {
        let t = TrigTables::new();
        let (x, z) = rotate(&t, 512, 128, 0);
        assert_eq!(x, 0);
        assert_eq!(z, -128);
        assert_eq!(rotate(&t, 0, 7, 9), (7, 9));
    }

    #[test]
    fn uniform_block_size() {
        assert_eq!(SORT_UNIFORM_SIZE, 32 + 8192 * 2);
    }
}
