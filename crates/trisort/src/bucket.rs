//! Routing of drawables into the three sort kernels.

use std::fmt;

/// Largest drawable the small kernel sorts in one workgroup.
pub const SMALL_TRIANGLE_COUNT: u32 = 512;
/// Largest drawable any kernel accepts; extra triangles are dropped.
pub const MAX_TRIANGLE: u32 = 6144;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Flat scene tiles copied to their output slot without sorting.
    Unordered,
    Small,
    Large,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Unordered, Bucket::Small, Bucket::Large];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Bucket::Unordered => 0,
            Bucket::Small => 1,
            Bucket::Large => 2,
        }
    }

    /// Triangles a single descriptor in this bucket may carry.
    pub fn capacity(self) -> u32 {
        match self {
            Bucket::Unordered | Bucket::Large => MAX_TRIANGLE,
            Bucket::Small => SMALL_TRIANGLE_COUNT,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Bucket::Unordered => "unordered",
            Bucket::Small => "small",
            Bucket::Large => "large",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a model's geometry is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residency {
    /// Already uploaded with the active scene.
    Scene,
    /// Pushed into the frame buffers for this frame only.
    Transient,
}

/// Kind of drawable, decided once per submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawKind {
    GroundTile,
    Model(Residency),
}

impl DrawKind {
    pub fn residency(self) -> Residency {
        match self {
            DrawKind::GroundTile => Residency::Scene,
            DrawKind::Model(r) => r,
        }
    }
}

/// Picks the kernel for a drawable. `None` means there is nothing to draw.
pub fn classify(kind: DrawKind, triangles: u32) -> Option<Bucket> {
    if triangles == 0 {
        return None;
    }
    Some(match kind {
        DrawKind::GroundTile => Bucket::Unordered,
        DrawKind::Model(_) if triangles <= SMALL_TRIANGLE_COUNT => Bucket::Small,
        DrawKind::Model(_) => Bucket::Large,
    })
}

#[inline]
pub fn clip_triangles(triangles: u32) -> u32 {
    triangles.min(MAX_TRIANGLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_kind_and_count() {
        let transient = DrawKind::Model(Residency::Transient);
        let resident = DrawKind::Model(Residency::Scene);

        assert_eq!(classify(transient, 0), None);
        assert_eq!(classify(DrawKind::GroundTile, 0), None);
        assert_eq!(classify(DrawKind::GroundTile, 2), Some(Bucket::Unordered));
        assert_eq!(classify(transient, 1), Some(Bucket::Small));
        assert_eq!(classify(resident, 512), Some(Bucket::Small));
        assert_eq!(classify(resident, 513), Some(Bucket::Large));
        assert_eq!(classify(transient, 7000), Some(Bucket::Large));
    }

    #[test]
    fn routing_is_pure() {
        let kinds = [
            DrawKind::GroundTile,
            DrawKind::Model(Residency::Scene),
            DrawKind::Model(Residency::Transient),
        ];
        for kind in kinds {
            for tc in [0, 1, 511, 512, 513, 6144, 6145] {
                assert_eq!(classify(kind, tc), classify(kind, tc));
            }
        }
    }

    #[test]
    fn clipping() {
        assert_eq!(clip_triangles(6145), 6144);
        assert_eq!(clip_triangles(6144), 6144);
        assert_eq!(clip_triangles(7), 7);
    }
}
