use crate::error::SortError;

/// Largest vertex offset a model descriptor can carry.
pub const MAX_OUTPUT_VERTICES: u32 = i32::MAX as u32;

/// Hands out non-overlapping vertex ranges of the sorted output buffers.
///
/// Offsets increase monotonically in submission order, which is what gives
/// drawables their relative order in the final draw.
#[derive(Debug, Default, Clone)]
pub struct FrameCursor {
    next: u32,
}

impl FrameCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `vertices` output slots and returns the first one.
    pub fn reserve(&mut self, vertices: u32) -> Result<u32, SortError> {
        let offset = self.next;
        self.next = offset
            .checked_add(vertices)
            .filter(|&end| end <= MAX_OUTPUT_VERTICES)
            .ok_or(SortError::OutputOverflow {
                used: offset,
                requested: vertices,
            })?;
        Ok(offset)
    }

    /// Output vertices reserved so far this frame.
    pub fn used(&self) -> u32 {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_contiguous_and_disjoint() {
        let mut cursor = FrameCursor::new();
        assert_eq!(cursor.reserve(6).unwrap(), 0);
        assert_eq!(cursor.reserve(0).unwrap(), 6);
        assert_eq!(cursor.reserve(30).unwrap(), 6);
        assert_eq!(cursor.reserve(3).unwrap(), 36);
        assert_eq!(cursor.used(), 39);

        cursor.reset();
        assert_eq!(cursor.reserve(3).unwrap(), 0);
    }

    #[test]
    fn offsets_past_i32_range_are_refused() {
        let mut cursor = FrameCursor::new();
        assert_eq!(cursor.reserve(MAX_OUTPUT_VERTICES - 3).unwrap(), 0);
        assert_eq!(cursor.reserve(3).unwrap(), MAX_OUTPUT_VERTICES - 3);

        let err = cursor.reserve(3).unwrap_err();
        assert!(matches!(err, SortError::OutputOverflow { requested: 3, .. }));
        // A refused reservation leaves the cursor where it was.
        assert_eq!(cursor.used(), MAX_OUTPUT_VERTICES);
        assert!(cursor.reserve(u32::MAX).is_err());
    }
}
