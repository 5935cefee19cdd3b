//! Per-frame CPU staging for geometry that is not resident in the active scene.
//!
//! A [`GeometryBuffer`] is written while the host walks its scene, flipped once
//! the walk is complete, read by the upload step and then cleared for the next
//! frame. The backing allocation is kept across frames.

use bytemuck::Pod;

use crate::error::SortError;

/// Packed vertex record: position x, y, z and a colour/material tag.
pub type Vertex = [i32; 4];

/// Texture coordinate record: u, v, w and a material id.
pub type Uv = [f32; 4];

pub type VertexBuffer = GeometryBuffer<Vertex>;
pub type UvBuffer = GeometryBuffer<Uv>;

/// Append-only staging buffer with an explicit write -> read flip.
#[derive(Debug, Clone)]
pub struct GeometryBuffer<T> {
    label: &'static str,
    data: Vec<T>,
    flipped: bool,
}

impl<T: Pod> GeometryBuffer<T> {
    pub fn new(label: &'static str) -> Self {
        Self::with_capacity(label, 0)
    }

    pub fn with_capacity(label: &'static str, capacity: usize) -> Self {
        Self {
            label,
            data: Vec::with_capacity(capacity),
            flipped: false,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Resets the write cursor without releasing the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
        self.flipped = false;
    }

    pub fn append(&mut self, record: T) -> Result<(), SortError> {
        self.check_writable()?;
        self.data.push(record);
        Ok(())
    }

    pub fn extend_from_slice(&mut self, records: &[T]) -> Result<(), SortError> {
        self.check_writable()?;
        self.data.extend_from_slice(records);
        Ok(())
    }

    /// Drops every record past `len`. Only legal while writing.
    pub fn truncate(&mut self, len: usize) -> Result<(), SortError> {
        self.check_writable()?;
        self.data.truncate(len);
        Ok(())
    }

    /// Switches to the read-only view of everything appended since `clear`.
    pub fn flip(&mut self) -> Result<(), SortError> {
        if self.flipped {
            return Err(SortError::DoubleFlip(self.label));
        }
        self.flipped = true;
        Ok(())
    }

    pub fn is_flipped(&self) -> bool {
        self.flipped
    }

    /// Records written since the last clear. Valid in either mode.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> Result<&[T], SortError> {
        if !self.flipped {
            return Err(SortError::NotFlipped(self.label));
        }
        Ok(&self.data)
    }

    pub fn as_bytes(&self) -> Result<&[u8], SortError> {
        self.as_slice().map(bytemuck::cast_slice)
    }

    #[inline]
    fn check_writable(&self) -> Result<(), SortError> {
        if self.flipped {
            Err(SortError::AppendAfterFlip(self.label))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_twice_without_clear_fails() {
        let mut buf = VertexBuffer::new("vertices");
        buf.append([1, 2, 3, 4]).unwrap();
        buf.flip().unwrap();
        assert!(matches!(buf.flip(), Err(SortError::DoubleFlip("vertices"))));

        buf.clear();
        buf.flip().unwrap();
    }

    #[test]
    fn append_after_flip_is_rejected() {
        let mut buf = UvBuffer::new("uvs");
        buf.flip().unwrap();
        assert!(matches!(
            buf.append([0.0; 4]),
            Err(SortError::AppendAfterFlip("uvs"))
        ));
        assert!(buf.truncate(0).is_err());
    }

    #[test]
    fn read_view_requires_flip() {
        let mut buf = VertexBuffer::new("vertices");
        buf.extend_from_slice(&[[1, 0, 0, 0], [2, 0, 0, 0]]).unwrap();
        assert!(buf.as_slice().is_err());

        buf.flip().unwrap();
        assert_eq!(buf.as_slice().unwrap().len(), 2);
        assert_eq!(buf.as_bytes().unwrap().len(), 32);
    }

    #[test]
    fn clear_keeps_allocation() {
        let mut buf = VertexBuffer::new("vertices");
        for i in 0..100 {
            buf.append([i, i, i, i]).unwrap();
        }
        let cap = buf.capacity();
        buf.flip().unwrap();
        buf.clear();

        assert!(buf.is_empty());
        assert!(!buf.is_flipped());
        assert_eq!(buf.capacity(), cap);
    }
}
