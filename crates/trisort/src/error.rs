use thiserror::Error;

/// Failures reported by a [`GpuDevice`](crate::GpuDevice) backend.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("failed to allocate {bytes} bytes for buffer '{name}': {reason}")]
    Allocation {
        name: String,
        bytes: u64,
        reason: String,
    },

    #[error("write of {len} bytes at offset {offset} overruns buffer '{name}' ({size} bytes)")]
    OutOfBounds {
        name: String,
        offset: u64,
        len: u64,
        size: u64,
    },

    #[error("buffer '{0}' is not allocated")]
    Unallocated(String),

    #[error("shader compilation failed: {0}")]
    Shader(String),

    #[error("compute dispatch failed: {0}")]
    Dispatch(String),

    #[error("device lost: {0}")]
    DeviceLost(String),
}

/// Errors raised while building or dispatching a frame's sort work.
#[derive(Debug, Error)]
pub enum SortError {
    #[error("append to '{0}' after flip without an intervening clear")]
    AppendAfterFlip(&'static str),

    #[error("'{0}' flipped twice without an intervening clear")]
    DoubleFlip(&'static str),

    #[error("'{0}' read while still accepting writes")]
    NotFlipped(&'static str),

    #[error("tile height field index ({plane}, {x}, {z}) outside {planes}x{size}x{size}")]
    HeightOutOfRange {
        plane: usize,
        x: usize,
        z: usize,
        planes: usize,
        size: usize,
    },

    #[error("reserving {requested} output vertices after {used} overflows the sorted buffers")]
    OutputOverflow { used: u32, requested: u32 },

    #[error(transparent)]
    Gpu(#[from] GpuError),
}
