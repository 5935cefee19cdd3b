//! Triangle bucketing and painter's-algorithm sorting for per-frame geometry.
//!
//! The host walks its scene once per frame and hands every visible tile and
//! model to a [`SortDispatcher`]. Each drawable gets a contiguous slot in the
//! sorted output buffers and lands in one of three [`Bucket`]s; one compute
//! pass per bucket then writes its triangles back-to-front into that slot.
//! Static geometry is uploaded once per scene through [`SceneBuffers`].

pub mod bucket;
pub mod buffer;
pub mod cpu;
pub mod cursor;
pub mod descriptor;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod scene;
pub mod submission;
pub mod uniforms;

pub use bucket::{classify, Bucket, DrawKind, Residency, MAX_TRIANGLE, SMALL_TRIANGLE_COUNT};
pub use buffer::{GpuBuffer, SortBuffers};
pub use cursor::FrameCursor;
pub use descriptor::{ModelDescriptor, ModelFlags};
pub use device::{BufferDesc, BufferRole, GpuDevice, SortPass};
pub use dispatch::{DispatchSummary, SortConfig, SortDispatcher};
pub use error::{GpuError, SortError};
pub use host::{DrawRequest, GroundTile, HostCallbacks, ModelGeometry, SceneSlot};
pub use scene::{tile_in_frustum, ActiveScene, SceneBuffers, SceneSource, TileHeightField};
pub use submission::{GeometryBuffer, Uv, UvBuffer, Vertex, VertexBuffer};
pub use uniforms::CameraUniform;
