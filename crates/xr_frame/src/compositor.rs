//! The runtime side of the frame protocol.
//!
//! A [`Compositor`] owns the session, the per-eye swapchains and the frame
//! timing. The session state machine and the frame loop only talk to it
//! through this trait, so the same driver runs against OpenXR or the
//! simulated runtime.

use glam::{Quat, Vec3};

use crate::error::XrError;

/// Opaque runtime session identifier, used to filter state-change events.
pub type SessionHandle = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CompositorEvent {
    SessionStateChanged {
        session: SessionHandle,
        state: SessionState,
    },
    InstanceLossPending,
    EventsLost { count: u32 },
    /// Anything the driver has no use for (reference space changes, input profiles).
    Other(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTiming {
    /// Predicted display time in runtime nanoseconds.
    pub display_time: i64,
    /// The compositor wants pixels this frame.
    pub should_render: bool,
}

/// Field of view half-angles in radians; left and down are negative.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fov {
    pub fn symmetric(horizontal: f32, vertical: f32) -> Self {
        Self {
            angle_left: -horizontal / 2.0,
            angle_right: horizontal / 2.0,
            angle_up: vertical / 2.0,
            angle_down: -vertical / 2.0,
        }
    }
}

/// Eye pose in the tracking space, metres, y up.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub orientation: Quat,
    pub position: Vec3,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        orientation: Quat::IDENTITY,
        position: Vec3::ZERO,
    };
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EyeView {
    pub pose: Pose,
    pub fov: Fov,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViewStateFlags {
    pub orientation_valid: bool,
    pub position_valid: bool,
    pub orientation_tracked: bool,
    pub position_tracked: bool,
}

impl ViewStateFlags {
    pub const ALL: ViewStateFlags = ViewStateFlags {
        orientation_valid: true,
        position_valid: true,
        orientation_tracked: true,
        position_tracked: true,
    };

    /// Both orientation and position can be used to render.
    pub fn pose_valid(&self) -> bool {
        self.orientation_valid && self.position_valid
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocatedViews {
    pub flags: ViewStateFlags,
    pub views: Vec<EyeView>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub width: u32,
    pub height: u32,
    /// Runtime-native format code.
    pub format: i64,
    pub image_count: u32,
}

/// One eye's contribution to the projection layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectionView {
    pub view: usize,
    pub eye: EyeView,
    pub width: u32,
    pub height: u32,
}

pub trait Compositor {
    /// Next queued runtime event, if any. Never blocks.
    fn poll_event(&mut self) -> Result<Option<CompositorEvent>, XrError>;

    fn session_handle(&self) -> SessionHandle;

    fn begin_session(&mut self) -> Result<(), XrError>;

    fn end_session(&mut self) -> Result<(), XrError>;

    /// Asks the runtime to wind the session down through STOPPING.
    fn request_exit(&mut self) -> Result<(), XrError>;

    /// Blocks until the runtime wants the next frame.
    fn wait_frame(&mut self) -> Result<FrameTiming, XrError>;

    fn begin_frame(&mut self) -> Result<(), XrError>;

    fn locate_views(&mut self, display_time: i64) -> Result<LocatedViews, XrError>;

    /// Swapchain per view, fixed for the session's lifetime.
    fn swapchains(&self) -> &[SwapchainInfo];

    fn acquire_image(&mut self, view: usize) -> Result<u32, XrError>;

    fn wait_image(&mut self, view: usize) -> Result<(), XrError>;

    fn release_image(&mut self, view: usize) -> Result<(), XrError>;

    /// Submits the frame. `None` ends it with no layers.
    fn end_frame(&mut self, display_time: i64, layer: Option<&[ProjectionView]>) -> Result<(), XrError>;

    /// Releases swapchains, session and instance. Idempotent.
    fn destroy(&mut self);
}
