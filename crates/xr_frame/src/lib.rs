//! VR session lifecycle and stereo frame submission.
//!
//! [`FrameLoop::run_frame`] is the whole per-frame protocol: it drains
//! compositor events through the [`SessionMachine`], waits for the predicted
//! display time, renders each eye into its acquired swapchain image and ends
//! the frame, submitting an empty layer whenever rendering is not possible.

pub mod camera;
pub mod compositor;
pub mod error;
pub mod format;
pub mod frame;
#[cfg(feature = "openxr")]
pub mod openxr_backend;
pub mod session;
pub mod simulated;

pub use camera::{eye_transforms, projection_from_fov, EyeTransforms, GameCamera};
pub use compositor::{
    Compositor, CompositorEvent, EyeView, Fov, FrameTiming, LocatedViews, Pose, ProjectionView,
    SessionHandle, SessionState, SwapchainInfo, ViewStateFlags,
};
pub use error::XrError;
pub use format::select_swapchain_format;
pub use frame::{EyeTarget, FrameLoop, FrameLoopConfig, FrameOutcome, SkipReason};
pub use session::{PumpOutcome, SessionMachine};
pub use simulated::{SimulatedCompositor, SimulatedRuntimeConfig};
