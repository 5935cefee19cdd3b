use thiserror::Error;

use crate::compositor::SessionState;

#[derive(Debug, Error)]
pub enum XrError {
    #[error("VR runtime loader unavailable: {0}")]
    LoaderUnavailable(String),

    #[error("VR runtime does not support required extension {0}")]
    MissingExtension(&'static str),

    #[error("no head-mounted display available: {0}")]
    NoHeadset(String),

    #[error("no supported swapchain format (runtime offers {available:?})")]
    NoSwapchainFormat { available: Vec<i64> },

    #[error("graphics API not supported by the runtime: {0}")]
    UnsupportedGraphics(String),

    #[error("cannot {action} a session in state {state:?}")]
    IllegalTransition {
        action: &'static str,
        state: SessionState,
    },

    #[error("compositor call out of order: {0}")]
    OutOfOrder(&'static str),

    #[error("swapchain for view {0} does not exist")]
    NoSuchView(usize),

    #[error("session has been torn down")]
    SessionLost,

    #[error("{call} failed: {reason}")]
    Runtime { call: &'static str, reason: String },
}
