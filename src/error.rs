// error.rs - Error Taxonomy
//
// CaptureError is the library error type returned by backend calls and
// session operations. SessionFault is its state form: sessions never
// propagate errors across a window boundary, they record a fault and
// report it, and the registry renders it as a badge.

use serde::{Deserialize, Serialize};

use crate::app::SourceId;
use crate::platform::NativeHandle;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The native window vanished or was never found
    #[error("Target window not found: {0}")]
    TargetNotFound(String),

    /// The native window is minimized; recovers automatically
    #[error("Target window {0:?} is minimized")]
    TargetMinimized(NativeHandle),

    /// Neither resume nor a fresh bind succeeded
    #[error("Backend bind failed: {0}")]
    BackendBindFailure(String),

    /// Another session already holds a binding for the target
    #[error("Target {0:?} is already bound by another session")]
    TargetBusy(NativeHandle),

    /// Monitor scale could not be resolved; callers degrade to 1.0
    #[error("Scale resolution failed: {0}")]
    ScaleResolution(String),

    /// Any other backend command failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// No source with this id in the registry
    #[error("Unknown source: {0}")]
    UnknownSource(SourceId),

    /// Operation on a session that has already been destroyed
    #[error("Session has been destroyed")]
    SessionDestroyed,

    /// Geometry input that cannot be transformed
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Session-local error as reported state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum SessionFault {
    /// Fatal until the user retries manually
    TargetNotFound(String),
    /// Transient, cleared by the minimized poller
    TargetMinimized,
    /// Resume and fresh bind both failed
    BackendBindFailure(String),
}

impl SessionFault {
    /// Whether the fault clears on its own without user action
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionFault::TargetMinimized)
    }

    /// Short text for the registry badge
    pub fn notice(&self) -> String {
        match self {
            SessionFault::TargetNotFound(label) => format!("Window not found: {}", label),
            SessionFault::TargetMinimized => "Source minimized".to_string(),
            SessionFault::BackendBindFailure(reason) => format!("Capture failed: {}", reason),
        }
    }
}

impl From<&CaptureError> for SessionFault {
    fn from(err: &CaptureError) -> Self {
        match err {
            CaptureError::TargetNotFound(label) => SessionFault::TargetNotFound(label.clone()),
            CaptureError::TargetMinimized(_) => SessionFault::TargetMinimized,
            other => SessionFault::BackendBindFailure(other.to_string()),
        }
    }
}
