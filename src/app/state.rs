// app/state.rs - Capture Source Data Model
//
// Types shared by the registry, the capture sessions and the event bus.
// A CaptureSource is owned exclusively by the registry; sessions hold a
// SessionSource copy of the fields they need to bind the backend.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionFault;
use crate::geometry::PhysicalRect;
use crate::platform::NativeHandle;

/// Opaque source identifier. Allocated monotonically, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// What a source captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// A native application window, cropped in that window's pixel space
    NativeWindow,
    /// An arbitrary screen rectangle in virtual desktop pixels
    ScreenRegion,
}

/// Per-source render filters applied by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureFilters {
    pub grayscale: bool,
    pub mirrored: bool,
}

/// Badge state the registry renders next to a source
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "fault", rename_all = "kebab-case")]
pub enum SourceStatus {
    /// No running session, or session not started yet
    #[default]
    Idle,
    /// Session bound and rendering
    Live,
    /// Session hidden, binding kept for fast resume
    Paused,
    /// Native source window minimized, rendering suspended
    Minimized,
    /// Session-local error reported as state
    Fault(SessionFault),
}

impl SourceStatus {
    /// User-visible notice for the badge, if any
    pub fn notice(&self) -> Option<String> {
        match self {
            SourceStatus::Minimized => Some(crate::constants::session::MINIMIZED_NOTICE.to_string()),
            SourceStatus::Fault(fault) => Some(fault.notice()),
            _ => None,
        }
    }
}

/// A configured capture source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSource {
    pub id: SourceId,
    pub kind: SourceKind,
    /// Native window handle for NativeWindow sources
    pub target: Option<NativeHandle>,
    /// Always in the native pixel space of the target (screen or window)
    pub crop: PhysicalRect,
    pub label: String,
    pub active: bool,
    pub grayscale: bool,
    pub mirrored: bool,
    pub status: SourceStatus,
    /// Bumped on every registry-originated command; reports older than this are stale
    pub revision: u64,
}

impl CaptureSource {
    pub fn filters(&self) -> CaptureFilters {
        CaptureFilters {
            grayscale: self.grayscale,
            mirrored: self.mirrored,
        }
    }

    /// Default label for a region source
    pub fn region_label(crop: &PhysicalRect) -> String {
        format!("Region {}x{}", crop.width, crop.height)
    }
}

/// The subset of a source a capture session needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSource {
    pub id: SourceId,
    pub kind: SourceKind,
    pub target: Option<NativeHandle>,
    pub crop: PhysicalRect,
    pub label: String,
    pub filters: CaptureFilters,
}

impl From<&CaptureSource> for SessionSource {
    fn from(source: &CaptureSource) -> Self {
        Self {
            id: source.id,
            kind: source.kind,
            target: source.target,
            crop: source.crop,
            label: source.label.clone(),
            filters: source.filters(),
        }
    }
}
