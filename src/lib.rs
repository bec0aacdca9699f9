//! ChromaFrame - Screen Capture Sync Library
//!
//! Capture sources projected into floating windows, kept consistent across
//! monitors with different DPI scales, plus a snapshot magnifier for
//! one-shot color picking. Windows and the native capture primitive are
//! reached only through the traits in `platform`.

pub mod app;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod geometry;
pub mod magnifier;
pub mod platform;
pub mod reference;
pub mod registry;
pub mod selection;
pub mod session;

// Re-export commonly used types
pub use app::{CaptureFilters, CaptureSource, SourceId, SourceKind, SourceStatus};
pub use config::CaptureConfig;
pub use error::{CaptureError, CaptureResult, SessionFault};
pub use events::{Event, EventBus, SourceStateReport};
pub use geometry::{LogicalPoint, LogicalRect, LogicalSize, PhysicalPoint, PhysicalRect, PhysicalSize, ScaleFactor};
pub use magnifier::{MagnifierLayout, MagnifierSession, PickedColor, Snapshot};
pub use platform::{CaptureBackend, NativeHandle, Surface, SurfaceFactory};
pub use registry::{SessionHost, SourceRegistry};
pub use selection::{RegionSelection, SelectionPurpose, SelectionSession};
pub use session::{CaptureSession, SessionCommand, SessionState, TaskSessionHost};

#[cfg(target_os = "windows")]
pub use platform::windows::WindowsBackend;
