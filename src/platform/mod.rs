// platform/mod.rs - Platform Abstraction Layer
//
// The capture subsystem never touches the OS directly. Everything native is
// reached through two traits:
// - CaptureBackend: the pixel-capture primitive plus monitor/window queries
// - Surface: one native window (session overlay, selector, magnifier)
//
// `headless` is an in-memory implementation used by the driver binary and
// the tests. `windows` wraps the Win32 queries for the real application.

pub mod headless;

#[cfg(target_os = "windows")]
pub mod windows;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::app::{CaptureFilters, SourceId};
use crate::error::CaptureResult;
use crate::geometry::{PhysicalPoint, PhysicalRect, PhysicalSize, ScaleFactor};
use crate::magnifier::Snapshot;

/// Native window handle (HWND on Windows)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeHandle(pub isize);

/// A top-level window offered by the app picker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeWindowInfo {
    pub handle: NativeHandle,
    pub title: String,
    /// Executable name, e.g. "krita.exe"
    pub process_name: String,
}

/// Normalizes a process label for fuzzy matching: lowercase, no ".exe"
pub fn normalize_process_label(label: &str) -> String {
    let lower = label.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stripped) => stripped.to_string(),
        None => lower,
    }
}

/// Whether `window` belongs to the process named by `label`
pub fn process_matches(label: &str, window: &NativeWindowInfo) -> bool {
    let wanted = normalize_process_label(label);
    !wanted.is_empty() && normalize_process_label(&window.process_name) == wanted
}

/// Native capture command surface.
///
/// Every binding command is keyed by the session's SourceId. Implementations
/// must tolerate `unbind_capture` for a session that holds no binding.
pub trait CaptureBackend: Send + Sync {
    /// Look up a native window by process label
    fn resolve_native_target_handle(&self, process_label: &str) -> CaptureResult<NativeHandle>;

    /// Create a fresh binding. `target` is None for screen regions, in which
    /// case `rect` is in virtual desktop pixels; otherwise it is in the
    /// target window's own pixel space.
    fn bind_capture(
        &self,
        session: SourceId,
        target: Option<NativeHandle>,
        rect: PhysicalRect,
    ) -> CaptureResult<()>;

    /// Restart rendering on an existing binding
    fn resume_capture(&self, session: SourceId) -> CaptureResult<()>;

    /// Stop rendering but keep the binding
    fn pause_capture(&self, session: SourceId) -> CaptureResult<()>;

    /// Release the binding and all of its resources
    fn unbind_capture(&self, session: SourceId) -> CaptureResult<()>;

    /// Output size of the session window changed
    fn resize_capture(&self, session: SourceId, size: PhysicalSize) -> CaptureResult<()>;

    fn set_capture_filters(&self, session: SourceId, filters: CaptureFilters) -> CaptureResult<()>;

    /// DPI scale of the monitor containing `point`
    fn query_monitor_scale(&self, point: PhysicalPoint) -> CaptureResult<ScaleFactor>;

    /// Union of all monitors
    fn query_virtual_desktop_bounds(&self) -> CaptureResult<PhysicalRect>;

    /// Physical bounds of the monitor containing `point`
    fn query_monitor_bounds(&self, point: PhysicalPoint) -> CaptureResult<PhysicalRect>;

    /// Frozen bitmap of the monitor containing `point`
    fn capture_monitor_snapshot(&self, point: PhysicalPoint) -> CaptureResult<Snapshot>;

    fn is_native_window_minimized(&self, handle: NativeHandle) -> CaptureResult<bool>;

    /// Current pixel size of a native window
    fn query_native_window_size(&self, handle: NativeHandle) -> CaptureResult<PhysicalSize>;

    /// Top-level windows for the app picker
    fn list_native_windows(&self) -> Vec<NativeWindowInfo> {
        Vec::new()
    }
}

/// Scale at `point`, degrading to 1.0 when the backend cannot tell
pub fn scale_at(backend: &dyn CaptureBackend, point: PhysicalPoint) -> ScaleFactor {
    match backend.query_monitor_scale(point) {
        Ok(scale) => scale,
        Err(e) => {
            warn!("Scale resolution at {:?} failed, using 1.0: {}", point, e);
            ScaleFactor::IDENTITY
        }
    }
}

/// How a surface should be created
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceSpec {
    pub label: String,
    /// Outer bounds in virtual desktop pixels
    pub bounds: PhysicalRect,
    pub visible: bool,
}

/// A native window. Sizes are physical pixels.
pub trait Surface: Send {
    fn label(&self) -> String;

    fn inner_size(&self) -> PhysicalSize;

    fn scale_factor(&self) -> ScaleFactor;

    fn set_inner_size(&mut self, size: PhysicalSize);

    fn set_outer_bounds(&mut self, bounds: PhysicalRect);

    fn show(&mut self);

    fn hide(&mut self);

    /// Release the native window. Further calls are ignored.
    fn destroy(&mut self);

    /// Show or clear a user-visible notice overlay
    fn set_notice(&mut self, notice: Option<&str>);

    /// Keep the window above all others
    fn set_pinned(&mut self, pinned: bool);

    /// Pass pointer input through to whatever lies below the window
    fn set_click_through(&mut self, enabled: bool);
}

/// Creates surfaces for sessions, selectors and magnifiers
pub trait SurfaceFactory: Send + Sync {
    fn create(&self, spec: SurfaceSpec) -> CaptureResult<Box<dyn Surface>>;
}
