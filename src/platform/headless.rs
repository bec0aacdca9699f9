// platform/headless.rs - In-memory Backend
//
// A backend and surface implementation without any windowing system.
// Monitors and native windows are declared up front, every command is
// appended to a shared journal, and failures can be injected per command.
// The driver binary runs on it, and the tests assert against its journal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use image::{Rgba, RgbaImage};
use log::debug;

use crate::app::{CaptureFilters, SourceId};
use crate::error::{CaptureError, CaptureResult};
use crate::geometry::{monitor_at, MonitorInfo, PhysicalPoint, PhysicalRect, PhysicalSize, ScaleFactor};
use crate::magnifier::Snapshot;

use super::{
    process_matches, CaptureBackend, NativeHandle, NativeWindowInfo, Surface, SurfaceFactory, SurfaceSpec,
};

/// One recorded backend or surface command
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    Bind { session: SourceId, target: Option<NativeHandle>, rect: PhysicalRect },
    Resume(SourceId),
    Pause(SourceId),
    Unbind(SourceId),
    Resize { session: SourceId, size: PhysicalSize },
    Filters { session: SourceId, filters: CaptureFilters },
    SurfaceCreated(String),
    SurfaceShown(String),
    SurfaceHidden(String),
    SurfaceResized { label: String, size: PhysicalSize },
    SurfaceDestroyed(String),
}

/// Shared, ordered command log
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<JournalEntry>>>);

impl Journal {
    fn lock(&self) -> MutexGuard<'_, Vec<JournalEntry>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, entry: JournalEntry) {
        debug!("headless: {:?}", entry);
        self.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Position of the first entry matching `predicate`
    pub fn position(&self, predicate: impl Fn(&JournalEntry) -> bool) -> Option<usize> {
        self.lock().iter().position(predicate)
    }

    pub fn count(&self, predicate: impl Fn(&JournalEntry) -> bool) -> usize {
        self.lock().iter().filter(|e| predicate(e)).count()
    }
}

/// A live binding held by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessBinding {
    pub target: Option<NativeHandle>,
    pub rect: PhysicalRect,
    pub paused: bool,
    pub output: Option<PhysicalSize>,
    pub filters: CaptureFilters,
}

#[derive(Debug, Clone)]
struct HeadlessWindow {
    info: NativeWindowInfo,
    size: PhysicalSize,
    minimized: bool,
}

/// Commands that can be made to fail on demand
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureFlags {
    pub resume: bool,
    pub pause: bool,
    pub bind: bool,
    pub scale: bool,
    pub snapshot: bool,
}

#[derive(Debug, Default)]
struct BackendState {
    monitors: Vec<MonitorInfo>,
    windows: Vec<HeadlessWindow>,
    bindings: HashMap<SourceId, HeadlessBinding>,
    failures: FailureFlags,
    scale_queries: usize,
}

/// In-memory CaptureBackend
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    state: Mutex<BackendState>,
    journal: Journal,
}

impl HeadlessBackend {
    pub fn new(monitors: Vec<MonitorInfo>) -> Self {
        Self {
            state: Mutex::new(BackendState {
                monitors,
                ..Default::default()
            }),
            journal: Journal::default(),
        }
    }

    /// A single 1920x1080 monitor at scale 1.0
    pub fn single_monitor() -> Self {
        Self::new(vec![MonitorInfo::new(
            PhysicalRect::new(0, 0, 1920, 1080),
            ScaleFactor::IDENTITY,
        )])
    }

    fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Register a native window and return its handle
    pub fn add_window(&self, process_name: &str, title: &str, size: PhysicalSize) -> NativeHandle {
        let mut state = self.state();
        let handle = NativeHandle(0x1000 + state.windows.len() as isize * 0x10);
        state.windows.push(HeadlessWindow {
            info: NativeWindowInfo {
                handle,
                title: title.to_string(),
                process_name: process_name.to_string(),
            },
            size,
            minimized: false,
        });
        handle
    }

    pub fn close_window(&self, handle: NativeHandle) {
        self.state().windows.retain(|w| w.info.handle != handle);
    }

    pub fn set_minimized(&self, handle: NativeHandle, minimized: bool) {
        if let Some(window) = self.state().windows.iter_mut().find(|w| w.info.handle == handle) {
            window.minimized = minimized;
        }
    }

    pub fn set_window_size(&self, handle: NativeHandle, size: PhysicalSize) {
        if let Some(window) = self.state().windows.iter_mut().find(|w| w.info.handle == handle) {
            window.size = size;
        }
    }

    pub fn set_failures(&self, failures: FailureFlags) {
        self.state().failures = failures;
    }

    pub fn binding(&self, session: SourceId) -> Option<HeadlessBinding> {
        self.state().bindings.get(&session).cloned()
    }

    /// Number of monitor scale lookups so far
    pub fn scale_query_count(&self) -> usize {
        self.state().scale_queries
    }

    pub fn binding_count(&self) -> usize {
        self.state().bindings.len()
    }

    fn monitor_for(&self, point: PhysicalPoint) -> CaptureResult<MonitorInfo> {
        let state = self.state();
        monitor_at(&state.monitors, point)
            .copied()
            .ok_or_else(|| CaptureError::Backend(format!("no monitor at {:?}", point)))
    }
}

/// Deterministic test pattern; every pixel of a monitor differs from its neighbours
pub fn pattern_pixel(x: u32, y: u32) -> Rgba<u8> {
    Rgba([(x % 251) as u8, (y % 241) as u8, ((x * 7 + y * 13) % 256) as u8, 255])
}

impl CaptureBackend for HeadlessBackend {
    fn resolve_native_target_handle(&self, process_label: &str) -> CaptureResult<NativeHandle> {
        self.state()
            .windows
            .iter()
            .find(|w| process_matches(process_label, &w.info))
            .map(|w| w.info.handle)
            .ok_or_else(|| CaptureError::TargetNotFound(process_label.to_string()))
    }

    fn bind_capture(
        &self,
        session: SourceId,
        target: Option<NativeHandle>,
        rect: PhysicalRect,
    ) -> CaptureResult<()> {
        let mut state = self.state();
        if state.failures.bind {
            return Err(CaptureError::Backend("bind rejected".into()));
        }
        if let Some(handle) = target {
            if !state.windows.iter().any(|w| w.info.handle == handle) {
                return Err(CaptureError::TargetNotFound(format!("{:?}", handle)));
            }
        }
        state.bindings.insert(
            session,
            HeadlessBinding {
                target,
                rect,
                paused: false,
                output: None,
                filters: CaptureFilters::default(),
            },
        );
        drop(state);
        self.journal.record(JournalEntry::Bind { session, target, rect });
        Ok(())
    }

    fn resume_capture(&self, session: SourceId) -> CaptureResult<()> {
        let mut state = self.state();
        if state.failures.resume {
            return Err(CaptureError::Backend("resume rejected".into()));
        }
        let binding = state
            .bindings
            .get_mut(&session)
            .ok_or_else(|| CaptureError::Backend(format!("{} has no binding", session)))?;
        binding.paused = false;
        drop(state);
        self.journal.record(JournalEntry::Resume(session));
        Ok(())
    }

    fn pause_capture(&self, session: SourceId) -> CaptureResult<()> {
        let mut state = self.state();
        if state.failures.pause {
            return Err(CaptureError::Backend("pause rejected".into()));
        }
        let binding = state
            .bindings
            .get_mut(&session)
            .ok_or_else(|| CaptureError::Backend(format!("{} has no binding", session)))?;
        binding.paused = true;
        drop(state);
        self.journal.record(JournalEntry::Pause(session));
        Ok(())
    }

    fn unbind_capture(&self, session: SourceId) -> CaptureResult<()> {
        self.state().bindings.remove(&session);
        self.journal.record(JournalEntry::Unbind(session));
        Ok(())
    }

    fn resize_capture(&self, session: SourceId, size: PhysicalSize) -> CaptureResult<()> {
        let mut state = self.state();
        let binding = state
            .bindings
            .get_mut(&session)
            .ok_or_else(|| CaptureError::Backend(format!("{} has no binding", session)))?;
        binding.output = Some(size);
        drop(state);
        self.journal.record(JournalEntry::Resize { session, size });
        Ok(())
    }

    fn set_capture_filters(&self, session: SourceId, filters: CaptureFilters) -> CaptureResult<()> {
        let mut state = self.state();
        if let Some(binding) = state.bindings.get_mut(&session) {
            binding.filters = filters;
        }
        drop(state);
        self.journal.record(JournalEntry::Filters { session, filters });
        Ok(())
    }

    fn query_monitor_scale(&self, point: PhysicalPoint) -> CaptureResult<ScaleFactor> {
        let failing = {
            let mut state = self.state();
            state.scale_queries += 1;
            state.failures.scale
        };
        if failing {
            return Err(CaptureError::ScaleResolution("scale query rejected".into()));
        }
        self.monitor_for(point)
            .map(|m| m.scale)
            .map_err(|e| CaptureError::ScaleResolution(e.to_string()))
    }

    fn query_virtual_desktop_bounds(&self) -> CaptureResult<PhysicalRect> {
        let state = self.state();
        let mut monitors = state.monitors.iter();
        let first = monitors
            .next()
            .ok_or_else(|| CaptureError::Backend("no monitors".into()))?;
        let (mut left, mut top, mut right, mut bottom) =
            (first.bounds.x, first.bounds.y, first.bounds.right(), first.bounds.bottom());
        for m in monitors {
            left = left.min(m.bounds.x);
            top = top.min(m.bounds.y);
            right = right.max(m.bounds.right());
            bottom = bottom.max(m.bounds.bottom());
        }
        Ok(PhysicalRect::new(left, top, (right - left) as u32, (bottom - top) as u32))
    }

    fn query_monitor_bounds(&self, point: PhysicalPoint) -> CaptureResult<PhysicalRect> {
        self.monitor_for(point).map(|m| m.bounds)
    }

    fn capture_monitor_snapshot(&self, point: PhysicalPoint) -> CaptureResult<Snapshot> {
        if self.state().failures.snapshot {
            return Err(CaptureError::Backend("snapshot rejected".into()));
        }
        let monitor = self.monitor_for(point)?;
        let image = RgbaImage::from_fn(monitor.bounds.width, monitor.bounds.height, pattern_pixel);
        Ok(Snapshot::new(image, monitor.bounds.origin(), monitor.scale))
    }

    fn is_native_window_minimized(&self, handle: NativeHandle) -> CaptureResult<bool> {
        self.state()
            .windows
            .iter()
            .find(|w| w.info.handle == handle)
            .map(|w| w.minimized)
            .ok_or_else(|| CaptureError::TargetNotFound(format!("{:?}", handle)))
    }

    fn query_native_window_size(&self, handle: NativeHandle) -> CaptureResult<PhysicalSize> {
        self.state()
            .windows
            .iter()
            .find(|w| w.info.handle == handle)
            .map(|w| w.size)
            .ok_or_else(|| CaptureError::TargetNotFound(format!("{:?}", handle)))
    }

    fn list_native_windows(&self) -> Vec<NativeWindowInfo> {
        self.state().windows.iter().map(|w| w.info.clone()).collect()
    }
}

/// Observable state of a RecordingSurface
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceState {
    pub label: String,
    pub bounds: PhysicalRect,
    pub scale: ScaleFactor,
    pub visible: bool,
    pub destroyed: bool,
    pub notice: Option<String>,
    pub pinned: bool,
    pub click_through: bool,
}

/// Surface that records into the backend journal.
///
/// Clones share state, so a test can keep one clone while the session owns
/// the other.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    state: Arc<Mutex<SurfaceState>>,
    journal: Journal,
}

impl RecordingSurface {
    pub fn new(spec: SurfaceSpec, scale: ScaleFactor, journal: Journal) -> Self {
        journal.record(JournalEntry::SurfaceCreated(spec.label.clone()));
        Self {
            state: Arc::new(Mutex::new(SurfaceState {
                label: spec.label,
                bounds: spec.bounds,
                scale,
                visible: spec.visible,
                destroyed: false,
                notice: None,
                pinned: false,
                click_through: false,
            })),
            journal,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> SurfaceState {
        self.lock().clone()
    }

    /// Simulate the user dragging the window edge
    pub fn user_resize(&self, size: PhysicalSize) {
        let mut state = self.lock();
        state.bounds.width = size.width;
        state.bounds.height = size.height;
    }

    /// Simulate the window moving to a monitor with another scale
    pub fn move_to(&self, bounds: PhysicalRect, scale: ScaleFactor) {
        let mut state = self.lock();
        state.bounds = bounds;
        state.scale = scale;
    }
}

impl Surface for RecordingSurface {
    fn label(&self) -> String {
        self.lock().label.clone()
    }

    fn inner_size(&self) -> PhysicalSize {
        self.lock().bounds.size()
    }

    fn scale_factor(&self) -> ScaleFactor {
        self.lock().scale
    }

    fn set_inner_size(&mut self, size: PhysicalSize) {
        let label = {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.bounds.width = size.width;
            state.bounds.height = size.height;
            state.label.clone()
        };
        self.journal.record(JournalEntry::SurfaceResized { label, size });
    }

    fn set_outer_bounds(&mut self, bounds: PhysicalRect) {
        let mut state = self.lock();
        if !state.destroyed {
            state.bounds = bounds;
        }
    }

    fn show(&mut self) {
        let label = {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.visible = true;
            state.label.clone()
        };
        self.journal.record(JournalEntry::SurfaceShown(label));
    }

    fn hide(&mut self) {
        let label = {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.visible = false;
            state.label.clone()
        };
        self.journal.record(JournalEntry::SurfaceHidden(label));
    }

    fn destroy(&mut self) {
        let label = {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.visible = false;
            state.label.clone()
        };
        self.journal.record(JournalEntry::SurfaceDestroyed(label));
    }

    fn set_notice(&mut self, notice: Option<&str>) {
        self.lock().notice = notice.map(str::to_string);
    }

    fn set_pinned(&mut self, pinned: bool) {
        let mut state = self.lock();
        if !state.destroyed {
            state.pinned = pinned;
        }
    }

    fn set_click_through(&mut self, enabled: bool) {
        let mut state = self.lock();
        if !state.destroyed {
            state.click_through = enabled;
        }
    }
}

/// Creates RecordingSurfaces and keeps a handle to each for inspection
#[derive(Debug, Clone)]
pub struct HeadlessSurfaceFactory {
    journal: Journal,
    monitors: Vec<MonitorInfo>,
    created: Arc<Mutex<Vec<RecordingSurface>>>,
}

impl HeadlessSurfaceFactory {
    pub fn new(backend: &HeadlessBackend) -> Self {
        Self {
            journal: backend.journal(),
            monitors: backend.state().monitors.clone(),
            created: Arc::default(),
        }
    }

    /// Most recent surface with the given label
    pub fn surface(&self, label: &str) -> Option<RecordingSurface> {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|s| s.label() == label)
            .cloned()
    }
}

impl SurfaceFactory for HeadlessSurfaceFactory {
    fn create(&self, spec: SurfaceSpec) -> CaptureResult<Box<dyn Surface>> {
        let scale = monitor_at(&self.monitors, spec.bounds.origin())
            .map(|m| m.scale)
            .unwrap_or_default();
        let surface = RecordingSurface::new(spec, scale, self.journal.clone());
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(surface.clone());
        Ok(Box::new(surface))
    }
}
