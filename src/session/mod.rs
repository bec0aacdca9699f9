// session/mod.rs - Capture Session
//
// One CaptureSession per source. It owns the session window, the locked
// aspect ratio and the backend binding, and turns every failure into
// state instead of an error:
//
//   Uninitialized -> Starting -> Active <-> Paused -> Destroyed
//                        |          |
//                        +-> Error(SessionFault)
//
// The session itself is synchronous. `actor` runs it on a tokio task and
// feeds it commands, debounced resizes and minimized polls.

pub mod actor;
pub mod aspect;
pub mod binding;
pub mod debounce;
pub mod poller;

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::app::{CaptureFilters, SessionSource, SourceKind, SourceStatus};
use crate::constants::session as defaults;
use crate::error::{CaptureError, CaptureResult, SessionFault};
use crate::events::SourceStateReport;
use crate::geometry::{
    compose_crop, window_size_for, LogicalRect, PhysicalPoint, PhysicalRect, PhysicalSize, ScaleFactor,
};
use crate::platform::{CaptureBackend, NativeHandle, Surface};
use crate::selection::{
    SelectionInput, SelectionOutcome, SelectionPurpose, SelectionScope, SelectionSession, SelectionTuning,
};

use aspect::AspectLock;
use binding::BindingTable;

pub use actor::{spawn_session, SessionCommand, SessionContext, SessionHandle, TaskSessionHost};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Starting,
    Active,
    Paused,
    Destroyed,
    Error(SessionFault),
}

/// Session timing and tolerance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTuning {
    pub resize_debounce: Duration,
    pub aspect_tolerance: f64,
    pub minimized_poll: Duration,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            resize_debounce: Duration::from_millis(defaults::RESIZE_DEBOUNCE_MS),
            aspect_tolerance: defaults::ASPECT_TOLERANCE,
            minimized_poll: Duration::from_millis(defaults::MINIMIZED_POLL_MS),
        }
    }
}

/// Physical window size a session opens with: the crop at 1:1, or a
/// fallback for degenerate crops, never below the minimum edge
pub fn initial_window_size(crop: PhysicalSize) -> PhysicalSize {
    if crop.is_empty() {
        return PhysicalSize::new(defaults::FALLBACK_WIDTH, defaults::FALLBACK_HEIGHT);
    }
    let width = crop.width.max(defaults::MIN_EDGE);
    let height = ((width as f64 * crop.height as f64 / crop.width as f64).round() as u32).max(defaults::MIN_EDGE);
    PhysicalSize::new(width, height)
}

/// Physical size of a session window showing `crop` on a monitor with
/// `scale`. The window is sized in whole logical pixels, rounded up, so it
/// never holds fewer pixels than the capture.
pub fn session_window_size(crop: PhysicalSize, scale: ScaleFactor) -> PhysicalSize {
    window_size_for(initial_window_size(crop), scale).to_physical(scale)
}

pub struct CaptureSession {
    source: SessionSource,
    backend: Arc<dyn CaptureBackend>,
    bindings: BindingTable,
    surface: Box<dyn Surface>,
    tuning: SessionTuning,
    state: SessionState,
    aspect: Option<AspectLock>,
    /// Backend holds a binding for this session
    bound: bool,
    /// Native target claimed in the binding table
    claimed: Option<NativeHandle>,
    /// Last known native window size (native sources)
    native_size: Option<PhysicalSize>,
    minimized: bool,
    /// Whether the registry wants the window shown
    visible: bool,
    /// Last registry revision applied
    revision: u64,
    crop_overlay: Option<SelectionSession>,
}

impl CaptureSession {
    pub fn new(
        source: SessionSource,
        backend: Arc<dyn CaptureBackend>,
        bindings: BindingTable,
        surface: Box<dyn Surface>,
        tuning: SessionTuning,
    ) -> Self {
        let aspect = AspectLock::from_crop(source.crop.size(), tuning.aspect_tolerance);
        if aspect.is_none() {
            warn!("{} has an empty crop, aspect lock disabled", source.id);
        }
        let native_size = match (source.kind, source.target) {
            (SourceKind::NativeWindow, Some(handle)) => backend.query_native_window_size(handle).ok(),
            _ => None,
        };
        Self {
            source,
            backend,
            bindings,
            surface,
            tuning,
            state: SessionState::Uninitialized,
            aspect,
            bound: false,
            claimed: None,
            native_size,
            minimized: false,
            visible: false,
            revision: 0,
            crop_overlay: None,
        }
    }

    pub fn source(&self) -> &SessionSource {
        &self.source
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == SessionState::Destroyed
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    pub fn aspect(&self) -> Option<AspectLock> {
        self.aspect
    }

    pub fn window_size(&self) -> PhysicalSize {
        self.surface.inner_size()
    }

    fn accept_revision(&mut self, revision: u64) {
        self.revision = self.revision.max(revision);
    }

    /// Badge status derived from the session state
    pub fn status(&self) -> SourceStatus {
        match &self.state {
            SessionState::Active if self.minimized => SourceStatus::Minimized,
            SessionState::Active => SourceStatus::Live,
            SessionState::Paused => SourceStatus::Paused,
            SessionState::Error(fault) => SourceStatus::Fault(fault.clone()),
            SessionState::Uninitialized | SessionState::Starting | SessionState::Destroyed => SourceStatus::Idle,
        }
    }

    pub fn report(&self) -> SourceStateReport {
        SourceStateReport {
            source_id: self.source.id,
            revision: self.revision,
            active: Some(self.visible),
            grayscale: Some(self.source.filters.grayscale),
            mirrored: Some(self.source.filters.mirrored),
            status: self.status(),
        }
    }

    fn fault(&mut self, fault: SessionFault) {
        if fault.is_transient() {
            info!("{} waiting: {}", self.source.id, fault.notice());
        } else {
            error!("{} failed: {}", self.source.id, fault.notice());
        }
        self.surface.set_notice(Some(&fault.notice()));
        self.state = SessionState::Error(fault);
    }

    // ---- Visibility ----

    pub fn show(&mut self, revision: u64) {
        if self.is_destroyed() {
            return;
        }
        self.accept_revision(revision);
        self.visible = true;
        self.surface.show();
        if self.state != SessionState::Active {
            self.start_or_resume();
        }
    }

    /// Pause the binding and hide the window; the binding is kept for resume
    pub fn hide(&mut self, revision: u64) {
        if self.is_destroyed() {
            return;
        }
        self.accept_revision(revision);
        self.visible = false;
        if let Some(mut overlay) = self.crop_overlay.take() {
            overlay.abort();
        }
        if self.state == SessionState::Active {
            if let Err(e) = self.backend.pause_capture(self.source.id) {
                warn!("{} pause failed: {}", self.source.id, e);
            }
            self.state = SessionState::Paused;
        }
        self.surface.hide();
        debug!("{} hidden", self.source.id);
    }

    // ---- Binding ----

    fn resolve_target(&mut self) -> CaptureResult<NativeHandle> {
        let handle = match self.source.target {
            Some(handle) => handle,
            None => {
                let handle = self.backend.resolve_native_target_handle(&self.source.label)?;
                self.source.target = Some(handle);
                handle
            }
        };
        if self.backend.is_native_window_minimized(handle)? {
            return Err(CaptureError::TargetMinimized(handle));
        }
        Ok(handle)
    }

    /// Start, or resume an existing binding. Resume is tried first; on
    /// failure the old binding is released and a fresh one made.
    pub fn start_or_resume(&mut self) {
        if self.is_destroyed() {
            return;
        }
        self.state = SessionState::Starting;

        let target = match self.source.kind {
            SourceKind::ScreenRegion => None,
            SourceKind::NativeWindow => match self.resolve_target() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    self.minimized = matches!(e, CaptureError::TargetMinimized(_));
                    self.fault(SessionFault::from(&e));
                    return;
                }
            },
        };

        if let Some(handle) = target {
            if let Err(e) = self.bindings.claim(handle, self.source.id) {
                self.fault(SessionFault::from(&e));
                return;
            }
            self.claimed = Some(handle);
            if self.native_size.is_none() {
                self.native_size = self.backend.query_native_window_size(handle).ok();
            }
        }

        if self.bound {
            match self.backend.resume_capture(self.source.id) {
                Ok(()) => {
                    self.activate();
                    return;
                }
                Err(e) => {
                    warn!("{} resume failed, rebinding: {}", self.source.id, e);
                    if let Err(e) = self.backend.unbind_capture(self.source.id) {
                        warn!("{} unbind of stale binding failed: {}", self.source.id, e);
                    }
                    self.bound = false;
                }
            }
        }

        match self.backend.bind_capture(self.source.id, target, self.source.crop) {
            Ok(()) => {
                self.bound = true;
                if let Err(e) = self.backend.set_capture_filters(self.source.id, self.source.filters) {
                    warn!("{} filters not applied: {}", self.source.id, e);
                }
                if let Err(e) = self.backend.resize_capture(self.source.id, self.surface.inner_size()) {
                    warn!("{} initial resize failed: {}", self.source.id, e);
                }
                self.activate();
            }
            Err(e) => {
                let fault = match e {
                    CaptureError::TargetNotFound(_) => SessionFault::TargetNotFound(self.source.label.clone()),
                    other => SessionFault::BackendBindFailure(other.to_string()),
                };
                self.release_claim();
                self.fault(fault);
            }
        }
    }

    fn activate(&mut self) {
        self.minimized = false;
        self.surface.set_notice(None);
        self.state = SessionState::Active;
        info!("{} live", self.source.id);
        if !self.visible {
            // Started while hidden: keep the binding, stop rendering
            if let Err(e) = self.backend.pause_capture(self.source.id) {
                warn!("{} pause failed: {}", self.source.id, e);
            }
            self.state = SessionState::Paused;
        }
    }

    fn release_claim(&mut self) {
        if let Some(handle) = self.claimed.take() {
            self.bindings.release(handle, self.source.id);
        }
    }

    /// Replace the binding with one for the current crop
    fn rebind(&mut self) {
        if !self.bound {
            return;
        }
        if let Err(e) = self.backend.unbind_capture(self.source.id) {
            warn!("{} unbind before rebind failed: {}", self.source.id, e);
        }
        self.bound = false;
        match self.backend.bind_capture(self.source.id, self.source.target, self.source.crop) {
            Ok(()) => {
                self.bound = true;
                if let Err(e) = self.backend.set_capture_filters(self.source.id, self.source.filters) {
                    warn!("{} filters not applied after rebind: {}", self.source.id, e);
                }
                if let Err(e) = self.backend.resize_capture(self.source.id, self.surface.inner_size()) {
                    warn!("{} resize after rebind failed: {}", self.source.id, e);
                }
                if self.state != SessionState::Active || self.minimized {
                    if let Err(e) = self.backend.pause_capture(self.source.id) {
                        // A binding that cannot be paused must not outlive a paused state
                        if let Err(e) = self.backend.unbind_capture(self.source.id) {
                            warn!("{} unbind of unpausable binding failed: {}", self.source.id, e);
                        }
                        self.bound = false;
                        self.release_claim();
                        self.fault(SessionFault::BackendBindFailure(format!("pause after rebind: {}", e)));
                    }
                }
            }
            Err(e) => {
                self.release_claim();
                self.fault(SessionFault::BackendBindFailure(e.to_string()));
            }
        }
    }

    // ---- Geometry ----

    /// Apply a debounced window size: forward it, then enforce the ratio.
    /// Returns the corrected size if the window had to be forced back.
    pub fn on_resize_settled(&mut self, size: PhysicalSize) -> Option<PhysicalSize> {
        if self.is_destroyed() || size.is_empty() {
            return None;
        }
        let corrected = self.aspect.and_then(|lock| lock.correct(size));
        let target = corrected.unwrap_or(size);
        if let Some(c) = corrected {
            debug!("{} ratio drift, forcing {}x{} -> {}x{}", self.source.id, size.width, size.height, c.width, c.height);
            self.surface.set_inner_size(c);
        }
        if self.bound {
            if let Err(e) = self.backend.resize_capture(self.source.id, target) {
                warn!("{} resize failed: {}", self.source.id, e);
            }
        }
        corrected
    }

    /// Correct the window once after the ratio was re-locked
    fn enforce_ratio_once(&mut self) {
        let Some(lock) = self.aspect else {
            return;
        };
        let size = self.surface.inner_size();
        if size.width == 0 {
            return;
        }
        let height = lock.height_for(size.width);
        if height != size.height {
            self.surface.set_inner_size(PhysicalSize::new(size.width, height));
        }
    }

    fn relock(&mut self) {
        let crop = self.source.crop.size();
        match self.aspect.as_mut() {
            Some(lock) => {
                lock.relock(crop);
            }
            None => self.aspect = AspectLock::from_crop(crop, self.tuning.aspect_tolerance),
        }
    }

    /// The native source window changed size. Full-window crops follow it;
    /// partial crops are clipped to it. Returns the new crop if it changed.
    pub fn on_source_resized(&mut self, native: PhysicalSize) -> Option<PhysicalRect> {
        if self.source.kind != SourceKind::NativeWindow || self.is_destroyed() || native.is_empty() {
            return None;
        }
        let previous = self.native_size.replace(native);
        if previous == Some(native) {
            return None;
        }

        let origin = PhysicalPoint::new(0, 0);
        let full_window = previous.is_some_and(|p| self.source.crop == PhysicalRect::from_origin_size(origin, p));
        let new_crop = if full_window {
            PhysicalRect::from_origin_size(origin, native)
        } else {
            self.source.crop.intersect(&PhysicalRect::from_origin_size(origin, native))?
        };
        if new_crop == self.source.crop {
            return None;
        }

        info!("{} source resized to {}x{}", self.source.id, native.width, native.height);
        self.source.crop = new_crop;
        self.relock();
        self.enforce_ratio_once();
        self.rebind();
        Some(new_crop)
    }

    /// One minimized/size poll for native sources. Returns a new crop if the
    /// source window changed size.
    pub fn poll_native(&mut self) -> Option<PhysicalRect> {
        if self.source.kind != SourceKind::NativeWindow || self.is_destroyed() {
            return None;
        }
        let handle = self.source.target?;

        match self.backend.is_native_window_minimized(handle) {
            Ok(true) => {
                if self.state == SessionState::Active && !self.minimized {
                    info!("{} source minimized, pausing", self.source.id);
                    if let Err(e) = self.backend.pause_capture(self.source.id) {
                        warn!("{} pause failed: {}", self.source.id, e);
                    }
                    self.minimized = true;
                    self.surface.set_notice(Some(defaults::MINIMIZED_NOTICE));
                }
                return None;
            }
            Ok(false) => {
                if self.state == SessionState::Error(SessionFault::TargetMinimized) {
                    if self.visible {
                        self.start_or_resume();
                    } else {
                        self.minimized = false;
                        self.surface.set_notice(None);
                        self.state = SessionState::Uninitialized;
                    }
                } else if self.minimized {
                    info!("{} source restored", self.source.id);
                    self.minimized = false;
                    self.surface.set_notice(None);
                    if self.state == SessionState::Active {
                        self.start_or_resume();
                    }
                }
            }
            Err(e) => {
                if matches!(self.state, SessionState::Error(SessionFault::TargetNotFound(_))) {
                    return None;
                }
                debug!("{} poll failed: {}", self.source.id, e);
                if self.bound {
                    if let Err(e) = self.backend.unbind_capture(self.source.id) {
                        warn!("{} unbind failed: {}", self.source.id, e);
                    }
                    self.bound = false;
                }
                self.release_claim();
                self.minimized = false;
                self.fault(SessionFault::TargetNotFound(self.source.label.clone()));
                return None;
            }
        }

        match self.backend.query_native_window_size(handle) {
            Ok(size) => self.on_source_resized(size),
            Err(_) => None,
        }
    }

    // ---- Window behaviour ----

    /// Keep the session window above all other windows
    pub fn set_pinned(&mut self, pinned: bool) {
        if self.is_destroyed() {
            return;
        }
        self.surface.set_pinned(pinned);
        debug!("{} pinned: {}", self.source.id, pinned);
    }

    /// Let pointer input fall through the session window
    pub fn set_click_through(&mut self, enabled: bool) {
        if self.is_destroyed() {
            return;
        }
        if enabled {
            if let Some(mut overlay) = self.crop_overlay.take() {
                overlay.abort();
            }
        }
        self.surface.set_click_through(enabled);
        debug!("{} click-through: {}", self.source.id, enabled);
    }

    // ---- Secondary crop ----

    /// Open a crop selector over this session's window
    pub fn begin_crop(&mut self, overlay: Box<dyn Surface>, tuning: SelectionTuning) -> CaptureResult<()> {
        if self.is_destroyed() {
            return Err(CaptureError::SessionDestroyed);
        }
        let scale = self.surface.scale_factor();
        let size = self.surface.inner_size().to_logical(scale);
        if size.is_empty() {
            return Err(CaptureError::InvalidGeometry("session window has no area".into()));
        }
        if let Some(mut previous) = self.crop_overlay.take() {
            previous.abort();
        }
        self.crop_overlay = Some(SelectionSession::open(
            self.backend.clone(),
            overlay,
            SelectionScope::Window { size, scale },
            SelectionPurpose::Crop,
            tuning,
        ));
        Ok(())
    }

    pub fn is_cropping(&self) -> bool {
        self.crop_overlay.is_some()
    }

    /// Forward input to the crop selector. Returns the new crop once the
    /// selection is confirmed and applied.
    pub fn crop_input(&mut self, input: SelectionInput, now: Instant) -> Option<PhysicalRect> {
        let overlay = self.crop_overlay.as_mut()?;
        match overlay.handle(input, now) {
            SelectionOutcome::Pending => None,
            SelectionOutcome::Cancelled => {
                self.crop_overlay = None;
                None
            }
            SelectionOutcome::Resolved(selection) => {
                self.crop_overlay = None;
                match self.apply_crop(selection.logical_rect) {
                    Ok(crop) => Some(crop),
                    Err(e) => {
                        warn!("{} crop rejected: {}", self.source.id, e);
                        None
                    }
                }
            }
        }
    }

    /// Crop the current capture to `selection` (window-local logical):
    /// compose with the current crop, re-lock the ratio, resize the window
    /// keeping its width, then rebind
    pub fn apply_crop(&mut self, selection: LogicalRect) -> CaptureResult<PhysicalRect> {
        if self.is_destroyed() {
            return Err(CaptureError::SessionDestroyed);
        }
        let window = self.surface.inner_size();
        let window_logical = window.to_logical(self.surface.scale_factor());
        let crop = self.source.crop;
        let new_crop = compose_crop(crop.origin(), crop.size(), window_logical, selection)?;

        info!("{} cropped {:?} -> {:?}", self.source.id, crop, new_crop);
        self.source.crop = new_crop;
        if self.source.kind == SourceKind::ScreenRegion {
            self.source.label = crate::app::CaptureSource::region_label(&new_crop);
        }
        self.relock();
        self.enforce_ratio_once();
        self.rebind();
        Ok(new_crop)
    }

    // ---- Filters ----

    pub fn set_filters(&mut self, filters: CaptureFilters, revision: u64) {
        self.accept_revision(revision);
        self.apply_filters(filters);
    }

    fn apply_filters(&mut self, filters: CaptureFilters) {
        self.source.filters = filters;
        if self.bound {
            if let Err(e) = self.backend.set_capture_filters(self.source.id, filters) {
                warn!("{} filters not applied: {}", self.source.id, e);
            }
        }
    }

    pub fn toggle_grayscale(&mut self) {
        let filters = CaptureFilters {
            grayscale: !self.source.filters.grayscale,
            ..self.source.filters
        };
        self.apply_filters(filters);
    }

    pub fn toggle_mirror(&mut self) {
        let filters = CaptureFilters {
            mirrored: !self.source.filters.mirrored,
            ..self.source.filters
        };
        self.apply_filters(filters);
    }

    // ---- Teardown ----

    /// Unbind first, then release the window. Idempotent.
    pub fn destroy(&mut self) {
        if self.is_destroyed() {
            return;
        }
        if let Some(mut overlay) = self.crop_overlay.take() {
            overlay.abort();
        }
        if let Err(e) = self.backend.unbind_capture(self.source.id) {
            warn!("{} unbind on destroy failed: {}", self.source.id, e);
        }
        self.bound = false;
        self.release_claim();
        self.surface.destroy();
        self.state = SessionState::Destroyed;
        info!("{} destroyed", self.source.id);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::SourceId;
    use crate::geometry::ScaleFactor;
    use crate::platform::headless::{FailureFlags, HeadlessBackend, JournalEntry, RecordingSurface};
    use crate::platform::SurfaceSpec;

    struct Fixture {
        backend: Arc<HeadlessBackend>,
        surface: RecordingSurface,
        session: CaptureSession,
    }

    fn region_source(crop: PhysicalRect) -> SessionSource {
        SessionSource {
            id: SourceId(1),
            kind: SourceKind::ScreenRegion,
            target: None,
            crop,
            label: crate::app::CaptureSource::region_label(&crop),
            filters: CaptureFilters::default(),
        }
    }

    fn fixture_with(backend: Arc<HeadlessBackend>, source: SessionSource) -> Fixture {
        let size = initial_window_size(source.crop.size());
        let surface = RecordingSurface::new(
            SurfaceSpec {
                label: source.id.to_string(),
                bounds: PhysicalRect::from_origin_size(PhysicalPoint::new(0, 0), size),
                visible: false,
            },
            ScaleFactor::IDENTITY,
            backend.journal(),
        );
        let session = CaptureSession::new(
            source,
            backend.clone(),
            BindingTable::new(),
            Box::new(surface.clone()),
            SessionTuning::default(),
        );
        Fixture { backend, surface, session }
    }

    fn region_fixture(crop: PhysicalRect) -> Fixture {
        fixture_with(Arc::new(HeadlessBackend::single_monitor()), region_source(crop))
    }

    #[test]
    fn show_binds_and_goes_live() {
        let mut f = region_fixture(PhysicalRect::new(100, 100, 320, 180));
        f.session.show(1);
        assert_eq!(f.session.state(), &SessionState::Active);
        assert_eq!(f.session.status(), SourceStatus::Live);
        let binding = f.backend.binding(SourceId(1)).unwrap();
        assert_eq!(binding.rect, PhysicalRect::new(100, 100, 320, 180));
        assert!(!binding.paused);
        assert!(f.surface.snapshot().visible);
    }

    #[test]
    fn hide_pauses_and_keeps_binding() {
        let mut f = region_fixture(PhysicalRect::new(0, 0, 320, 180));
        f.session.show(1);
        f.session.hide(2);
        assert_eq!(f.session.state(), &SessionState::Paused);
        assert!(f.backend.binding(SourceId(1)).unwrap().paused);
        assert!(!f.surface.snapshot().visible);

        // Resume reuses the binding
        let journal = f.backend.journal();
        journal.clear();
        f.session.show(3);
        assert_eq!(journal.count(|e| matches!(e, JournalEntry::Bind { .. })), 0);
        assert_eq!(journal.count(|e| matches!(e, JournalEntry::Resume(_))), 1);
    }

    #[test]
    fn failed_resume_falls_back_to_fresh_bind() {
        let mut f = region_fixture(PhysicalRect::new(0, 0, 320, 180));
        f.session.show(1);
        f.session.hide(2);
        f.backend.set_failures(FailureFlags { resume: true, ..Default::default() });
        let journal = f.backend.journal();
        journal.clear();

        f.session.show(3);
        assert_eq!(f.session.state(), &SessionState::Active);
        let unbind = journal.position(|e| matches!(e, JournalEntry::Unbind(_))).unwrap();
        let bind = journal.position(|e| matches!(e, JournalEntry::Bind { .. })).unwrap();
        assert!(unbind < bind);
    }

    #[test]
    fn resume_and_bind_failing_is_a_bind_fault() {
        let mut f = region_fixture(PhysicalRect::new(0, 0, 320, 180));
        f.session.show(1);
        f.session.hide(2);
        f.backend.set_failures(FailureFlags { resume: true, bind: true, ..Default::default() });
        f.session.show(3);
        assert!(matches!(
            f.session.state(),
            SessionState::Error(SessionFault::BackendBindFailure(_))
        ));
        assert!(f.surface.snapshot().notice.is_some());
    }

    #[test]
    fn missing_native_target_is_not_found() {
        let backend = Arc::new(HeadlessBackend::single_monitor());
        let source = SessionSource {
            kind: SourceKind::NativeWindow,
            label: "krita".into(),
            ..region_source(PhysicalRect::new(0, 0, 800, 600))
        };
        let mut f = fixture_with(backend, source);
        f.session.show(1);
        assert_eq!(
            f.session.state(),
            &SessionState::Error(SessionFault::TargetNotFound("krita".into()))
        );
    }

    #[test]
    fn resize_corrects_drift_once() {
        let mut f = region_fixture(PhysicalRect::new(0, 0, 1920, 1080));
        f.session.show(1);
        f.surface.user_resize(PhysicalSize::new(1000, 500));

        let corrected = f.session.on_resize_settled(PhysicalSize::new(1000, 500)).unwrap();
        assert_eq!(corrected.width, 1000);
        assert!((corrected.height as i64 - 562).abs() <= 1);
        assert_eq!(f.surface.snapshot().bounds.size(), corrected);
        assert_eq!(f.backend.binding(SourceId(1)).unwrap().output, Some(corrected));

        // The correction's own resize event settles without another correction
        assert_eq!(f.session.on_resize_settled(corrected), None);
    }

    #[test]
    fn crop_composes_relocks_and_rebinds() {
        let mut f = region_fixture(PhysicalRect::new(100, 50, 800, 600));
        f.session.show(1);
        // Window shown at half size
        f.surface.user_resize(PhysicalSize::new(400, 300));

        let crop = f.session.apply_crop(LogicalRect::new(40.0, 30.0, 200.0, 100.0)).unwrap();
        assert_eq!(crop, PhysicalRect::new(180, 110, 400, 200));
        assert_eq!(f.session.source().label, "Region 400x200");
        assert!((f.session.aspect().unwrap().ratio() - 2.0).abs() < 1e-12);
        // Width kept, height follows the new ratio
        assert_eq!(f.surface.snapshot().bounds.size(), PhysicalSize::new(400, 200));
        assert_eq!(f.backend.binding(SourceId(1)).unwrap().rect, crop);
    }

    #[test]
    fn destroy_unbinds_before_window_release() {
        let mut f = region_fixture(PhysicalRect::new(0, 0, 320, 180));
        f.session.show(1);
        f.session.destroy();
        f.session.destroy();

        let journal = f.backend.journal();
        let unbind = journal.position(|e| matches!(e, JournalEntry::Unbind(_))).unwrap();
        let destroyed = journal.position(|e| matches!(e, JournalEntry::SurfaceDestroyed(_))).unwrap();
        assert!(unbind < destroyed);
        assert_eq!(journal.count(|e| matches!(e, JournalEntry::SurfaceDestroyed(_))), 1);
        assert_eq!(f.backend.binding_count(), 0);

        // Destroyed sessions ignore further commands
        f.session.show(2);
        assert_eq!(f.backend.binding_count(), 0);
    }

    fn native_fixture(size: PhysicalSize) -> (Fixture, NativeHandle) {
        let backend = Arc::new(HeadlessBackend::single_monitor());
        let handle = backend.add_window("krita.exe", "Krita", size);
        let source = SessionSource {
            kind: SourceKind::NativeWindow,
            target: Some(handle),
            label: "krita.exe".into(),
            ..region_source(PhysicalRect::from_origin_size(PhysicalPoint::new(0, 0), size))
        };
        (fixture_with(backend, source), handle)
    }

    #[test]
    fn full_window_crop_follows_resize_before_first_show() {
        let (mut f, _) = native_fixture(PhysicalSize::new(800, 600));
        let crop = f.session.on_source_resized(PhysicalSize::new(1000, 500));
        assert_eq!(crop, Some(PhysicalRect::new(0, 0, 1000, 500)));
        assert!((f.session.aspect().unwrap().ratio() - 2.0).abs() < 1e-12);

        // Still a full-window crop, so the next resize follows too
        let crop = f.session.on_source_resized(PhysicalSize::new(1200, 900));
        assert_eq!(crop, Some(PhysicalRect::new(0, 0, 1200, 900)));
    }

    #[test]
    fn closed_while_waiting_on_minimize_is_not_found() {
        let (mut f, handle) = native_fixture(PhysicalSize::new(800, 600));
        f.backend.set_minimized(handle, true);
        f.session.show(1);
        assert_eq!(f.session.status(), SourceStatus::Fault(SessionFault::TargetMinimized));

        f.backend.close_window(handle);
        f.session.poll_native();
        assert_eq!(
            f.session.status(),
            SourceStatus::Fault(SessionFault::TargetNotFound("krita.exe".into()))
        );
        assert!(!f.session.is_minimized());
        assert_eq!(f.surface.snapshot().notice.as_deref(), Some("Window not found: krita.exe"));

        // Later polls leave the fault alone
        f.session.poll_native();
        assert_eq!(
            f.session.status(),
            SourceStatus::Fault(SessionFault::TargetNotFound("krita.exe".into()))
        );
    }

    #[test]
    fn closed_before_first_show_is_not_found() {
        let (mut f, handle) = native_fixture(PhysicalSize::new(800, 600));
        f.backend.close_window(handle);
        f.session.poll_native();
        assert_eq!(
            f.session.state(),
            &SessionState::Error(SessionFault::TargetNotFound("krita.exe".into()))
        );
    }

    #[test]
    fn unpausable_rebind_faults_and_unbinds() {
        let mut f = region_fixture(PhysicalRect::new(0, 0, 320, 180));
        f.session.show(1);
        f.session.hide(2);
        f.backend.set_failures(FailureFlags { pause: true, ..Default::default() });

        f.session.apply_crop(LogicalRect::new(0.0, 0.0, 160.0, 90.0)).unwrap();
        assert!(matches!(
            f.session.state(),
            SessionState::Error(SessionFault::BackendBindFailure(_))
        ));
        assert!(f.backend.binding(SourceId(1)).is_none());
    }

    #[test]
    fn pin_and_click_through_reach_the_window() {
        let mut f = region_fixture(PhysicalRect::new(0, 0, 320, 180));
        f.session.set_pinned(true);
        f.session.set_click_through(true);
        let state = f.surface.snapshot();
        assert!(state.pinned);
        assert!(state.click_through);

        f.session.set_click_through(false);
        assert!(!f.surface.snapshot().click_through);

        f.session.destroy();
        f.session.set_pinned(false);
        assert!(f.surface.snapshot().pinned);
    }

    #[test]
    fn session_window_holds_the_whole_crop() {
        let scale = |v| ScaleFactor::new(v).unwrap();
        assert_eq!(
            session_window_size(PhysicalSize::new(375, 250), scale(1.25)),
            PhysicalSize::new(375, 250)
        );
        for s in [1.0, 1.25, 1.5, 1.75, 2.0] {
            for crop in [PhysicalSize::new(301, 201), PhysicalSize::new(777, 333), PhysicalSize::new(1921, 1081)] {
                let size = session_window_size(crop, scale(s));
                assert!(size.width >= crop.width && size.height >= crop.height, "{:?} @ {}", crop, s);
                assert!(size.width - crop.width < 3 && size.height - crop.height < 3, "{:?} @ {}", crop, s);
            }
        }
    }

    #[test]
    fn initial_size_respects_minimum_edge() {
        assert_eq!(initial_window_size(PhysicalSize::new(0, 0)), PhysicalSize::new(400, 300));
        assert_eq!(initial_window_size(PhysicalSize::new(20, 10)), PhysicalSize::new(50, 50));
        assert_eq!(initial_window_size(PhysicalSize::new(320, 180)), PhysicalSize::new(320, 180));
    }
}
