// session/actor.rs - Session Tasks
//
// Each CaptureSession runs on its own tokio task and is reached only
// through its command channel. The loop multiplexes commands, the resize
// debounce and the minimized poll, and publishes a state report whenever
// the session's observable state changed. The latest report is also kept in
// a watch channel so a listener that lagged on the bus can catch up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::app::{CaptureFilters, CaptureSource, SessionSource, SourceId, SourceKind};
use crate::error::CaptureResult;
use crate::events::{Event, EventBus, SourceStateReport};
use crate::geometry::{PhysicalPoint, PhysicalRect, PhysicalSize};
use crate::platform::{scale_at, CaptureBackend, SurfaceFactory, SurfaceSpec};
use crate::registry::SessionHost;
use crate::selection::{SelectionInput, SelectionTuning};

use super::binding::BindingTable;
use super::debounce::Debouncer;
use super::poller::Poller;
use super::{session_window_size, CaptureSession, SessionTuning};

/// Messages a session task accepts
#[derive(Debug)]
pub enum SessionCommand {
    /// Registry turned the source on
    Show { revision: u64 },
    /// Registry turned the source off
    Hide { revision: u64 },
    SetFilters { filters: CaptureFilters, revision: u64 },
    /// Raw window geometry event; debounced
    WindowResized { size: PhysicalSize },
    /// The native source window changed size
    SourceResized { size: PhysicalSize },
    ToggleGrayscale,
    ToggleMirror,
    /// Hide requested from inside the session window
    HideRequested,
    SetPinned { pinned: bool },
    SetClickThrough { enabled: bool },
    BeginCrop,
    CropInput { input: SelectionInput },
    /// Manual retry after a fault
    Retry,
    Destroy { ack: Option<oneshot::Sender<()>> },
}

/// Everything a session task shares with the rest of the application
#[derive(Clone)]
pub struct SessionContext {
    pub backend: Arc<dyn CaptureBackend>,
    pub surfaces: Arc<dyn SurfaceFactory>,
    pub bindings: BindingTable,
    pub bus: EventBus,
    pub tuning: SessionTuning,
    pub selection: SelectionTuning,
}

/// Sending side of a session task
#[derive(Debug)]
pub struct SessionHandle {
    id: SourceId,
    tx: mpsc::UnboundedSender<SessionCommand>,
    reports: watch::Receiver<SourceStateReport>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// False once the task has exited
    pub fn send(&self, command: SessionCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    /// Request teardown; the receiver fires after unbind and window release
    pub fn destroy(&self) -> oneshot::Receiver<()> {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SessionCommand::Destroy { ack: Some(ack) }).is_err() {
            debug!("{} already stopped", self.id);
        }
        done
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Last report the session published
    pub fn latest_report(&self) -> SourceStateReport {
        self.reports.borrow().clone()
    }
}

fn initial_bounds(backend: &dyn CaptureBackend, source: &SessionSource) -> PhysicalRect {
    let origin = match source.kind {
        SourceKind::ScreenRegion => source.crop.origin(),
        SourceKind::NativeWindow => PhysicalPoint::new(0, 0),
    };
    let size = session_window_size(source.crop.size(), scale_at(backend, origin));
    PhysicalRect::from_origin_size(origin, size)
}

/// Create the session window (hidden) and start the session task on `runtime`
pub fn spawn_session(ctx: SessionContext, runtime: &Handle, source: SessionSource) -> CaptureResult<SessionHandle> {
    let surface = ctx.surfaces.create(SurfaceSpec {
        label: source.id.to_string(),
        bounds: initial_bounds(ctx.backend.as_ref(), &source),
        visible: false,
    })?;
    let id = source.id;
    let session = CaptureSession::new(source, ctx.backend.clone(), ctx.bindings.clone(), surface, ctx.tuning);
    let (tx, rx) = mpsc::unbounded_channel();
    let (report_tx, reports) = watch::channel(session.report());
    let task = runtime.spawn(run(ctx, session, rx, report_tx));
    info!("{} session opened", id);
    Ok(SessionHandle { id, tx, reports, task })
}

fn publish_crop(bus: &EventBus, session: &CaptureSession, crop: PhysicalRect) {
    let source = session.source();
    let label = match source.kind {
        SourceKind::ScreenRegion => Some(source.label.clone()),
        SourceKind::NativeWindow => None,
    };
    bus.publish(Event::SourceCropUpdated {
        source_id: source.id,
        new_crop: crop,
        label,
    });
}

async fn run(
    ctx: SessionContext,
    mut session: CaptureSession,
    mut rx: mpsc::UnboundedReceiver<SessionCommand>,
    reports: watch::Sender<SourceStateReport>,
) {
    let id = session.source().id;
    let mut debouncer: Debouncer<PhysicalSize> = Debouncer::new(ctx.tuning.resize_debounce);
    let mut poller = match session.source().kind {
        SourceKind::NativeWindow => Poller::every(ctx.tuning.minimized_poll),
        SourceKind::ScreenRegion => Poller::disabled(),
    };
    let mut last_report = session.report();

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else {
                    debug!("{} command channel closed", id);
                    break;
                };
                match command {
                    SessionCommand::Show { revision } => session.show(revision),
                    SessionCommand::Hide { revision } => {
                        debouncer.cancel();
                        session.hide(revision);
                    }
                    SessionCommand::SetFilters { filters, revision } => session.set_filters(filters, revision),
                    SessionCommand::WindowResized { size } => debouncer.schedule(size),
                    SessionCommand::SourceResized { size } => {
                        if let Some(crop) = session.on_source_resized(size) {
                            publish_crop(&ctx.bus, &session, crop);
                        }
                    }
                    SessionCommand::ToggleGrayscale => session.toggle_grayscale(),
                    SessionCommand::ToggleMirror => session.toggle_mirror(),
                    SessionCommand::SetPinned { pinned } => session.set_pinned(pinned),
                    SessionCommand::SetClickThrough { enabled } => session.set_click_through(enabled),
                    SessionCommand::HideRequested => {
                        debouncer.cancel();
                        let revision = session.report().revision;
                        session.hide(revision);
                    }
                    SessionCommand::BeginCrop => {
                        let bounds = PhysicalRect::from_origin_size(PhysicalPoint::new(0, 0), session.window_size());
                        let overlay = ctx.surfaces.create(SurfaceSpec {
                            label: format!("{}-crop", id),
                            bounds,
                            visible: false,
                        });
                        match overlay.and_then(|overlay| session.begin_crop(overlay, ctx.selection)) {
                            Ok(()) => debug!("{} crop selector open", id),
                            Err(e) => warn!("{} cannot start crop: {}", id, e),
                        }
                    }
                    SessionCommand::CropInput { input } => {
                        if let Some(crop) = session.crop_input(input, Instant::now()) {
                            publish_crop(&ctx.bus, &session, crop);
                        }
                    }
                    SessionCommand::Retry => session.start_or_resume(),
                    SessionCommand::Destroy { ack } => {
                        debouncer.cancel();
                        poller.cancel();
                        session.destroy();
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                        break;
                    }
                }
            }
            size = debouncer.settled() => {
                session.on_resize_settled(size);
            }
            _ = poller.tick() => {
                if let Some(crop) = session.poll_native() {
                    publish_crop(&ctx.bus, &session, crop);
                }
            }
        }

        let report = session.report();
        if report != last_report {
            reports.send_replace(report.clone());
            ctx.bus.publish(Event::SourceStateChanged(report.clone()));
            last_report = report;
        }
    }

    session.destroy();
    debug!("{} task finished", id);
}

/// SessionHost that runs every session as a task on a tokio runtime
pub struct TaskSessionHost {
    ctx: SessionContext,
    runtime: Handle,
    sessions: HashMap<SourceId, SessionHandle>,
    /// Teardown acks for sessions closed through `SessionHost::close`
    closing: Vec<oneshot::Receiver<()>>,
}

impl TaskSessionHost {
    pub fn new(ctx: SessionContext, runtime: Handle) -> Self {
        Self {
            ctx,
            runtime,
            sessions: HashMap::new(),
            closing: Vec::new(),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    /// Remove the session and request teardown. The receiver completes once
    /// the backend binding and the window are gone.
    pub fn shutdown(&mut self, id: SourceId) -> Option<oneshot::Receiver<()>> {
        let handle = self.sessions.remove(&id)?;
        let done = handle.destroy();
        self.ctx.bus.publish(Event::SourceDestroy { source_id: id });
        Some(done)
    }

    /// Wait until every session closed so far has released its binding and
    /// window
    pub async fn wait_closed(&mut self) {
        for done in std::mem::take(&mut self.closing) {
            if done.await.is_err() {
                debug!("Session task ended without acknowledging teardown");
            }
        }
    }
}

impl SessionHost for TaskSessionHost {
    fn open(&mut self, source: &CaptureSource) -> CaptureResult<()> {
        if self.is_open(source.id) {
            return Ok(());
        }
        let handle = spawn_session(self.ctx.clone(), &self.runtime, SessionSource::from(source))?;
        self.sessions.insert(source.id, handle);
        Ok(())
    }

    fn send(&mut self, id: SourceId, command: SessionCommand) -> bool {
        match self.sessions.get(&id) {
            Some(handle) => handle.send(command),
            None => false,
        }
    }

    fn close(&mut self, id: SourceId) -> bool {
        match self.shutdown(id) {
            Some(done) => {
                self.closing.push(done);
                true
            }
            None => false,
        }
    }

    fn is_open(&self, id: SourceId) -> bool {
        self.sessions.get(&id).is_some_and(|h| !h.is_finished())
    }

    fn latest_report(&self, id: SourceId) -> Option<SourceStateReport> {
        self.sessions.get(&id).map(SessionHandle::latest_report)
    }
}
