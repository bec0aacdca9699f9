// main.rs - ChromaFrame Headless Driver
//
// Runs the capture subsystem end to end against the in-memory backend:
// select a region, add it and a native window as sources, show them, crop
// one, pick a color with the magnifier, grab a reference screenshot and
// tear everything down. Useful for watching the lifecycle logs
// (RUST_LOG=debug) without a windowing environment.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use chromaframe::geometry::MonitorInfo;
use chromaframe::platform::headless::{HeadlessBackend, HeadlessSurfaceFactory};
use chromaframe::reference::capture_selection;
use chromaframe::selection::{PointerButton, SelectionInput, SelectionOutcome};
use chromaframe::session::binding::BindingTable;
use chromaframe::session::SessionContext;
use chromaframe::{
    CaptureBackend, CaptureConfig, Event, EventBus, LogicalPoint, MagnifierSession, PhysicalPoint, PhysicalRect,
    PhysicalSize, ScaleFactor, SelectionPurpose, SelectionSession, SessionCommand, SessionHost, SourceId, SourceRegistry,
    TaskSessionHost,
};

type Registry = SourceRegistry<TaskSessionHost>;

/// Feed a drag from `from` to `to` followed by Enter
fn drag_and_confirm(session: &mut SelectionSession, from: (f64, f64), to: (f64, f64)) -> SelectionOutcome {
    let now = Instant::now();
    session.handle(
        SelectionInput::PointerDown { pos: LogicalPoint::new(from.0, from.1), button: PointerButton::Primary },
        now,
    );
    session.handle(SelectionInput::PointerMove { pos: LogicalPoint::new(to.0, to.1) }, now);
    session.handle(
        SelectionInput::PointerUp { pos: LogicalPoint::new(to.0, to.1), button: PointerButton::Primary },
        now,
    );
    session.handle(SelectionInput::Confirm, now)
}

fn host_send(registry: &mut Registry, id: SourceId, command: SessionCommand) {
    if !registry.host_mut().send(id, command) {
        warn!("{} is not running", id);
    }
}

/// Apply every bus event that arrives within `window` to the registry
async fn pump(registry: &mut Registry, rx: &mut broadcast::Receiver<Event>, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(event)) => {
                registry.apply(&event);
            }
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                warn!("Skipped {} events, resyncing", skipped);
                registry.resync();
            }
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("ChromaFrame starting (headless)");
    let config = CaptureConfig::load();

    let backend = Arc::new(HeadlessBackend::new(vec![
        MonitorInfo::new(PhysicalRect::new(0, 0, 1920, 1080), ScaleFactor::IDENTITY),
        MonitorInfo::new(PhysicalRect::new(1920, 0, 2560, 1440), ScaleFactor::new(1.25)?),
    ]));
    let krita = backend.add_window("krita.exe", "Krita - sketch.kra", PhysicalSize::new(1600, 900));
    let factory = Arc::new(HeadlessSurfaceFactory::new(&backend));
    let bus = EventBus::new();
    let mut rx = bus.subscribe();

    let ctx = SessionContext {
        backend: backend.clone(),
        surfaces: factory.clone(),
        bindings: BindingTable::new(),
        bus: bus.clone(),
        tuning: config.session_tuning(),
        selection: config.selection_tuning(),
    };
    let host = TaskSessionHost::new(ctx, Handle::current());
    let mut registry = SourceRegistry::with_dedup_window(host, config.add_dedup_window());

    // 1. Region source from a selection on the second monitor
    let mut selector = SelectionSession::for_monitor_at(
        backend.clone(),
        factory.as_ref(),
        PhysicalPoint::new(2000, 100),
        SelectionPurpose::Monitor,
        config.selection_tuning(),
    )?;
    if let SelectionOutcome::Resolved(selection) = drag_and_confirm(&mut selector, (40.0, 40.0), (340.0, 240.0)) {
        if let Some(event) = selection.to_event() {
            bus.publish(event);
        }
    }
    pump(&mut registry, &mut rx, Duration::from_millis(20)).await;

    // 2. Native window source
    let handle = backend.resolve_native_target_handle("Krita").context("resolving krita")?;
    info!("Resolved Krita to {:?} (registered as {:?})", handle, krita);
    let size = backend.query_native_window_size(handle)?;
    registry.add_from_window(handle, size, "krita.exe")?;

    // 3. Show everything
    let ids: Vec<_> = registry.sources().iter().map(|s| s.id).collect();
    for id in &ids {
        registry.toggle_active(*id)?;
    }
    pump(&mut registry, &mut rx, Duration::from_millis(50)).await;

    // 4. Crop the region source to its center quarter
    if let Some(&first) = ids.first() {
        let primary = |x: f64, y: f64, down: bool| {
            let pos = LogicalPoint::new(x, y);
            let button = PointerButton::Primary;
            let input = if down {
                SelectionInput::PointerDown { pos, button }
            } else {
                SelectionInput::PointerUp { pos, button }
            };
            SessionCommand::CropInput { input }
        };
        let host = registry.host_mut();
        host.send(first, SessionCommand::BeginCrop);
        host.send(first, primary(75.0, 50.0, true));
        host.send(first, SessionCommand::CropInput {
            input: SelectionInput::PointerMove { pos: LogicalPoint::new(225.0, 150.0) },
        });
        host.send(first, primary(225.0, 150.0, false));
        host.send(first, SessionCommand::CropInput { input: SelectionInput::Confirm });
        pump(&mut registry, &mut rx, Duration::from_millis(50)).await;

        // Keep the cropped source above other windows
        host_send(&mut registry, first, SessionCommand::SetPinned { pinned: true });
    }

    for source in registry.sources() {
        info!(
            "{} '{}' crop={:?} active={} status={:?}",
            source.id, source.label, source.crop, source.active, source.status
        );
    }

    // 5. Pick a color
    let layout = config.magnifier_layout()?;
    let mut magnifier = MagnifierSession::open(
        backend.clone(),
        factory.as_ref(),
        bus.clone(),
        PhysicalPoint::new(500, 400),
        layout,
    )?;
    magnifier.render_frame();
    magnifier.pointer_moved(LogicalPoint::new(512.0, 384.0));
    if let Some(color) = magnifier.confirm(None) {
        info!("Picked color {}", color.hex());
    }

    // 6. Reference screenshot
    let mut selector = SelectionSession::for_monitor_at(
        backend.clone(),
        factory.as_ref(),
        PhysicalPoint::new(100, 100),
        SelectionPurpose::Screenshot,
        config.selection_tuning(),
    )?;
    if let SelectionOutcome::Resolved(selection) = drag_and_confirm(&mut selector, (100.0, 100.0), (420.0, 280.0)) {
        let reference = capture_selection(backend.as_ref(), &selection)?;
        info!("Reference PNG: {} bytes", reference.to_png()?.len());
    }

    // 7. Teardown: wait for every session to release its binding
    for id in ids {
        registry.remove(id);
    }
    registry.host_mut().wait_closed().await;
    info!("Bindings left: {}", backend.binding_count());

    info!("ChromaFrame shutting down");
    Ok(())
}
