// End-to-end flows on the headless backend: selection -> registry ->
// session tasks -> reports back into the registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use chromaframe::geometry::MonitorInfo;
use chromaframe::platform::headless::{HeadlessBackend, HeadlessSurfaceFactory, JournalEntry};
use chromaframe::selection::{PointerButton, SelectionInput, SelectionOutcome, SelectionTuning};
use chromaframe::session::binding::BindingTable;
use chromaframe::session::{SessionContext, SessionTuning};
use chromaframe::{
    Event, EventBus, LogicalPoint, PhysicalPoint, PhysicalRect, PhysicalSize, ScaleFactor, SelectionPurpose,
    SelectionSession, SessionCommand, SessionFault, SessionHost, SourceId, SourceRegistry, SourceStatus,
    TaskSessionHost,
};

struct Harness {
    backend: Arc<HeadlessBackend>,
    factory: Arc<HeadlessSurfaceFactory>,
    registry: SourceRegistry<TaskSessionHost>,
    rx: broadcast::Receiver<Event>,
}

impl Harness {
    fn new() -> Self {
        Self::with_bus(EventBus::new())
    }

    fn with_bus(bus: EventBus) -> Self {
        let backend = Arc::new(HeadlessBackend::new(vec![
            MonitorInfo::new(PhysicalRect::new(0, 0, 1920, 1080), ScaleFactor::IDENTITY),
            MonitorInfo::new(PhysicalRect::new(1920, 0, 2560, 1440), ScaleFactor::new(1.25).unwrap()),
        ]));
        let factory = Arc::new(HeadlessSurfaceFactory::new(&backend));
        let rx = bus.subscribe();
        let ctx = SessionContext {
            backend: backend.clone(),
            surfaces: factory.clone(),
            bindings: BindingTable::new(),
            bus,
            tuning: SessionTuning::default(),
            selection: SelectionTuning::default(),
        };
        let registry = SourceRegistry::new(TaskSessionHost::new(ctx, Handle::current()));
        Self { backend, factory, registry, rx }
    }

    /// Let session tasks run for `ms`, then apply everything still buffered.
    /// Returns how many events were lost to lag.
    async fn settle(&mut self, ms: u64) -> u64 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        let mut missed = 0;
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    self.registry.apply(&event);
                }
                Err(TryRecvError::Lagged(n)) => missed += n,
                Err(_) => return missed,
            }
        }
    }

    fn send(&mut self, id: SourceId, command: SessionCommand) {
        assert!(self.registry.host_mut().send(id, command));
    }

    fn status(&self, id: SourceId) -> SourceStatus {
        self.registry.get(id).unwrap().status.clone()
    }
}

fn press(x: f64, y: f64) -> SelectionInput {
    SelectionInput::PointerDown { pos: LogicalPoint::new(x, y), button: PointerButton::Primary }
}

fn release(x: f64, y: f64) -> SelectionInput {
    SelectionInput::PointerUp { pos: LogicalPoint::new(x, y), button: PointerButton::Primary }
}

fn drag_to(x: f64, y: f64) -> SelectionInput {
    SelectionInput::PointerMove { pos: LogicalPoint::new(x, y) }
}

#[tokio::test(start_paused = true)]
async fn selection_on_scaled_monitor_becomes_a_live_source() {
    let mut h = Harness::new();

    let mut selector = SelectionSession::for_monitor_at(
        h.backend.clone(),
        h.factory.as_ref(),
        PhysicalPoint::new(2500, 500),
        SelectionPurpose::Monitor,
        SelectionTuning::default(),
    )
    .unwrap();
    let now = Instant::now();
    selector.handle(press(0.0, 0.0), now);
    selector.handle(drag_to(300.0, 200.0), now);
    selector.handle(release(300.0, 200.0), now);
    let SelectionOutcome::Resolved(selection) = selector.handle(SelectionInput::Confirm, now) else {
        panic!("selection did not resolve");
    };
    assert_eq!(selection.rect, PhysicalRect::new(1920, 0, 375, 250));

    assert!(h.registry.apply(&selection.to_event().unwrap()));
    let id = h.registry.sources()[0].id;
    assert_eq!(h.registry.get(id).unwrap().label, "Region 375x250");

    h.registry.toggle_active(id).unwrap();
    h.settle(20).await;

    assert_eq!(h.status(id), SourceStatus::Live);
    let binding = h.backend.binding(id).unwrap();
    assert_eq!(binding.rect, PhysicalRect::new(1920, 0, 375, 250));
    assert!(!binding.paused);
}

#[tokio::test(start_paused = true)]
async fn toggling_off_and_on_before_reports_ends_visible() {
    let mut h = Harness::new();
    let id = h.registry.add_from_region(PhysicalRect::new(100, 100, 640, 360)).unwrap();
    h.registry.set_active(id, true).unwrap();
    h.settle(20).await;

    h.registry.toggle_active(id).unwrap();
    h.registry.toggle_active(id).unwrap();
    h.settle(20).await;

    let source = h.registry.get(id).unwrap();
    assert!(source.active);
    assert_eq!(source.status, SourceStatus::Live);
    assert!(!h.backend.binding(id).unwrap().paused);
    assert!(h.factory.surface("source-1").unwrap().snapshot().visible);
}

#[tokio::test(start_paused = true)]
async fn removal_unbinds_before_the_window_goes() {
    let mut h = Harness::new();
    let id = h.registry.add_from_region(PhysicalRect::new(0, 0, 640, 360)).unwrap();
    h.registry.set_active(id, true).unwrap();
    h.settle(20).await;

    assert!(h.registry.remove(id));
    assert!(!h.registry.remove(id));
    h.settle(20).await;

    let journal = h.backend.journal();
    let unbind = journal.position(|e| *e == JournalEntry::Unbind(id)).unwrap();
    let destroyed = journal
        .position(|e| *e == JournalEntry::SurfaceDestroyed("source-1".into()))
        .unwrap();
    assert!(unbind < destroyed);
    assert_eq!(h.backend.binding_count(), 0);
    assert!(h.registry.sources().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hidden_source_pauses_without_losing_its_binding() {
    let mut h = Harness::new();
    let id = h.registry.add_from_region(PhysicalRect::new(0, 0, 640, 360)).unwrap();
    h.registry.set_active(id, true).unwrap();
    h.settle(20).await;

    h.send(id, SessionCommand::HideRequested);
    h.settle(20).await;

    let source = h.registry.get(id).unwrap();
    assert!(!source.active, "in-window hide is reported back");
    assert_eq!(source.status, SourceStatus::Paused);
    assert!(h.backend.binding(id).unwrap().paused);
}

#[tokio::test(start_paused = true)]
async fn minimized_native_source_pauses_and_resumes() {
    let mut h = Harness::new();
    let handle = h.backend.add_window("krita.exe", "Krita", PhysicalSize::new(800, 600));
    let id = h.registry.add_from_window(handle, PhysicalSize::new(800, 600), "krita.exe").unwrap();
    h.registry.set_active(id, true).unwrap();
    h.settle(20).await;
    assert_eq!(h.status(id), SourceStatus::Live);

    h.backend.set_minimized(handle, true);
    h.settle(1100).await;
    assert_eq!(h.status(id), SourceStatus::Minimized);
    assert!(h.backend.binding(id).unwrap().paused);
    assert!(h.factory.surface("source-1").unwrap().snapshot().notice.is_some());

    h.backend.set_minimized(handle, false);
    h.settle(1000).await;
    assert_eq!(h.status(id), SourceStatus::Live);
    assert!(!h.backend.binding(id).unwrap().paused);
    assert!(h.factory.surface("source-1").unwrap().snapshot().notice.is_none());
}

#[tokio::test(start_paused = true)]
async fn source_minimized_at_start_recovers_on_restore() {
    let mut h = Harness::new();
    let handle = h.backend.add_window("krita.exe", "Krita", PhysicalSize::new(800, 600));
    h.backend.set_minimized(handle, true);
    let id = h.registry.add_from_window(handle, PhysicalSize::new(800, 600), "krita.exe").unwrap();
    h.registry.set_active(id, true).unwrap();
    h.settle(20).await;
    assert_eq!(h.status(id), SourceStatus::Fault(SessionFault::TargetMinimized));
    assert!(h.backend.binding(id).is_none());

    h.backend.set_minimized(handle, false);
    h.settle(1100).await;
    assert_eq!(h.status(id), SourceStatus::Live);
}

#[tokio::test(start_paused = true)]
async fn closed_native_window_is_a_not_found_fault() {
    let mut h = Harness::new();
    let handle = h.backend.add_window("krita.exe", "Krita", PhysicalSize::new(800, 600));
    let id = h.registry.add_from_window(handle, PhysicalSize::new(800, 600), "krita.exe").unwrap();
    h.registry.set_active(id, true).unwrap();
    h.settle(20).await;

    h.backend.close_window(handle);
    h.settle(1100).await;
    assert_eq!(
        h.status(id),
        SourceStatus::Fault(SessionFault::TargetNotFound("krita.exe".into()))
    );
    assert!(h.backend.binding(id).is_none());
}

#[tokio::test(start_paused = true)]
async fn resized_native_window_relocks_full_window_crop() {
    let mut h = Harness::new();
    let handle = h.backend.add_window("krita.exe", "Krita", PhysicalSize::new(800, 600));
    let id = h.registry.add_from_window(handle, PhysicalSize::new(800, 600), "krita.exe").unwrap();
    h.registry.set_active(id, true).unwrap();
    h.settle(20).await;

    h.backend.set_window_size(handle, PhysicalSize::new(1000, 500));
    h.settle(1100).await;

    let source = h.registry.get(id).unwrap();
    assert_eq!(source.crop, PhysicalRect::new(0, 0, 1000, 500));
    assert_eq!(source.label, "krita.exe");
    assert_eq!(h.backend.binding(id).unwrap().rect, PhysicalRect::new(0, 0, 1000, 500));
    // Window keeps its width and takes the new 2:1 ratio
    let window = h.factory.surface("source-1").unwrap().snapshot().bounds.size();
    assert_eq!(window, PhysicalSize::new(800, 400));
}

#[tokio::test(start_paused = true)]
async fn secondary_crop_reaches_the_registry() {
    let mut h = Harness::new();
    let id = h.registry.add_from_region(PhysicalRect::new(0, 0, 800, 600)).unwrap();
    h.registry.set_active(id, true).unwrap();
    h.settle(20).await;

    h.send(id, SessionCommand::BeginCrop);
    h.send(id, SessionCommand::CropInput { input: press(100.0, 100.0) });
    h.send(id, SessionCommand::CropInput { input: drag_to(500.0, 400.0) });
    h.send(id, SessionCommand::CropInput { input: release(500.0, 400.0) });
    h.send(id, SessionCommand::CropInput { input: SelectionInput::Confirm });
    h.settle(20).await;

    let source = h.registry.get(id).unwrap();
    assert_eq!(source.crop, PhysicalRect::new(100, 100, 400, 300));
    assert_eq!(source.label, "Region 400x300");
    assert_eq!(h.backend.binding(id).unwrap().rect, PhysicalRect::new(100, 100, 400, 300));
    assert!(h.factory.surface("source-1-crop").unwrap().snapshot().destroyed);
}

#[tokio::test(start_paused = true)]
async fn one_native_window_cannot_be_bound_twice() {
    let mut h = Harness::new();
    let handle = h.backend.add_window("krita.exe", "Krita", PhysicalSize::new(800, 600));
    let first = h.registry.add_from_window(handle, PhysicalSize::new(800, 600), "krita.exe").unwrap();
    h.registry.set_active(first, true).unwrap();
    h.settle(20).await;

    // Outside the de-duplication window a second source is a new entry
    tokio::time::sleep(Duration::from_millis(600)).await;
    let second = h.registry.add_from_window(handle, PhysicalSize::new(800, 600), "krita.exe").unwrap();
    assert_ne!(first, second);
    h.registry.set_active(second, true).unwrap();
    h.settle(20).await;

    assert_eq!(h.status(first), SourceStatus::Live);
    assert!(matches!(
        h.status(second),
        SourceStatus::Fault(SessionFault::BackendBindFailure(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn full_window_crop_follows_resize_while_never_shown() {
    let mut h = Harness::new();
    let handle = h.backend.add_window("krita.exe", "Krita", PhysicalSize::new(800, 600));
    h.backend.set_minimized(handle, true);
    let id = h.registry.add_from_window(handle, PhysicalSize::new(800, 600), "krita.exe").unwrap();
    h.registry.set_active(id, true).unwrap();
    h.settle(20).await;
    assert_eq!(h.status(id), SourceStatus::Fault(SessionFault::TargetMinimized));

    h.backend.set_window_size(handle, PhysicalSize::new(1000, 500));
    h.backend.set_minimized(handle, false);
    h.settle(1100).await;

    assert_eq!(h.status(id), SourceStatus::Live);
    assert_eq!(h.registry.get(id).unwrap().crop, PhysicalRect::new(0, 0, 1000, 500));
    assert_eq!(h.backend.binding(id).unwrap().rect, PhysicalRect::new(0, 0, 1000, 500));
}

#[tokio::test(start_paused = true)]
async fn window_closed_while_minimized_at_start_is_not_found() {
    let mut h = Harness::new();
    let handle = h.backend.add_window("krita.exe", "Krita", PhysicalSize::new(800, 600));
    h.backend.set_minimized(handle, true);
    let id = h.registry.add_from_window(handle, PhysicalSize::new(800, 600), "krita.exe").unwrap();
    h.registry.set_active(id, true).unwrap();
    h.settle(20).await;
    assert_eq!(h.status(id), SourceStatus::Fault(SessionFault::TargetMinimized));

    h.backend.close_window(handle);
    h.settle(3100).await;
    assert_eq!(
        h.status(id),
        SourceStatus::Fault(SessionFault::TargetNotFound("krita.exe".into()))
    );
    assert!(h.backend.binding(id).is_none());
    assert_eq!(
        h.factory.surface("source-1").unwrap().snapshot().notice.as_deref(),
        Some("Window not found: krita.exe")
    );
}

#[tokio::test(start_paused = true)]
async fn crop_after_moving_to_a_scaled_monitor_uses_window_pixels() {
    let mut h = Harness::new();
    let id = h.registry.add_from_region(PhysicalRect::new(0, 0, 800, 600)).unwrap();
    h.registry.set_active(id, true).unwrap();
    h.settle(20).await;

    // 800x600 physical at 1.25 is 640x480 logical
    h.factory
        .surface("source-1")
        .unwrap()
        .move_to(PhysicalRect::new(1920, 0, 800, 600), ScaleFactor::new(1.25).unwrap());

    h.send(id, SessionCommand::BeginCrop);
    h.send(id, SessionCommand::CropInput { input: press(64.0, 48.0) });
    h.send(id, SessionCommand::CropInput { input: drag_to(384.0, 288.0) });
    h.send(id, SessionCommand::CropInput { input: release(384.0, 288.0) });
    h.send(id, SessionCommand::CropInput { input: SelectionInput::Confirm });
    h.settle(20).await;

    assert_eq!(h.registry.get(id).unwrap().crop, PhysicalRect::new(80, 60, 400, 300));
    assert_eq!(h.backend.binding(id).unwrap().rect, PhysicalRect::new(80, 60, 400, 300));
}

#[tokio::test(start_paused = true)]
async fn pin_and_click_through_commands_reach_the_window() {
    let mut h = Harness::new();
    let id = h.registry.add_from_region(PhysicalRect::new(0, 0, 640, 360)).unwrap();
    h.registry.set_active(id, true).unwrap();
    h.settle(20).await;

    h.send(id, SessionCommand::SetPinned { pinned: true });
    h.send(id, SessionCommand::SetClickThrough { enabled: true });
    h.settle(20).await;
    let window = h.factory.surface("source-1").unwrap().snapshot();
    assert!(window.pinned);
    assert!(window.click_through);

    h.send(id, SessionCommand::SetClickThrough { enabled: false });
    h.settle(20).await;
    let window = h.factory.surface("source-1").unwrap().snapshot();
    assert!(window.pinned);
    assert!(!window.click_through);
    assert_eq!(h.status(id), SourceStatus::Live);
}

#[tokio::test(start_paused = true)]
async fn lagged_listener_converges_after_resync() {
    let mut h = Harness::with_bus(EventBus::with_capacity(1));
    let first = h.registry.add_from_region(PhysicalRect::new(0, 0, 640, 360)).unwrap();
    let second = h.registry.add_from_region(PhysicalRect::new(700, 0, 640, 360)).unwrap();
    h.registry.set_active(first, true).unwrap();
    h.registry.set_active(second, true).unwrap();
    let missed = h.settle(20).await;
    assert!(missed > 0);

    h.registry.resync();
    assert_eq!(h.status(first), SourceStatus::Live);
    assert_eq!(h.status(second), SourceStatus::Live);

    // Nothing left to correct
    assert_eq!(h.registry.resync(), 0);
}

#[tokio::test(start_paused = true)]
async fn removed_sources_are_torn_down_once_awaited() {
    let mut h = Harness::new();
    let first = h.registry.add_from_region(PhysicalRect::new(0, 0, 640, 360)).unwrap();
    let second = h.registry.add_from_region(PhysicalRect::new(700, 0, 640, 360)).unwrap();
    h.registry.set_active(first, true).unwrap();
    h.registry.set_active(second, true).unwrap();
    h.settle(20).await;
    assert_eq!(h.backend.binding_count(), 2);

    assert!(h.registry.remove(first));
    assert!(h.registry.remove(second));
    h.registry.host_mut().wait_closed().await;

    assert_eq!(h.backend.binding_count(), 0);
    assert!(h.factory.surface("source-1").unwrap().snapshot().destroyed);
    assert!(h.factory.surface("source-2").unwrap().snapshot().destroyed);
}
