// selection.rs - Region Selection Session
//
// Drives a transparent selection surface: drag to draw a rectangle, drag
// inside it to move it, then confirm with a double activation or Enter.
// Positions arrive in the surface's logical space. The result is converted
// to physical pixels with the scale of the monitor under the rectangle.
//
//   Idle -> Selecting -> Idle (rect kept or previous restored)
//   Idle -> Moving -> Idle
//   any  -> Resolved | Cancelled

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::constants::selection as defaults;
use crate::error::CaptureResult;
use crate::events::Event;
use crate::geometry::{
    to_physical, LogicalPoint, LogicalRect, LogicalSize, PhysicalPoint, PhysicalRect, ScaleFactor,
};
use crate::platform::{scale_at, CaptureBackend, Surface, SurfaceFactory, SurfaceSpec};

/// What the selected region will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPurpose {
    /// New live capture source
    Monitor,
    /// One-shot reference image
    Screenshot,
    /// Secondary crop inside a session window; stays local to that session
    Crop,
}

/// A confirmed selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionSelection {
    /// Virtual desktop pixels for monitor scope, window pixels for window scope
    pub rect: PhysicalRect,
    pub logical_rect: LogicalRect,
    pub purpose: SelectionPurpose,
}

impl RegionSelection {
    /// Bus event for this selection; crops never leave their session
    pub fn to_event(&self) -> Option<Event> {
        match self.purpose {
            SelectionPurpose::Monitor | SelectionPurpose::Screenshot => Some(Event::RegionSelected(*self)),
            SelectionPurpose::Crop => None,
        }
    }
}

/// Where the selection surface lives
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionScope {
    /// Covers one monitor; positions are monitor-local logical points
    Monitor { bounds: PhysicalRect },
    /// Covers a session window; positions are window-local logical points
    Window { size: LogicalSize, scale: ScaleFactor },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionInput {
    PointerDown { pos: LogicalPoint, button: PointerButton },
    PointerMove { pos: LogicalPoint },
    PointerUp { pos: LogicalPoint, button: PointerButton },
    /// Enter
    Confirm,
    /// Escape
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    Idle,
    Selecting,
    Moving,
    Resolved,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionOutcome {
    Pending,
    Resolved(RegionSelection),
    Cancelled,
}

/// Gesture thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionTuning {
    pub min_size: f64,
    pub double_activation: Duration,
    pub click_slop: f64,
}

impl Default for SelectionTuning {
    fn default() -> Self {
        Self {
            min_size: defaults::MIN_SIZE,
            double_activation: Duration::from_millis(defaults::DOUBLE_ACTIVATION_MS),
            click_slop: defaults::CLICK_SLOP,
        }
    }
}

pub struct SelectionSession {
    backend: Arc<dyn CaptureBackend>,
    surface: Box<dyn Surface>,
    scope: SelectionScope,
    /// Scale of the selectable area, resolved once on open
    scale: ScaleFactor,
    purpose: SelectionPurpose,
    tuning: SelectionTuning,
    state: SelectionState,
    rect: Option<LogicalRect>,
    /// Rect to restore if the current drag is discarded
    previous: Option<LogicalRect>,
    anchor: LogicalPoint,
    /// Rect origin when a move started
    move_origin: LogicalPoint,
    dragged: bool,
    last_click: Option<Instant>,
    outcome: SelectionOutcome,
}

impl SelectionSession {
    /// Take over `surface`, size it to the scope and show it
    pub fn open(
        backend: Arc<dyn CaptureBackend>,
        mut surface: Box<dyn Surface>,
        scope: SelectionScope,
        purpose: SelectionPurpose,
        tuning: SelectionTuning,
    ) -> Self {
        if let SelectionScope::Monitor { bounds } = scope {
            surface.set_outer_bounds(bounds);
        }
        surface.show();
        let scale = match scope {
            SelectionScope::Monitor { bounds } => scale_at(backend.as_ref(), bounds.origin()),
            SelectionScope::Window { scale, .. } => scale,
        };
        info!("Region selection opened ({:?})", purpose);

        Self {
            backend,
            surface,
            scope,
            scale,
            purpose,
            tuning,
            state: SelectionState::Idle,
            rect: None,
            previous: None,
            anchor: LogicalPoint::default(),
            move_origin: LogicalPoint::default(),
            dragged: false,
            last_click: None,
            outcome: SelectionOutcome::Pending,
        }
    }

    /// Open a full-monitor selector on the monitor containing `point`
    pub fn for_monitor_at(
        backend: Arc<dyn CaptureBackend>,
        factory: &dyn SurfaceFactory,
        point: PhysicalPoint,
        purpose: SelectionPurpose,
        tuning: SelectionTuning,
    ) -> CaptureResult<Self> {
        let bounds = backend.query_monitor_bounds(point)?;
        let surface = factory.create(SurfaceSpec {
            label: "selector".into(),
            bounds,
            visible: false,
        })?;
        Ok(Self::open(backend, surface, SelectionScope::Monitor { bounds }, purpose, tuning))
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    /// Current rectangle in surface-local logical coordinates
    pub fn rect(&self) -> Option<LogicalRect> {
        self.rect
    }

    pub fn outcome(&self) -> SelectionOutcome {
        self.outcome
    }

    fn is_finished(&self) -> bool {
        matches!(self.state, SelectionState::Resolved | SelectionState::Cancelled)
    }

    /// Logical extent of the selectable area
    fn area(&self) -> LogicalSize {
        match self.scope {
            SelectionScope::Monitor { bounds } => bounds.size().to_logical(self.scale),
            SelectionScope::Window { size, .. } => size,
        }
    }

    pub fn handle(&mut self, input: SelectionInput, now: Instant) -> SelectionOutcome {
        if self.is_finished() {
            return self.outcome;
        }

        match input {
            SelectionInput::PointerDown { pos, button: PointerButton::Primary } => self.pointer_down(pos),
            SelectionInput::PointerDown { button: PointerButton::Secondary, .. } => {}
            SelectionInput::PointerMove { pos } => self.pointer_move(pos),
            SelectionInput::PointerUp { button: PointerButton::Primary, .. } => self.pointer_up(now),
            SelectionInput::PointerUp { button: PointerButton::Secondary, .. } | SelectionInput::Cancel => {
                self.cancel()
            }
            SelectionInput::Confirm => {
                if self.rect.is_some() && !matches!(self.state, SelectionState::Selecting) {
                    self.resolve();
                }
            }
        }

        self.outcome
    }

    fn pointer_down(&mut self, pos: LogicalPoint) {
        self.anchor = pos;
        self.dragged = false;
        match self.rect {
            Some(rect) if rect.contains(pos) => {
                self.move_origin = rect.origin();
                self.state = SelectionState::Moving;
            }
            _ => {
                self.previous = self.rect.take();
                self.last_click = None;
                self.state = SelectionState::Selecting;
            }
        }
    }

    fn pointer_move(&mut self, pos: LogicalPoint) {
        if !self.dragged && pos.distance(self.anchor) <= self.tuning.click_slop {
            return;
        }
        let area = self.area();
        match self.state {
            SelectionState::Selecting => {
                self.dragged = true;
                self.rect = Some(LogicalRect::from_corners(self.anchor, pos).clip_to(area));
            }
            SelectionState::Moving => {
                self.dragged = true;
                if let Some(rect) = self.rect {
                    let moved = LogicalRect {
                        x: self.move_origin.x + pos.x - self.anchor.x,
                        y: self.move_origin.y + pos.y - self.anchor.y,
                        ..rect
                    };
                    self.rect = Some(moved.keep_inside(area));
                }
            }
            _ => {}
        }
    }

    fn pointer_up(&mut self, now: Instant) {
        match self.state {
            SelectionState::Selecting => {
                self.state = SelectionState::Idle;
                if !self.dragged {
                    match self.previous.take() {
                        Some(previous) => self.rect = Some(previous),
                        None => self.cancel(),
                    }
                    return;
                }
                let valid = self.rect.filter(|r| r.is_at_least(self.tuning.min_size));
                match valid {
                    Some(rect) => {
                        debug!("Selection drawn: {:?}", rect);
                        self.previous = None;
                    }
                    None => {
                        debug!("Selection below {}px discarded", self.tuning.min_size);
                        self.rect = self.previous.take();
                    }
                }
            }
            SelectionState::Moving => {
                self.state = SelectionState::Idle;
                if self.dragged {
                    self.last_click = None;
                    return;
                }
                let double = self
                    .last_click
                    .is_some_and(|last| now.saturating_duration_since(last) <= self.tuning.double_activation);
                if double {
                    self.resolve();
                } else {
                    self.last_click = Some(now);
                }
            }
            _ => {}
        }
    }

    /// Close without a result unless already finished
    pub fn abort(&mut self) {
        if !self.is_finished() {
            self.cancel();
        }
    }

    fn cancel(&mut self) {
        self.surface.hide();
        self.surface.destroy();
        self.rect = None;
        self.state = SelectionState::Cancelled;
        self.outcome = SelectionOutcome::Cancelled;
        info!("Region selection cancelled");
    }

    fn resolve(&mut self) {
        let Some(local) = self.rect else {
            return;
        };

        // Selector must be hidden before any capture of the area
        self.surface.hide();

        let selection = match self.scope {
            SelectionScope::Monitor { bounds } => {
                let guess = self.scale;
                let under = PhysicalPoint::new(
                    bounds.x + local.origin().to_physical(guess).x,
                    bounds.y + local.origin().to_physical(guess).y,
                );
                let scale = scale_at(self.backend.as_ref(), under);
                let phys = to_physical(local, scale);
                RegionSelection {
                    rect: PhysicalRect::new(bounds.x + phys.x, bounds.y + phys.y, phys.width, phys.height),
                    logical_rect: local.translate(bounds.x as f64 / scale.get(), bounds.y as f64 / scale.get()),
                    purpose: self.purpose,
                }
            }
            SelectionScope::Window { scale, .. } => RegionSelection {
                rect: to_physical(local, scale),
                logical_rect: local,
                purpose: self.purpose,
            },
        };

        self.surface.destroy();
        self.state = SelectionState::Resolved;
        self.outcome = SelectionOutcome::Resolved(selection);
        info!("Region selected: {:?} ({:?})", selection.rect, selection.purpose);
    }
}
