// magnifier.rs - Snapshot Magnifier
//
// One-shot color picker. The monitor under the cursor is captured once into
// a frozen Snapshot; every frame and the final pick read from that same
// bitmap with the scale captured alongside it, so the zoom view cannot
// drift from the picked pixel.
//
// Canvas layout for side S and zoom Z:
//   sample = ceil(S / Z)            source pixels per axis
//   draw   = sample * Z             drawn size, may exceed S
//   offset = (S - draw) / 2         centering offset, may be negative

use std::sync::Arc;
use std::time::Duration;

use image::{imageops, Rgba, RgbaImage};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use crate::constants::magnifier as defaults;
use crate::error::{CaptureError, CaptureResult};
use crate::events::{Event, EventBus};
use crate::geometry::{LogicalPoint, PhysicalPoint, PhysicalRect, ScaleFactor};
use crate::platform::{CaptureBackend, Surface, SurfaceFactory, SurfaceSpec};

/// A frozen monitor bitmap
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub image: RgbaImage,
    /// Top-left of the monitor in virtual desktop pixels
    pub origin: PhysicalPoint,
    /// Scale of the monitor at capture time
    pub scale: ScaleFactor,
}

impl Snapshot {
    pub fn new(image: RgbaImage, origin: PhysicalPoint, scale: ScaleFactor) -> Self {
        Self { image, origin, scale }
    }

    /// Desktop-space bounds of the bitmap
    pub fn bounds(&self) -> PhysicalRect {
        PhysicalRect::new(self.origin.x, self.origin.y, self.image.width(), self.image.height())
    }

    /// Pixel at bitmap-local coordinates
    pub fn pixel(&self, x: i64, y: i64) -> Option<Rgba<u8>> {
        if x < 0 || y < 0 || x >= self.image.width() as i64 || y >= self.image.height() as i64 {
            return None;
        }
        Some(*self.image.get_pixel(x as u32, y as u32))
    }

    /// Copy of `rect` (desktop pixels), clamped to the bitmap. The rect must
    /// start on this monitor.
    pub fn crop(&self, rect: PhysicalRect) -> CaptureResult<RgbaImage> {
        let bounds = self.bounds();
        if !bounds.contains(rect.origin()) {
            return Err(CaptureError::InvalidGeometry(format!(
                "{:?} starts outside monitor {:?}",
                rect, bounds
            )));
        }
        let area = rect
            .intersect(&bounds)
            .ok_or_else(|| CaptureError::InvalidGeometry(format!("{:?} is empty", rect)))?;
        let x = (area.x - bounds.x) as u32;
        let y = (area.y - bounds.y) as u32;
        Ok(imageops::crop_imm(&self.image, x, y, area.width, area.height).to_image())
    }
}

/// A picked sRGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickedColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl PickedColor {
    pub fn hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl From<Rgba<u8>> for PickedColor {
    fn from(px: Rgba<u8>) -> Self {
        Self { r: px[0], g: px[1], b: px[2] }
    }
}

/// Canvas geometry for one side/zoom pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagnifierLayout {
    pub side: u32,
    pub zoom: u32,
    pub sample: u32,
    pub draw: u32,
    pub offset: i64,
}

impl MagnifierLayout {
    pub fn new(side: u32, zoom: u32) -> CaptureResult<Self> {
        if side == 0 || zoom == 0 || zoom > defaults::MAX_ZOOM {
            return Err(CaptureError::InvalidGeometry(format!(
                "magnifier side {} zoom {} out of range",
                side, zoom
            )));
        }
        let sample = side.div_ceil(zoom);
        let draw = sample * zoom;
        Ok(Self {
            side,
            zoom,
            sample,
            draw,
            offset: (side as i64 - draw as i64) / 2,
        })
    }

    /// Top-left source pixel of the sample square centered on `center`
    pub fn sample_origin(&self, center: PhysicalPoint) -> (i64, i64) {
        let half = (self.sample / 2) as i64;
        (center.x as i64 - half, center.y as i64 - half)
    }

    /// Source pixel shown at canvas position (cx, cy)
    pub fn source_at(&self, center: PhysicalPoint, cx: u32, cy: u32) -> (i64, i64) {
        let (x0, y0) = self.sample_origin(center);
        let zoom = self.zoom as i64;
        (
            x0 + (cx as i64 - self.offset).div_euclid(zoom),
            y0 + (cy as i64 - self.offset).div_euclid(zoom),
        )
    }

    /// Source pixel under the crosshair (canvas center)
    pub fn crosshair_source(&self, center: PhysicalPoint) -> (i64, i64) {
        self.source_at(center, self.side / 2, self.side / 2)
    }

    /// Nearest-neighbour zoom of the sample square; off-bitmap pixels are transparent
    pub fn render(&self, snapshot: &Snapshot, center: PhysicalPoint) -> RgbaImage {
        RgbaImage::from_fn(self.side, self.side, |cx, cy| {
            let (sx, sy) = self.source_at(center, cx, cy);
            snapshot.pixel(sx, sy).unwrap_or(Rgba([0, 0, 0, 0]))
        })
    }
}

impl Default for MagnifierLayout {
    fn default() -> Self {
        let sample = defaults::DEFAULT_SIDE.div_ceil(defaults::DEFAULT_ZOOM);
        let draw = sample * defaults::DEFAULT_ZOOM;
        Self {
            side: defaults::DEFAULT_SIDE,
            zoom: defaults::DEFAULT_ZOOM,
            sample,
            draw,
            offset: (defaults::DEFAULT_SIDE as i64 - draw as i64) / 2,
        }
    }
}

/// Input to a running magnifier; positions are monitor-local logical
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MagnifierInput {
    PointerMoved(LogicalPoint),
    Confirm(Option<LogicalPoint>),
    Cancel,
}

pub struct MagnifierSession {
    snapshot: Snapshot,
    layout: MagnifierLayout,
    surface: Box<dyn Surface>,
    bus: EventBus,
    /// Bitmap-local physical cursor
    cursor: Option<PhysicalPoint>,
    frame_scheduled: bool,
    closed: bool,
}

impl MagnifierSession {
    /// Capture the monitor under `cursor` and show the picker surface over it
    pub fn open(
        backend: Arc<dyn CaptureBackend>,
        factory: &dyn SurfaceFactory,
        bus: EventBus,
        cursor: PhysicalPoint,
        layout: MagnifierLayout,
    ) -> CaptureResult<Self> {
        let snapshot = backend.capture_monitor_snapshot(cursor)?;
        let bounds = snapshot.bounds();
        let mut surface = factory.create(SurfaceSpec {
            label: "magnifier".into(),
            bounds,
            visible: false,
        })?;
        surface.set_outer_bounds(bounds);
        surface.show();
        info!("Magnifier opened on {:?} at scale {}", bounds, snapshot.scale.get());

        let local = PhysicalPoint::new(cursor.x - bounds.x, cursor.y - bounds.y);
        Ok(Self {
            snapshot,
            layout,
            surface,
            bus,
            cursor: Some(local),
            frame_scheduled: true,
            closed: false,
        })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn layout(&self) -> MagnifierLayout {
        self.layout
    }

    pub fn cursor(&self) -> Option<PhysicalPoint> {
        self.cursor
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn to_bitmap(&self, pos: LogicalPoint) -> PhysicalPoint {
        pos.to_physical(self.snapshot.scale)
    }

    /// Record a pointer position. Dropped (returns false) while a frame is
    /// already scheduled.
    pub fn pointer_moved(&mut self, pos: LogicalPoint) -> bool {
        if self.closed || self.frame_scheduled {
            return false;
        }
        self.cursor = Some(self.to_bitmap(pos));
        self.frame_scheduled = true;
        true
    }

    /// Render the scheduled frame, if any
    pub fn render_frame(&mut self) -> Option<RgbaImage> {
        if self.closed || !self.frame_scheduled {
            return None;
        }
        self.frame_scheduled = false;
        let center = self.cursor?;
        Some(self.layout.render(&self.snapshot, center))
    }

    /// Color under the crosshair for the current cursor
    pub fn color_under_cursor(&self) -> Option<PickedColor> {
        let center = self.cursor?;
        let (x, y) = self.layout.crosshair_source(center);
        self.snapshot.pixel(x, y).map(PickedColor::from)
    }

    /// Pick at `pos` (or the last cursor), publish the result and close
    pub fn confirm(&mut self, pos: Option<LogicalPoint>) -> Option<PickedColor> {
        if self.closed {
            return None;
        }
        if let Some(pos) = pos {
            self.cursor = Some(self.to_bitmap(pos));
        }
        let color = self.color_under_cursor();
        match color {
            Some(c) => info!("Picked {}", c.hex()),
            None => warn!("Pick outside the snapshot"),
        }
        self.bus.publish(Event::PickerResult { color });
        self.close();
        color
    }

    pub fn cancel(&mut self) {
        if self.closed {
            return;
        }
        debug!("Magnifier cancelled");
        self.bus.publish(Event::PickerResult { color: None });
        self.close();
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.surface.hide();
        self.surface.destroy();
        self.bus.publish(Event::PickerClosed);
    }

    /// Apply one input. Returns the result once the picker has closed.
    pub fn handle(&mut self, input: MagnifierInput) -> Option<Option<PickedColor>> {
        match input {
            MagnifierInput::PointerMoved(pos) => {
                self.pointer_moved(pos);
                None
            }
            MagnifierInput::Confirm(pos) => Some(self.confirm(pos)),
            MagnifierInput::Cancel => {
                self.cancel();
                Some(None)
            }
        }
    }

    /// Run until confirmed or cancelled. Frames render on `frame` ticks,
    /// each handed to `present`. A closed input channel cancels.
    pub async fn drive(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<MagnifierInput>,
        frame: Duration,
        mut present: impl FnMut(&RgbaImage),
    ) -> Option<PickedColor> {
        let mut ticks = interval(frame);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = ticks.tick() => {
                    if let Some(image) = self.render_frame() {
                        present(&image);
                    }
                }
                input = inputs.recv() => match input {
                    Some(input) => {
                        if let Some(result) = self.handle(input) {
                            return result;
                        }
                    }
                    None => {
                        self.cancel();
                        return None;
                    }
                },
            }
        }
    }
}

impl Drop for MagnifierSession {
    fn drop(&mut self) {
        self.close();
    }
}
