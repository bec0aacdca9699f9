// geometry.rs - Coordinate Transform Engine
//
// Logical (UI, DPI-independent) and physical (device pixel) geometry are
// separate types here. The only way across is an explicit ScaleFactor,
// which must be the scale of the monitor the geometry lives on.
//
// Rounding policy:
// - physical values are floored before they reach the capture backend,
//   so adjacent regions never open a 1px gap
// - logical window sizes derived from physical sizes are ceiling-divided,
//   so a window never under-allocates space for its content

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, CaptureResult};

/// Absorbs floating point noise such as 299.99999999 before floor/ceil
const EPSILON: f64 = 1e-6;

fn floor_px(value: f64) -> f64 {
    (value + EPSILON).floor()
}

fn ceil_px(value: f64) -> f64 {
    (value - EPSILON).ceil()
}

/// Per-monitor DPI scale (physical px per logical px)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct ScaleFactor(f64);

impl ScaleFactor {
    pub const IDENTITY: ScaleFactor = ScaleFactor(1.0);

    pub fn new(value: f64) -> CaptureResult<Self> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(CaptureError::InvalidGeometry(format!("invalid scale factor {}", value)))
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl TryFrom<f64> for ScaleFactor {
    type Error = CaptureError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        ScaleFactor::new(value)
    }
}

impl From<ScaleFactor> for f64 {
    fn from(scale: ScaleFactor) -> Self {
        scale.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LogicalPoint {
    pub x: f64,
    pub y: f64,
}

impl LogicalPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn to_physical(self, scale: ScaleFactor) -> PhysicalPoint {
        PhysicalPoint {
            x: floor_px(self.x * scale.get()) as i32,
            y: floor_px(self.y * scale.get()) as i32,
        }
    }

    pub fn distance(self, other: LogicalPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PhysicalPoint {
    pub x: i32,
    pub y: i32,
}

impl PhysicalPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn to_logical(self, scale: ScaleFactor) -> LogicalPoint {
        LogicalPoint {
            x: self.x as f64 / scale.get(),
            y: self.y as f64 / scale.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LogicalSize {
    pub width: f64,
    pub height: f64,
}

impl LogicalSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Physical size on a monitor with the given scale (floored)
    pub fn to_physical(self, scale: ScaleFactor) -> PhysicalSize {
        PhysicalSize {
            width: floor_px(self.width * scale.get()).max(0.0) as u32,
            height: floor_px(self.height * scale.get()).max(0.0) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PhysicalSize {
    pub width: u32,
    pub height: u32,
}

impl PhysicalSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// width / height, or None for a degenerate size
    pub fn ratio(&self) -> Option<f64> {
        if self.is_empty() {
            None
        } else {
            Some(self.width as f64 / self.height as f64)
        }
    }

    /// Exact logical size of this physical size
    pub fn to_logical(self, scale: ScaleFactor) -> LogicalSize {
        LogicalSize {
            width: self.width as f64 / scale.get(),
            height: self.height as f64 / scale.get(),
        }
    }
}

/// Rectangle in UI space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LogicalRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl LogicalRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Normalized rectangle spanned by two corners in any order
    pub fn from_corners(a: LogicalPoint, b: LogicalPoint) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }

    pub fn origin(&self) -> LogicalPoint {
        LogicalPoint::new(self.x, self.y)
    }

    pub fn size(&self) -> LogicalSize {
        LogicalSize::new(self.width, self.height)
    }

    pub fn contains(&self, point: LogicalPoint) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self { x: self.x + dx, y: self.y + dy, ..*self }
    }

    /// Clip to the box (0, 0, bounds)
    pub fn clip_to(&self, bounds: LogicalSize) -> Self {
        let left = self.x.clamp(0.0, bounds.width);
        let top = self.y.clamp(0.0, bounds.height);
        let right = (self.x + self.width).clamp(0.0, bounds.width);
        let bottom = (self.y + self.height).clamp(0.0, bounds.height);
        Self::new(left, top, (right - left).max(0.0), (bottom - top).max(0.0))
    }

    /// Move (without resizing) so the rect lies inside (0, 0, bounds)
    pub fn keep_inside(&self, bounds: LogicalSize) -> Self {
        let x = self.x.min(bounds.width - self.width).max(0.0);
        let y = self.y.min(bounds.height - self.height).max(0.0);
        Self { x, y, ..*self }
    }

    pub fn is_at_least(&self, min_edge: f64) -> bool {
        self.width >= min_edge && self.height >= min_edge
    }
}

/// Rectangle in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PhysicalRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PhysicalRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_origin_size(origin: PhysicalPoint, size: PhysicalSize) -> Self {
        Self::new(origin.x, origin.y, size.width, size.height)
    }

    pub fn origin(&self) -> PhysicalPoint {
        PhysicalPoint::new(self.x, self.y)
    }

    pub fn size(&self) -> PhysicalSize {
        PhysicalSize::new(self.width, self.height)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn is_empty(&self) -> bool {
        self.size().is_empty()
    }

    pub fn contains(&self, point: PhysicalPoint) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    /// Overlap with another rect, None when they do not intersect
    pub fn intersect(&self, other: &PhysicalRect) -> Option<PhysicalRect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(PhysicalRect::new(left, top, (right - left) as u32, (bottom - top) as u32))
    }
}

/// Logical rect -> physical rect on a monitor with the given scale (floored)
pub fn to_physical(rect: LogicalRect, scale: ScaleFactor) -> PhysicalRect {
    let s = scale.get();
    PhysicalRect {
        x: floor_px(rect.x * s) as i32,
        y: floor_px(rect.y * s) as i32,
        width: floor_px(rect.width * s).max(0.0) as u32,
        height: floor_px(rect.height * s).max(0.0) as u32,
    }
}

/// Physical rect -> logical rect (exact, no rounding)
pub fn to_logical(rect: PhysicalRect, scale: ScaleFactor) -> LogicalRect {
    let s = scale.get();
    LogicalRect {
        x: rect.x as f64 / s,
        y: rect.y as f64 / s,
        width: rect.width as f64 / s,
        height: rect.height as f64 / s,
    }
}

/// Whole-pixel logical window size able to hold `size` physical pixels
pub fn window_size_for(size: PhysicalSize, scale: ScaleFactor) -> LogicalSize {
    let s = scale.get();
    LogicalSize {
        width: ceil_px(size.width as f64 / s).max(0.0),
        height: ceil_px(size.height as f64 / s).max(0.0),
    }
}

/// Crop rect for a selection made inside a window that displays an
/// already-cropped capture.
///
/// The selection is in the window's logical space. It is scaled by
/// `parent_size / window_size` per axis, so the result is correct even after
/// the window has been resized away from the source's native resolution, then
/// offset by the parent crop origin and clipped to the parent crop.
pub fn compose_crop(
    parent_origin: PhysicalPoint,
    parent_size: PhysicalSize,
    window_size: LogicalSize,
    selection: LogicalRect,
) -> CaptureResult<PhysicalRect> {
    if window_size.is_empty() {
        return Err(CaptureError::InvalidGeometry("crop window has no area".into()));
    }
    if parent_size.is_empty() {
        return Err(CaptureError::InvalidGeometry("parent crop has no area".into()));
    }

    let local = selection.clip_to(window_size);
    let sx = parent_size.width as f64 / window_size.width;
    let sy = parent_size.height as f64 / window_size.height;

    let dx = (floor_px(local.x * sx) as u32).min(parent_size.width);
    let dy = (floor_px(local.y * sy) as u32).min(parent_size.height);
    let width = (floor_px(local.width * sx) as u32).min(parent_size.width - dx);
    let height = (floor_px(local.height * sy) as u32).min(parent_size.height - dy);

    if width == 0 || height == 0 {
        return Err(CaptureError::InvalidGeometry(format!(
            "selection {:?} maps to an empty crop",
            selection
        )));
    }

    Ok(PhysicalRect::new(
        parent_origin.x + dx as i32,
        parent_origin.y + dy as i32,
        width,
        height,
    ))
}

/// A monitor in virtual desktop space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorInfo {
    /// Physical bounds in virtual desktop coordinates
    pub bounds: PhysicalRect,
    pub scale: ScaleFactor,
}

impl MonitorInfo {
    pub fn new(bounds: PhysicalRect, scale: ScaleFactor) -> Self {
        Self { bounds, scale }
    }

    /// Logical extent of the monitor
    pub fn logical_size(&self) -> LogicalSize {
        self.bounds.size().to_logical(self.scale)
    }

    /// Monitor-local logical point -> virtual desktop physical point
    pub fn local_to_physical(&self, point: LogicalPoint) -> PhysicalPoint {
        let local = point.to_physical(self.scale);
        PhysicalPoint::new(self.bounds.x + local.x, self.bounds.y + local.y)
    }
}

/// Monitor containing `point`
pub fn monitor_at(monitors: &[MonitorInfo], point: PhysicalPoint) -> Option<&MonitorInfo> {
    monitors.iter().find(|m| m.bounds.contains(point))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(v: f64) -> ScaleFactor {
        ScaleFactor::new(v).unwrap()
    }

    #[test]
    fn rejects_invalid_scales() {
        assert!(ScaleFactor::new(0.0).is_err());
        assert!(ScaleFactor::new(-1.25).is_err());
        assert!(ScaleFactor::new(f64::NAN).is_err());
        assert!(serde_json::from_str::<ScaleFactor>("0").is_err());
        assert_eq!(serde_json::from_str::<ScaleFactor>("1.5").unwrap(), scale(1.5));
    }

    #[test]
    fn to_physical_floors() {
        let rect = LogicalRect::new(10.3, 20.9, 300.0, 200.0);
        let phys = to_physical(rect, scale(1.25));
        assert_eq!(phys, PhysicalRect::new(12, 26, 375, 250));
    }

    #[test]
    fn to_physical_floors_negative_origins() {
        // Monitor left of the primary one
        let rect = LogicalRect::new(-100.5, 0.0, 10.0, 10.0);
        let phys = to_physical(rect, scale(1.0));
        assert_eq!(phys.x, -101);
    }

    #[test]
    fn round_trip_within_one_pixel() {
        let scales = [1.0, 1.25, 1.5, 1.75, 2.0, 2.25, 2.5, 3.0, 3.5];
        let rects = [
            PhysicalRect::new(0, 0, 1, 1),
            PhysicalRect::new(17, 33, 375, 250),
            PhysicalRect::new(-1920, 0, 1920, 1080),
            PhysicalRect::new(2561, 1441, 1277, 719),
            PhysicalRect::new(-3, -7, 3839, 2159),
        ];
        for &s in &scales {
            for rect in &rects {
                let back = to_physical(to_logical(*rect, scale(s)), scale(s));
                assert!((back.x - rect.x).abs() <= 1, "x {:?} @ {}", rect, s);
                assert!((back.y - rect.y).abs() <= 1, "y {:?} @ {}", rect, s);
                assert!((back.width as i64 - rect.width as i64).abs() <= 1, "w {:?} @ {}", rect, s);
                assert!((back.height as i64 - rect.height as i64).abs() <= 1, "h {:?} @ {}", rect, s);
            }
        }
    }

    #[test]
    fn window_size_never_under_allocates() {
        let size = PhysicalSize::new(376, 251);
        let logical = window_size_for(size, scale(1.25));
        assert_eq!(logical, LogicalSize::new(301.0, 201.0));
        assert!(logical.width * 1.25 >= 376.0);

        // Exact division stays exact
        let exact = window_size_for(PhysicalSize::new(375, 250), scale(1.25));
        assert_eq!(exact, LogicalSize::new(300.0, 200.0));
    }

    #[test]
    fn compose_crop_scales_by_parent_over_window() {
        // Parent crop shown in a window half its native size
        let crop = compose_crop(
            PhysicalPoint::new(100, 50),
            PhysicalSize::new(800, 600),
            LogicalSize::new(400.0, 300.0),
            LogicalRect::new(40.0, 30.0, 200.0, 150.0),
        )
        .unwrap();
        assert_eq!(crop, PhysicalRect::new(180, 110, 400, 300));
    }

    #[test]
    fn compose_crop_after_window_resize() {
        // Same source, window stretched to 1600x1200
        let crop = compose_crop(
            PhysicalPoint::new(100, 50),
            PhysicalSize::new(800, 600),
            LogicalSize::new(1600.0, 1200.0),
            LogicalRect::new(160.0, 120.0, 800.0, 600.0),
        )
        .unwrap();
        assert_eq!(crop, PhysicalRect::new(180, 110, 400, 300));
    }

    #[test]
    fn compose_crop_clips_to_parent() {
        let crop = compose_crop(
            PhysicalPoint::new(0, 0),
            PhysicalSize::new(100, 100),
            LogicalSize::new(100.0, 100.0),
            LogicalRect::new(80.0, 80.0, 50.0, 50.0),
        )
        .unwrap();
        assert_eq!(crop, PhysicalRect::new(80, 80, 20, 20));
    }

    #[test]
    fn compose_crop_rejects_degenerate_input() {
        let origin = PhysicalPoint::new(0, 0);
        let parent = PhysicalSize::new(100, 100);
        assert!(compose_crop(origin, parent, LogicalSize::new(0.0, 10.0), LogicalRect::new(0.0, 0.0, 5.0, 5.0)).is_err());
        assert!(compose_crop(origin, parent, LogicalSize::new(100.0, 100.0), LogicalRect::new(0.0, 0.0, 0.2, 5.0)).is_err());
    }

    #[test]
    fn compose_crop_chain_is_associative() {
        // crop of a crop of a crop, each shown in a differently sized window
        let base = PhysicalRect::new(200, 100, 1600, 900);
        let chain = [
            (LogicalSize::new(800.0, 450.0), LogicalRect::new(100.0, 50.0, 400.0, 300.0)),
            (LogicalSize::new(400.0, 300.0), LogicalRect::new(50.0, 25.0, 200.0, 150.0)),
            (LogicalSize::new(1000.0, 750.0), LogicalRect::new(250.0, 125.0, 500.0, 375.0)),
        ];

        let mut step = base;
        for (window, selection) in chain.iter() {
            step = compose_crop(step.origin(), step.size(), *window, *selection).unwrap();
        }

        // Direct composition in exact arithmetic
        let (mut x, mut y, mut w, mut h) = (base.x as f64, base.y as f64, base.width as f64, base.height as f64);
        for (window, selection) in chain.iter() {
            let sx = w / window.width;
            let sy = h / window.height;
            x += selection.x * sx;
            y += selection.y * sy;
            w = selection.width * sx;
            h = selection.height * sy;
        }

        assert_eq!(step, PhysicalRect::new(x as i32, y as i32, w as u32, h as u32));
        assert_eq!(step, PhysicalRect::new(600, 300, 200, 150));
    }

    #[test]
    fn compose_crop_chain_with_fractional_scales_stays_close() {
        let base = PhysicalRect::new(13, 7, 1277, 719);
        let chain = [
            (LogicalSize::new(531.0, 299.0), LogicalRect::new(17.3, 11.1, 333.7, 201.9)),
            (LogicalSize::new(777.0, 470.0), LogicalRect::new(101.5, 33.3, 500.0, 300.0)),
        ];

        let mut step = base;
        for (window, selection) in chain.iter() {
            step = compose_crop(step.origin(), step.size(), *window, *selection).unwrap();
        }

        let (mut x, mut y, mut w, mut h) = (base.x as f64, base.y as f64, base.width as f64, base.height as f64);
        for (window, selection) in chain.iter() {
            let sx = w / window.width;
            let sy = h / window.height;
            x += selection.x * sx;
            y += selection.y * sy;
            w = selection.width * sx;
            h = selection.height * sy;
        }

        // One floor per step at most
        let tolerance = chain.len() as f64;
        assert!((step.x as f64 - x).abs() <= tolerance);
        assert!((step.y as f64 - y).abs() <= tolerance);
        assert!((step.width as f64 - w).abs() <= tolerance);
        assert!((step.height as f64 - h).abs() <= tolerance);
    }

    #[test]
    fn finds_monitor_for_point() {
        let monitors = [
            MonitorInfo::new(PhysicalRect::new(0, 0, 1920, 1080), scale(1.0)),
            MonitorInfo::new(PhysicalRect::new(1920, 0, 2560, 1440), scale(1.25)),
        ];
        assert_eq!(monitor_at(&monitors, PhysicalPoint::new(2000, 10)).unwrap().scale, scale(1.25));
        assert_eq!(monitor_at(&monitors, PhysicalPoint::new(1919, 1079)).unwrap().scale, scale(1.0));
        assert!(monitor_at(&monitors, PhysicalPoint::new(-5, 0)).is_none());
    }

    #[test]
    fn local_logical_point_maps_into_desktop_space() {
        let monitor = MonitorInfo::new(PhysicalRect::new(1920, 0, 2560, 1440), scale(1.25));
        let p = monitor.local_to_physical(LogicalPoint::new(100.0, 40.0));
        assert_eq!(p, PhysicalPoint::new(2045, 50));
    }
}
