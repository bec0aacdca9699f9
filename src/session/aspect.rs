// session/aspect.rs - Aspect Ratio Lock
//
// The ratio always comes from the source crop, never from the window, so
// a window that drifted cannot redefine what "correct" means.

use crate::geometry::PhysicalSize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectLock {
    ratio: f64,
    tolerance: f64,
}

impl AspectLock {
    /// Lock to the ratio of `crop`; None for a degenerate crop
    pub fn from_crop(crop: PhysicalSize, tolerance: f64) -> Option<Self> {
        crop.ratio().map(|ratio| Self { ratio, tolerance })
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Re-lock after the source's native size changed
    pub fn relock(&mut self, crop: PhysicalSize) -> bool {
        match crop.ratio() {
            Some(ratio) => {
                self.ratio = ratio;
                true
            }
            None => false,
        }
    }

    pub fn drift(&self, size: PhysicalSize) -> Option<f64> {
        size.ratio().map(|r| (r - self.ratio).abs())
    }

    /// Size the window must be forced to, keeping its width.
    ///
    /// Returns None when the window is within tolerance, or when the
    /// corrected height equals the current one. The second case keeps a
    /// correction from re-triggering on its own output when whole-pixel
    /// rounding cannot get any closer.
    pub fn correct(&self, size: PhysicalSize) -> Option<PhysicalSize> {
        if size.width == 0 {
            return None;
        }
        if let Some(drift) = self.drift(size) {
            if drift <= self.tolerance {
                return None;
            }
        }
        let height = self.height_for(size.width);
        if height == size.height {
            return None;
        }
        Some(PhysicalSize::new(size.width, height))
    }

    /// Height matching `width` under this lock
    pub fn height_for(&self, width: u32) -> u32 {
        ((width as f64 / self.ratio).round() as u32).max(1)
    }
}
