// reference.rs - Reference Screenshots
//
// A screenshot-purpose selection becomes a still reference image instead
// of a live source. The monitor containing the rectangle's top-left corner
// is snapshotted and cropped; a rectangle that runs past the monitor edge
// is clamped to it.

use std::io::Cursor;
use std::path::Path;

use image::{ImageFormat, RgbaImage};
use log::info;

use crate::error::{CaptureError, CaptureResult};
use crate::geometry::PhysicalRect;
use crate::platform::CaptureBackend;
use crate::selection::{RegionSelection, SelectionPurpose};

#[derive(Debug, Clone)]
pub struct ReferenceImage {
    /// Requested rectangle in desktop pixels (before clamping)
    pub rect: PhysicalRect,
    pub image: RgbaImage,
}

impl ReferenceImage {
    pub fn to_png(&self) -> CaptureResult<Vec<u8>> {
        encode_png(&self.image)
    }

    pub fn save_png(&self, path: &Path) -> CaptureResult<()> {
        self.image.save_with_format(path, ImageFormat::Png)?;
        info!("Reference saved to {:?}", path);
        Ok(())
    }
}

/// Snapshot the monitor under `rect` and crop it
pub fn capture_reference(backend: &dyn CaptureBackend, rect: PhysicalRect) -> CaptureResult<ReferenceImage> {
    if rect.is_empty() {
        return Err(CaptureError::InvalidGeometry(format!("{:?} has no area", rect)));
    }
    let snapshot = backend.capture_monitor_snapshot(rect.origin())?;
    let image = snapshot.crop(rect)?;
    info!("Reference captured: {}x{} from {:?}", image.width(), image.height(), rect);
    Ok(ReferenceImage { rect, image })
}

/// Reference for a screenshot selection; other purposes are rejected
pub fn capture_selection(backend: &dyn CaptureBackend, selection: &RegionSelection) -> CaptureResult<ReferenceImage> {
    if selection.purpose != SelectionPurpose::Screenshot {
        return Err(CaptureError::InvalidGeometry(format!(
            "{:?} selection is not a screenshot",
            selection.purpose
        )));
    }
    capture_reference(backend, selection.rect)
}

pub fn encode_png(image: &RgbaImage) -> CaptureResult<Vec<u8>> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}
