// registry.rs - Capture Source Registry
//
// The single authoritative list of capture sources. Only the main context
// owns it; sessions never touch it directly and talk back through events.
//
// Ownership of the per-source toggles (active, grayscale, mirrored) is
// settled by revisions: every registry-originated command bumps the
// source's revision, sessions echo the last revision they applied, and a
// report older than the registry's revision cannot override its toggles.

use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::Instant;

use crate::app::{CaptureFilters, CaptureSource, SourceId, SourceKind, SourceStatus};
use crate::constants::registry as defaults;
use crate::error::{CaptureError, CaptureResult, SessionFault};
use crate::events::{Event, SourceStateReport};
use crate::geometry::{PhysicalPoint, PhysicalRect, PhysicalSize};
use crate::platform::NativeHandle;
use crate::selection::SelectionPurpose;
use crate::session::SessionCommand;

/// Where sessions live. The registry opens, addresses and closes them
/// only through this trait.
pub trait SessionHost {
    /// Open a hidden session for `source`; a no-op if one is open
    fn open(&mut self, source: &CaptureSource) -> CaptureResult<()>;

    /// Deliver a command; false if no session is open for `id`
    fn send(&mut self, id: SourceId, command: SessionCommand) -> bool;

    /// Destroy the session; false if there was none
    fn close(&mut self, id: SourceId) -> bool;

    fn is_open(&self, id: SourceId) -> bool;

    /// Most recent state the session reported, if the host keeps it
    fn latest_report(&self, _id: SourceId) -> Option<SourceStateReport> {
        None
    }
}

/// Identity of an add request for de-duplication
#[derive(Debug, Clone, PartialEq, Eq)]
struct AddKey {
    kind: SourceKind,
    target: Option<NativeHandle>,
    crop: PhysicalRect,
}

pub struct SourceRegistry<H: SessionHost> {
    sources: Vec<CaptureSource>,
    next_id: u64,
    host: H,
    dedup_window: Duration,
    recent_adds: Vec<(AddKey, SourceId, Instant)>,
}

impl<H: SessionHost> SourceRegistry<H> {
    pub fn new(host: H) -> Self {
        Self::with_dedup_window(host, Duration::from_millis(defaults::ADD_DEDUP_MS))
    }

    pub fn with_dedup_window(host: H, dedup_window: Duration) -> Self {
        Self {
            sources: Vec::new(),
            next_id: 1,
            host,
            dedup_window,
            recent_adds: Vec::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn sources(&self) -> &[CaptureSource] {
        &self.sources
    }

    pub fn get(&self, id: SourceId) -> Option<&CaptureSource> {
        self.sources.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: SourceId) -> CaptureResult<&mut CaptureSource> {
        self.sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(CaptureError::UnknownSource(id))
    }

    // ---- Adding ----

    /// Add a screen region source (virtual desktop pixels)
    pub fn add_from_region(&mut self, rect: PhysicalRect) -> CaptureResult<SourceId> {
        if rect.is_empty() {
            return Err(CaptureError::InvalidGeometry(format!("region {:?} has no area", rect)));
        }
        let label = CaptureSource::region_label(&rect);
        self.add(SourceKind::ScreenRegion, None, rect, label)
    }

    /// Add a native window source cropped to the whole window
    pub fn add_from_window(
        &mut self,
        handle: NativeHandle,
        native_size: PhysicalSize,
        label: &str,
    ) -> CaptureResult<SourceId> {
        if native_size.is_empty() {
            return Err(CaptureError::InvalidGeometry(format!("window {:?} has no area", handle)));
        }
        let crop = PhysicalRect::from_origin_size(PhysicalPoint::new(0, 0), native_size);
        self.add(SourceKind::NativeWindow, Some(handle), crop, label.to_string())
    }

    fn add(
        &mut self,
        kind: SourceKind,
        target: Option<NativeHandle>,
        crop: PhysicalRect,
        label: String,
    ) -> CaptureResult<SourceId> {
        let now = Instant::now();
        let key = AddKey { kind, target, crop };

        let window = self.dedup_window;
        self.recent_adds.retain(|(_, _, at)| now.duration_since(*at) <= window);
        if let Some((_, id, _)) = self.recent_adds.iter().find(|(k, _, _)| *k == key) {
            if self.get(*id).is_some() {
                debug!("Duplicate add collapsed into {}", id);
                return Ok(*id);
            }
        }

        let id = SourceId(self.next_id);
        self.next_id += 1;
        let mut source = CaptureSource {
            id,
            kind,
            target,
            crop,
            label,
            active: false,
            grayscale: false,
            mirrored: false,
            status: SourceStatus::Idle,
            revision: 0,
        };

        if let Err(e) = self.host.open(&source) {
            error!("Could not open a session for {}: {}", id, e);
            source.status = SourceStatus::Fault(SessionFault::from(&e));
        }
        info!("Added {} ({})", id, source.label);
        self.sources.push(source);
        self.recent_adds.push((key, id, now));
        Ok(id)
    }

    // ---- Visibility ----

    /// Set the desired visibility. Returns whether anything changed.
    ///
    /// Turning on opens a session if there is none, then shows it. Turning
    /// off pauses the session; it is never destroyed here.
    pub fn set_active(&mut self, id: SourceId, active: bool) -> CaptureResult<bool> {
        let source = self.get_mut(id)?;
        if source.active == active {
            return Ok(false);
        }
        let revision = source.revision + 1;
        let snapshot = CaptureSource {
            active,
            revision,
            ..source.clone()
        };

        // Nothing changes unless there is a session to carry the command
        if active && !self.host.is_open(id) {
            if let Err(e) = self.host.open(&snapshot) {
                error!("Could not open a session for {}: {}", id, e);
                self.get_mut(id)?.status = SourceStatus::Fault(SessionFault::from(&e));
                return Err(e);
            }
        }

        let source = self.get_mut(id)?;
        source.active = active;
        source.revision = revision;
        if active {
            self.host.send(id, SessionCommand::Show { revision });
        } else if !self.host.send(id, SessionCommand::Hide { revision }) {
            debug!("{} has no session to pause", id);
        }
        Ok(true)
    }

    pub fn toggle_active(&mut self, id: SourceId) -> CaptureResult<bool> {
        let active = self.get(id).map(|s| s.active).unwrap_or(false);
        self.set_active(id, !active)?;
        Ok(!active)
    }

    /// Registry-side filter toggles, forwarded to the session
    pub fn set_filters(&mut self, id: SourceId, grayscale: bool, mirrored: bool) -> CaptureResult<bool> {
        let source = self.get_mut(id)?;
        if source.grayscale == grayscale && source.mirrored == mirrored {
            return Ok(false);
        }
        source.grayscale = grayscale;
        source.mirrored = mirrored;
        source.revision += 1;
        let revision = source.revision;
        let filters = CaptureFilters { grayscale, mirrored };
        self.host.send(id, SessionCommand::SetFilters { filters, revision });
        Ok(true)
    }

    // ---- Crop ----

    /// Replace the crop (and optionally the label). Kind and target are
    /// preserved. Returns false when nothing changed.
    pub fn update_crop(&mut self, id: SourceId, crop: PhysicalRect, label: Option<String>) -> CaptureResult<bool> {
        let source = self.get_mut(id)?;
        let label = label.unwrap_or_else(|| source.label.clone());
        if source.crop == crop && source.label == label {
            return Ok(false);
        }
        debug!("{} crop {:?} -> {:?}", id, source.crop, crop);
        source.crop = crop;
        source.label = label;
        Ok(true)
    }

    // ---- Removal ----

    /// Destroy the session (if any), then forget the source. A second call
    /// is a no-op returning false.
    pub fn remove(&mut self, id: SourceId) -> bool {
        let Some(index) = self.sources.iter().position(|s| s.id == id) else {
            return false;
        };
        if self.host.is_open(id) {
            self.host.close(id);
        }
        self.sources.remove(index);
        self.recent_adds.retain(|(_, added, _)| *added != id);
        info!("Removed {}", id);
        true
    }

    // ---- Reconcile ----

    /// Merge a session report. Toggles from reports older than the
    /// source's revision are ignored; status is always taken.
    pub fn reconcile(&mut self, report: &SourceStateReport) -> bool {
        let Ok(source) = self.get_mut(report.source_id) else {
            debug!("Report for unknown {} dropped", report.source_id);
            return false;
        };

        let mut changed = false;
        if source.status != report.status {
            source.status = report.status.clone();
            changed = true;
        }

        if report.revision < source.revision {
            debug!(
                "Stale report for {} (rev {} < {})",
                report.source_id, report.revision, source.revision
            );
            return changed;
        }
        source.revision = report.revision;

        if let Some(active) = report.active {
            changed |= source.active != active;
            source.active = active;
        }
        if let Some(grayscale) = report.grayscale {
            changed |= source.grayscale != grayscale;
            source.grayscale = grayscale;
        }
        if let Some(mirrored) = report.mirrored {
            changed |= source.mirrored != mirrored;
            source.mirrored = mirrored;
        }
        changed
    }

    /// Re-read every session's latest state from the host. For listeners
    /// that missed bus events; returns how many sources changed.
    pub fn resync(&mut self) -> usize {
        let reports: Vec<SourceStateReport> = self
            .sources
            .iter()
            .filter_map(|s| self.host.latest_report(s.id))
            .collect();
        let changed = reports.iter().filter(|r| self.reconcile(r)).count();
        debug!("Resync updated {} of {} sources", changed, self.sources.len());
        changed
    }

    /// Apply one bus event. Returns whether the list changed.
    pub fn apply(&mut self, event: &Event) -> bool {
        match event {
            Event::RegionSelected(selection) => match selection.purpose {
                SelectionPurpose::Monitor => match self.add_from_region(selection.rect) {
                    Ok(_) => true,
                    Err(e) => {
                        warn!("Region not added: {}", e);
                        false
                    }
                },
                SelectionPurpose::Screenshot | SelectionPurpose::Crop => false,
            },
            Event::SourceStateChanged(report) => self.reconcile(report),
            Event::SourceCropUpdated { source_id, new_crop, label } => {
                self.update_crop(*source_id, *new_crop, label.clone()).unwrap_or(false)
            }
            Event::SourceDestroy { source_id } => self.remove(*source_id),
            Event::PickerResult { .. } | Event::PickerClosed => false,
        }
    }
}
