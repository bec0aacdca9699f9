// events.rs - Cross-window Messages
//
// Every message between windows is one variant of Event. The registry and
// the sessions match on it explicitly; there is no string-keyed dispatch.
// Publishing never waits for a receiver.

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::app::{SourceId, SourceStatus};
use crate::constants::bus;
use crate::geometry::PhysicalRect;
use crate::magnifier::PickedColor;
use crate::selection::RegionSelection;

/// State a session reports back to the registry.
///
/// Toggle fields are None when the report does not carry that toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStateReport {
    pub source_id: SourceId,
    /// Last registry revision the session applied
    pub revision: u64,
    pub active: Option<bool>,
    pub grayscale: Option<bool>,
    pub mirrored: Option<bool>,
    pub status: SourceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum Event {
    RegionSelected(RegionSelection),
    SourceStateChanged(SourceStateReport),
    SourceCropUpdated {
        source_id: SourceId,
        new_crop: PhysicalRect,
        label: Option<String>,
    },
    SourceDestroy {
        source_id: SourceId,
    },
    PickerResult {
        color: Option<PickedColor>,
    },
    PickerClosed,
}

/// Broadcast bus shared by all windows
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(bus::CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire-and-forget
    pub fn publish(&self, event: Event) {
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            debug!("No subscribers for {:?}", event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
