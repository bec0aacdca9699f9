// session/binding.rs - Native Target Ownership
//
// At most one session may hold a binding for a given native window. The
// table is shared by every session task; all access goes through the
// mutex and the lock is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::app::SourceId;
use crate::error::{CaptureError, CaptureResult};
use crate::platform::NativeHandle;

#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    holders: Arc<Mutex<HashMap<NativeHandle, SourceId>>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NativeHandle, SourceId>> {
        self.holders.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `handle` for `session`. Re-claiming an own handle succeeds.
    pub fn claim(&self, handle: NativeHandle, session: SourceId) -> CaptureResult<()> {
        let mut holders = self.lock();
        match holders.get(&handle) {
            Some(holder) if *holder != session => Err(CaptureError::TargetBusy(handle)),
            _ => {
                holders.insert(handle, session);
                Ok(())
            }
        }
    }

    /// Release `handle` if `session` holds it
    pub fn release(&self, handle: NativeHandle, session: SourceId) {
        let mut holders = self.lock();
        if holders.get(&handle) == Some(&session) {
            holders.remove(&handle);
        }
    }

    pub fn holder(&self, handle: NativeHandle) -> Option<SourceId> {
        self.lock().get(&handle).copied()
    }
}
