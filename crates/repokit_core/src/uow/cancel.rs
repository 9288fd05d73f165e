//! Interrupts a running save when its cancellation token fires.
//!
//! # Invariants
//! - The interrupt can only reach the connection while the guard is alive;
//!   dropping the guard disarms it before the session runs anything else.
//! - The watcher needs a runtime worker other than the one blocked in the
//!   save. On a current-thread runtime only the pre-save check applies.

use rusqlite::InterruptHandle;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct SaveInterrupt {
    slot: Arc<Mutex<Option<InterruptHandle>>>,
    watcher: Option<JoinHandle<()>>,
}

impl SaveInterrupt {
    pub(crate) fn arm(handle: InterruptHandle, cancel: &CancellationToken) -> Self {
        let slot = Arc::new(Mutex::new(Some(handle)));
        let watcher = tokio::runtime::Handle::try_current().ok().map(|runtime| {
            let slot = Arc::clone(&slot);
            let cancel = cancel.clone();
            runtime.spawn(async move {
                cancel.cancelled().await;
                let armed = slot.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(handle) = armed.as_ref() {
                    handle.interrupt();
                }
            })
        });
        Self { slot, watcher }
    }
}

impl Drop for SaveInterrupt {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}
