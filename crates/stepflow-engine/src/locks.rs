//! Per-process single-writer locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use stepflow_core::ProcessId;

/// Lock table handing out one async mutex per process.
///
/// Every read-modify-write of a process happens while holding its guard,
/// so two callers racing for the same task are serialized and the second
/// one sees the status written by the first.
#[derive(Default)]
pub struct ProcessLocks {
    table: Mutex<HashMap<ProcessId, Arc<AsyncMutex<()>>>>,
}

impl ProcessLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a process.
    pub async fn acquire(&self, process: &ProcessId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
            table
                .entry(process.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
