//! Per-entry write serialization.
//!
//! Entity mutations are read-modify-write cycles. Within one process they are serialized per
//! dn so two writers sharing a [`crate::Directory`] cannot diff against the same snapshot.
//! Writers in other processes are not covered: the directory stays last-write-wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use ucp_core::Error;

use crate::{dn::DistinguishedName, Result};

/// Held while an entry is being rewritten.
pub(crate) type EntryGuard = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
pub(crate) struct EntryLocks {
    entries: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl EntryLocks {
    pub(crate) async fn lock(&self, dn: &DistinguishedName) -> Result<EntryGuard> {
        let entry = {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| Error::InternalError("entry lock table poisoned".to_string()))?;
            // Drop locks nobody holds or waits for.
            entries.retain(|_, lock| Arc::strong_count(lock) > 1);
            entries.entry(dn.normalized()).or_default().clone()
        };
        Ok(entry.lock_owned().await)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }
}
