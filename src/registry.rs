use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::descriptor::Fingerprint;
use crate::util::lock_unpoisoned;

/// Cancels one in-flight logical call.
#[derive(Clone, Debug, Default)]
pub struct CancellationHandle {
    token: CancellationToken,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[derive(Debug)]
struct RegistryEntry {
    id: u64,
    handle: CancellationHandle,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: AtomicU64,
    entries: Mutex<HashMap<Fingerprint, RegistryEntry>>,
}

/// At most one in-flight call per fingerprint; the newest registration wins.
#[derive(Clone, Debug, Default)]
pub struct PendingRequestRegistry {
    inner: Arc<RegistryInner>,
}

impl PendingRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels whatever is registered under `fingerprint`, then stores a fresh handle.
    pub fn register(&self, fingerprint: Fingerprint) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = CancellationHandle::new();
        {
            let mut entries = lock_unpoisoned(&self.inner.entries);
            if let Some(previous) = entries.remove(&fingerprint) {
                debug!(fingerprint = %fingerprint, "superseding in-flight request");
                previous.handle.cancel();
            }
            entries.insert(
                fingerprint.clone(),
                RegistryEntry {
                    id,
                    handle: handle.clone(),
                },
            );
        }
        Registration {
            registry: self.clone(),
            fingerprint,
            id,
            handle,
        }
    }

    /// Cancels and forgets the call registered under `fingerprint`.
    pub fn cancel(&self, fingerprint: &Fingerprint) -> bool {
        let removed = lock_unpoisoned(&self.inner.entries).remove(fingerprint);
        match removed {
            Some(entry) => {
                entry.handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained = lock_unpoisoned(&self.inner.entries)
            .drain()
            .collect::<Vec<_>>();
        for (_, entry) in &drained {
            entry.handle.cancel();
        }
        drained.len()
    }

    pub fn release(&self, registration: Registration) {
        drop(registration);
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        lock_unpoisoned(&self.inner.entries).contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release_entry(&self, fingerprint: &Fingerprint, id: u64) {
        let mut entries = lock_unpoisoned(&self.inner.entries);
        if entries.get(fingerprint).is_some_and(|entry| entry.id == id) {
            entries.remove(fingerprint);
        }
    }
}

/// A registry slot held by one logical call. Released exactly once, on drop at the latest.
#[derive(Debug)]
pub struct Registration {
    registry: PendingRequestRegistry,
    fingerprint: Fingerprint,
    id: u64,
    handle: CancellationHandle,
}

impl Registration {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn handle(&self) -> &CancellationHandle {
        &self.handle
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release_entry(&self.fingerprint, self.id);
    }
}
