//! In-memory registry of mounted volumes.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::name;

/// Bookkeeping for a volume that has been mounted at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeRecord {
    /// Canonical path without surrounding slashes.
    pub name: String,
    /// Subtree of the CephFS root backing this volume.
    pub filesystem_root: String,
    /// Outstanding mounts not yet matched by an unmount.
    pub connections: u32,
}

impl VolumeRecord {
    /// Fresh record for a first mount of `path`.
    pub fn mounted(path: &str) -> Self {
        let name = name::display_name(path);
        Self {
            filesystem_root: format!("/{name}"),
            name,
            connections: 1,
        }
    }
}

/// Held operation lock for one path, see [`VolumeRegistry::lock`].
///
/// Dropping it releases the mutex and drops the path's lock entry once no
/// other task holds or waits on it.
#[must_use]
pub struct PathLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    path: String,
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
}

impl Drop for PathLock<'_> {
    fn drop(&mut self) {
        // The guard owns a clone of the Arc; release it before counting.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.path, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Map of canonical path to [`VolumeRecord`].
///
/// Records live in a sharded concurrent map, so readers always see a whole
/// record. Mutating lifecycle operations also take the per-path lock returned
/// by [`VolumeRegistry::lock`] for their full duration, which serializes work
/// on one volume without blocking any other.
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    records: DashMap<String, VolumeRecord>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the operation lock for `path`.
    pub async fn lock(&self, path: &str) -> PathLock<'_> {
        // Clone the Arc out before awaiting so no shard guard is held.
        let lock = self
            .locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        PathLock {
            guard: Some(lock.lock_owned().await),
            path: path.to_string(),
            locks: &self.locks,
        }
    }

    /// Paths with a lock currently held or awaited.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn get(&self, path: &str) -> Option<VolumeRecord> {
        self.records.get(path).map(|r| r.clone())
    }

    pub fn put(&self, path: &str, record: VolumeRecord) {
        self.records.insert(path.to_string(), record);
    }

    /// Increment the count of an existing live record, or install a fresh one.
    ///
    /// A stale record at zero connections is overwritten, not incremented.
    /// Returns the resulting count.
    pub fn acquire(&self, path: &str) -> u32 {
        match self.records.entry(path.to_string()) {
            Entry::Occupied(mut live) if live.get().connections > 0 => {
                let record = live.get_mut();
                record.connections += 1;
                record.connections
            }
            Entry::Occupied(mut stale) => {
                stale.insert(VolumeRecord::mounted(path));
                1
            }
            Entry::Vacant(slot) => {
                slot.insert(VolumeRecord::mounted(path));
                1
            }
        }
    }

    /// Decrement the count for `path`, returning the new value.
    pub fn release(&self, path: &str) -> Option<u32> {
        self.records.get_mut(path).map(|mut r| {
            r.connections = r.connections.saturating_sub(1);
            r.connections
        })
    }

    pub fn remove(&self, path: &str) -> Option<VolumeRecord> {
        self.records.remove(path).map(|(_, r)| r)
    }

    /// Snapshot of every record, sorted by path.
    pub fn list(&self) -> Vec<(String, VolumeRecord)> {
        let mut out: Vec<_> = self
            .records
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
