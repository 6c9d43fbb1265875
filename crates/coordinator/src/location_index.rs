//! Concurrent in-memory catalogue of origin path -> replica locations.

use std::collections::HashMap;
use std::sync::Mutex;

use core::location::now_secs;
use core::{Location, LocationRecord};
use rand::seq::SliceRandom;

use crate::scheduler::TransferScheduler;

#[derive(Default)]
struct Inner {
    records: HashMap<String, LocationRecord>,
    changed: bool,
}

/// Mapping from origin path to the set of nodes currently believed to
/// hold a valid local copy, guarded by a single mutex.
pub struct LocationIndex {
    inner: Mutex<Inner>,
}

impl Default for LocationIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    #[must_use]
    pub fn has_file(&self, path: &str) -> bool {
        self.inner.lock().unwrap().records.contains_key(path)
    }

    /// Pick one location for `path`: prefer a replica already on
    /// `preferred_host`; otherwise, if `scheduler` is given and more than
    /// one replica exists, pick uniformly at random among replicas whose
    /// host currently has a free transfer slot; otherwise pick uniformly
    /// at random from the whole record. Updates atime.
    pub fn get_location(
        &self,
        path: &str,
        preferred_host: &str,
        scheduler: Option<&TransferScheduler>,
    ) -> Option<Location> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.records.get_mut(path)?;
        record.touch(now_secs());
        let locations = record.locations();
        if let Some(loc) = locations.iter().find(|l| l.host == preferred_host) {
            return Some(loc.clone());
        }
        if locations.len() > 1 {
            if let Some(scheduler) = scheduler {
                let candidates: Vec<&Location> = locations
                    .iter()
                    .filter(|l| scheduler.has_available_slots(&l.host))
                    .collect();
                if !candidates.is_empty() {
                    return candidates.choose(&mut rand::thread_rng()).map(|l| (*l).clone());
                }
            }
        }
        locations.choose(&mut rand::thread_rng()).cloned()
    }

    /// A snapshot copy of the record's locations. Updates atime.
    #[must_use]
    pub fn get_all_locations(&self, path: &str) -> Vec<Location> {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.records.get_mut(path) else {
            return Vec::new();
        };
        record.touch(now_secs());
        record.locations().to_vec()
    }

    /// Insert `loc` if not already present; create the record if absent.
    pub fn add_location(&self, path: &str, loc: Location) {
        let mut inner = self.inner.lock().unwrap();
        let now = now_secs();
        let record = inner
            .records
            .entry(path.to_string())
            .or_insert_with(|| LocationRecord::new(now));
        let inserted = record.add(loc);
        record.touch(now);
        if inserted {
            inner.changed = true;
        }
    }

    /// Remove `loc` if present; the record is dropped once it's empty.
    pub fn remove_location(&self, path: &str, loc: &Location) {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.records.get_mut(path) else {
            return;
        };
        if record.remove(loc) {
            inner.changed = true;
            if record.is_empty() {
                inner.records.remove(path);
            }
        }
    }

    /// Remove every record whose atime predates `threshold`. Returns the
    /// number of records removed.
    pub fn purge_older_than(&self, threshold: u64) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.records.len();
        inner.records.retain(|_, record| record.atime() >= threshold);
        let removed = before - inner.records.len();
        if removed > 0 {
            inner.changed = true;
        }
        removed
    }

    /// `(num_records, total_locations)`.
    #[must_use]
    pub fn stat(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        let total = inner.records.values().map(|r| r.locations().len()).sum();
        (inner.records.len(), total)
    }

    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        self.inner.lock().unwrap().changed
    }

    /// Clone the mapping under the lock for the snapshot writer, which
    /// then releases the lock before doing any I/O.
    #[must_use]
    pub(crate) fn clone_for_snapshot(&self) -> HashMap<String, LocationRecord> {
        self.inner.lock().unwrap().records.clone()
    }

    pub(crate) fn mark_saved(&self) {
        self.inner.lock().unwrap().changed = false;
    }

    pub(crate) fn replace_all(&self, records: HashMap<String, LocationRecord>) {
        let mut inner = self.inner.lock().unwrap();
        inner.records = records;
        inner.changed = false;
    }

    /// Non-blocking variant of [`Self::clone_for_snapshot`] plus
    /// [`Self::has_unsaved_changes`] combined, used for the shutdown-time
    /// snapshot so it never contends against a wedged periodic snapshot
    /// thread. Returns `None` if the lock is currently held.
    pub(crate) fn try_snapshot_state(&self) -> Option<(HashMap<String, LocationRecord>, bool)> {
        let guard = self.inner.try_lock().ok()?;
        Some((guard.records.clone(), guard.changed))
    }
}
