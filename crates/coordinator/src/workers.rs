//! Long-lived cooperative background workers: periodic snapshot, periodic
//! purge of stale records, and periodic statistics logging.
//!
//! Each loop is driven by a condition variable with a timed wait, so a
//! shutdown signal preempts the sleep instead of making the worker wait
//! out its full interval before noticing.

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use core::location::now_secs;

use crate::location_index::LocationIndex;
use crate::snapshot;
use crate::stats::StatsCollector;

/// A stop flag pairable with an interruptible sleep.
#[derive(Default)]
pub struct ShutdownSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        *self.stopped.lock().unwrap() = true;
        self.condvar.notify_all();
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.stopped.lock().unwrap()
    }

    /// Sleep for `dur` unless shutdown is signaled first. Returns `true`
    /// if shutdown was observed.
    fn wait(&self, dur: Duration) -> bool {
        let guard = self.stopped.lock().unwrap();
        let (guard, _) = self.condvar.wait_timeout_while(guard, dur, |stopped| !*stopped).unwrap();
        *guard
    }
}

pub fn spawn_snapshot_worker(
    index: Arc<LocationIndex>,
    db_file: PathBuf,
    interval: Duration,
    shutdown: Arc<ShutdownSignal>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !shutdown.wait(interval) {
            if let Err(err) = snapshot::save(&index, &db_file) {
                tracing::error!(error = %err, "periodic snapshot failed");
            }
        }
    })
}

pub fn spawn_cleanup_worker(
    index: Arc<LocationIndex>,
    max_age: u64,
    interval: Duration,
    shutdown: Arc<ShutdownSignal>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !shutdown.wait(interval) {
            let threshold = now_secs().saturating_sub(max_age);
            let removed = index.purge_older_than(threshold);
            if removed > 0 {
                tracing::debug!(removed, "purged stale location records");
            }
        }
    })
}

pub fn spawn_stats_worker(
    stats: Arc<StatsCollector>,
    index: Arc<LocationIndex>,
    interval: Duration,
    shutdown: Arc<ShutdownSignal>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !shutdown.wait(interval) {
            if !stats.has_changed() {
                continue;
            }
            let snap = stats.take();
            let (records, locations) = index.stat();
            tracing::info!(
                active_threads = snap.active_threads,
                requests = snap.requests,
                copy_from_server = snap.copy_from_server,
                copy_from_node = snap.copy_from_node,
                aborted = snap.aborted,
                wait = snap.wait,
                records,
                locations,
                "coordinator statistics"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_preempts_the_wait() {
        let shutdown = Arc::new(ShutdownSignal::new());
        let s2 = shutdown.clone();
        let handle = std::thread::spawn(move || s2.wait(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(50));
        shutdown.signal();
        assert!(handle.join().unwrap(), "wait() must return true once signaled");
    }
}
