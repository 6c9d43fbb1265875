//! Monotonic session counters, guarded by their own mutex.

use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
pub struct StatsSnapshot {
    pub active_threads: i64,
    pub requests: u64,
    pub copy_from_server: u64,
    pub copy_from_node: u64,
    pub aborted: u64,
    pub wait: u64,
}

#[derive(Default)]
struct Inner {
    snapshot: StatsSnapshot,
    changed: bool,
}

pub struct StatsCollector {
    inner: Mutex<Inner>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter_ops {
    ($inc:ident, $dec:ident, $field:ident) => {
        pub fn $inc(&self) {
            let mut inner = self.inner.lock().unwrap();
            inner.snapshot.$field += 1;
            inner.changed = true;
        }
    };
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            let mut inner = self.inner.lock().unwrap();
            inner.snapshot.$field += 1;
            inner.changed = true;
        }
    };
}

impl StatsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn session_started(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.snapshot.active_threads += 1;
        inner.changed = true;
    }

    pub fn session_ended(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.snapshot.active_threads -= 1;
        inner.changed = true;
    }

    counter_ops!(inc_requests, requests);
    counter_ops!(inc_copy_from_server, copy_from_server);
    counter_ops!(inc_copy_from_node, copy_from_node);
    counter_ops!(inc_aborted, aborted);
    counter_ops!(inc_wait, wait);

    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.inner.lock().unwrap().changed
    }

    /// A lock-free copy of the current counters. Clears the `changed`
    /// flag, matching the periodic-log-then-reset use the stats worker
    /// makes of it.
    #[must_use]
    pub fn take(&self) -> StatsSnapshot {
        let mut inner = self.inner.lock().unwrap();
        inner.changed = false;
        inner.snapshot
    }

    #[must_use]
    pub fn get(&self) -> StatsSnapshot {
        self.inner.lock().unwrap().snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let s = StatsCollector::new();
        let snap = s.get();
        assert_eq!(snap.requests, 0);
        assert_eq!(snap.active_threads, 0);
    }

    #[test]
    fn increments_are_reflected_in_get() {
        let s = StatsCollector::new();
        s.inc_requests();
        s.inc_requests();
        s.inc_copy_from_node();
        assert_eq!(s.get().requests, 2);
        assert_eq!(s.get().copy_from_node, 1);
    }

    #[test]
    fn take_clears_changed_flag() {
        let s = StatsCollector::new();
        s.inc_requests();
        assert!(s.has_changed());
        s.take();
        assert!(!s.has_changed());
    }

    #[test]
    fn session_started_and_ended_balance() {
        let s = StatsCollector::new();
        s.session_started();
        s.session_started();
        s.session_ended();
        assert_eq!(s.get().active_threads, 1);
    }
}
