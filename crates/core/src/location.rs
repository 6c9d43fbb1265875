//! Replica location model.
//!
//! A [`Location`] is one local-disk copy of an origin file on some compute
//! node. A [`LocationRecord`] is the set of locations currently believed
//! valid for a single origin path, plus the access time used for
//! age-based eviction.

use std::time::{SystemTime, UNIX_EPOCH};

/// One replica of an origin file: the host holding it, the local path on
/// that host, and the origin size/mtime it was copied from.
///
/// Two locations are equal iff all four fields are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Location {
    pub origin_path: String,
    pub size: u64,
    pub mtime: u64,
    pub host: String,
    pub path: String,
}

impl Location {
    #[must_use]
    pub fn new(
        origin_path: impl Into<String>,
        size: u64,
        mtime: u64,
        host: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            origin_path: origin_path.into(),
            size,
            mtime,
            host: host.into(),
            path: path.into(),
        }
    }
}

/// Current epoch time in seconds. Used as both `Location::mtime`
/// comparisons and `LocationRecord` atime stamps.
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The set of locations currently indexed for one origin path, with the
/// atime used by the cleanup worker to purge records that have gone cold.
///
/// Locations are stored in insertion order (not semantically meaningful,
/// but deterministic for tests); no location appears twice.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocationRecord {
    locations: Vec<Location>,
    atime: u64,
}

impl LocationRecord {
    #[must_use]
    pub fn new(atime: u64) -> Self {
        Self {
            locations: Vec::new(),
            atime,
        }
    }

    #[must_use]
    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    #[must_use]
    pub fn atime(&self) -> u64 {
        self.atime
    }

    pub fn touch(&mut self, atime: u64) {
        if atime > self.atime {
            self.atime = atime;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Insert `loc` if not already present. Returns `true` if the record
    /// was modified.
    pub fn add(&mut self, loc: Location) -> bool {
        if self.locations.contains(&loc) {
            return false;
        }
        self.locations.push(loc);
        true
    }

    /// Remove `loc` if present. Returns `true` if the record was
    /// modified.
    pub fn remove(&mut self, loc: &Location) -> bool {
        let before = self.locations.len();
        self.locations.retain(|l| l != loc);
        self.locations.len() != before
    }
}
