//! Crash-safe gzip-compressed persistence for the [`LocationIndex`].
//!
//! The inflated payload is JSON: a mapping from origin path to
//! [`LocationRecord`]. Readers also accept a legacy variant where the
//! value is a bare list of [`Location`]s (no atime), upgrading it
//! transparently to a record stamped with the current time.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use core::location::now_secs;
use core::{Location, LocationRecord};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::location_index::LocationIndex;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Write `index`'s current mapping to `path` as a gzip-compressed JSON
/// stream, unless nothing has changed since the last successful snapshot.
/// The write goes to a temp file in the same directory followed by an
/// atomic rename, so a crash mid-write never leaves a truncated file in
/// `path`'s place.
pub fn save(index: &LocationIndex, path: &Path) -> Result<(), SnapshotError> {
    if !index.has_unsaved_changes() {
        return Ok(());
    }
    let records = index.clone_for_snapshot();
    write_gzip_json(&records, path)?;
    index.mark_saved();
    Ok(())
}

/// Shutdown-time variant of [`save`] that never blocks on the index's
/// lock: if a periodic snapshot is already in flight, this is skipped
/// rather than waiting on it. Returns whether a snapshot was actually
/// written.
pub fn try_save(index: &LocationIndex, path: &Path) -> Result<bool, SnapshotError> {
    let Some((records, changed)) = index.try_snapshot_state() else {
        return Ok(false);
    };
    if !changed {
        return Ok(false);
    }
    write_gzip_json(&records, path)?;
    Ok(true)
}

fn write_gzip_json(records: &HashMap<String, LocationRecord>, path: &Path) -> Result<(), SnapshotError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("snapshot")
    ));
    {
        let tmp_file = File::create(&tmp_path)?;
        let mut encoder = GzEncoder::new(tmp_file, Compression::default());
        serde_json::to_writer(&mut encoder, records)?;
        encoder.finish()?.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load a snapshot written by [`save`], or the legacy bare-list format,
/// and replace `index`'s mapping with it. A missing file is treated as an
/// empty starting catalogue.
pub fn load(index: &LocationIndex, path: &Path) -> Result<(), SnapshotError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            index.replace_all(HashMap::new());
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    let inflated = inflate(&bytes)?;
    let records = parse_records(&inflated)?;
    index.replace_all(records);
    Ok(())
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>, SnapshotError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => Ok(out),
        // Not actually gzip (e.g. a hand-edited or legacy plain file):
        // fall back to treating the bytes as raw JSON.
        Err(_) => Ok(bytes.to_vec()),
    }
}

fn parse_records(json: &[u8]) -> Result<HashMap<String, LocationRecord>, SnapshotError> {
    if let Ok(records) = serde_json::from_slice::<HashMap<String, LocationRecord>>(json) {
        return Ok(records);
    }
    let legacy: HashMap<String, Vec<Location>> = serde_json::from_slice(json)?;
    let now = now_secs();
    Ok(legacy
        .into_iter()
        .map(|(path, locations)| {
            let mut record = LocationRecord::new(now);
            for loc in locations {
                record.add(loc);
            }
            (path, record)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        let idx = LocationIndex::new();
        idx.add_location("/fs/A", Location::new("/fs/A", 100, 1000, "c1", "/cache/A"));
        save(&idx, &path).unwrap();
        assert!(!idx.has_unsaved_changes());

        let loaded = LocationIndex::new();
        load(&loaded, &path).unwrap();
        assert_eq!(loaded.get_all_locations("/fs/A"), idx.get_all_locations("/fs/A"));
    }

    #[test]
    fn unchanged_index_does_not_rewrite_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        let idx = LocationIndex::new();
        save(&idx, &path).unwrap();
        assert!(!path.exists(), "snapshot of an untouched index should not write anything");
    }

    #[test]
    fn loads_legacy_bare_list_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        let legacy: HashMap<String, Vec<Location>> = HashMap::from([(
            "/fs/A".to_string(),
            vec![Location::new("/fs/A", 100, 1000, "c1", "/cache/A")],
        )]);
        let bytes = serde_json::to_vec(&legacy).unwrap();
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(&bytes).unwrap();
        encoder.finish().unwrap();

        let idx = LocationIndex::new();
        load(&idx, &path).unwrap();
        let locations = idx.get_all_locations("/fs/A");
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].host, "c1");
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.db");
        let idx = LocationIndex::new();
        idx.add_location("/fs/A", Location::new("/fs/A", 1, 1, "c1", "/x"));
        load(&idx, &path).unwrap();
        assert!(!idx.has_file("/fs/A"));
    }
}
