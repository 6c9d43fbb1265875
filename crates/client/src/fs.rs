//! Local cache-directory bookkeeping: stat, free-space accounting and
//! reclaiming stale cached files, mirroring
//! `original_source/trunk/filesystem.py`'s `FileSystem`.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::ClientSettings;

/// Size and mtime of a cached (or about to be cached) file, carried as the
/// same duck-typed strings the wire protocol uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub size: String,
    pub mtime: String,
}

/// Collaborator the fetcher consults for everything touching the local
/// disk. A production implementation shells out to nothing; tests swap in
/// an in-memory fake.
pub trait FileSystem {
    fn get_file_info(&self, path: &Path) -> Option<FileInfo>;
    fn get_file_server(&self, path: &Path) -> String;
    fn disk_free(&self, dir: &Path) -> Option<(u64, u64)>;
    /// Ensure `filesize` bytes are available under `destination`'s
    /// directory, deleting old cached files if necessary. Returns whether
    /// enough space is now free and the list of paths removed.
    fn check_free_space(&self, filesize: u64, destination: &Path) -> (bool, Vec<PathBuf>);
    /// `(exists, can_copy, removed)`: whether `destination` already holds
    /// a file matching `info`, whether a copy may proceed, and whether a
    /// stale file at that path was removed to make room for it.
    fn destination_exists(&self, info: &FileInfo, destination: &Path) -> (bool, bool, bool);
    fn set_atime(&self, path: &Path);
}

pub struct LocalFileSystem {
    cache_dir: PathBuf,
    min_free: u64,
    max_usage_percent: f64,
    min_age: Duration,
}

impl LocalFileSystem {
    #[must_use]
    pub fn new(settings: &ClientSettings) -> Self {
        Self {
            cache_dir: settings.cache_dir(),
            min_free: settings.min_free,
            max_usage_percent: settings.max_usage,
            min_age: Duration::from_secs(settings.min_age),
        }
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn is_old_enough_to_evict(&self, path: &Path) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        let Ok(accessed) = meta.accessed() else {
            return false;
        };
        SystemTime::now().duration_since(accessed).is_ok_and(|age| age > self.min_age)
    }

    fn reclaim(&self, mut space_to_free: i64, keep: &Path) -> (bool, Vec<PathBuf>) {
        let mut removed = Vec::new();
        for entry in walk(&self.cache_dir) {
            if space_to_free <= 0 {
                break;
            }
            if entry == keep || !self.is_old_enough_to_evict(&entry) {
                continue;
            }
            let Ok(meta) = std::fs::metadata(&entry) else { continue };
            if std::fs::remove_file(&entry).is_ok() {
                tracing::info!(path = %entry.display(), "removed stale cache entry");
                space_to_free -= meta.len() as i64;
                removed.push(entry);
            }
        }
        (space_to_free <= 0, removed)
    }
}

impl FileSystem for LocalFileSystem {
    fn get_file_info(&self, path: &Path) -> Option<FileInfo> {
        let meta = std::fs::metadata(path).ok()?;
        let mtime = meta.modified().ok()?.duration_since(SystemTime::UNIX_EPOCH).ok()?;
        Some(FileInfo {
            path: path.to_string_lossy().into_owned(),
            size: meta.len().to_string(),
            mtime: mtime.as_secs().to_string(),
        })
    }

    /// The original consults `/proc/mounts` for a prefix match against the
    /// requested path; that table isn't meaningfully reproducible outside
    /// the original NFS deployment, so this returns an empty string
    /// (unknown server) and lets `REQUEST_FILE`'s `file_server` field fall
    /// back to the coordinator's own "unknown" bucket.
    fn get_file_server(&self, _path: &Path) -> String {
        String::new()
    }

    fn disk_free(&self, dir: &Path) -> Option<(u64, u64)> {
        let free = fs2::available_space(dir).ok()?;
        let total = fs2::total_space(dir).ok()?;
        Some((free, total))
    }

    fn check_free_space(&self, filesize: u64, destination: &Path) -> (bool, Vec<PathBuf>) {
        let dir = destination.parent().unwrap_or(&self.cache_dir);
        let Some((free, total)) = self.disk_free(dir) else {
            return (false, Vec::new());
        };
        let available = total as f64 * (self.max_usage_percent / 100.0);
        let mut to_free = 0i64;
        if (total.saturating_sub(free) + filesize) as f64 > available {
            to_free = ((total.saturating_sub(free) + filesize) as f64 - available) as i64;
        }
        if free < self.min_free + filesize {
            to_free = to_free.max((self.min_free + filesize - free) as i64);
        }
        if to_free <= 0 {
            return (true, Vec::new());
        }
        self.reclaim(to_free, destination)
    }

    fn destination_exists(&self, info: &FileInfo, destination: &Path) -> (bool, bool, bool) {
        if !destination.is_file() {
            return (false, true, false);
        }
        let Some(existing) = self.get_file_info(destination) else {
            return (false, true, false);
        };
        if existing.size == info.size && existing.mtime == info.mtime {
            return (true, true, false);
        }
        match std::fs::remove_file(destination) {
            Ok(()) => (false, true, true),
            Err(err) => {
                tracing::error!(path = %destination.display(), error = %err, "cannot remove stale destination");
                (false, false, false)
            }
        }
    }

    fn set_atime(&self, path: &Path) {
        if let Ok(meta) = std::fs::metadata(path) {
            let now = filetime::FileTime::now();
            let mtime = filetime::FileTime::from_last_modification_time(&meta);
            if let Err(err) = filetime::set_file_times(path, now, mtime) {
                tracing::debug!(path = %path.display(), error = %err, "cannot set atime");
            }
        }
    }
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk(&path));
        } else {
            out.push(path);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_for(dir: &Path) -> ClientSettings {
        ClientSettings {
            cache_dir_template: dir.to_string_lossy().into_owned(),
            min_free: 0,
            max_usage: 100.0,
            min_age: 0,
            ..ClientSettings::default()
        }
    }

    #[test]
    fn get_file_info_reports_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"hello").unwrap();
        let fs = LocalFileSystem::new(&settings_for(dir.path()));
        let info = fs.get_file_info(&path).unwrap();
        assert_eq!(info.size, "5");
    }

    #[test]
    fn destination_exists_detects_a_matching_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"hello").unwrap();
        let fs = LocalFileSystem::new(&settings_for(dir.path()));
        let info = fs.get_file_info(&path).unwrap();
        let (exists, can_copy, removed) = fs.destination_exists(&info, &path);
        assert!(exists && can_copy && !removed);
    }

    #[test]
    fn destination_exists_removes_a_stale_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"hello").unwrap();
        let fs = LocalFileSystem::new(&settings_for(dir.path()));
        let stale_info = FileInfo {
            path: path.to_string_lossy().into_owned(),
            size: "999".to_string(),
            mtime: "1".to_string(),
        };
        let (exists, can_copy, removed) = fs.destination_exists(&stale_info, &path);
        assert!(!exists && can_copy && removed);
        assert!(!path.exists());
    }

    #[test]
    fn missing_destination_is_not_an_existing_copy() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new(&settings_for(dir.path()));
        let info = FileInfo {
            path: "x".into(),
            size: "1".into(),
            mtime: "1".into(),
        };
        let (exists, can_copy, removed) = fs.destination_exists(&info, &dir.path().join("missing.bin"));
        assert!(!exists && can_copy && !removed);
    }
}
