//! Bundle files: a text list of source paths to fetch together, named
//! `*.bundle`, grounded on `original_source/trunk/client.py`'s
//! `_fetchBundle`/`_getBundleSourceFiles`.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::fs::FileSystem;
use crate::remote::RemoteFileSystem;
use crate::{ClientSession, FetchResult};

#[must_use]
pub fn is_bundle_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "bundle")
}

/// Read a bundle file's entries, skipping blank lines, and sum the size of
/// whichever ones the local filesystem can currently stat.
fn source_files<F: FileSystem>(bundle: &Path, file_system: &F) -> std::io::Result<(Vec<PathBuf>, u64)> {
    let contents = std::fs::read_to_string(bundle)?;
    let mut files = Vec::new();
    let mut total_size = 0u64;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let path = std::fs::canonicalize(line).unwrap_or_else(|_| PathBuf::from(line));
        if let Some(info) = file_system.get_file_info(&path) {
            total_size += info.size.parse::<u64>().unwrap_or(0);
        }
        files.push(path);
    }
    Ok((files, total_size))
}

/// Fetch every file listed in `bundle`, writing the resulting local paths
/// (one per line) to a sibling `.bundle` file under the cache directory.
/// `conjunct` requires every member to cache successfully or the whole
/// bundle is treated as a failure and its output file removed.
pub fn fetch_bundle<F: FileSystem, R: RemoteFileSystem>(session: &mut ClientSession<F, R>, bundle: &Path, conjunct: bool) -> FetchResult {
    if !bundle.is_file() {
        tracing::error!(path = %bundle.display(), "bundle file not found");
        return FetchResult { path: bundle.to_path_buf(), cached: false };
    }
    let mut destination = match session.destination_for(bundle) {
        Ok(d) => d,
        Err(err) => {
            tracing::error!(path = %bundle.display(), error = %err, "cannot resolve bundle destination");
            return FetchResult { path: bundle.to_path_buf(), cached: false };
        }
    };
    // Bundle destinations never overwrite each other: a node that already
    // cached a different bundle at this path gets a uniquely stamped one.
    while destination.is_file() {
        let stem = destination.file_stem().and_then(|s| s.to_str()).unwrap_or("bundle");
        let stamp = format!("{stem}.{}.{}.bundle", session.settings().hostname(), std::process::id());
        destination.set_file_name(stamp);
    }

    let mut out = match std::fs::File::create(&destination) {
        Ok(f) => f,
        Err(err) => {
            tracing::error!(path = %destination.display(), error = %err, "cannot open bundle destination");
            return FetchResult { path: bundle.to_path_buf(), cached: false };
        }
    };

    let (source_files, total_size) = match source_files(bundle, session.file_system()) {
        Ok(v) => v,
        Err(err) => {
            tracing::error!(path = %bundle.display(), error = %err, "cannot read bundle contents");
            return FetchResult { path: bundle.to_path_buf(), cached: false };
        }
    };

    if conjunct {
        let (free, _) = session.file_system().check_free_space(total_size, &destination);
        if !free || source_files.is_empty() {
            tracing::warn!(dir = %destination.display(), "not enough free space for bundle, result is not cached");
            return FetchResult { path: bundle.to_path_buf(), cached: false };
        }
    }

    let mut cached_count = 0usize;
    let mut result_paths = Vec::with_capacity(source_files.len());
    for source in &source_files {
        let result = session.fetch_file(source);
        if result.cached {
            cached_count += 1;
        } else {
            tracing::warn!(path = %source.display(), "cannot cache bundle member");
            if conjunct {
                break;
            }
        }
        result_paths.push(result.path);
    }

    let failed = source_files.len() - cached_count;
    if (failed == source_files.len() && !source_files.is_empty()) || (conjunct && cached_count != source_files.len()) {
        tracing::error!(path = %bundle.display(), "bundle caching failed");
        drop(out);
        let _ = std::fs::remove_file(&destination);
        return FetchResult { path: bundle.to_path_buf(), cached: false };
    }

    for path in &result_paths {
        let _ = writeln!(out, "{}", path.display());
    }
    FetchResult { path: destination, cached: true }
}
