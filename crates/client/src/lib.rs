//! Cache client: the half of the protocol that runs on a compute node,
//! grounded on `original_source/trunk/client.py`'s `CmClient`.

pub mod bundle;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod fs;
pub mod ping;
pub mod remote;

pub use config::ClientSettings;
pub use error::FetchError;
pub use fetcher::{CacheFetcher, Outcome};
pub use fs::{FileInfo, FileSystem, LocalFileSystem};
pub use remote::{ProcessRemoteFileSystem, RemoteFileSystem};

use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result of fetching (or locating) one file: the path to hand back to the
/// caller and whether it is actually a cached copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub path: PathBuf,
    pub cached: bool,
}

/// A connection to the coordinator plus the collaborators every request
/// needs, mirroring `CmClient`. One session can serve many requests
/// (`single = false` in the original) by sending `KEEP_ALIVE` up front and
/// `EXIT` only when dropped.
pub struct ClientSession<F, R> {
    stream: TcpStream,
    settings: ClientSettings,
    file_system: F,
    remote: R,
    keep_alive: bool,
}

impl ClientSession<LocalFileSystem, ProcessRemoteFileSystem> {
    /// Connect using the default local/process-backed collaborators, the
    /// combination every real deployment uses.
    pub fn connect(settings: ClientSettings, keep_alive: bool) -> Result<Self, FetchError> {
        let file_system = LocalFileSystem::new(&settings);
        let remote = ProcessRemoteFileSystem::new(Duration::from_secs(settings.stat_timeout));
        Self::connect_with(settings, file_system, remote, keep_alive)
    }
}

impl<F: FileSystem, R: RemoteFileSystem> ClientSession<F, R> {
    pub fn connect_with(settings: ClientSettings, file_system: F, remote: R, keep_alive: bool) -> Result<Self, FetchError> {
        let stream = TcpStream::connect((settings.master_host.as_str(), settings.master_port))?;
        stream.set_read_timeout(Some(Duration::from_secs(settings.socket_timeout)))?;
        let mut session = Self {
            stream,
            settings,
            file_system,
            remote,
            keep_alive,
        };
        if keep_alive {
            protocol::encode(&mut session.stream, &protocol::Message::KeepAlive)?;
        }
        Ok(session)
    }

    /// `getDestination`: where a cached copy of `filename` would live
    /// under the configured cache directory, creating the parent
    /// directories as needed.
    pub fn destination_for(&self, filename: &Path) -> std::io::Result<PathBuf> {
        let cache_dir = self.file_system_cache_dir();
        let destination = cache_dir.join(filename.strip_prefix("/").unwrap_or(filename));
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(destination)
    }

    fn file_system_cache_dir(&self) -> PathBuf {
        self.settings.cache_dir()
    }

    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    #[must_use]
    pub fn file_system(&self) -> &F {
        &self.file_system
    }

    fn fetcher(&mut self) -> CacheFetcher<'_, &mut TcpStream, F, R> {
        CacheFetcher::new(&mut self.stream, &self.file_system, &self.remote, Duration::from_secs(self.settings.socket_timeout))
    }

    /// `_fetchFile`: resolve a single absolute path to a local copy,
    /// falling back to the original path on any failure.
    pub fn fetch_file(&mut self, filename: &Path) -> FetchResult {
        if !filename.is_file() {
            tracing::error!(path = %filename.display(), "file not found");
            return FetchResult { path: filename.to_path_buf(), cached: false };
        }
        let Some(info) = self.file_system.get_file_info(filename) else {
            return FetchResult { path: filename.to_path_buf(), cached: false };
        };
        let Ok(destination) = self.destination_for(filename) else {
            return FetchResult { path: filename.to_path_buf(), cached: false };
        };
        tracing::debug!(destination = %destination.display(), "destination");

        if destination.is_file() {
            let mut wait = self.fetcher().is_active(&destination);
            while !wait.is_zero() {
                tracing::info!(seconds = wait.as_secs(), "file transfer in progress, waiting");
                std::thread::sleep(wait);
                wait = self.fetcher().is_active(&destination);
            }
        }

        let (exists, can_copy, removed) = self.file_system.destination_exists(&info, &destination);
        if removed {
            tracing::info!(path = %destination.display(), "removed stale destination");
            let _ = self.fetcher().send_file_removed(&info, &destination);
        }
        if exists {
            if !can_copy {
                tracing::error!(path = %destination.display(), "cannot copy file to destination");
                return FetchResult { path: filename.to_path_buf(), cached: false };
            }
            tracing::debug!("using existing cached copy");
            self.file_system.set_atime(&destination);
            let _ = self.fetcher().send_file_location(&info, &destination);
            return FetchResult { path: destination, cached: true };
        }

        let size: u64 = info.size.parse().unwrap_or(0);
        let (free, _removed) = self.file_system.check_free_space(size, &destination);
        if !free {
            tracing::warn!(dir = %self.file_system_cache_dir().display(), "not enough free space");
            if !self.keep_alive {
                let _ = self.fetcher().send_exit();
            }
            return FetchResult { path: filename.to_path_buf(), cached: false };
        }

        tracing::info!(path = %filename.display(), "requesting file");
        let file_server = self.file_system.get_file_server(filename);
        if self.fetcher().request_file(&info, &file_server, &destination).is_err() {
            return FetchResult { path: filename.to_path_buf(), cached: false };
        }
        match self.fetcher().drive_request(&info, &file_server, &destination) {
            Ok(path) => FetchResult { path, cached: true },
            Err(err) => {
                tracing::error!(error = %err, "fetch failed");
                FetchResult { path: filename.to_path_buf(), cached: false }
            }
        }
    }

    /// `getLocations`: confirmed `(host, path)` pairs holding a cached
    /// copy of `filename`, `host` empty for a copy on this node itself.
    pub fn locate(&mut self, filename: &Path, limit: Option<usize>) -> Result<Vec<(String, String)>, FetchError> {
        let filename = std::fs::canonicalize(filename).unwrap_or_else(|_| filename.to_path_buf());
        let info = self
            .file_system
            .get_file_info(&filename)
            .unwrap_or_else(|| FileInfo { path: filename.to_string_lossy().into_owned(), size: String::new(), mtime: String::new() });
        self.fetcher().locate(&info, limit)
    }

    /// `fetch`: resolve `filename`, dispatching to the bundle fetcher
    /// when it is (or is forced to be treated as) a `.bundle` list.
    pub fn fetch(&mut self, filename: &Path, force_bundle: bool, conjunct: bool) -> FetchResult {
        let filename = std::fs::canonicalize(filename).unwrap_or_else(|_| filename.to_path_buf());
        if !self.settings.ignore_bundle && (force_bundle || bundle::is_bundle_file(&filename)) {
            bundle::fetch_bundle(self, &filename, conjunct)
        } else {
            self.fetch_file(&filename)
        }
    }

    /// `copy`: push `source`, already present on local disk, out to
    /// `destination`, asking the coordinator to reserve a slot and
    /// register the result as a new Location when `register` is set.
    /// Falls back to an unsupervised copy when the coordinator's reply
    /// permits it, mirroring `CmClient.copy`/`_copyFile`.
    pub fn copy(&mut self, source: &Path, destination: &Path, register: bool) -> bool {
        let source = std::fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());
        if !source.is_file() {
            tracing::error!(path = %source.display(), "file not found");
            return false;
        }
        let destination = if destination.is_dir() {
            destination.join(source.file_name().unwrap_or_default())
        } else {
            destination.to_path_buf()
        };
        if destination.is_file() {
            tracing::warn!(path = %destination.display(), "overwriting existing file");
        }
        let Some(info) = self.file_system.get_file_info(&source) else {
            tracing::error!(path = %source.display(), "cannot stat file");
            return false;
        };
        let file_server = self.file_system.get_file_server(&destination);
        let (result, try_again) = self.fetcher().register_copy(&info, &file_server, &source, &destination, register);
        if result || !try_again {
            return result;
        }
        match std::fs::copy(&source, &destination) {
            Ok(_) => {
                tracing::info!(source = %source.display(), destination = %destination.display(), "copied (unsupervised)");
                true
            }
            Err(err) => {
                tracing::error!(source = %source.display(), destination = %destination.display(), error = %err, "cannot copy");
                false
            }
        }
    }
}

impl<F, R> Drop for ClientSession<F, R> {
    fn drop(&mut self) {
        if self.keep_alive {
            let _ = protocol::encode(&mut self.stream, &protocol::Message::Exit);
        }
    }
}
