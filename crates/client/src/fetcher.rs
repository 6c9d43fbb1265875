//! The client-side mirror of [`coordinator::session::SessionHandler`]:
//! reacts to each message the coordinator sends while a single file is
//! being resolved, grounded on
//! `original_source/fetcher.py`'s `CacheFetcher`.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use protocol::{decode, encode, Message};

use crate::error::FetchError;
use crate::fs::{FileInfo, FileSystem};
use crate::ping::PingThread;
use crate::remote::RemoteFileSystem;

/// Outcome of driving one `REQUEST_FILE` exchange to completion.
pub enum Outcome {
    /// A usable local path was produced (a hit, a fresh copy, or a
    /// fallback to the origin path).
    Resolved(PathBuf),
    /// `WAIT(n)`: caller should sleep `n` and resend `REQUEST_FILE`.
    Wait(Duration),
    /// `EXIT`: the session is over.
    Terminate,
}

/// Something that can hand out an independent writer for the same
/// connection, so a [`PingThread`] can interleave `PING` writes with a
/// blocking copy running on this thread.
pub trait PingSink {
    type Writer: Write + Send + 'static;
    fn ping_writer(&self) -> std::io::Result<Self::Writer>;
}

impl PingSink for std::net::TcpStream {
    type Writer = std::net::TcpStream;
    fn ping_writer(&self) -> std::io::Result<Self::Writer> {
        self.try_clone()
    }
}

impl PingSink for &mut std::net::TcpStream {
    type Writer = std::net::TcpStream;
    fn ping_writer(&self) -> std::io::Result<Self::Writer> {
        (**self).try_clone()
    }
}

pub struct CacheFetcher<'a, S, F, R> {
    stream: S,
    file_system: &'a F,
    remote: &'a R,
    socket_timeout: Duration,
}

impl<'a, S, F, R> CacheFetcher<'a, S, F, R>
where
    S: Read + Write + PingSink,
    F: FileSystem,
    R: RemoteFileSystem,
{
    pub fn new(stream: S, file_system: &'a F, remote: &'a R, socket_timeout: Duration) -> Self {
        Self {
            stream,
            file_system,
            remote,
            socket_timeout,
        }
    }

    fn send(&mut self, msg: &Message) -> Result<(), FetchError> {
        encode(&mut self.stream, msg).map_err(Into::into)
    }

    fn recv(&mut self) -> Result<Option<Message>, FetchError> {
        decode(&mut self.stream).map_err(Into::into)
    }

    pub fn send_exit(&mut self) -> Result<(), FetchError> {
        self.send(&Message::Exit)
    }

    pub fn send_keep_alive(&mut self) -> Result<(), FetchError> {
        self.send(&Message::KeepAlive)
    }

    pub fn send_file_location(&mut self, info: &FileInfo, destination: &Path) -> Result<(), FetchError> {
        self.send(&Message::HaveFile {
            origin_path: info.path.clone(),
            size: info.size.clone(),
            mtime: info.mtime.clone(),
            local_path: destination.to_string_lossy().into_owned(),
        })
    }

    pub fn send_file_removed(&mut self, info: &FileInfo, destination: &Path) -> Result<(), FetchError> {
        self.send(&Message::DeletedCopy {
            origin_path: info.path.clone(),
            size: info.size.clone(),
            mtime: info.mtime.clone(),
            local_path: destination.to_string_lossy().into_owned(),
        })
    }

    /// `IS_ACTIVE`: returns the wait time the coordinator asks for, or
    /// zero if the destination is free (or the connection dropped).
    pub fn is_active(&mut self, destination: &Path) -> Duration {
        if self
            .send(&Message::IsActive {
                local_destination: destination.to_string_lossy().into_owned(),
            })
            .is_err()
        {
            return Duration::ZERO;
        }
        match self.recv() {
            Ok(Some(Message::Wait { wait_seconds })) => Duration::from_secs(wait_seconds.parse().unwrap_or(0)),
            _ => Duration::ZERO,
        }
    }

    /// `GET_LOCATIONS`: ask the coordinator which nodes claim to hold
    /// `origin_path` and confirm each one by answering its `CheckLocal`/
    /// `CheckRemote` probes, mirroring `getLocations`'s confirmation loop
    /// in the original. Returns `(host, path)` for every still-valid copy,
    /// `host` being empty for the requesting node's own local copy.
    pub fn locate(&mut self, info: &FileInfo, limit: Option<usize>) -> Result<Vec<(String, String)>, FetchError> {
        self.send(&Message::GetLocations {
            origin_path: info.path.clone(),
            size: info.size.clone(),
            mtime: info.mtime.clone(),
            locate_limit: limit.map_or(String::new(), |n| n.to_string()),
        })?;
        let mut found = Vec::new();
        loop {
            match self.recv()? {
                Some(Message::CheckLocal { local_path }) => {
                    let ok = self.check_local(info, Path::new(&local_path));
                    self.send(if ok { &Message::FileOk } else { &Message::FileNotOk })?;
                    if ok {
                        found.push((String::new(), local_path));
                    }
                }
                Some(Message::CheckRemote { host, remote_path }) => {
                    let ok = self.check_remote(info, &host, &remote_path);
                    self.send(if ok { &Message::FileOk } else { &Message::FileNotOk })?;
                    if ok {
                        found.push((host, remote_path));
                    }
                }
                Some(Message::Exit) => return Ok(found),
                Some(other) => return Err(FetchError::UnexpectedMessage(other.kind())),
                None => return Err(FetchError::ConnectionClosed),
            }
        }
    }

    pub fn request_file(&mut self, info: &FileInfo, file_server: &str, destination: &Path) -> Result<(), FetchError> {
        self.send(&Message::RequestFile {
            origin_path: info.path.clone(),
            size: info.size.clone(),
            mtime: info.mtime.clone(),
            file_server: file_server.to_string(),
            local_destination: destination.to_string_lossy().into_owned(),
            locate_limit: String::new(),
        })
    }

    /// Drive the mirror state machine to completion for one request,
    /// resending `REQUEST_FILE` after a `WAIT` as the original does.
    pub fn drive_request(&mut self, info: &FileInfo, file_server: &str, destination: &Path) -> Result<PathBuf, FetchError> {
        loop {
            let msg = self.recv()?;
            match self.handle_message(info, destination, msg)? {
                Outcome::Resolved(path) => return Ok(path),
                Outcome::Terminate => return Err(FetchError::ConnectionClosed),
                Outcome::Wait(duration) => {
                    std::thread::sleep(duration);
                    self.request_file(info, file_server, destination)?;
                }
            }
        }
    }

    fn handle_message(&mut self, info: &FileInfo, destination: &Path, msg: Option<Message>) -> Result<Outcome, FetchError> {
        let Some(msg) = msg else {
            return Err(FetchError::ConnectionClosed);
        };
        match msg {
            Message::CheckLocal { local_path } => {
                let local = Path::new(&local_path);
                if self.check_local(info, local) {
                    self.send(&Message::FileOk)?;
                    Ok(Outcome::Resolved(local.to_path_buf()))
                } else {
                    self.send(&Message::FileNotOk)?;
                    self.recv_and_handle(info, destination)
                }
            }
            Message::CheckRemote { host, remote_path } => {
                if self.check_remote(info, &host, &remote_path) {
                    self.remote.brand_file(&host, &remote_path);
                    self.send(&Message::FileOk)?;
                } else {
                    self.send(&Message::FileNotOk)?;
                }
                self.recv_and_handle(info, destination)
            }
            Message::CopyFromNode { host, remote_path } => {
                let ok = self.copy_from_node(&host, &remote_path, destination);
                if ok {
                    self.send(&Message::CopyOk {
                        resulting_local_path: destination.to_string_lossy().into_owned(),
                    })?;
                    Ok(Outcome::Resolved(destination.to_path_buf()))
                } else {
                    self.send(&Message::CopyFailed)?;
                    // The coordinator ends the request once a copy it actually
                    // started fails; it sends nothing further on this turn, so
                    // fall back to the origin path rather than block on a
                    // reply that won't arrive.
                    Ok(Outcome::Resolved(PathBuf::from(&info.path)))
                }
            }
            Message::CopyFromServer => {
                let ok = self.copy_from_server(&info.path, destination);
                if ok {
                    self.send(&Message::CopyOk {
                        resulting_local_path: destination.to_string_lossy().into_owned(),
                    })?;
                    Ok(Outcome::Resolved(destination.to_path_buf()))
                } else {
                    self.send(&Message::CopyFailed)?;
                    Ok(Outcome::Resolved(PathBuf::from(&info.path)))
                }
            }
            Message::Fallback => Ok(Outcome::Resolved(PathBuf::from(&info.path))),
            Message::Wait { wait_seconds } => Ok(Outcome::Wait(Duration::from_secs(wait_seconds.parse().unwrap_or(0)))),
            Message::Exit => Ok(Outcome::Terminate),
            other => Err(FetchError::UnexpectedMessage(other.kind())),
        }
    }

    /// After a `CheckLocal`/`CheckRemote` probe that didn't itself resolve
    /// the request, the coordinator immediately moves on to the next
    /// candidate location or action within the same turn, so just read and
    /// dispatch whatever it sends next.
    fn recv_and_handle(&mut self, info: &FileInfo, destination: &Path) -> Result<Outcome, FetchError> {
        let msg = self.recv()?;
        self.handle_message(info, destination, msg)
    }

    fn check_local(&self, info: &FileInfo, local_path: &Path) -> bool {
        self.file_system
            .get_file_info(local_path)
            .is_some_and(|local| local.size == info.size && local.mtime == info.mtime)
    }

    fn check_remote(&self, info: &FileInfo, host: &str, remote_path: &str) -> bool {
        let Some((size, mtime)) = self.remote.get_file_stat(host, remote_path) else {
            return false;
        };
        info.size.parse::<u64>().ok() == Some(size) && info.mtime.parse::<f64>().ok().map(|m| m as u64) == Some(mtime)
    }

    fn copy_from_node(&mut self, host: &str, remote_path: &str, destination: &Path) -> bool {
        let pinger = self.stream.ping_writer().ok().map(|w| PingThread::start(w, self.socket_timeout / 2));
        let (ok, msg) = self.remote.copy_file(host, remote_path, destination);
        drop(pinger);
        if !ok {
            tracing::error!(%host, remote_path, %msg, "cannot copy from node");
            return false;
        }
        self.file_system.set_atime(destination);
        true
    }

    fn copy_from_server(&mut self, source: &str, destination: &Path) -> bool {
        let pinger = self.stream.ping_writer().ok().map(|w| PingThread::start(w, self.socket_timeout / 2));
        let (ok, msg) = self.remote.copy_using_cp(source, destination);
        drop(pinger);
        if !ok {
            tracing::error!(source, %msg, "cannot copy from origin");
            return false;
        }
        self.file_system.set_atime(destination);
        true
    }

    /// `_copyFile`: ask the coordinator to reserve a slot for a client-
    /// initiated push of `source` to `destination`, resending after `WAIT`
    /// until granted or refused outright. Returns `(copied, try_again)`:
    /// `try_again` is false only when the coordinator never got to grant
    /// or refuse the copy (so an unsupervised fallback would duplicate
    /// work it already did), true in every other non-success case.
    pub fn register_copy(&mut self, info: &FileInfo, destination_file_server: &str, source: &Path, destination: &Path, register: bool) -> (bool, bool) {
        let request = Message::RegisterCopy {
            origin_path: info.path.clone(),
            size: info.size.clone(),
            mtime: info.mtime.clone(),
            destination_file_server: destination_file_server.to_string(),
        };
        if self.send(&request).is_err() {
            return (false, true);
        }
        loop {
            match self.recv() {
                Ok(Some(Message::Wait { wait_seconds })) => {
                    std::thread::sleep(Duration::from_secs(wait_seconds.parse().unwrap_or(0)));
                    if self.send(&request).is_err() {
                        return (false, true);
                    }
                }
                Ok(Some(Message::FileOk)) => return self.copy_and_reply(source, destination, register),
                Ok(Some(other)) => {
                    tracing::error!(kind = ?other.kind(), "unexpected reply to register copy");
                    return (false, true);
                }
                Ok(None) | Err(_) => return (false, true),
            }
        }
    }

    fn copy_and_reply(&mut self, source: &Path, destination: &Path, register: bool) -> (bool, bool) {
        let pinger = self.stream.ping_writer().ok().map(|w| PingThread::start(w, self.socket_timeout / 2));
        let copied = std::fs::copy(source, destination).is_ok();
        drop(pinger);
        let reply = if copied && register {
            Message::CopyOk {
                resulting_local_path: destination.to_string_lossy().into_owned(),
            }
        } else {
            if copied {
                tracing::debug!("copy succeeded but the new location is not registered");
            } else {
                tracing::error!(source = %source.display(), destination = %destination.display(), "cannot copy");
            }
            Message::CopyFailed
        };
        let _ = self.send(&reply);
        (copied, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// A fake connection: `inbound` holds the bytes the coordinator would
    /// have sent, `outbound` records everything the fetcher writes back.
    struct FakeStream {
        inbound: Cursor<Vec<u8>>,
        outbound: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for FakeStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inbound.read(buf)
        }
    }

    impl Write for FakeStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbound.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl PingSink for FakeStream {
        type Writer = Vec<u8>;
        fn ping_writer(&self) -> std::io::Result<Self::Writer> {
            Ok(Vec::new())
        }
    }

    fn fake_stream(messages: &[Message]) -> (FakeStream, Arc<Mutex<Vec<u8>>>) {
        let mut inbound = Vec::new();
        for msg in messages {
            encode(&mut inbound, msg).unwrap();
        }
        let outbound = Arc::new(Mutex::new(Vec::new()));
        (
            FakeStream {
                inbound: Cursor::new(inbound),
                outbound: outbound.clone(),
            },
            outbound,
        )
    }

    fn written_messages(outbound: &Arc<Mutex<Vec<u8>>>) -> Vec<Message> {
        let bytes = outbound.lock().unwrap().clone();
        let mut cursor = Cursor::new(bytes);
        let mut out = Vec::new();
        while let Some(msg) = decode(&mut cursor).unwrap() {
            out.push(msg);
        }
        out
    }

    struct FakeFileSystem {
        matches: bool,
    }

    impl FileSystem for FakeFileSystem {
        fn get_file_info(&self, path: &Path) -> Option<FileInfo> {
            self.matches.then(|| FileInfo {
                path: path.to_string_lossy().into_owned(),
                size: "10".to_string(),
                mtime: "1000".to_string(),
            })
        }
        fn get_file_server(&self, _path: &Path) -> String {
            String::new()
        }
        fn disk_free(&self, _dir: &Path) -> Option<(u64, u64)> {
            Some((1, 1))
        }
        fn check_free_space(&self, _filesize: u64, _destination: &Path) -> (bool, Vec<PathBuf>) {
            (true, Vec::new())
        }
        fn destination_exists(&self, _info: &FileInfo, _destination: &Path) -> (bool, bool, bool) {
            (false, true, false)
        }
        fn set_atime(&self, _path: &Path) {}
    }

    struct FakeRemote {
        copy_ok: bool,
    }

    impl RemoteFileSystem for FakeRemote {
        fn is_host_alive(&self, _host: &str) -> bool {
            true
        }
        fn get_file_stat(&self, _host: &str, _path: &str) -> Option<(u64, u64)> {
            Some((10, 1000))
        }
        fn copy_file(&self, _host: &str, _source: &str, _destination: &Path) -> (bool, String) {
            (self.copy_ok, String::new())
        }
        fn copy_using_cp(&self, _source: &str, _destination: &Path) -> (bool, String) {
            (self.copy_ok, String::new())
        }
        fn brand_file(&self, _host: &str, _path: &str) {}
    }

    fn info() -> FileInfo {
        FileInfo {
            path: "/origin/a.bin".to_string(),
            size: "10".to_string(),
            mtime: "1000".to_string(),
        }
    }

    #[test]
    fn check_local_hit_resolves_to_the_local_path() {
        let (stream, outbound) = fake_stream(&[Message::CheckLocal {
            local_path: "/cache/a.bin".to_string(),
        }]);
        let fs = FakeFileSystem { matches: true };
        let remote = FakeRemote { copy_ok: true };
        let mut fetcher = CacheFetcher::new(stream, &fs, &remote, Duration::from_secs(1));
        let resolved = fetcher.drive_request(&info(), "", Path::new("/cache/a.bin")).unwrap();
        assert_eq!(resolved, PathBuf::from("/cache/a.bin"));
        assert_eq!(written_messages(&outbound), vec![Message::FileOk]);
    }

    #[test]
    fn check_local_miss_then_copy_from_server_resolves() {
        let (stream, outbound) = fake_stream(&[Message::CheckLocal {
            local_path: "/cache/a.bin".to_string(),
        }, Message::CopyFromServer]);
        let fs = FakeFileSystem { matches: false };
        let remote = FakeRemote { copy_ok: true };
        let mut fetcher = CacheFetcher::new(stream, &fs, &remote, Duration::from_secs(1));
        let resolved = fetcher.drive_request(&info(), "", Path::new("/cache/a.bin")).unwrap();
        assert_eq!(resolved, PathBuf::from("/cache/a.bin"));
        assert_eq!(written_messages(&outbound), vec![Message::FileNotOk, Message::CopyOk { resulting_local_path: "/cache/a.bin".to_string() }]);
    }

    #[test]
    fn copy_failure_falls_back_to_the_origin_path() {
        let (stream, outbound) = fake_stream(&[Message::CopyFromServer]);
        let fs = FakeFileSystem { matches: false };
        let remote = FakeRemote { copy_ok: false };
        let mut fetcher = CacheFetcher::new(stream, &fs, &remote, Duration::from_secs(1));
        let resolved = fetcher.drive_request(&info(), "", Path::new("/cache/a.bin")).unwrap();
        assert_eq!(resolved, PathBuf::from("/origin/a.bin"));
        assert_eq!(written_messages(&outbound), vec![Message::CopyFailed]);
    }

    #[test]
    fn fallback_resolves_to_the_origin_path() {
        let (stream, _outbound) = fake_stream(&[Message::Fallback]);
        let fs = FakeFileSystem { matches: false };
        let remote = FakeRemote { copy_ok: true };
        let mut fetcher = CacheFetcher::new(stream, &fs, &remote, Duration::from_secs(1));
        let resolved = fetcher.drive_request(&info(), "", Path::new("/cache/a.bin")).unwrap();
        assert_eq!(resolved, PathBuf::from("/origin/a.bin"));
    }

    #[test]
    fn register_copy_waits_then_copies_and_registers() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let destination = dir.path().join("destination.bin");
        std::fs::write(&source, b"hello").unwrap();
        let (stream, outbound) = fake_stream(&[
            Message::Wait { wait_seconds: "0".to_string() },
            Message::FileOk,
        ]);
        let fs = FakeFileSystem { matches: true };
        let remote = FakeRemote { copy_ok: true };
        let mut fetcher = CacheFetcher::new(stream, &fs, &remote, Duration::from_secs(1));
        let (copied, try_again) = fetcher.register_copy(&info(), "", &source, &destination, true);
        assert!(copied && try_again);
        assert_eq!(std::fs::read(&destination).unwrap(), b"hello");
        let sent = written_messages(&outbound);
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], Message::RegisterCopy { .. }));
        assert_eq!(sent[1], Message::CopyOk { resulting_local_path: destination.to_string_lossy().into_owned() });
    }

    #[test]
    fn register_copy_without_registering_still_copies_but_reports_failed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let destination = dir.path().join("destination.bin");
        std::fs::write(&source, b"hello").unwrap();
        let (stream, outbound) = fake_stream(&[Message::FileOk]);
        let fs = FakeFileSystem { matches: true };
        let remote = FakeRemote { copy_ok: true };
        let mut fetcher = CacheFetcher::new(stream, &fs, &remote, Duration::from_secs(1));
        let (copied, _) = fetcher.register_copy(&info(), "", &source, &destination, false);
        assert!(copied);
        assert_eq!(written_messages(&outbound).last(), Some(&Message::CopyFailed));
    }

    #[test]
    fn register_copy_refused_allows_an_unsupervised_retry() {
        let (stream, _outbound) = fake_stream(&[Message::Fallback]);
        let fs = FakeFileSystem { matches: true };
        let remote = FakeRemote { copy_ok: true };
        let mut fetcher = CacheFetcher::new(stream, &fs, &remote, Duration::from_secs(1));
        let (copied, try_again) = fetcher.register_copy(&info(), "", Path::new("/tmp/a"), Path::new("/tmp/b"), true);
        assert!(!copied && try_again);
    }

    #[test]
    fn locate_confirms_local_and_remote_copies() {
        let (stream, _outbound) = fake_stream(&[
            Message::CheckLocal {
                local_path: "/cache/a.bin".to_string(),
            },
            Message::CheckRemote {
                host: "node2".to_string(),
                remote_path: "/cache/a.bin".to_string(),
            },
            Message::Exit,
        ]);
        let fs = FakeFileSystem { matches: true };
        let remote = FakeRemote { copy_ok: true };
        let mut fetcher = CacheFetcher::new(stream, &fs, &remote, Duration::from_secs(1));
        let found = fetcher.locate(&info(), None).unwrap();
        assert_eq!(found, vec![(String::new(), "/cache/a.bin".to_string()), ("node2".to_string(), "/cache/a.bin".to_string())]);
    }
}
