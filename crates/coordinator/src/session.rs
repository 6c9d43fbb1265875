//! Per-connection request state machine.
//!
//! One [`SessionHandler`] owns one accepted connection end to end: it
//! loops on `decode`, dispatches each message kind to a handler that
//! consults the [`LocationIndex`] and [`TransferScheduler`], and writes
//! the negotiation protocol back to the client. No other session touches
//! this socket.

use core::location::now_secs;
use core::Location;
use protocol::{decode, encode, Message};

use crate::error::SessionError;
use crate::location_index::LocationIndex;
use crate::numeric::parse_num;
use crate::scheduler::TransferScheduler;
use crate::stats::StatsCollector;

pub struct SessionHandler<'a, S> {
    stream: S,
    client_host: String,
    index: &'a LocationIndex,
    scheduler: &'a TransferScheduler,
    stats: &'a StatsCollector,
    client_wait: u64,
    max_wait_copy: u64,
}

impl<'a, S: std::io::Read + std::io::Write> SessionHandler<'a, S> {
    pub fn new(
        stream: S,
        client_host: String,
        index: &'a LocationIndex,
        scheduler: &'a TransferScheduler,
        stats: &'a StatsCollector,
        client_wait: u64,
        max_wait_copy: u64,
    ) -> Self {
        Self {
            stream,
            client_host,
            index,
            scheduler,
            stats,
            client_wait,
            max_wait_copy,
        }
    }

    fn send(&mut self, msg: &Message) -> Result<(), SessionError> {
        encode(&mut self.stream, msg).map_err(Into::into)
    }

    fn recv(&mut self) -> Result<Option<Message>, SessionError> {
        decode(&mut self.stream).map_err(Into::into)
    }

    fn recv_required(&mut self) -> Result<Message, SessionError> {
        self.recv()?.ok_or(SessionError::ConnectionClosed)
    }

    /// Run the session to completion: one request per connection unless
    /// the client sends `KEEP_ALIVE`, in which case the session keeps
    /// serving further requests until `EXIT` or the connection drops.
    #[tracing::instrument(skip(self), fields(client = %self.client_host))]
    pub fn run(&mut self) -> Result<(), SessionError> {
        let mut keep_alive = false;
        loop {
            let Some(msg) = self.recv()? else {
                break;
            };
            let mut completed_a_request = true;
            match msg {
                Message::RequestFile {
                    origin_path,
                    size,
                    mtime,
                    file_server,
                    local_destination,
                    locate_limit: _,
                } => self.handle_request_file(&origin_path, &size, &mtime, &file_server, &local_destination)?,
                Message::GetLocations {
                    origin_path,
                    size: _,
                    mtime: _,
                    locate_limit,
                } => self.handle_get_locations(&origin_path, &locate_limit)?,
                Message::RegisterCopy {
                    origin_path,
                    size,
                    mtime,
                    destination_file_server,
                } => self.handle_register_copy(&origin_path, &size, &mtime, &destination_file_server)?,
                Message::HaveFile {
                    origin_path,
                    size,
                    mtime,
                    local_path,
                } => self.handle_have_file(&origin_path, &size, &mtime, &local_path),
                Message::DeletedCopy {
                    origin_path,
                    size,
                    mtime,
                    local_path,
                } => self.handle_deleted_copy(&origin_path, &size, &mtime, &local_path),
                Message::IsActive { local_destination } => self.handle_is_active(&local_destination)?,
                Message::KeepAlive => {
                    keep_alive = true;
                    completed_a_request = false;
                }
                Message::Exit => break,
                other => {
                    tracing::warn!(kind = ?other.kind(), "unexpected message at top level");
                    return Err(SessionError::UnexpectedMessage(other.kind()));
                }
            }
            if completed_a_request && !keep_alive {
                break;
            }
        }
        Ok(())
    }

    /// §4.4.1: iterate candidate locations, validating each with the
    /// client, until one is confirmed, a peer or origin copy is granted,
    /// or no replica and no origin slot remain.
    fn handle_request_file(
        &mut self,
        origin_path: &str,
        size: &str,
        mtime: &str,
        file_server: &str,
        dst: &str,
    ) -> Result<(), SessionError> {
        self.stats.inc_requests();
        loop {
            if self.scheduler.is_active_transfer(&self.client_host, dst) {
                self.send(&Message::Wait {
                    wait_seconds: self.client_wait.to_string(),
                })?;
                self.stats.inc_wait();
                return Ok(());
            }

            let Some(loc) = self.find_valid_location(origin_path, size, mtime) else {
                return self.attempt_origin_copy(origin_path, size, mtime, file_server, dst);
            };

            if loc.host == self.client_host {
                self.send(&Message::CheckLocal {
                    local_path: loc.path.clone(),
                })?;
                match self.recv_required()? {
                    Message::FileOk => return Ok(()),
                    Message::FileNotOk => {
                        self.index.remove_location(origin_path, &loc);
                        continue;
                    }
                    other => return Err(SessionError::UnexpectedMessage(other.kind())),
                }
            }

            self.send(&Message::CheckRemote {
                host: loc.host.clone(),
                remote_path: loc.path.clone(),
            })?;
            match self.recv_required()? {
                Message::FileOk => {}
                Message::FileNotOk => {
                    self.index.remove_location(origin_path, &loc);
                    continue;
                }
                other => return Err(SessionError::UnexpectedMessage(other.kind())),
            }

            let token = self.scheduler.start_copy_from_node(&loc.host, &self.client_host, dst);
            if token == 0 {
                self.send(&Message::Wait {
                    wait_seconds: self.client_wait.to_string(),
                })?;
                self.stats.inc_wait();
                return Ok(());
            }
            self.send(&Message::CopyFromNode {
                host: loc.host.clone(),
                remote_path: loc.path.clone(),
            })?;
            let (outcome, final_token) = self.wait_for_client(token, &loc.host)?;
            match outcome {
                Some(Message::CopyOk { resulting_local_path }) => {
                    if let (Some(s), Some(m)) = (parse_num(size), parse_num(mtime)) {
                        self.index.add_location(
                            origin_path,
                            Location::new(origin_path, s, m, self.client_host.clone(), resulting_local_path),
                        );
                    }
                    self.stats.inc_copy_from_node();
                }
                Some(Message::CopyFailed) => {
                    self.index.remove_location(origin_path, &loc);
                }
                None => self.stats.inc_aborted(),
                _ => {}
            }
            self.scheduler.end_copy(&loc.host, &self.client_host, final_token);
            return Ok(());
        }
    }

    fn attempt_origin_copy(
        &mut self,
        origin_path: &str,
        size: &str,
        mtime: &str,
        file_server: &str,
        dst: &str,
    ) -> Result<(), SessionError> {
        let server = if file_server.is_empty() { "unknown" } else { file_server };
        let token = self.scheduler.start_copy_from_server(server, &self.client_host, dst);
        if token == 0 {
            self.send(&Message::Fallback)?;
            return Ok(());
        }
        self.send(&Message::CopyFromServer)?;
        let (outcome, final_token) = self.wait_for_client(token, server)?;
        match outcome {
            Some(Message::CopyOk { resulting_local_path }) => {
                if let (Some(s), Some(m)) = (parse_num(size), parse_num(mtime)) {
                    self.index.add_location(
                        origin_path,
                        Location::new(origin_path, s, m, self.client_host.clone(), resulting_local_path),
                    );
                }
                self.stats.inc_copy_from_server();
            }
            None => self.stats.inc_aborted(),
            _ => {}
        }
        self.scheduler.end_copy(server, &self.client_host, final_token);
        Ok(())
    }

    /// Loop picking a location and dropping any pick whose size/mtime
    /// disagree with the request, until a match is found or the record is
    /// exhausted.
    fn find_valid_location(&self, origin_path: &str, size: &str, mtime: &str) -> Option<Location> {
        let (want_size, want_mtime) = (parse_num(size)?, parse_num(mtime)?);
        loop {
            let loc = self
                .index
                .get_location(origin_path, &self.client_host, Some(self.scheduler))?;
            if loc.size == want_size && loc.mtime == want_mtime {
                return Some(loc);
            }
            self.index.remove_location(origin_path, &loc);
        }
    }

    /// Receive messages, discarding `PING`, refreshing the token when more
    /// than `MAX_WAIT_COPY / 2` has elapsed since it was issued. Returns
    /// the first non-ping message (or `None` on a dropped connection) and
    /// the token as it stood at return time.
    fn wait_for_client(&mut self, mut token: u64, src_host: &str) -> Result<(Option<Message>, u64), SessionError> {
        loop {
            let Some(msg) = self.recv()? else {
                return Ok((None, token));
            };
            match msg {
                Message::Ping => {
                    if now_secs().saturating_sub(token) > self.max_wait_copy / 2 {
                        token = self.scheduler.update_token(src_host, &self.client_host, token);
                    }
                }
                other => return Ok((Some(other), token)),
            }
        }
    }

    /// §4.4.2: walk every currently indexed location, checking each with
    /// the client, up to `limit` confirmations or exhaustion.
    fn handle_get_locations(&mut self, origin_path: &str, limit: &str) -> Result<(), SessionError> {
        if !self.index.has_file(origin_path) {
            self.send(&Message::Exit)?;
            return Ok(());
        }
        let limit: usize = limit.parse().unwrap_or(usize::MAX);
        let mut confirmed = 0usize;
        for loc in self.index.get_all_locations(origin_path) {
            if confirmed >= limit {
                break;
            }
            let ok = if loc.host == self.client_host {
                self.send(&Message::CheckLocal {
                    local_path: loc.path.clone(),
                })?;
                matches!(self.recv_required()?, Message::FileOk)
            } else {
                self.send(&Message::CheckRemote {
                    host: loc.host.clone(),
                    remote_path: loc.path.clone(),
                })?;
                matches!(self.recv_required()?, Message::FileOk)
            };
            if ok {
                confirmed += 1;
            } else {
                self.index.remove_location(origin_path, &loc);
            }
        }
        self.send(&Message::Exit)?;
        Ok(())
    }

    /// §4.4.3: a client uploading a freshly produced file registers a
    /// destination-server slot before sending it.
    fn handle_register_copy(
        &mut self,
        origin_path: &str,
        size: &str,
        mtime: &str,
        dest_server: &str,
    ) -> Result<(), SessionError> {
        let server = if dest_server.is_empty() { "unknown" } else { dest_server };
        let token = self.scheduler.start_copy_from_server(server, &self.client_host, origin_path);
        if token == 0 {
            self.send(&Message::Wait {
                wait_seconds: self.client_wait.to_string(),
            })?;
            self.stats.inc_wait();
            return Ok(());
        }
        self.send(&Message::FileOk)?;
        let (outcome, final_token) = self.wait_for_client(token, server)?;
        match outcome {
            Some(Message::CopyOk { resulting_local_path }) => {
                if let (Some(s), Some(m)) = (parse_num(size), parse_num(mtime)) {
                    self.index.add_location(
                        origin_path,
                        Location::new(origin_path, s, m, self.client_host.clone(), resulting_local_path),
                    );
                }
            }
            None => self.stats.inc_aborted(),
            _ => {}
        }
        self.scheduler.end_copy(server, &self.client_host, final_token);
        Ok(())
    }

    /// §4.4.4: unsolicited notification that the client already holds a
    /// copy. No reply is sent.
    fn handle_have_file(&mut self, origin_path: &str, size: &str, mtime: &str, local_path: &str) {
        if let (Some(s), Some(m)) = (parse_num(size), parse_num(mtime)) {
            self.index
                .add_location(origin_path, Location::new(origin_path, s, m, self.client_host.clone(), local_path));
        }
    }

    fn handle_deleted_copy(&mut self, origin_path: &str, size: &str, mtime: &str, local_path: &str) {
        if let (Some(s), Some(m)) = (parse_num(size), parse_num(mtime)) {
            self.index
                .remove_location(origin_path, &Location::new(origin_path, s, m, self.client_host.clone(), local_path));
        }
    }

    fn handle_is_active(&mut self, local_destination: &str) -> Result<(), SessionError> {
        if self.scheduler.is_active_transfer(&self.client_host, local_destination) {
            self.send(&Message::Wait {
                wait_seconds: self.client_wait.to_string(),
            })
        } else {
            self.send(&Message::FileOk)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Duplex {
        read: Cursor<Vec<u8>>,
        write: Vec<u8>,
    }

    impl std::io::Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.read.read(buf)
        }
    }

    impl std::io::Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.write.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn scripted(messages: &[Message]) -> Duplex {
        let mut buf = Vec::new();
        for m in messages {
            encode(&mut buf, m).unwrap();
        }
        Duplex {
            read: Cursor::new(buf),
            write: Vec::new(),
        }
    }

    fn decode_all(bytes: &[u8]) -> Vec<Message> {
        let mut cursor = Cursor::new(bytes.to_vec());
        let mut out = Vec::new();
        while let Some(m) = decode(&mut cursor).unwrap() {
            out.push(m);
        }
        out
    }

    #[test]
    fn cold_miss_grants_origin_copy() {
        let index = LocationIndex::new();
        let scheduler = TransferScheduler::new(4, 1, 300);
        let stats = StatsCollector::new();
        let stream = scripted(&[
            Message::RequestFile {
                origin_path: "/fs/A".into(),
                size: "100".into(),
                mtime: "1000".into(),
                file_server: "fs1".into(),
                local_destination: "/cache/A".into(),
                locate_limit: "4".into(),
            },
            Message::CopyOk {
                resulting_local_path: "/cache/A".into(),
            },
        ]);
        let mut session = SessionHandler::new(stream, "c1".into(), &index, &scheduler, &stats, 30, 300);
        session.run().unwrap();

        let replies = decode_all(&session.stream.write);
        assert_eq!(replies, vec![Message::CopyFromServer]);
        let locations = index.get_all_locations("/fs/A");
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].host, "c1");
        assert_eq!(stats.get().copy_from_server, 1);
    }

    #[test]
    fn warm_hit_checks_local_and_adds_no_location() {
        let index = LocationIndex::new();
        index.add_location("/fs/A", Location::new("/fs/A", 100, 1000, "c1", "/cache/A"));
        let scheduler = TransferScheduler::new(4, 1, 300);
        let stats = StatsCollector::new();
        let stream = scripted(&[
            Message::RequestFile {
                origin_path: "/fs/A".into(),
                size: "100".into(),
                mtime: "1000".into(),
                file_server: "fs1".into(),
                local_destination: "/cache/A".into(),
                locate_limit: "4".into(),
            },
            Message::FileOk,
        ]);
        let mut session = SessionHandler::new(stream, "c1".into(), &index, &scheduler, &stats, 30, 300);
        session.run().unwrap();
        let replies = decode_all(&session.stream.write);
        assert_eq!(
            replies,
            vec![Message::CheckLocal {
                local_path: "/cache/A".into()
            }]
        );
        assert_eq!(index.get_all_locations("/fs/A").len(), 1);
        assert_eq!(stats.get().copy_from_node, 0);
        assert_eq!(stats.get().copy_from_server, 0);
    }

    #[test]
    fn peer_copy_indexes_a_second_location() {
        let index = LocationIndex::new();
        index.add_location("/fs/A", Location::new("/fs/A", 100, 1000, "c1", "/cache/A"));
        let scheduler = TransferScheduler::new(4, 1, 300);
        let stats = StatsCollector::new();
        let stream = scripted(&[
            Message::RequestFile {
                origin_path: "/fs/A".into(),
                size: "100".into(),
                mtime: "1000".into(),
                file_server: "fs1".into(),
                local_destination: "/cache2/A".into(),
                locate_limit: "4".into(),
            },
            Message::FileOk, // CHECK_REMOTE reply
            Message::CopyOk {
                resulting_local_path: "/cache2/A".into(),
            },
        ]);
        let mut session = SessionHandler::new(stream, "c2".into(), &index, &scheduler, &stats, 30, 300);
        session.run().unwrap();

        let locations = index.get_all_locations("/fs/A");
        assert_eq!(locations.len(), 2);
        assert_eq!(stats.get().copy_from_node, 1);
        assert!(scheduler.has_available_slots("c1"));
    }

    #[test]
    fn stale_replica_is_removed_on_file_not_ok() {
        let index = LocationIndex::new();
        index.add_location("/fs/A", Location::new("/fs/A", 100, 1000, "c1", "/cache/A"));
        let scheduler = TransferScheduler::new(4, 1, 300);
        let stats = StatsCollector::new();
        let stream = scripted(&[
            Message::RequestFile {
                origin_path: "/fs/A".into(),
                size: "100".into(),
                mtime: "1000".into(),
                file_server: "fs1".into(),
                local_destination: "/cache/A".into(),
                locate_limit: "4".into(),
            },
            Message::FileNotOk,
            Message::CopyOk {
                resulting_local_path: "/cache/A".into(),
            },
        ]);
        let mut session = SessionHandler::new(stream, "c1".into(), &index, &scheduler, &stats, 30, 300);
        session.run().unwrap();
        // the stale location was removed and replaced by a fresh origin copy
        let locations = index.get_all_locations("/fs/A");
        assert_eq!(locations.len(), 1);
        assert_eq!(stats.get().copy_from_server, 1);
    }

    #[test]
    fn dropped_connection_during_copy_increments_aborted_and_releases_slot() {
        let index = LocationIndex::new();
        let scheduler = TransferScheduler::new(4, 1, 300);
        let stats = StatsCollector::new();
        let stream = scripted(&[Message::RequestFile {
            origin_path: "/fs/A".into(),
            size: "100".into(),
            mtime: "1000".into(),
            file_server: "fs1".into(),
            local_destination: "/cache/A".into(),
            locate_limit: "4".into(),
        }]);
        let mut session = SessionHandler::new(stream, "c1".into(), &index, &scheduler, &stats, 30, 300);
        session.run().unwrap();
        assert_eq!(stats.get().aborted, 1);
        assert!(index.get_all_locations("/fs/A").is_empty());
        assert!(scheduler.has_available_slots("fs1"));
    }

    #[test]
    fn exit_terminates_the_session_without_error() {
        let index = LocationIndex::new();
        let scheduler = TransferScheduler::new(4, 1, 300);
        let stats = StatsCollector::new();
        let stream = scripted(&[Message::Exit]);
        let mut session = SessionHandler::new(stream, "c1".into(), &index, &scheduler, &stats, 30, 300);
        session.run().unwrap();
    }

    #[test]
    fn keep_alive_allows_a_second_request_on_the_same_session() {
        let index = LocationIndex::new();
        let scheduler = TransferScheduler::new(4, 1, 300);
        let stats = StatsCollector::new();
        let stream = scripted(&[
            Message::KeepAlive,
            Message::HaveFile {
                origin_path: "/fs/A".into(),
                size: "100".into(),
                mtime: "1000".into(),
                local_path: "/cache/A".into(),
            },
            Message::Exit,
        ]);
        let mut session = SessionHandler::new(stream, "c1".into(), &index, &scheduler, &stats, 30, 300);
        session.run().unwrap();
        assert_eq!(index.get_all_locations("/fs/A").len(), 1);
    }
}
