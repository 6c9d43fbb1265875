//! TCP accept loop: binds the listening socket, spawns one
//! [`SessionHandler`] thread per connection, and tracks live sessions in a
//! concurrent registry so a shutdown can report how many are still
//! running.

use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::config::CoordinatorSettings;
use crate::location_index::LocationIndex;
use crate::scheduler::TransferScheduler;
use crate::session::SessionHandler;
use crate::stats::StatsCollector;
use crate::workers::ShutdownSignal;

/// Poll interval for noticing shutdown while no connection is pending.
/// Kept short because it bounds shutdown latency, not steady-state CPU
/// use (`accept` still blocks the OS scheduler between polls).
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct Acceptor {
    listener: TcpListener,
    settings: Arc<CoordinatorSettings>,
    index: Arc<LocationIndex>,
    scheduler: Arc<TransferScheduler>,
    stats: Arc<StatsCollector>,
    shutdown: Arc<ShutdownSignal>,
    sessions: Arc<DashMap<u64, ()>>,
    next_id: AtomicU64,
}

impl Acceptor {
    pub fn bind(
        settings: Arc<CoordinatorSettings>,
        index: Arc<LocationIndex>,
        scheduler: Arc<TransferScheduler>,
        stats: Arc<StatsCollector>,
        shutdown: Arc<ShutdownSignal>,
    ) -> std::io::Result<Self> {
        let listener = bind_nonblocking(settings.port, settings.connection_queue as i32)?;
        Ok(Self {
            listener,
            settings,
            index,
            scheduler,
            stats,
            shutdown,
            sessions: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[must_use]
    pub fn live_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Accept connections until shutdown is signaled.
    pub fn serve(&self) {
        while !self.shutdown.is_set() {
            match self.listener.accept() {
                Ok((stream, addr)) => self.spawn_session(stream, addr),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => {
                    tracing::error!(error = %err, "accept failed");
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
        tracing::info!(live_sessions = self.live_session_count(), "acceptor loop exiting");
    }

    fn spawn_session(&self, stream: TcpStream, addr: SocketAddr) {
        let socket_timeout = Duration::from_secs(self.settings.socket_timeout);
        let _ = stream.set_read_timeout(Some(socket_timeout));
        let _ = stream.set_write_timeout(Some(socket_timeout));

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(id, ());
        self.stats.session_started();

        let index = self.index.clone();
        let scheduler = self.scheduler.clone();
        let stats = self.stats.clone();
        let client_wait = self.settings.client_wait;
        let max_wait_copy = self.settings.max_wait_copy;
        let sessions = self.sessions.clone();

        std::thread::spawn(move || {
            let client_host = resolve_client_host(addr);
            let mut session = SessionHandler::new(stream, client_host.clone(), &index, &scheduler, &stats, client_wait, max_wait_copy);
            if let Err(err) = session.run() {
                tracing::warn!(client = %client_host, error = %err, "session terminated");
            }
            stats.session_ended();
            sessions.remove(&id);
        });
    }
}

/// Resolve the peer address to the first label of its DNS name, the same
/// key the client uses for itself (`ClientSettings::hostname`). Falls back
/// to the raw address when reverse resolution fails or the peer connected
/// over IPv6.
fn resolve_client_host(addr: SocketAddr) -> String {
    match addr.ip() {
        std::net::IpAddr::V4(ip) => reverse_lookup_v4(ip).unwrap_or_else(|| addr.ip().to_string()),
        std::net::IpAddr::V6(ip) => ip.to_string(),
    }
}

fn reverse_lookup_v4(ip: Ipv4Addr) -> Option<String> {
    let sockaddr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 0,
        sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(ip.octets()) },
        sin_zero: [0; 8],
    };
    let mut host = [0u8; libc::NI_MAXHOST as usize];
    // SAFETY: `sockaddr` is a valid, fully-initialized sockaddr_in of the
    // declared length; `host` is a writable buffer of `host.len()` bytes.
    // getnameinfo writes at most that many bytes and NUL-terminates on success.
    let rc = unsafe {
        libc::getnameinfo(
            std::ptr::addr_of!(sockaddr).cast(),
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            host.as_mut_ptr().cast(),
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            0,
        )
    };
    if rc != 0 {
        return None;
    }
    let len = host.iter().position(|&b| b == 0).unwrap_or(host.len());
    let name = std::str::from_utf8(&host[..len]).ok()?;
    name.split('.').next().map(str::to_string)
}

fn bind_nonblocking(port: u16, backlog: i32) -> std::io::Result<TcpListener> {
    let address: SocketAddr = ([0, 0, 0, 0], port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(address))?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
