//! Keep-alive thread sending `PING` at a fixed interval while a long copy
//! is in progress, mirroring `original_source/fetcher.py`'s `PingThread`.

use std::io::Write;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use protocol::{encode, Message};

pub struct PingThread {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PingThread {
    /// Start sending `PING` every `interval` on `stream` until [`Self::stop`]
    /// is called or the write fails. Takes ownership of a clone of the
    /// stream, matching the original's one-thread-per-copy design.
    pub fn start<W: Write + Send + 'static>(mut stream: W, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || loop {
            match rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {
                    if encode(&mut stream, &Message::Ping).is_err() {
                        tracing::warn!("ping thread: connection lost");
                        return;
                    }
                }
            }
        });
        Self {
            stop: tx,
            handle: Some(handle),
        }
    }
}

impl Drop for PingThread {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
