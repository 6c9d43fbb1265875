use thiserror::Error;

/// Failures within a single session. Per the error-handling design, only
/// transport failures and an unexpected protocol sequence are fatal to the
/// session; everything else (stale replicas, scheduler refusals, copy
/// failures) is handled inline in [`crate::session::SessionHandler`]
/// without raising an error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Codec(#[from] protocol::CodecError),
    #[error("connection closed while awaiting a reply")]
    ConnectionClosed,
    #[error("unexpected message at this point in the exchange: {0:?}")]
    UnexpectedMessage(protocol::MessageKind),
}

/// Top-level failure starting or running the coordinator process.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] core::ConfigError),
    #[error(transparent)]
    Snapshot(#[from] crate::snapshot::SnapshotError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
