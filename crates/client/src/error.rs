use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Codec(#[from] protocol::CodecError),
    #[error("not connected to the coordinator")]
    NotConnected,
    #[error("connection to the coordinator was closed")]
    ConnectionClosed,
    #[error("unexpected reply from the coordinator: {0:?}")]
    UnexpectedMessage(protocol::MessageKind),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
