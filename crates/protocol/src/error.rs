use thiserror::Error;

/// Failures decoding or encoding a [`crate::Message`] on the wire.
///
/// `ConnectionClosed` is not surfaced as an error: [`crate::decode`] returns
/// `Ok(None)` for a connection closed cleanly between messages. Every other
/// variant here is returned as `Err` and, per the session state machine,
/// terminates the session.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown message type {0:02}")]
    UnknownMessageType(u32),
    #[error("malformed message header {0:?}")]
    InvalidHeader(String),
    #[error("malformed field length")]
    InvalidLength,
    #[error("field of {0} bytes exceeds the 9999-byte wire limit")]
    FieldTooLarge(usize),
    #[error("connection truncated mid-message")]
    Truncated,
    #[error("field contains non-ASCII bytes")]
    NotAscii,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
