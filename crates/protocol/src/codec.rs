//! Length-prefixed framing over a blocking stream socket.
//!
//! # Wire Format
//!
//! ```text
//! [2-digit decimal type][ 4-digit decimal length, then that many ASCII bytes ]*
//! ```
//!
//! The codec is transport-agnostic: it reads and writes through
//! `std::io::Read`/`Write`, so callers can drive it over a `TcpStream` in
//! production or a `Cursor<Vec<u8>>` in tests.

use std::io::{Read, Write};

use crate::error::CodecError;
use crate::message::{Message, MessageKind};

const TYPE_WIDTH: usize = 2;
const LEN_WIDTH: usize = 4;
const MAX_FIELD_LEN: usize = 9999;

/// Read the next message from `reader`.
///
/// Returns `Ok(None)` if the connection was closed cleanly before a new
/// message began (the "connection-closed" sentinel); any other I/O failure,
/// or an EOF in the middle of a message, is a hard [`CodecError`].
pub fn decode<R: Read>(reader: &mut R) -> Result<Option<Message>, CodecError> {
    let mut type_buf = [0u8; TYPE_WIDTH];
    if !fill_allowing_leading_eof(reader, &mut type_buf)? {
        return Ok(None);
    }
    let code = parse_digits(&type_buf).ok_or_else(|| {
        CodecError::InvalidHeader(String::from_utf8_lossy(&type_buf).into_owned())
    })?;
    let kind = MessageKind::from_code(code).ok_or(CodecError::UnknownMessageType(code))?;

    let arity = kind.arity();
    let mut fields = Vec::with_capacity(arity);
    for _ in 0..arity {
        let mut len_buf = [0u8; LEN_WIDTH];
        read_exact(reader, &mut len_buf)?;
        let len = parse_digits(&len_buf).ok_or(CodecError::InvalidLength)? as usize;

        let mut data = vec![0u8; len];
        read_exact(reader, &mut data)?;
        if !data.is_ascii() {
            return Err(CodecError::NotAscii);
        }
        // Safety of `unwrap`: `is_ascii()` above guarantees valid UTF-8.
        fields.push(String::from_utf8(data).expect("ascii bytes are valid utf-8"));
    }
    Ok(Some(Message::from_parts(kind, fields)))
}

/// Write `message` to `writer` as a single framed unit. Callers that share
/// one connection across threads must serialize calls to `encode`
/// themselves; the codec does not buffer or lock.
pub fn encode<W: Write>(writer: &mut W, message: &Message) -> Result<(), CodecError> {
    let code = message.kind().code();
    writer.write_all(format!("{code:0width$}", width = TYPE_WIDTH).as_bytes())?;
    for field in message.fields() {
        if field.len() > MAX_FIELD_LEN {
            return Err(CodecError::FieldTooLarge(field.len()));
        }
        if !field.is_ascii() {
            return Err(CodecError::NotAscii);
        }
        writer.write_all(format!("{:0width$}", field.len(), width = LEN_WIDTH).as_bytes())?;
        writer.write_all(field.as_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Fill `buf` entirely, treating a zero-byte read at the very start as a
/// clean EOF (`Ok(false)`) and a zero-byte read after partial progress as
/// [`CodecError::Truncated`].
fn fill_allowing_leading_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return if filled == 0 {
                Ok(false)
            } else {
                Err(CodecError::Truncated)
            };
        }
        filled += n;
    }
    Ok(true)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), CodecError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            CodecError::Truncated
        } else {
            CodecError::Io(err)
        }
    })
}

fn parse_digits(buf: &[u8]) -> Option<u32> {
    if !buf.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(buf).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(msg: &Message) -> Message {
        let mut buf = Vec::new();
        encode(&mut buf, msg).unwrap();
        let mut cursor = Cursor::new(buf);
        decode(&mut cursor).unwrap().unwrap()
    }

    #[test]
    fn roundtrips_zero_arity_message() {
        assert_eq!(roundtrip(&Message::Ping), Message::Ping);
        assert_eq!(roundtrip(&Message::Exit), Message::Exit);
    }

    #[test]
    fn roundtrips_request_file() {
        let msg = Message::RequestFile {
            origin_path: "/fs/A".into(),
            size: "100".into(),
            mtime: "1000".into(),
            file_server: "fs1".into(),
            local_destination: "/cache/A".into(),
            locate_limit: "4".into(),
        };
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn empty_field_encodes_as_zero_length() {
        let msg = Message::Wait {
            wait_seconds: String::new(),
        };
        let mut buf = Vec::new();
        encode(&mut buf, &msg).unwrap();
        assert_eq!(&buf, b"120000");
    }

    #[test]
    fn decode_returns_none_on_clean_close() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(decode(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn decode_fails_on_truncated_header() {
        let mut cursor = Cursor::new(b"1".to_vec());
        assert!(matches!(decode(&mut cursor), Err(CodecError::Truncated)));
    }

    #[test]
    fn decode_fails_on_unknown_type() {
        let mut cursor = Cursor::new(b"99".to_vec());
        assert!(matches!(
            decode(&mut cursor),
            Err(CodecError::UnknownMessageType(99))
        ));
    }

    #[test]
    fn decode_fails_on_truncated_field_body() {
        // PING header is type 19 with arity 0, so use CHECK_LOCAL (arity 1)
        // with a length prefix promising more bytes than are present.
        let mut cursor = Cursor::new(b"020010ab".to_vec());
        assert!(matches!(decode(&mut cursor), Err(CodecError::Truncated)));
    }

    #[test]
    fn encode_rejects_oversized_field() {
        let msg = Message::CheckLocal {
            local_path: "a".repeat(10_000),
        };
        let mut buf = Vec::new();
        assert!(matches!(
            encode(&mut buf, &msg),
            Err(CodecError::FieldTooLarge(10_000))
        ));
    }

    #[test]
    fn non_digit_header_is_invalid() {
        let mut cursor = Cursor::new(b"xx".to_vec());
        assert!(matches!(decode(&mut cursor), Err(CodecError::InvalidHeader(_))));
    }
}
