//! Wire protocol between a compute-node client and the cache coordinator:
//! message kinds, their fixed arities, and length-prefixed ASCII framing.

mod codec;
mod error;
mod message;

pub use codec::{decode, encode};
pub use error::CodecError;
pub use message::{Message, MessageKind};
