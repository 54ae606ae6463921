//! The tablet wire format.
//!
//! Requests to and responses from tablet services carry their row payloads
//! in a framed binary stream: a sequence of command records, length-prefixed
//! protobuf messages, and row serializations, all little-endian and padded
//! to 8-byte alignment. The framed stream is then wrapped in a compression
//! envelope for transmission.

mod envelope;
mod protocol;

pub use envelope::{compress_with_envelope, decompress_envelope, CompressionCodec};
pub use protocol::{Command, Reader, Writer};

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("unexpected end of wire stream at offset {0}")]
    UnexpectedEof(usize),
    #[error("unknown wire command {0:#06x}")]
    BadCommand(u16),
    #[error("unknown value type {0:#04x}")]
    BadValueType(u8),
    #[error("row of {found} values does not match schema width {expected}")]
    SchemaWidthMismatch { expected: usize, found: usize },
    #[error("failed to decode embedded message")]
    BadMessage(#[from] prost::DecodeError),
    #[error("unknown compression codec {0}")]
    UnknownCodec(i32),
    #[error("corrupt compressed payload: {0}")]
    Corrupt(String),
    #[error("envelope declares {declared} uncompressed bytes, found {found}")]
    SizeMismatch { declared: u64, found: u64 },
}
