//! Protocol message types of the tablet client.
//!
//! These mirror the `.proto` definitions of the platform's tablet and
//! master services. They are vendored in generated form so that consumers
//! do not need protoc at build time; field tags are part of the wire
//! contract and must not be renumbered.

pub mod master;
pub mod tablet;

use model::Guid;

/// Framing around an otherwise opaque compressed payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    /// Codec id; see `wire::CompressionCodec`.
    #[prost(int32, tag = "1")]
    pub codec: i32,
    #[prost(uint64, tag = "2")]
    pub uncompressed_size: u64,
}

/// Cache-control header attached to master reads served from follower
/// caches.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CachingHeader {
    #[prost(uint64, tag = "1")]
    pub success_expiration_time_ms: u64,
    #[prost(uint64, tag = "2")]
    pub failure_expiration_time_ms: u64,
    /// Refuse cached entries older than this revision.
    #[prost(uint64, tag = "3")]
    pub refresh_revision: u64,
}

/// Encode a 128-bit id into its proto field form.
pub fn guid_to_proto(guid: Guid) -> Vec<u8> {
    guid.as_bytes().to_vec()
}

/// Decode a proto id field; `None` if it is not 16 bytes.
pub fn guid_from_proto(bytes: &[u8]) -> Option<Guid> {
    let bytes: [u8; 16] = bytes.try_into().ok()?;
    Some(Guid::from_bytes(bytes))
}
