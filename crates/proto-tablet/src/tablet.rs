//! Messages of the tablet service: point reads and transactional writes.

/// Rides inside the wire buffer of a `LookupRows` request, ahead of the
/// schemaful key rowset.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReqLookupRows {
    /// Primary-schema positions to return; empty means all columns.
    #[prost(uint32, repeated, tag = "1")]
    pub column_filter_indexes: ::prost::alloc::vec::Vec<u32>,
}

/// A custom action posted to a participant cell, executed atomically with
/// the transaction commit.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionActionData {
    #[prost(string, tag = "1")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}
