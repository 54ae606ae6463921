//! Messages of the master object service consumed by the mount cache.

use crate::CachingHeader;

/// Phase-one fetch: resolve a path into object identity on the primary
/// master.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReqGetTableAttributes {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub caching_header: ::core::option::Option<CachingHeader>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RspGetTableAttributes {
    #[prost(bytes = "vec", tag = "1")]
    pub table_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(bool, tag = "2")]
    pub dynamic: bool,
    /// Tag of the secondary master cell hosting the table's mount state.
    #[prost(uint32, tag = "3")]
    pub external_cell_tag: u32,
    /// Revision of the primary-master entry serving this response.
    #[prost(uint64, tag = "4")]
    pub revision: u64,
}

/// Phase-two fetch: full mount topology from the hosting master cell.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReqGetMountInfo {
    #[prost(bytes = "vec", tag = "1")]
    pub table_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub caching_header: ::core::option::Option<CachingHeader>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RspGetMountInfo {
    #[prost(bytes = "vec", tag = "1")]
    pub table_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub schema: ::core::option::Option<TableSchema>,
    #[prost(bool, tag = "3")]
    pub dynamic: bool,
    #[prost(bytes = "vec", tag = "4")]
    pub upstream_replica_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "5")]
    pub tablets: ::prost::alloc::vec::Vec<TabletInfo>,
    /// Cell descriptors riding along for the cells named by `tablets`,
    /// folded into the client's cell directory.
    #[prost(message, repeated, tag = "6")]
    pub tablet_cells: ::prost::alloc::vec::Vec<CellDescriptor>,
    #[prost(message, repeated, tag = "7")]
    pub replicas: ::prost::alloc::vec::Vec<ReplicaInfo>,
    /// Revision of the secondary-master entry serving this response.
    #[prost(uint64, tag = "8")]
    pub revision: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableSchema {
    #[prost(message, repeated, tag = "1")]
    pub columns: ::prost::alloc::vec::Vec<ColumnSchema>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ColumnSchema {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    /// Wire code of the column's value type.
    #[prost(uint32, tag = "2")]
    pub r#type: u32,
    #[prost(bool, tag = "3")]
    pub sorted: bool,
    #[prost(string, optional, tag = "4")]
    pub expression: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(bool, tag = "5")]
    pub required: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TabletInfo {
    #[prost(bytes = "vec", tag = "1")]
    pub tablet_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub cell_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub mount_revision: u64,
    #[prost(enumeration = "TabletState", tag = "4")]
    pub state: i32,
    #[prost(enumeration = "InMemoryMode", tag = "5")]
    pub in_memory_mode: i32,
    /// Wire-encoded unversioned row; present for sorted tables only.
    #[prost(bytes = "vec", optional, tag = "6")]
    pub pivot_key: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TabletState {
    Mounting = 0,
    Mounted = 1,
    Unmounting = 2,
    Unmounted = 3,
    Freezing = 4,
    Frozen = 5,
    Unfreezing = 6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum InMemoryMode {
    None = 0,
    Compressed = 1,
    Uncompressed = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CellDescriptor {
    #[prost(bytes = "vec", tag = "1")]
    pub cell_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(int32, tag = "2")]
    pub config_version: i32,
    #[prost(message, repeated, tag = "3")]
    pub peers: ::prost::alloc::vec::Vec<CellPeer>,
    /// Index into `peers` of the known leader, if any.
    #[prost(int32, optional, tag = "4")]
    pub leader_index: ::core::option::Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CellPeer {
    /// Address per network name; the client picks by its preference list.
    #[prost(map = "string, string", tag = "1")]
    pub addresses: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
    #[prost(bool, tag = "2")]
    pub voting: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplicaInfo {
    #[prost(bytes = "vec", tag = "1")]
    pub replica_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "2")]
    pub cluster_name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub replica_path: ::prost::alloc::string::String,
    #[prost(enumeration = "ReplicaMode", tag = "4")]
    pub mode: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReplicaMode {
    Sync = 0,
    Async = 1,
}
