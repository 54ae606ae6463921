use bytes::Bytes;
use model::{Durability, ServiceError, TabletId, Timestamp, TransactionId};
use proto_tablet::tablet::TransactionActionData;
use std::time::Duration;
use wire::CompressionCodec;

/// One transactional write batch addressed to a tablet.
///
/// The server validates `mount_revision` against the tablet's and refuses
/// to finalize the participant until signatures sum to the terminal
/// constant, which is how lost batches are detected.
#[derive(Clone, Debug)]
pub struct WriteRequest {
    pub transaction_id: TransactionId,
    /// Set under full atomicity only.
    pub transaction_start_timestamp: Option<Timestamp>,
    /// Set under full atomicity only.
    pub transaction_timeout: Option<Duration>,
    pub tablet_id: TabletId,
    pub mount_revision: u64,
    pub durability: Durability,
    pub signature: u32,
    /// Envelope-compressed wire stream of `{command, row}` records.
    pub attachments: Vec<Bytes>,
}

/// A point read addressed to a tablet.
#[derive(Clone, Debug)]
pub struct LookupRequest {
    pub tablet_id: TabletId,
    pub mount_revision: u64,
    pub timestamp: Timestamp,
    pub response_codec: CompressionCodec,
    /// Envelope-compressed wire stream: `LookupRows` command, request
    /// message, schemaful key rowset.
    pub attachments: Vec<Bytes>,
}

#[derive(Clone, Debug)]
pub struct LookupResponse {
    /// Envelope-compressed schemaful rowset in key order; missing keys
    /// yield null rows.
    pub attachments: Vec<Bytes>,
}

/// Posts custom transaction actions to a participant cell.
#[derive(Clone, Debug)]
pub struct RegisterActionsRequest {
    pub transaction_id: TransactionId,
    pub transaction_start_timestamp: Timestamp,
    pub transaction_timeout: Duration,
    pub signature: u32,
    pub actions: Vec<TransactionActionData>,
}

/// Transport to one peer of a participant cell.
///
/// Implementations wrap the RPC stack; the core only depends on this
/// contract, and tests drive it with in-memory cells.
#[async_trait::async_trait]
pub trait TabletChannel: Send + Sync {
    async fn write(&self, req: WriteRequest) -> Result<(), ServiceError>;

    async fn lookup(&self, req: LookupRequest) -> Result<LookupResponse, ServiceError>;

    async fn register_actions(&self, req: RegisterActionsRequest) -> Result<(), ServiceError>;
}
