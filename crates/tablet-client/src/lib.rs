//! The transactional client of dynamic tables.
//!
//! Callers buffer row modifications against a client-side transaction,
//! which on commit routes each row to its tablet, folds same-key edits,
//! batches and signs per-tablet write requests, and drives the two-phase
//! commit across every participant cell. Reads share the same routing and
//! mount metadata, including its staleness-retry envelope.

mod cell_session;
mod channel;
mod client;
mod config;
mod coordinator;
mod lookup;
mod modification;
mod router;
mod tablet_session;
mod transaction;

pub use cell_session::{
    CellCommitSession, FINAL_TRANSACTION_SIGNATURE, INITIAL_TRANSACTION_SIGNATURE,
};
pub use channel::{
    LookupRequest, LookupResponse, RegisterActionsRequest, TabletChannel, WriteRequest,
};
pub use client::{Client, ClientOptions, QueryService, TransactionAttachOptions};
pub use config::TabletClientConfig;
pub use coordinator::{
    AbortOptions, CommitOptions, StartedTransaction, TransactionCoordinator,
    TransactionStartOptions,
};
pub use lookup::{LookupRowsOptions, SelectRowsOptions};
pub use modification::{ModifyRowsOptions, RowModification, RowModificationKind};
pub use transaction::{FlushResult, Transaction, TransactionState};

use model::{ErrorKind, ServiceError, TabletId, TransactionId};

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("too many concurrent requests")]
    TooManyConcurrentRequests,
    #[error("command '{0}' timed out")]
    Timeout(String),
    #[error("command '{command}' failed (transaction {transaction_id:?})")]
    Command {
        command: String,
        transaction_id: Option<TransactionId>,
        #[source]
        source: Box<Error>,
    },
    #[error("transaction {id} is already in {state:?} state")]
    TransactionInWrongState {
        id: TransactionId,
        state: TransactionState,
    },
    #[error("transaction affects too many rows (limit {0})")]
    TooManyRowsInTransaction(usize),
    #[error("tablet index {index} is out of range [0, {tablet_count}) for table {path}")]
    TabletIndexOutOfRange {
        path: String,
        index: i64,
        tablet_count: usize,
    },
    #[error("the tablet index of table {0} must be an int64 value")]
    BadTabletIndexValue(String),
    #[error("cannot delete rows from a non-sorted table {0}")]
    DeleteFromOrderedTable(String),
    #[error("atomicity must be 'full' for custom transaction actions")]
    ActionsRequireFullAtomicity,
    #[error("no sticky transaction {0} is registered with this client")]
    NoSuchStickyTransaction(TransactionId),
    #[error("key is outside of the table's key space")]
    KeyOutOfRange,
    #[error(transparent)]
    Row(#[from] row::Error),
    #[error(transparent)]
    Evaluator(#[from] evaluator::Error),
    #[error(transparent)]
    Mount(#[from] mount_cache::Error),
    #[error(transparent)]
    Cells(#[from] cell_directory::Error),
    #[error(transparent)]
    Wire(#[from] wire::Error),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// If this error indicates stale mount metadata, the offending tablet.
    ///
    /// Metadata staleness is the one recoverable failure class: the caller
    /// invalidates the named tablet and retries once the cache refreshes.
    pub fn staleness_tablet(&self) -> Option<TabletId> {
        match self {
            Error::Service(error) if error.kind.is_metadata_staleness() => error.tablet_id,
            Error::Mount(error) => error.tablet_id(),
            Error::Command { source, .. } => source.staleness_tablet(),
            _ => None,
        }
    }

    /// The stable error kind surfaced to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TooManyConcurrentRequests => ErrorKind::TooManyConcurrentRequests,
            Error::TransactionInWrongState { .. } => ErrorKind::TransactionInWrongState,
            Error::Mount(mount_cache::Error::TabletNotMounted(_)) => ErrorKind::TabletNotMounted,
            Error::Mount(_) => ErrorKind::ResolveError,
            Error::Service(error) => error.kind,
            Error::Command { source, .. } => source.kind(),
            Error::Timeout(_) => ErrorKind::Transport,
            _ => ErrorKind::Generic,
        }
    }
}
