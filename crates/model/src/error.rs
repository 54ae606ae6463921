use crate::TabletId;

/// Stable error kinds surfaced across service boundaries.
///
/// The retry envelope keys off these, so their names are part of the
/// client/server contract and must not change meaning between releases.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// The addressed tablet is unknown to the cell.
    NoSuchTablet,
    /// The tablet exists but is not in a state accepting this operation.
    TabletNotMounted,
    /// The request's mount revision does not match the tablet's.
    InvalidMountRevision,
    /// The client-side concurrency limit was hit.
    TooManyConcurrentRequests,
    /// Authentication or ACL failure.
    AuthorizationError,
    /// A path or object could not be resolved.
    ResolveError,
    /// The transaction was aborted server-side.
    Aborted,
    /// An operation was attempted on a transaction outside `Active`.
    TransactionInWrongState,
    /// Transport-level failure: connection, queue overflow, timeout.
    Transport,
    /// Anything else the server reports.
    Generic,
}

impl ErrorKind {
    /// Kinds which indicate the client's mount metadata is stale and a
    /// refreshed cache may succeed.
    pub fn is_metadata_staleness(&self) -> bool {
        matches!(
            self,
            ErrorKind::NoSuchTablet | ErrorKind::TabletNotMounted | ErrorKind::InvalidMountRevision
        )
    }
}

/// An error reported by a remote service, with enough structure for the
/// client to decide on retries.
#[derive(Clone, Debug, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
    /// Set by tablet services on metadata-staleness kinds, naming the
    /// offending tablet.
    pub tablet_id: Option<TabletId>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tablet_id: None,
        }
    }

    pub fn with_tablet(mut self, tablet_id: TabletId) -> Self {
        self.tablet_id = Some(tablet_id);
        self
    }
}
