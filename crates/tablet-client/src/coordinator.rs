use model::{Atomicity, CellId, Durability, MutationId, ServiceError, Timestamp, TransactionId};
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct TransactionStartOptions {
    /// Reuse an existing id when starting a slave transaction on a peer
    /// cluster; `None` lets the coordinator allocate one.
    pub id: Option<TransactionId>,
    pub timeout: Option<Duration>,
    pub atomicity: Atomicity,
    pub durability: Durability,
    /// Register the transaction in the client's sticky registry so that
    /// `attach_transaction` returns this same object with its buffers.
    pub sticky: bool,
}

/// What the coordinator reports back from `start` / `attach`.
#[derive(Clone, Debug)]
pub struct StartedTransaction {
    pub id: TransactionId,
    pub start_timestamp: Timestamp,
    pub timeout: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct CommitOptions {
    pub mutation_id: Option<MutationId>,
    /// Set when replaying a mutation under the same id.
    pub retry: bool,
}

#[derive(Clone, Debug, Default)]
pub struct AbortOptions {
    pub mutation_id: Option<MutationId>,
    pub retry: bool,
    /// Abort even if the coordinator believes a commit is underway.
    pub force: bool,
}

/// The coordinator cell's transaction supervisor, as seen by this client.
///
/// An external collaborator: the client drives participant registration
/// and the final commit decision through it but does not reimplement it.
#[async_trait::async_trait]
pub trait TransactionCoordinator: Send + Sync {
    async fn start(
        &self,
        options: &TransactionStartOptions,
    ) -> Result<StartedTransaction, ServiceError>;

    /// Attach to an existing transaction, optionally resuming pings.
    async fn attach(
        &self,
        id: TransactionId,
        ping: bool,
    ) -> Result<StartedTransaction, ServiceError>;

    async fn add_participant(
        &self,
        id: TransactionId,
        cell_id: CellId,
    ) -> Result<(), ServiceError>;

    async fn ping(&self, id: TransactionId) -> Result<(), ServiceError>;

    /// Drive the distributed commit across `participant_cell_ids` and
    /// return the commit timestamp.
    async fn commit(
        &self,
        id: TransactionId,
        participant_cell_ids: Vec<CellId>,
        options: &CommitOptions,
    ) -> Result<Timestamp, ServiceError>;

    async fn abort(&self, id: TransactionId, options: &AbortOptions) -> Result<(), ServiceError>;
}
