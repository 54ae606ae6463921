use crate::cell_session::CellCommitSession;
use crate::client::{Client, ClientCore};
use crate::coordinator::{AbortOptions, CommitOptions, StartedTransaction};
use crate::lookup::{self, LookupRowsOptions, SelectRowsOptions};
use crate::modification::{ModificationRequest, ModifyRowsOptions, RowModification};
use crate::router;
use crate::tablet_session::TabletCommitSession;
use crate::Error;
use cell_directory::PeerKind;
use futures::future::{BoxFuture, FutureExt, Shared};
use model::{timestamp, Atomicity, CellId, Durability, TableId, TabletId, Timestamp, TransactionId};
use mount_cache::TabletInfo;
use proto_tablet::tablet::TransactionActionData;
use row::{IdMapping, NameTable, Row, RowBuffer, SchemaKind, TABLET_INDEX_COLUMN_NAME};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Commit,
    Abort,
    Flush,
    Detach,
}

/// The per-transaction facts commit sessions need; passing this view
/// instead of a transaction reference keeps sessions free of back-pointers.
#[derive(Clone, Debug)]
pub(crate) struct CommitContext {
    pub transaction_id: TransactionId,
    pub start_timestamp: Timestamp,
    pub timeout: Duration,
    pub atomicity: Atomicity,
    pub durability: Durability,
}

/// Commit participants discovered as batches are acknowledged.
#[derive(Default)]
pub(crate) struct ParticipantSet(Mutex<BTreeSet<CellId>>);

impl ParticipantSet {
    pub fn insert(&self, cell_id: CellId) {
        self.0.lock().unwrap().insert(cell_id);
    }

    pub fn snapshot(&self) -> Vec<CellId> {
        self.0.lock().unwrap().iter().copied().collect()
    }
}

/// Outcome of flushing this transaction as a participant of an outer
/// commit driven elsewhere.
pub struct FlushResult {
    /// Cells this transaction touched; the outer commit adds them to its
    /// own participant set.
    pub participant_cell_ids: Vec<CellId>,
    /// Resolves when every in-flight batch of this transaction has been
    /// acknowledged.
    pub async_result: BoxFuture<'static, Result<(), Error>>,
}

type SharedAbort = Shared<BoxFuture<'static, Result<(), Error>>>;

struct StateSlot {
    state: TransactionState,
    abort_future: Option<SharedAbort>,
}

/// A client-side tablet transaction.
///
/// `modify_rows` buffers edits locally; `commit` routes them to tablets,
/// ships signed batches, flushes slave transactions, and drives the
/// coordinator commit. The object is uniquely owned by its client's sticky
/// registry or by the caller; everything it spawns is owned by it.
pub struct Transaction {
    core: ClientCore,
    id: TransactionId,
    start_timestamp: Timestamp,
    timeout: Duration,
    atomicity: Atomicity,
    durability: Durability,

    state: Mutex<StateSlot>,
    requests: Mutex<Vec<ModificationRequest>>,
    row_buffer: Mutex<RowBuffer>,
    cell_sessions: Mutex<HashMap<CellId, Arc<CellCommitSession>>>,
    participants: Arc<ParticipantSet>,
    slaves: Mutex<Vec<Arc<Transaction>>>,
    committed_handlers: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    aborted_handlers: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    /// Ordered tables route index-less rows to one mounted tablet chosen
    /// per table and pinned for the transaction's lifetime.
    random_ordered_tablets: Mutex<HashMap<TableId, Arc<TabletInfo>>>,
    /// Caches name-table → schema id mappings, keyed by name table
    /// identity and schema kind.
    mapping_cache: Mutex<HashMap<(usize, SchemaKind), Arc<IdMapping>>>,
    /// Serializes the commit path: `commit` and `flush` steps run in
    /// order with no intra-transaction races.
    commit_gate: tokio::sync::Mutex<()>,
    commit_timestamp: Mutex<Option<Timestamp>>,
    ping_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Transaction {
    pub(crate) fn new(
        core: ClientCore,
        started: StartedTransaction,
        atomicity: Atomicity,
        durability: Durability,
    ) -> Arc<Self> {
        let max_row_buffer_size = core.config.max_row_buffer_size;
        let transaction = Arc::new(Self {
            core,
            id: started.id,
            start_timestamp: started.start_timestamp,
            timeout: started.timeout,
            atomicity,
            durability,
            state: Mutex::new(StateSlot {
                state: TransactionState::Active,
                abort_future: None,
            }),
            requests: Mutex::new(Vec::new()),
            row_buffer: Mutex::new(RowBuffer::new(max_row_buffer_size)),
            cell_sessions: Mutex::new(HashMap::new()),
            participants: Arc::new(ParticipantSet::default()),
            slaves: Mutex::new(Vec::new()),
            committed_handlers: Mutex::new(Vec::new()),
            aborted_handlers: Mutex::new(Vec::new()),
            random_ordered_tablets: Mutex::new(HashMap::new()),
            mapping_cache: Mutex::new(HashMap::new()),
            commit_gate: tokio::sync::Mutex::new(()),
            commit_timestamp: Mutex::new(None),
            ping_task: Mutex::new(None),
        });
        transaction.spawn_ping_loop();
        transaction
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn start_timestamp(&self) -> Timestamp {
        self.start_timestamp
    }

    pub fn commit_timestamp(&self) -> Option<Timestamp> {
        *self.commit_timestamp.lock().unwrap()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn atomicity(&self) -> Atomicity {
        self.atomicity
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    pub fn state(&self) -> TransactionState {
        self.state.lock().unwrap().state
    }

    /// The timestamp reads through this transaction observe: its own
    /// start under full atomicity, or the sync-last-committed sentinel
    /// (resolved server-side) under relaxed atomicity.
    pub fn read_timestamp(&self) -> Timestamp {
        match self.atomicity {
            Atomicity::Full => self.start_timestamp,
            Atomicity::None => timestamp::SYNC_LAST_COMMITTED_TIMESTAMP,
        }
    }

    /// Buffer row modifications against `path`. Structural errors (bad
    /// schema, bad key) surface when the rows are routed during commit.
    pub fn modify_rows(
        &self,
        path: &str,
        name_table: Arc<NameTable>,
        modifications: Vec<RowModification>,
        _options: &ModifyRowsOptions,
    ) -> Result<(), Error> {
        self.validate_active()?;

        let count = modifications.len();
        self.requests.lock().unwrap().push(ModificationRequest {
            path: path.to_string(),
            tablet_index_column_id: name_table.find_id(TABLET_INDEX_COLUMN_NAME),
            name_table,
            modifications,
        });

        tracing::debug!(
            transaction_id = %self.id,
            path,
            count,
            "row modifications buffered",
        );
        Ok(())
    }

    pub fn write_rows(
        &self,
        path: &str,
        name_table: Arc<NameTable>,
        rows: Vec<Row>,
    ) -> Result<(), Error> {
        self.modify_rows(
            path,
            name_table,
            rows.into_iter().map(RowModification::write).collect(),
            &ModifyRowsOptions::default(),
        )
    }

    pub fn delete_rows(
        &self,
        path: &str,
        name_table: Arc<NameTable>,
        keys: Vec<Row>,
    ) -> Result<(), Error> {
        self.modify_rows(
            path,
            name_table,
            keys.into_iter().map(RowModification::delete).collect(),
            &ModifyRowsOptions::default(),
        )
    }

    /// Point lookups bound to this transaction's read timestamp.
    pub async fn lookup_rows(
        &self,
        path: &str,
        name_table: Arc<NameTable>,
        keys: Vec<Row>,
        options: &LookupRowsOptions,
    ) -> Result<Vec<Option<Row>>, Error> {
        let options = LookupRowsOptions {
            timestamp: self.read_timestamp(),
            ..options.clone()
        };
        lookup::lookup_rows_with_retries(&self.core, path, name_table, keys, options).await
    }

    /// Query execution bound to this transaction's read timestamp. The
    /// query engine itself is an external collaborator.
    pub async fn select_rows(
        &self,
        query: &str,
        options: &SelectRowsOptions,
    ) -> Result<Vec<Row>, Error> {
        lookup::select_rows(&self.core, query, self.read_timestamp(), options).await
    }

    /// Register a custom action executed atomically with the commit on
    /// `cell_id`.
    pub fn add_action(&self, cell_id: CellId, data: TransactionActionData) -> Result<(), Error> {
        self.validate_active()?;
        if self.atomicity != Atomicity::Full {
            return Err(Error::ActionsRequireFullAtomicity);
        }

        self.participants.insert(cell_id);
        let action_type = data.r#type.clone();
        self.cell_session(cell_id).register_action(data);

        tracing::debug!(
            transaction_id = %self.id,
            cell_id = %cell_id,
            action_type,
            "transaction action added",
        );
        Ok(())
    }

    /// Start (or reuse) the same-id transaction on a peer cluster, and
    /// register it to be flushed when this transaction commits.
    pub async fn start_slave_transaction(
        self: &Arc<Self>,
        peer: &Client,
    ) -> Result<Arc<Transaction>, Error> {
        if peer.cluster() == self.core.cluster {
            return Ok(self.clone());
        }

        let slave = peer
            .start_transaction(&crate::TransactionStartOptions {
                id: Some(self.id),
                timeout: Some(self.timeout),
                atomicity: self.atomicity,
                durability: self.durability,
                sticky: false,
            })
            .await?;
        self.slaves.lock().unwrap().push(slave.clone());
        Ok(slave)
    }

    pub fn subscribe_committed(&self, handler: impl FnOnce() + Send + 'static) {
        self.committed_handlers
            .lock()
            .unwrap()
            .push(Box::new(handler));
    }

    pub fn subscribe_aborted(&self, handler: impl FnOnce() + Send + 'static) {
        self.aborted_handlers
            .lock()
            .unwrap()
            .push(Box::new(handler));
    }

    /// Commit buffered modifications and drive the coordinator commit.
    /// Returns the commit timestamp.
    pub async fn commit(
        self: &Arc<Self>,
        options: &CommitOptions,
    ) -> Result<Timestamp, Error> {
        self.transition(TransactionState::Commit)?;

        let result = self.do_commit(options).await;
        if result.is_err() {
            // Fire and forget: the coordinator will clean up participants.
            let coordinator = self.core.coordinator.clone();
            let id = self.id;
            tokio::spawn(async move {
                let _ = coordinator.abort(id, &AbortOptions::default()).await;
            });
        }
        result
    }

    /// Abort the transaction. Idempotent: repeated calls observe the one
    /// underlying abort.
    pub async fn abort(self: &Arc<Self>, options: &AbortOptions) -> Result<(), Error> {
        let future = {
            let mut slot = self.state.lock().unwrap();
            match slot.state {
                TransactionState::Abort => slot
                    .abort_future
                    .clone()
                    .expect("abort state implies a recorded future"),
                TransactionState::Active => {
                    slot.state = TransactionState::Abort;

                    let coordinator = self.core.coordinator.clone();
                    let id = self.id;
                    let options = options.clone();
                    let this = Arc::downgrade(self);
                    let future = async move {
                        coordinator.abort(id, &options).await?;
                        if let Some(transaction) = Weak::upgrade(&this) {
                            transaction.fire_aborted();
                        }
                        Ok(())
                    }
                    .boxed()
                    .shared();

                    slot.abort_future = Some(future.clone());
                    future
                }
                state => {
                    return Err(Error::TransactionInWrongState { id: self.id, state });
                }
            }
        };
        future.await
    }

    /// Run commit steps up to (but excluding) the coordinator decision,
    /// handing participants and the in-flight sends to an outer commit.
    pub async fn flush(self: &Arc<Self>) -> Result<FlushResult, Error> {
        self.transition(TransactionState::Flush)?;

        let _gate = self.commit_gate.lock().await;
        let futures = self.send_requests().await?;

        let participant_cell_ids = {
            let sessions = self.cell_sessions.lock().unwrap();
            sessions.keys().copied().collect()
        };

        let handle = tokio::spawn(async move {
            futures::future::try_join_all(futures).await.map(|_| ())
        });
        let async_result = async move {
            handle
                .await
                .map_err(|join| Error::Internal(join.to_string()))?
        }
        .boxed();

        Ok(FlushResult {
            participant_cell_ids,
            async_result,
        })
    }

    /// Relinquish the transaction without aborting it: pinging stops and
    /// no server-side state changes.
    pub fn detach(&self) {
        self.state.lock().unwrap().state = TransactionState::Detach;
    }

    async fn do_commit(self: &Arc<Self>, options: &CommitOptions) -> Result<Timestamp, Error> {
        let _gate = self.commit_gate.lock().await;

        let mut futures = self.send_requests().await?;

        let slaves = self.slaves.lock().unwrap().clone();
        let flushes =
            futures::future::try_join_all(slaves.iter().map(|slave| slave.flush())).await?;
        for flush in flushes {
            for cell_id in flush.participant_cell_ids {
                self.participants.insert(cell_id);
            }
            futures.push(flush.async_result);
        }

        futures::future::try_join_all(futures).await?;

        let participant_cell_ids = self.participants.snapshot();
        futures::future::try_join_all(
            participant_cell_ids
                .iter()
                .map(|cell_id| self.core.coordinator.add_participant(self.id, *cell_id)),
        )
        .await?;

        let options = CommitOptions {
            mutation_id: options.mutation_id.or_else(|| Some(model::MutationId::random())),
            retry: options.retry,
        };
        let commit_timestamp = self
            .core
            .coordinator
            .commit(self.id, participant_cell_ids, &options)
            .await?;

        *self.commit_timestamp.lock().unwrap() = Some(commit_timestamp);
        self.fire_committed();

        tracing::debug!(
            transaction_id = %self.id,
            commit_timestamp,
            "transaction committed",
        );
        Ok(commit_timestamp)
    }

    /// Commit steps 2–4: route buffered modifications, prepare batches
    /// and signature accounting, and build the per-session send futures.
    async fn send_requests(
        self: &Arc<Self>,
    ) -> Result<Vec<BoxFuture<'static, Result<(), Error>>>, Error> {
        let requests = std::mem::take(&mut *self.requests.lock().unwrap());

        let mut tablet_sessions: HashMap<TabletId, TabletCommitSession> = HashMap::new();
        for request in &requests {
            self.run_modification_request(request, &mut tablet_sessions)
                .await?;
        }

        for session in tablet_sessions.values_mut() {
            let batch_count = session.prepare()?;
            self.cell_session(session.cell_id())
                .register_requests(batch_count);
        }

        let ctx = CommitContext {
            transaction_id: self.id,
            start_timestamp: self.start_timestamp,
            timeout: self.timeout,
            atomicity: self.atomicity,
            durability: self.durability,
        };

        let mut futures: Vec<BoxFuture<'static, Result<(), Error>>> = Vec::new();
        for (_, session) in tablet_sessions {
            let channel = self.core.cells.channel(session.cell_id(), PeerKind::Leader)?;
            let cell_session = self.cell_session(session.cell_id());
            futures.push(
                session
                    .invoke(channel, ctx.clone(), cell_session, self.participants.clone())
                    .boxed(),
            );
        }
        for session in self.cell_sessions.lock().unwrap().values() {
            let channel = self.core.cells.channel(session.cell_id(), PeerKind::Leader)?;
            futures.push(session.clone().invoke(channel, ctx.clone()).boxed());
        }

        Ok(futures)
    }

    async fn run_modification_request(
        self: &Arc<Self>,
        request: &ModificationRequest,
        tablet_sessions: &mut HashMap<TabletId, TabletCommitSession>,
    ) -> Result<(), Error> {
        let table = self.core.mount_cache.get_table_info(&request.path).await?;
        table.validate_dynamic()?;

        let primary = table.schema(SchemaKind::Primary);
        let write_schema = table.schema(SchemaKind::Write);

        let primary_mapping =
            self.id_mapping(&request.name_table, primary, SchemaKind::Primary)?;
        let write_mapping = self.id_mapping(&request.name_table, write_schema, SchemaKind::Write)?;

        let evaluator = if table.need_key_evaluation {
            Some(self.core.evaluators.find(primary)?)
        } else {
            None
        };
        let random_tablet = if table.is_sorted() {
            None
        } else {
            Some(self.random_ordered_tablet(&table)?)
        };

        let mut row_buffer = self.row_buffer.lock().unwrap();
        for modification in &request.modifications {
            use crate::modification::RowModificationKind::{Delete, Write};

            let captured = match modification.kind {
                Write => {
                    row::validate_data_row(&modification.row, write_schema, &write_mapping)?;
                    row_buffer.capture_and_permute_row(
                        &modification.row,
                        primary,
                        &primary_mapping,
                    )?
                }
                Delete => {
                    table
                        .validate_sorted()
                        .map_err(|_| Error::DeleteFromOrderedTable(request.path.clone()))?;
                    row::validate_key(&modification.row, primary, &primary_mapping)?;
                    row_buffer.capture_and_permute_key(
                        &modification.row,
                        primary,
                        &primary_mapping,
                    )?
                }
            };
            let mut captured = captured;

            let tablet = if table.is_sorted() {
                if let Some(evaluator) = &evaluator {
                    evaluator.evaluate_keys(&mut captured, primary)?;
                }
                router::sorted_tablet_for_row(&table, &captured)?
            } else {
                router::ordered_tablet_for_row(
                    &table,
                    random_tablet.as_ref().expect("set for ordered tables"),
                    request.tablet_index_column_id,
                    &modification.row,
                )?
            };

            let session = tablet_sessions.entry(tablet.tablet_id).or_insert_with(|| {
                TabletCommitSession::new(tablet.clone(), table.clone(), &self.core.config)
            });
            session.submit_row(modification.kind.command(), captured)?;
        }
        Ok(())
    }

    fn cell_session(&self, cell_id: CellId) -> Arc<CellCommitSession> {
        self.cell_sessions
            .lock()
            .unwrap()
            .entry(cell_id)
            .or_insert_with(|| Arc::new(CellCommitSession::new(cell_id)))
            .clone()
    }

    fn random_ordered_tablet(
        &self,
        table: &Arc<mount_cache::TableMountInfo>,
    ) -> Result<Arc<TabletInfo>, Error> {
        let mut pinned = self.random_ordered_tablets.lock().unwrap();
        if let Some(tablet) = pinned.get(&table.table_id) {
            return Ok(tablet.clone());
        }
        let tablet = table.random_mounted_tablet()?;
        pinned.insert(table.table_id, tablet.clone());
        Ok(tablet)
    }

    fn id_mapping(
        &self,
        name_table: &Arc<NameTable>,
        schema: &row::TableSchema,
        kind: SchemaKind,
    ) -> Result<Arc<IdMapping>, Error> {
        let key = (Arc::as_ptr(name_table) as usize, kind);
        let mut cache = self.mapping_cache.lock().unwrap();
        if let Some(mapping) = cache.get(&key) {
            return Ok(mapping.clone());
        }
        let mapping = Arc::new(IdMapping::build(schema, name_table)?);
        cache.insert(key, mapping.clone());
        Ok(mapping)
    }

    fn validate_active(&self) -> Result<(), Error> {
        let slot = self.state.lock().unwrap();
        if slot.state != TransactionState::Active {
            return Err(Error::TransactionInWrongState {
                id: self.id,
                state: slot.state,
            });
        }
        Ok(())
    }

    fn transition(&self, target: TransactionState) -> Result<(), Error> {
        let mut slot = self.state.lock().unwrap();
        if slot.state != TransactionState::Active {
            return Err(Error::TransactionInWrongState {
                id: self.id,
                state: slot.state,
            });
        }
        slot.state = target;
        Ok(())
    }

    fn fire_committed(&self) {
        for handler in self.committed_handlers.lock().unwrap().drain(..) {
            handler();
        }
    }

    fn fire_aborted(&self) {
        for handler in self.aborted_handlers.lock().unwrap().drain(..) {
            handler();
        }
    }

    /// Ping the coordinator until the transaction leaves `Active`; a lapse
    /// surfaces as an abort on the next operation.
    fn spawn_ping_loop(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.core.config.transaction_ping_period;
        let coordinator = self.core.coordinator.clone();
        let id = self.id;

        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let Some(transaction) = weak.upgrade() else {
                    return;
                };
                if transaction.state() != TransactionState::Active {
                    return;
                }
                if let Err(error) = coordinator.ping(id).await {
                    tracing::debug!(transaction_id = %id, %error, "transaction ping failed");
                    if error.kind == model::ErrorKind::Aborted {
                        transaction.fire_aborted();
                        return;
                    }
                }
            }
        });
        *self.ping_task.lock().unwrap() = Some(task);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(task) = self.ping_task.lock().unwrap().take() {
            task.abort();
        }
    }
}
