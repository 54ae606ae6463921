use crate::channel::TabletChannel;
use crate::config::TabletClientConfig;
use crate::coordinator::{CommitOptions, TransactionCoordinator, TransactionStartOptions};
use crate::lookup::{self, LookupRowsOptions, SelectRowsOptions};
use crate::modification::{ModifyRowsOptions, RowModification};
use crate::transaction::Transaction;
use crate::Error;
use cell_directory::CellDirectory;
use evaluator::ColumnEvaluatorCache;
use model::{MutationId, ServiceError, Timestamp, TransactionId};
use mount_cache::MountCache;
use row::{NameTable, Row};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The query engine's entry point, as seen by this client. Planning and
/// execution live elsewhere; the client only binds read timestamps.
#[async_trait::async_trait]
pub trait QueryService: Send + Sync {
    async fn execute(
        &self,
        query: &str,
        timestamp: Timestamp,
        options: &SelectRowsOptions,
    ) -> Result<Vec<Row>, ServiceError>;
}

/// Everything a transaction needs from its client; cloning shares the
/// underlying caches and channels.
#[derive(Clone)]
pub(crate) struct ClientCore {
    pub config: Arc<TabletClientConfig>,
    pub cluster: String,
    pub mount_cache: MountCache,
    pub cells: Arc<CellDirectory<Arc<dyn TabletChannel>>>,
    pub evaluators: Arc<ColumnEvaluatorCache>,
    pub coordinator: Arc<dyn TransactionCoordinator>,
    pub query: Option<Arc<dyn QueryService>>,
}

#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    /// Short name of the cluster this client talks to; slave transactions
    /// compare it to decide whether a peer client is actually remote.
    pub cluster: String,
    pub config: TabletClientConfig,
}

#[derive(Clone, Debug)]
pub struct TransactionAttachOptions {
    pub ping: bool,
    pub sticky: bool,
}

impl Default for TransactionAttachOptions {
    fn default() -> Self {
        Self {
            ping: true,
            sticky: false,
        }
    }
}

/// The client facade over the tablet transaction machinery.
///
/// Every public call runs under a process-wide concurrency limit, and
/// table reads and one-shot writes retry through mount-cache refreshes on
/// metadata staleness.
pub struct Client {
    core: ClientCore,
    semaphore: tokio::sync::Semaphore,
    sticky_transactions: Mutex<HashMap<TransactionId, Arc<Transaction>>>,
}

impl Client {
    pub fn new(
        options: ClientOptions,
        mount_cache: MountCache,
        cells: Arc<CellDirectory<Arc<dyn TabletChannel>>>,
        coordinator: Arc<dyn TransactionCoordinator>,
        query: Option<Arc<dyn QueryService>>,
    ) -> Self {
        let max_concurrent = options.config.max_concurrent_requests;
        Self {
            core: ClientCore {
                config: Arc::new(options.config),
                cluster: options.cluster,
                mount_cache,
                cells,
                evaluators: Arc::new(ColumnEvaluatorCache::new()),
                coordinator,
                query,
            },
            semaphore: tokio::sync::Semaphore::new(max_concurrent),
            sticky_transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.core.cluster
    }

    pub async fn start_transaction(
        &self,
        options: &TransactionStartOptions,
    ) -> Result<Arc<Transaction>, Error> {
        self.execute("start_transaction", None, async {
            let mut options = options.clone();
            options.timeout = Some(
                options
                    .timeout
                    .unwrap_or(self.core.config.transaction_timeout),
            );

            let started = self.core.coordinator.start(&options).await?;
            let transaction = Transaction::new(
                self.core.clone(),
                started,
                options.atomicity,
                options.durability,
            );

            if options.sticky {
                self.sticky_transactions
                    .lock()
                    .unwrap()
                    .insert(transaction.id(), transaction.clone());
            }
            Ok(transaction)
        })
        .await
    }

    /// Attach to a known transaction. With `sticky`, returns the very
    /// object `start_transaction` registered, buffers and sessions
    /// included; otherwise builds a fresh shell around the server-side
    /// transaction.
    pub async fn attach_transaction(
        &self,
        id: TransactionId,
        options: &TransactionAttachOptions,
    ) -> Result<Arc<Transaction>, Error> {
        self.execute("attach_transaction", None, async {
            if options.sticky {
                return self
                    .sticky_transactions
                    .lock()
                    .unwrap()
                    .get(&id)
                    .cloned()
                    .ok_or(Error::NoSuchStickyTransaction(id));
            }

            let started = self.core.coordinator.attach(id, options.ping).await?;
            Ok(Transaction::new(
                self.core.clone(),
                started,
                Default::default(),
                Default::default(),
            ))
        })
        .await
    }

    pub async fn lookup_rows(
        &self,
        path: &str,
        name_table: Arc<NameTable>,
        keys: Vec<Row>,
        options: &LookupRowsOptions,
    ) -> Result<Vec<Option<Row>>, Error> {
        self.execute(
            "lookup_rows",
            options.timeout,
            lookup::lookup_rows_with_retries(
                &self.core,
                path,
                name_table,
                keys,
                options.clone(),
            ),
        )
        .await
    }

    pub async fn select_rows(
        &self,
        query: &str,
        options: &SelectRowsOptions,
    ) -> Result<Vec<Row>, Error> {
        self.execute(
            "select_rows",
            options.timeout,
            lookup::select_rows(
                &self.core,
                query,
                options
                    .timestamp
                    .unwrap_or(model::timestamp::SYNC_LAST_COMMITTED_TIMESTAMP),
                options,
            ),
        )
        .await
    }

    /// One-shot write: a fresh transaction per attempt, committed before
    /// returning. Metadata staleness replays the whole modify-and-commit
    /// under one mutation id.
    pub async fn modify_rows(
        &self,
        path: &str,
        name_table: Arc<NameTable>,
        modifications: Vec<RowModification>,
        options: &ModifyRowsOptions,
    ) -> Result<Timestamp, Error> {
        let mutation_id = MutationId::random();
        let attempt = std::sync::atomic::AtomicUsize::new(0);

        self.execute(
            "modify_rows",
            options.timeout,
            call_and_retry_if_metadata_cache_is_inconsistent(&self.core, || {
                let name_table = name_table.clone();
                let modifications = modifications.clone();
                let options = options.clone();
                let retry = attempt.fetch_add(1, std::sync::atomic::Ordering::SeqCst) > 0;
                async move {
                    let transaction = self
                        .start_transaction_unguarded(&TransactionStartOptions::default())
                        .await?;
                    transaction.modify_rows(path, name_table, modifications, &options)?;
                    transaction
                        .commit(&CommitOptions {
                            mutation_id: Some(mutation_id),
                            retry,
                        })
                        .await
                }
            }),
        )
        .await
    }

    pub async fn write_rows(
        &self,
        path: &str,
        name_table: Arc<NameTable>,
        rows: Vec<Row>,
    ) -> Result<Timestamp, Error> {
        self.modify_rows(
            path,
            name_table,
            rows.into_iter().map(RowModification::write).collect(),
            &ModifyRowsOptions::default(),
        )
        .await
    }

    pub async fn delete_rows(
        &self,
        path: &str,
        name_table: Arc<NameTable>,
        keys: Vec<Row>,
    ) -> Result<Timestamp, Error> {
        self.modify_rows(
            path,
            name_table,
            keys.into_iter().map(RowModification::delete).collect(),
            &ModifyRowsOptions::default(),
        )
        .await
    }

    /// Start a transaction without the facade envelope; used by retrying
    /// callers which already hold an execution slot.
    async fn start_transaction_unguarded(
        &self,
        options: &TransactionStartOptions,
    ) -> Result<Arc<Transaction>, Error> {
        let mut options = options.clone();
        options.timeout = Some(
            options
                .timeout
                .unwrap_or(self.core.config.transaction_timeout),
        );
        let started = self.core.coordinator.start(&options).await?;
        Ok(Transaction::new(
            self.core.clone(),
            started,
            options.atomicity,
            options.durability,
        ))
    }

    /// Run `future` under the concurrency limit and an optional wall-clock
    /// timeout, logging command start and outcome.
    async fn execute<T>(
        &self,
        command: &'static str,
        timeout: Option<Duration>,
        future: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        let Ok(_permit) = self.semaphore.try_acquire() else {
            return Err(Error::TooManyConcurrentRequests);
        };

        tracing::debug!(command, "command started");
        let result = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, future).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(command.to_string())),
            },
            None => future.await,
        };

        match result {
            Ok(value) => {
                tracing::debug!(command, "command completed");
                Ok(value)
            }
            Err(source) => {
                tracing::debug!(command, error = %source, "command failed");
                Err(Error::Command {
                    command: command.to_string(),
                    transaction_id: None,
                    source: Box::new(source),
                })
            }
        }
    }
}

/// Retry `f` through mount-cache refreshes while it fails with metadata
/// staleness, invalidating the offending tablet and pacing on its last
/// update time. Bounded by the configured retry count.
pub(crate) async fn call_and_retry_if_metadata_cache_is_inconsistent<T, F, Fut>(
    core: &ClientCore,
    f: F,
) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        let error = match f().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        attempt += 1;
        if attempt > core.config.mount_info_update_retry_count {
            return Err(error);
        }
        let Some(tablet_id) = error.staleness_tablet() else {
            return Err(error);
        };

        tracing::debug!(
            %error,
            tablet_id = %tablet_id,
            attempt,
            "got a metadata staleness error, clearing mount cache and retrying",
        );

        if let Some(tablet) = core.mount_cache.find_tablet(tablet_id) {
            core.mount_cache.invalidate_tablet(&tablet);

            let retry_at = tablet.update_time + core.config.mount_info_update_retry_period;
            let now = std::time::Instant::now();
            if retry_at > now {
                tokio::time::sleep(retry_at - now).await;
            }
        }
    }
}
