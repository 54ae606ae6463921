use crate::info::{TableMountInfo, TabletInfo};
use crate::master::MasterClient;
use crate::{ms, Error, MountCacheConfig};
use cell_directory::CellDescriptor;
use futures::future::{BoxFuture, FutureExt, Shared};
use model::TabletId;
use proto_tablet::master::{ReqGetMountInfo, ReqGetTableAttributes};
use proto_tablet::CachingHeader;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<TableMountInfo>, Error>>>;

/// The async expiring cache of `path → TableMountInfo`.
#[derive(Clone)]
pub struct MountCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: MountCacheConfig,
    master: Arc<dyn MasterClient>,
    /// Folds cell descriptors riding on mount responses into the cell
    /// directory, without coupling this crate to its channel type.
    on_cell_descriptor: Box<dyn Fn(CellDescriptor) + Send + Sync>,
    entries: Mutex<HashMap<String, Entry>>,
    tablets: Mutex<HashMap<TabletId, Arc<TabletInfo>>>,
}

struct Entry {
    future: SharedFetch,
    inserted_at: Instant,
    bounds: (u64, u64),
}

impl MountCache {
    pub fn new(
        config: MountCacheConfig,
        master: Arc<dyn MasterClient>,
        on_cell_descriptor: impl Fn(CellDescriptor) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                master,
                on_cell_descriptor: Box::new(on_cell_descriptor),
                entries: Mutex::new(HashMap::new()),
                tablets: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolve `path`, serving from cache when fresh.
    pub async fn get_table_info(&self, path: &str) -> Result<Arc<TableMountInfo>, Error> {
        self.get_with_bounds(path, 0, 0).await
    }

    /// Resolve `path`, refusing cached entries whose revisions are below
    /// the given bounds.
    pub async fn get_with_bounds(
        &self,
        path: &str,
        refresh_primary: u64,
        refresh_secondary: u64,
    ) -> Result<Arc<TableMountInfo>, Error> {
        let future = {
            let mut entries = self.inner.entries.lock().unwrap();

            let reusable = entries.get(path).and_then(|entry| {
                match entry.future.peek() {
                    // In-flight: all concurrent callers share one fetch.
                    None => Some(entry.future.clone()),
                    Some(Ok(info))
                        if info.primary_revision >= refresh_primary
                            && info.secondary_revision >= refresh_secondary
                            && entry.inserted_at.elapsed()
                                < self.inner.config.expire_after_successful_update_time =>
                    {
                        Some(entry.future.clone())
                    }
                    // A remembered failure keeps failing until it expires,
                    // unless the caller demands a fresher view.
                    Some(Err(_))
                        if entry.bounds >= (refresh_primary, refresh_secondary)
                            && entry.inserted_at.elapsed()
                                < self.inner.config.expire_after_failed_update_time =>
                    {
                        Some(entry.future.clone())
                    }
                    Some(_) => None,
                }
            });

            reusable.unwrap_or_else(|| {
                let session = GetSession {
                    owner: Arc::downgrade(&self.inner),
                    path: path.to_string(),
                    table_id: Vec::new(),
                    cell_tag: 0,
                    primary_revision: 0,
                    secondary_revision: 0,
                };
                let future = session
                    .run(refresh_primary, refresh_secondary)
                    .boxed()
                    .shared();
                entries.insert(
                    path.to_string(),
                    Entry {
                        future: future.clone(),
                        inserted_at: Instant::now(),
                        bounds: (refresh_primary, refresh_secondary),
                    },
                );
                future
            })
        };

        future.await
    }

    /// Drop the cached entry for `info`'s path and kick off a background
    /// refresh carrying the invalidated revisions as lower bounds.
    pub fn invalidate_table(&self, info: &TableMountInfo) {
        {
            let mut entries = self.inner.entries.lock().unwrap();
            if entries.remove(&info.path).is_some() {
                tracing::debug!(
                    path = %info.path,
                    primary_revision = info.primary_revision,
                    secondary_revision = info.secondary_revision,
                    "table mount info removed from cache",
                );
            }
        }

        let cache = self.clone();
        let path = info.path.clone();
        let bounds = (info.primary_revision, info.secondary_revision);
        tokio::spawn(async move {
            if let Err(error) = cache.get_with_bounds(&path, bounds.0, bounds.1).await {
                tracing::debug!(%path, %error, "background mount info refresh failed");
            }
        });
    }

    /// Invalidate every table whose mount info references `tablet`.
    pub fn invalidate_tablet(&self, tablet: &TabletInfo) {
        for owner in tablet.owners() {
            self.invalidate_table(&owner);
        }
    }

    pub fn find_tablet(&self, tablet_id: TabletId) -> Option<Arc<TabletInfo>> {
        self.inner.tablets.lock().unwrap().get(&tablet_id).cloned()
    }
}

/// One two-phase fetch of a table's mount info.
///
/// Phase one resolves identity on the primary master; phase two fetches
/// topology from the hosting cell. A stale phase-two response is retried
/// first with the captured primary revision as a fresh phase-one bound,
/// then with the captured secondary revision; after that the error stands.
struct GetSession {
    owner: Weak<Inner>,
    path: String,
    table_id: Vec<u8>,
    cell_tag: u32,
    primary_revision: u64,
    secondary_revision: u64,
}

impl GetSession {
    async fn run(
        mut self,
        refresh_primary: u64,
        refresh_secondary: u64,
    ) -> Result<Arc<TableMountInfo>, Error> {
        self.request_table_attributes(refresh_primary).await?;

        let mut result = self.request_mount_info(refresh_secondary).await;

        if result.is_err() && self.primary_revision > refresh_primary {
            let bound = self.primary_revision;
            self.request_table_attributes(bound).await?;
            result = self.request_mount_info(0).await;
        }
        if result.is_err() && self.secondary_revision > 0 {
            let bound = self.secondary_revision;
            result = self.request_mount_info(bound).await;
        }

        let info = result?;
        self.install(&info);
        Ok(info)
    }

    async fn request_table_attributes(&mut self, refresh_revision: u64) -> Result<(), Error> {
        let inner = self.owner.upgrade().ok_or(Error::Canceled)?;

        tracing::debug!(
            path = %self.path,
            refresh_revision,
            "requesting table attributes from primary master",
        );

        let rsp = inner
            .master
            .get_table_attributes(ReqGetTableAttributes {
                path: self.path.clone(),
                caching_header: Some(self.caching_header(&inner, refresh_revision)),
            })
            .await
            .map_err(|source| Error::Fetch {
                path: self.path.clone(),
                source,
            })?;

        self.primary_revision = rsp.revision;
        if rsp.revision < refresh_revision {
            return Err(Error::StaleResponse {
                path: self.path.clone(),
                revision: rsp.revision,
                bound: refresh_revision,
            });
        }
        if !rsp.dynamic {
            return Err(Error::NotDynamic(self.path.clone()));
        }

        self.table_id = rsp.table_id;
        self.cell_tag = rsp.external_cell_tag;
        Ok(())
    }

    async fn request_mount_info(
        &mut self,
        refresh_revision: u64,
    ) -> Result<Arc<TableMountInfo>, Error> {
        let inner = self.owner.upgrade().ok_or(Error::Canceled)?;

        tracing::debug!(
            path = %self.path,
            cell_tag = self.cell_tag,
            refresh_revision,
            "requesting mount info from secondary master",
        );

        let rsp = inner
            .master
            .get_mount_info(
                self.cell_tag,
                ReqGetMountInfo {
                    table_id: self.table_id.clone(),
                    caching_header: Some(self.caching_header(&inner, refresh_revision)),
                },
            )
            .await
            .map_err(|source| Error::Fetch {
                path: self.path.clone(),
                source,
            })?;

        // Capture the revision before judging staleness, so the final
        // retry can demand at least this revision.
        self.secondary_revision = rsp.revision;
        if rsp.revision < refresh_revision {
            return Err(Error::StaleResponse {
                path: self.path.clone(),
                revision: rsp.revision,
                bound: refresh_revision,
            });
        }

        for descriptor in &rsp.tablet_cells {
            if let Some(descriptor) = CellDescriptor::from_proto(descriptor) {
                (inner.on_cell_descriptor)(descriptor);
            }
        }

        TableMountInfo::from_proto(&self.path, self.primary_revision, &rsp)
    }

    fn install(&self, info: &Arc<TableMountInfo>) {
        let Some(inner) = self.owner.upgrade() else {
            return;
        };
        let mut tablets = inner.tablets.lock().unwrap();
        for tablet in &info.tablets {
            tablets.insert(tablet.tablet_id, tablet.clone());
        }

        tracing::debug!(
            path = %self.path,
            table_id = %info.table_id,
            tablet_count = info.tablets.len(),
            primary_revision = info.primary_revision,
            secondary_revision = info.secondary_revision,
            "table mount info added to cache",
        );
    }

    fn caching_header(&self, inner: &Inner, refresh_revision: u64) -> CachingHeader {
        CachingHeader {
            success_expiration_time_ms: ms(inner.config.expire_after_successful_update_time),
            failure_expiration_time_ms: ms(inner.config.expire_after_failed_update_time),
            refresh_revision,
        }
    }
}
