//! Cached resolution of table paths into mount topology.
//!
//! Mount info is fetched in two phases: the primary master resolves a path
//! into object identity, then the master cell hosting the table serves the
//! tablet list. Both reads go through follower caches whose entries are
//! bounded by refresh revisions, so a client holding a provably stale view
//! can demand a fresher one. Entries expire separately after successful
//! and failed updates, and invalidation kicks off a background refresh
//! carrying the invalidated entry's revisions as lower bounds.

mod cache;
mod info;
mod master;

pub use cache::MountCache;
pub use info::{InMemoryMode, ReplicaInfo, ReplicaMode, TableMountInfo, TabletInfo, TabletState};
pub use master::MasterClient;

use model::{ServiceError, TabletId};
use std::time::Duration;

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("error getting mount info for {path}")]
    Fetch {
        path: String,
        #[source]
        source: ServiceError,
    },
    #[error("table {0} is not dynamic")]
    NotDynamic(String),
    #[error("table {0} is not sorted")]
    NotSorted(String),
    #[error("table {0} is not ordered")]
    NotOrdered(String),
    #[error("table {0} is replicated")]
    Replicated(String),
    #[error("table {0} has no mounted tablets")]
    NoMountedTablet(String),
    #[error("tablet {0} is not mounted")]
    TabletNotMounted(TabletId),
    #[error(
        "master cache entry for {path} is older than the requested bound: {revision} < {bound}"
    )]
    StaleResponse {
        path: String,
        revision: u64,
        bound: u64,
    },
    #[error("malformed mount info for {path}: {message}")]
    BadMountInfo { path: String, message: String },
    #[error("failed to decode a pivot key")]
    BadPivotKey(#[from] wire::Error),
    #[error("connection destroyed")]
    Canceled,
}

impl Error {
    /// The tablet the caller should invalidate before retrying, if this
    /// error names one.
    pub fn tablet_id(&self) -> Option<TabletId> {
        match self {
            Error::TabletNotMounted(tablet_id) => Some(*tablet_id),
            _ => None,
        }
    }
}

fn ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountCacheConfig {
    /// How long a successfully fetched entry stays fresh.
    #[serde(
        default = "MountCacheConfig::default_expire_after_successful_update_time",
        with = "humantime_serde"
    )]
    pub expire_after_successful_update_time: Duration,
    /// How long a failed fetch is remembered before re-trying.
    #[serde(
        default = "MountCacheConfig::default_expire_after_failed_update_time",
        with = "humantime_serde"
    )]
    pub expire_after_failed_update_time: Duration,
}

impl MountCacheConfig {
    fn default_expire_after_successful_update_time() -> Duration {
        Duration::from_secs(60 * 5)
    }
    fn default_expire_after_failed_update_time() -> Duration {
        Duration::from_secs(15)
    }
}

impl Default for MountCacheConfig {
    fn default() -> Self {
        Self {
            expire_after_successful_update_time:
                Self::default_expire_after_successful_update_time(),
            expire_after_failed_update_time: Self::default_expire_after_failed_update_time(),
        }
    }
}
