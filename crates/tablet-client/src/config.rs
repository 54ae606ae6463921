use std::time::Duration;
use wire::CompressionCodec;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TabletClientConfig {
    /// Rows per write RPC; a tablet session splits larger submissions into
    /// multiple sequenced batches.
    #[serde(default = "TabletClientConfig::default_max_rows_per_write_request")]
    pub max_rows_per_write_request: usize,
    /// Keys per read RPC within one lookup session.
    #[serde(default = "TabletClientConfig::default_max_rows_per_read_request")]
    pub max_rows_per_read_request: usize,
    /// Hard cap on rows one transaction may submit to one tablet.
    #[serde(default = "TabletClientConfig::default_max_rows_per_transaction")]
    pub max_rows_per_transaction: usize,
    /// Bytes of row data one transaction may capture.
    #[serde(default = "TabletClientConfig::default_max_row_buffer_size")]
    pub max_row_buffer_size: usize,
    #[serde(default)]
    pub write_request_codec: CompressionCodec,
    #[serde(default)]
    pub lookup_request_codec: CompressionCodec,
    #[serde(default)]
    pub lookup_response_codec: CompressionCodec,
    #[serde(default = "TabletClientConfig::default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Attempts to refresh mount metadata after a staleness error.
    #[serde(default = "TabletClientConfig::default_mount_info_update_retry_count")]
    pub mount_info_update_retry_count: usize,
    /// Pacing between such refreshes, measured from the invalidated
    /// tablet's last update.
    #[serde(
        default = "TabletClientConfig::default_mount_info_update_retry_period",
        with = "humantime_serde"
    )]
    pub mount_info_update_retry_period: Duration,
    /// Dispatch a hedged read to a backup peer after this delay.
    /// `None` disables backup requests.
    #[serde(default, with = "humantime_serde")]
    pub backup_request_delay: Option<Duration>,
    #[serde(
        default = "TabletClientConfig::default_transaction_timeout",
        with = "humantime_serde"
    )]
    pub transaction_timeout: Duration,
    #[serde(
        default = "TabletClientConfig::default_transaction_ping_period",
        with = "humantime_serde"
    )]
    pub transaction_ping_period: Duration,
}

impl TabletClientConfig {
    fn default_max_rows_per_write_request() -> usize {
        1000
    }
    fn default_max_rows_per_read_request() -> usize {
        1000
    }
    fn default_max_rows_per_transaction() -> usize {
        100_000
    }
    fn default_max_row_buffer_size() -> usize {
        16 << 20
    }
    fn default_max_concurrent_requests() -> usize {
        1000
    }
    fn default_mount_info_update_retry_count() -> usize {
        5
    }
    fn default_mount_info_update_retry_period() -> Duration {
        Duration::from_secs(3)
    }
    fn default_transaction_timeout() -> Duration {
        Duration::from_secs(15)
    }
    fn default_transaction_ping_period() -> Duration {
        Duration::from_secs(5)
    }
}

impl Default for TabletClientConfig {
    fn default() -> Self {
        Self {
            max_rows_per_write_request: Self::default_max_rows_per_write_request(),
            max_rows_per_read_request: Self::default_max_rows_per_read_request(),
            max_rows_per_transaction: Self::default_max_rows_per_transaction(),
            max_row_buffer_size: Self::default_max_row_buffer_size(),
            write_request_codec: Default::default(),
            lookup_request_codec: Default::default(),
            lookup_response_codec: Default::default(),
            max_concurrent_requests: Self::default_max_concurrent_requests(),
            mount_info_update_retry_count: Self::default_mount_info_update_retry_count(),
            mount_info_update_retry_period: Self::default_mount_info_update_retry_period(),
            backup_request_delay: None,
            transaction_timeout: Self::default_transaction_timeout(),
            transaction_ping_period: Self::default_transaction_ping_period(),
        }
    }
}
