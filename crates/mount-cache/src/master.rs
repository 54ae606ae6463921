use model::ServiceError;
use proto_tablet::master::{
    ReqGetMountInfo, ReqGetTableAttributes, RspGetMountInfo, RspGetTableAttributes,
};

/// Read access to the master object service.
///
/// Phase one always targets the primary master; phase two targets the
/// (possibly different) master cell named by `external_cell_tag`. Both
/// requests carry a caching header: implementations are expected to serve
/// from follower caches honoring its expiration and refresh bounds.
#[async_trait::async_trait]
pub trait MasterClient: Send + Sync {
    async fn get_table_attributes(
        &self,
        req: ReqGetTableAttributes,
    ) -> Result<RspGetTableAttributes, ServiceError>;

    async fn get_mount_info(
        &self,
        cell_tag: u32,
        req: ReqGetMountInfo,
    ) -> Result<RspGetMountInfo, ServiceError>;
}
