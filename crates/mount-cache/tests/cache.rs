use cell_directory::CellDescriptor;
use model::{ErrorKind, ServiceError};
use mount_cache::{Error, MasterClient, MountCache, MountCacheConfig, TabletState};
use proto_tablet::master::{
    self, ReqGetMountInfo, ReqGetTableAttributes, RspGetMountInfo, RspGetTableAttributes,
};
use row::{Row, SchemaKind, UnversionedValue, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A scriptable master: records the phase sequence and the refresh bounds
/// each request carried, and can inject per-call mount-info outcomes.
#[derive(Default)]
struct TestMaster {
    calls: Mutex<Vec<(String, u64)>>,
    mount_script: Mutex<VecDeque<Result<u64, ServiceError>>>,
    primary_revision: AtomicU64,
    dynamic: Mutex<bool>,
    tablet_count: usize,
}

impl TestMaster {
    fn new(tablet_count: usize) -> Self {
        Self {
            primary_revision: AtomicU64::new(10),
            dynamic: Mutex::new(true),
            tablet_count,
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().unwrap().clone()
    }

    fn push_mount_outcome(&self, outcome: Result<u64, ServiceError>) {
        self.mount_script.lock().unwrap().push_back(outcome);
    }

    fn mount_response(&self, revision: u64) -> RspGetMountInfo {
        let schema = master::TableSchema {
            columns: vec![
                master::ColumnSchema {
                    name: "k".to_string(),
                    r#type: row::ValueType::Int64.wire_code() as u32,
                    sorted: true,
                    expression: None,
                    required: false,
                },
                master::ColumnSchema {
                    name: "v".to_string(),
                    r#type: row::ValueType::String.wire_code() as u32,
                    sorted: false,
                    expression: None,
                    required: false,
                },
            ],
        };

        let tablets = (0..self.tablet_count)
            .map(|index| {
                let pivot = if index == 0 {
                    Row::default()
                } else {
                    Row::new(vec![UnversionedValue::new(
                        0,
                        Value::Int64(10 * index as i64),
                    )])
                };
                let mut writer = wire::Writer::new();
                writer.write_unversioned_row(&pivot);

                master::TabletInfo {
                    tablet_id: proto_tablet::guid_to_proto(model::Guid::from_bytes(
                        [index as u8 + 1; 16],
                    )),
                    cell_id: proto_tablet::guid_to_proto(model::Guid::from_bytes([0xcc; 16])),
                    mount_revision: 7,
                    state: master::TabletState::Mounted as i32,
                    in_memory_mode: master::InMemoryMode::None as i32,
                    pivot_key: Some(writer.finish().to_vec()),
                }
            })
            .collect();

        RspGetMountInfo {
            table_id: proto_tablet::guid_to_proto(model::Guid::from_bytes([0xee; 16])),
            schema: Some(schema),
            dynamic: *self.dynamic.lock().unwrap(),
            upstream_replica_id: Vec::new(),
            tablets,
            tablet_cells: vec![master::CellDescriptor {
                cell_id: proto_tablet::guid_to_proto(model::Guid::from_bytes([0xcc; 16])),
                config_version: 1,
                peers: vec![master::CellPeer {
                    addresses: [("default".to_string(), "node-1:9020".to_string())].into(),
                    voting: true,
                }],
                leader_index: Some(0),
            }],
            replicas: Vec::new(),
            revision,
        }
    }
}

#[async_trait::async_trait]
impl MasterClient for TestMaster {
    async fn get_table_attributes(
        &self,
        req: ReqGetTableAttributes,
    ) -> Result<RspGetTableAttributes, ServiceError> {
        let bound = req.caching_header.map(|h| h.refresh_revision).unwrap_or(0);
        self.calls.lock().unwrap().push(("attrs".to_string(), bound));

        Ok(RspGetTableAttributes {
            table_id: proto_tablet::guid_to_proto(model::Guid::from_bytes([0xee; 16])),
            dynamic: *self.dynamic.lock().unwrap(),
            external_cell_tag: 5,
            revision: self.primary_revision.load(Ordering::SeqCst),
        })
    }

    async fn get_mount_info(
        &self,
        cell_tag: u32,
        req: ReqGetMountInfo,
    ) -> Result<RspGetMountInfo, ServiceError> {
        assert_eq!(cell_tag, 5, "phase two must target the external cell");
        let bound = req.caching_header.map(|h| h.refresh_revision).unwrap_or(0);
        self.calls.lock().unwrap().push(("mount".to_string(), bound));

        let outcome = self
            .mount_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(20));
        outcome.map(|revision| self.mount_response(revision))
    }
}

fn cache_over(master: Arc<TestMaster>, config: MountCacheConfig) -> (MountCache, Arc<Mutex<Vec<CellDescriptor>>>) {
    let seen_cells = Arc::new(Mutex::new(Vec::new()));
    let sink = seen_cells.clone();
    let cache = MountCache::new(config, master, move |descriptor| {
        sink.lock().unwrap().push(descriptor);
    });
    (cache, seen_cells)
}

#[tokio::test]
async fn resolves_mount_topology() {
    let master = Arc::new(TestMaster::new(2));
    let (cache, seen_cells) = cache_over(master.clone(), MountCacheConfig::default());

    let info = cache.get_table_info("//home/t").await.unwrap();

    assert!(info.is_sorted());
    assert_eq!(info.primary_revision, 10);
    assert_eq!(info.secondary_revision, 20);
    assert_eq!(info.tablets.len(), 2);
    assert_eq!(info.mounted_tablets.len(), 2);
    assert_eq!(info.tablets[0].state, TabletState::Mounted);
    assert_eq!(info.schema(SchemaKind::Lookup).column_count(), 1);
    assert_eq!(info.lower_cap_bound, Row::default());

    // The cell descriptor riding on the response reached the directory.
    assert_eq!(seen_cells.lock().unwrap().len(), 1);

    // Tablets are registered for id-based invalidation.
    let tablet = cache.find_tablet(info.tablets[1].tablet_id).unwrap();
    assert_eq!(tablet.cell_id, info.tablets[1].cell_id);
}

#[tokio::test]
async fn fresh_entries_are_served_from_cache() {
    let master = Arc::new(TestMaster::new(1));
    let (cache, _) = cache_over(master.clone(), MountCacheConfig::default());

    let first = cache.get_table_info("//home/t").await.unwrap();
    let second = cache.get_table_info("//home/t").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(master.calls().len(), 2, "one attrs + one mount call");
}

#[tokio::test]
async fn concurrent_callers_share_one_fetch() {
    let master = Arc::new(TestMaster::new(1));
    let (cache, _) = cache_over(master.clone(), MountCacheConfig::default());

    let (a, b) = tokio::join!(
        cache.get_table_info("//home/t"),
        cache.get_table_info("//home/t"),
    );
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(master.calls().len(), 2);
}

#[tokio::test]
async fn stale_secondary_response_replays_both_phases() {
    let master = Arc::new(TestMaster::new(1));
    let (cache, _) = cache_over(master.clone(), MountCacheConfig::default());

    // The caller demands secondary >= 30; the first mount response only
    // carries 20, the replayed fetch succeeds with 30.
    master.push_mount_outcome(Ok(20));
    master.push_mount_outcome(Ok(30));

    let info = cache.get_with_bounds("//home/t", 0, 30).await.unwrap();
    assert_eq!(info.secondary_revision, 30);

    let calls = master.calls();
    let phases: Vec<&str> = calls.iter().map(|(phase, _)| phase.as_str()).collect();
    assert_eq!(phases, vec!["attrs", "mount", "attrs", "mount"]);
    // The replayed phase one carries the captured primary revision.
    assert_eq!(calls[2].1, 10);
}

#[tokio::test]
async fn final_retry_uses_the_captured_secondary_revision() {
    let master = Arc::new(TestMaster::new(1));
    let (cache, _) = cache_over(master.clone(), MountCacheConfig::default());

    // Stale (revision 3 < bound 5), then a transient failure, then success.
    master.push_mount_outcome(Ok(3));
    master.push_mount_outcome(Err(ServiceError::new(ErrorKind::Transport, "queue overflow")));
    master.push_mount_outcome(Ok(3));

    let info = cache.get_with_bounds("//home/t", 0, 5).await.unwrap();
    assert_eq!(info.secondary_revision, 3);

    let calls = master.calls();
    let bounds: Vec<u64> = calls
        .iter()
        .filter(|(phase, _)| phase == "mount")
        .map(|(_, bound)| *bound)
        .collect();
    assert_eq!(bounds, vec![5, 0, 3]);
}

#[tokio::test]
async fn non_dynamic_tables_are_rejected() {
    let master = Arc::new(TestMaster::new(1));
    *master.dynamic.lock().unwrap() = false;
    let (cache, _) = cache_over(master.clone(), MountCacheConfig::default());

    assert!(matches!(
        cache.get_table_info("//home/t").await,
        Err(Error::NotDynamic(path)) if path == "//home/t"
    ));
    assert_eq!(master.calls().len(), 1, "fails in phase one, no mount call");
}

#[tokio::test]
async fn failures_are_remembered_until_they_expire() {
    let master = Arc::new(TestMaster::new(1));
    let (cache, _) = cache_over(master.clone(), MountCacheConfig::default());

    // Both the initial fetch and its automatic phase-two replay fail.
    master.push_mount_outcome(Err(ServiceError::new(ErrorKind::Transport, "down")));
    master.push_mount_outcome(Err(ServiceError::new(ErrorKind::Transport, "down")));

    assert!(cache.get_table_info("//home/t").await.is_err());
    assert!(cache.get_table_info("//home/t").await.is_err());
    let calls = master.calls();
    let mounts = calls.iter().filter(|(phase, _)| phase == "mount").count();
    assert_eq!(mounts, 2, "the remembered failure is shared, not refetched");

    // With expiry disabled the next call refetches.
    let (cache, _) = cache_over(
        master.clone(),
        MountCacheConfig {
            expire_after_failed_update_time: Duration::ZERO,
            ..MountCacheConfig::default()
        },
    );
    master.push_mount_outcome(Err(ServiceError::new(ErrorKind::Transport, "down")));
    master.push_mount_outcome(Err(ServiceError::new(ErrorKind::Transport, "down")));
    assert!(cache.get_table_info("//home/t").await.is_err());
    assert!(cache.get_table_info("//home/t").await.is_ok());
}

#[tokio::test]
async fn invalidation_triggers_a_bounded_background_refresh() {
    let master = Arc::new(TestMaster::new(1));
    let (cache, _) = cache_over(master.clone(), MountCacheConfig::default());

    let info = cache.get_table_info("//home/t").await.unwrap();
    cache.invalidate_table(&info);

    // Wait for the background refresh to land.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let calls = master.calls();
        if let Some((_, bound)) = calls.iter().skip(2).find(|(phase, _)| phase == "attrs") {
            assert_eq!(*bound, info.primary_revision);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "refresh never ran");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn tablet_invalidation_reaches_the_owning_table() {
    let master = Arc::new(TestMaster::new(2));
    let (cache, _) = cache_over(master.clone(), MountCacheConfig::default());

    let info = cache.get_table_info("//home/t").await.unwrap();
    let tablet = cache.find_tablet(info.tablets[0].tablet_id).unwrap();

    cache.invalidate_tablet(&tablet);

    // The entry is gone: a subsequent get fetches anew (the background
    // refresh may or may not have landed yet; either way the master sees
    // more than the initial two calls).
    let _ = cache.get_table_info("//home/t").await.unwrap();
    assert!(master.calls().len() > 2);
}
