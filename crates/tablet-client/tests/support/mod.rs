//! An in-memory cluster: master, tablet cells, and coordinator mocks
//! wired into a real `Client`.

// Each test binary uses its own subset of this harness.
#![allow(dead_code)]

use cell_directory::CellDirectory;
use model::{
    CellId, ErrorKind, Guid, ServiceError, TabletId, Timestamp, TransactionId,
};
use mount_cache::{MasterClient, MountCache, MountCacheConfig};
use proto_tablet::master::{
    self, ReqGetMountInfo, ReqGetTableAttributes, RspGetMountInfo, RspGetTableAttributes,
};
use row::{Row, UnversionedValue, Value, ValueType};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tablet_client::{
    Client, ClientOptions, CommitOptions, LookupRequest, LookupResponse, RegisterActionsRequest,
    StartedTransaction, TabletChannel, TabletClientConfig, TransactionCoordinator,
    TransactionStartOptions, WriteRequest,
};
use wire::{decompress_envelope, Command};

pub fn tablet_id(tag: u8) -> TabletId {
    TabletId(Guid::from_bytes([tag; 16]))
}

pub fn cell_id(tag: u8) -> CellId {
    CellId(Guid::from_bytes([0xc0 | (tag & 0xf); 16]))
}

/// Schema column descriptor for fixtures.
pub fn column(name: &str, type_: ValueType, sorted: bool) -> master::ColumnSchema {
    master::ColumnSchema {
        name: name.to_string(),
        r#type: type_.wire_code() as u32,
        sorted,
        expression: None,
        required: false,
    }
}

pub struct TableFixture {
    pub table_id: Vec<u8>,
    pub columns: Vec<master::ColumnSchema>,
    pub sorted: bool,
    /// `(tablet, cell, pivot)`; pivots ignored for ordered tables.
    pub tablets: Vec<(TabletId, CellId, Row)>,
    pub mount_revision: u64,
    pub secondary_revision: u64,
}

impl TableFixture {
    pub fn sorted(pivots: Vec<(TabletId, CellId, Row)>, columns: Vec<master::ColumnSchema>) -> Self {
        Self {
            table_id: proto_tablet::guid_to_proto(Guid::random()),
            columns,
            sorted: true,
            tablets: pivots,
            mount_revision: 1,
            secondary_revision: 1,
        }
    }

    pub fn ordered(tablets: Vec<(TabletId, CellId)>, columns: Vec<master::ColumnSchema>) -> Self {
        Self {
            table_id: proto_tablet::guid_to_proto(Guid::random()),
            columns,
            sorted: false,
            tablets: tablets
                .into_iter()
                .map(|(tablet, cell)| (tablet, cell, Row::default()))
                .collect(),
            mount_revision: 1,
            secondary_revision: 1,
        }
    }
}

#[derive(Default)]
pub struct TestMaster {
    tables: Mutex<HashMap<String, TableFixture>>,
    pub attrs_calls: AtomicU64,
    pub mount_calls: AtomicU64,
}

impl TestMaster {
    pub fn add_table(&self, path: &str, fixture: TableFixture) {
        self.tables.lock().unwrap().insert(path.to_string(), fixture);
    }

    fn response_for(&self, path: &str) -> Option<RspGetMountInfo> {
        let tables = self.tables.lock().unwrap();
        let fixture = tables.get(path)?;

        let tablets = fixture
            .tablets
            .iter()
            .map(|(tablet, cell, pivot)| {
                let pivot_key = fixture.sorted.then(|| {
                    let mut writer = wire::Writer::new();
                    writer.write_unversioned_row(pivot);
                    writer.finish().to_vec()
                });
                master::TabletInfo {
                    tablet_id: proto_tablet::guid_to_proto(tablet.0),
                    cell_id: proto_tablet::guid_to_proto(cell.0),
                    mount_revision: fixture.mount_revision,
                    state: master::TabletState::Mounted as i32,
                    in_memory_mode: master::InMemoryMode::None as i32,
                    pivot_key,
                }
            })
            .collect();

        let cells: BTreeSet<CellId> = fixture.tablets.iter().map(|(_, cell, _)| *cell).collect();
        let tablet_cells = cells
            .into_iter()
            .map(|cell| master::CellDescriptor {
                cell_id: proto_tablet::guid_to_proto(cell.0),
                config_version: 1,
                peers: vec![master::CellPeer {
                    addresses: [("default".to_string(), format!("{cell}:9020"))].into(),
                    voting: true,
                }],
                leader_index: Some(0),
            })
            .collect();

        Some(RspGetMountInfo {
            table_id: fixture.table_id.clone(),
            schema: Some(master::TableSchema {
                columns: fixture.columns.clone(),
            }),
            dynamic: true,
            upstream_replica_id: Vec::new(),
            tablets,
            tablet_cells,
            replicas: Vec::new(),
            revision: fixture.secondary_revision,
        })
    }
}

#[async_trait::async_trait]
impl MasterClient for TestMaster {
    async fn get_table_attributes(
        &self,
        req: ReqGetTableAttributes,
    ) -> Result<RspGetTableAttributes, ServiceError> {
        self.attrs_calls.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.lock().unwrap();
        let fixture = tables
            .get(&req.path)
            .ok_or_else(|| ServiceError::new(ErrorKind::ResolveError, "no such table"))?;
        Ok(RspGetTableAttributes {
            table_id: fixture.table_id.clone(),
            dynamic: true,
            external_cell_tag: 1,
            revision: 1,
        })
    }

    async fn get_mount_info(
        &self,
        _cell_tag: u32,
        req: ReqGetMountInfo,
    ) -> Result<RspGetMountInfo, ServiceError> {
        self.mount_calls.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.lock().unwrap();
        let path = tables
            .iter()
            .find(|(_, fixture)| fixture.table_id == req.table_id)
            .map(|(path, _)| path.clone())
            .ok_or_else(|| ServiceError::new(ErrorKind::ResolveError, "no such table id"))?;
        drop(tables);
        self.response_for(&path)
            .ok_or_else(|| ServiceError::new(ErrorKind::ResolveError, "no such table"))
    }
}

/// A write observed by a tablet cell, with its rows decoded.
#[derive(Clone, Debug)]
pub struct RecordedWrite {
    pub address: String,
    pub tablet_id: TabletId,
    pub mount_revision: u64,
    pub signature: u32,
    pub rows: Vec<(Command, Row)>,
}

#[derive(Clone, Debug)]
struct TabletLookupSchema {
    key_types: Vec<ValueType>,
    row_width: usize,
}

/// Shared state behind every in-memory channel: records requests and
/// serves seeded lookup rows.
#[derive(Default)]
pub struct ChannelHub {
    pub writes: Mutex<Vec<RecordedWrite>>,
    pub actions: Mutex<Vec<RegisterActionsRequest>>,
    write_failures: Mutex<VecDeque<ServiceError>>,
    /// `tablet → encoded key → full row` for lookups.
    lookup_rows: Mutex<HashMap<TabletId, BTreeMap<Vec<u8>, Row>>>,
    lookup_schemas: Mutex<HashMap<TabletId, TabletLookupSchema>>,
    pub lookup_calls: AtomicU64,
}

impl ChannelHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn channel(self: &Arc<Self>, address: &str) -> Arc<dyn TabletChannel> {
        Arc::new(TestChannel {
            address: address.to_string(),
            hub: self.clone(),
        })
    }

    /// Queue a failure for the next write request.
    pub fn fail_next_write(&self, error: ServiceError) {
        self.write_failures.lock().unwrap().push_back(error);
    }

    /// Teach a tablet how to decode lookup keys and how wide its rows are.
    /// Must be called for every tablet a test reads from.
    pub fn set_lookup_schema(&self, tablet: TabletId, key_types: Vec<ValueType>, row_width: usize) {
        self.lookup_schemas.lock().unwrap().insert(
            tablet,
            TabletLookupSchema {
                key_types,
                row_width,
            },
        );
    }

    pub fn seed_lookup_row(&self, tablet: TabletId, key: &Row, row: Row) {
        self.lookup_rows
            .lock()
            .unwrap()
            .entry(tablet)
            .or_default()
            .insert(encode_key(key), row);
    }

    pub fn written_rows(&self, tablet: TabletId) -> Vec<(Command, Row)> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|write| write.tablet_id == tablet)
            .flat_map(|write| write.rows.clone())
            .collect()
    }
}

fn encode_key(key: &Row) -> Vec<u8> {
    let mut writer = wire::Writer::new();
    writer.write_unversioned_row(key);
    writer.finish().to_vec()
}

struct TestChannel {
    address: String,
    hub: Arc<ChannelHub>,
}

#[async_trait::async_trait]
impl TabletChannel for TestChannel {
    async fn write(&self, req: WriteRequest) -> Result<(), ServiceError> {
        if let Some(error) = self.hub.write_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut rows = Vec::new();
        for attachment in &req.attachments {
            let data = decompress_envelope(attachment)
                .map_err(|err| ServiceError::new(ErrorKind::Generic, err.to_string()))?;
            let mut reader = wire::Reader::new(data);
            while !reader.is_exhausted() {
                let command = reader
                    .read_command()
                    .map_err(|err| ServiceError::new(ErrorKind::Generic, err.to_string()))?;
                let row = reader
                    .read_unversioned_row()
                    .map_err(|err| ServiceError::new(ErrorKind::Generic, err.to_string()))?;
                rows.push((command, row));
            }
        }

        self.hub.writes.lock().unwrap().push(RecordedWrite {
            address: self.address.clone(),
            tablet_id: req.tablet_id,
            mount_revision: req.mount_revision,
            signature: req.signature,
            rows,
        });
        Ok(())
    }

    async fn lookup(&self, req: LookupRequest) -> Result<LookupResponse, ServiceError> {
        self.hub.lookup_calls.fetch_add(1, Ordering::SeqCst);

        let data = decompress_envelope(&req.attachments[0])
            .map_err(|err| ServiceError::new(ErrorKind::Generic, err.to_string()))?;
        let mut reader = wire::Reader::new(data);

        let command = reader
            .read_command()
            .map_err(|err| ServiceError::new(ErrorKind::Generic, err.to_string()))?;
        assert_eq!(command, Command::LookupRows);
        let message: proto_tablet::tablet::ReqLookupRows = reader
            .read_message()
            .map_err(|err| ServiceError::new(ErrorKind::Generic, err.to_string()))?;

        let schema = self
            .hub
            .lookup_schemas
            .lock()
            .unwrap()
            .get(&req.tablet_id)
            .cloned()
            .unwrap_or_else(|| panic!("no lookup schema registered for {}", req.tablet_id));

        let keys = reader
            .read_schemaful_rowset(&schema.key_types)
            .map_err(|err| ServiceError::new(ErrorKind::Generic, err.to_string()))?;

        let store = self.hub.lookup_rows.lock().unwrap();
        let rows = store.get(&req.tablet_id);

        let projected: Vec<Option<Row>> = keys
            .iter()
            .map(|key| {
                let key = key.as_ref().expect("request keys are never null");
                let found = rows.and_then(|rows| rows.get(&encode_key(key)));
                found.map(|row| project(row, &message.column_filter_indexes))
            })
            .collect();
        let width = if message.column_filter_indexes.is_empty() {
            schema.row_width
        } else {
            message.column_filter_indexes.len()
        };

        let mut writer = wire::Writer::new();
        writer.write_schemaful_rowset(width, projected.iter().map(Option::as_ref));

        Ok(LookupResponse {
            attachments: vec![wire::compress_with_envelope(
                &writer.finish(),
                req.response_codec,
            )],
        })
    }

    async fn register_actions(&self, req: RegisterActionsRequest) -> Result<(), ServiceError> {
        self.hub.actions.lock().unwrap().push(req);
        Ok(())
    }
}

fn project(row: &Row, filter: &[u32]) -> Row {
    if filter.is_empty() {
        return row.clone();
    }
    filter
        .iter()
        .enumerate()
        .map(|(index, position)| {
            let value = row
                .find(*position as u16)
                .cloned()
                .unwrap_or(Value::Null);
            UnversionedValue::new(index as u16, value)
        })
        .collect()
}

#[derive(Default)]
pub struct TestCoordinator {
    next_timestamp: AtomicU64,
    pub participants: Mutex<HashMap<TransactionId, BTreeSet<CellId>>>,
    pub commits: Mutex<Vec<(TransactionId, Vec<CellId>, CommitOptions)>>,
    pub aborts: Mutex<Vec<TransactionId>>,
    pub pings: AtomicU64,
}

impl TestCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_timestamp: AtomicU64::new(100),
            ..Self::default()
        })
    }

    pub fn committed(&self, id: TransactionId) -> Option<Vec<CellId>> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .find(|(commit_id, _, _)| *commit_id == id)
            .map(|(_, cells, _)| cells.clone())
    }
}

#[async_trait::async_trait]
impl TransactionCoordinator for TestCoordinator {
    async fn start(
        &self,
        options: &TransactionStartOptions,
    ) -> Result<StartedTransaction, ServiceError> {
        Ok(StartedTransaction {
            id: options.id.unwrap_or_else(TransactionId::random),
            start_timestamp: self.next_timestamp.fetch_add(1, Ordering::SeqCst),
            timeout: options.timeout.unwrap_or(std::time::Duration::from_secs(15)),
        })
    }

    async fn attach(
        &self,
        id: TransactionId,
        _ping: bool,
    ) -> Result<StartedTransaction, ServiceError> {
        Ok(StartedTransaction {
            id,
            start_timestamp: self.next_timestamp.fetch_add(1, Ordering::SeqCst),
            timeout: std::time::Duration::from_secs(15),
        })
    }

    async fn add_participant(
        &self,
        id: TransactionId,
        cell_id: CellId,
    ) -> Result<(), ServiceError> {
        self.participants
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .insert(cell_id);
        Ok(())
    }

    async fn ping(&self, _id: TransactionId) -> Result<(), ServiceError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(
        &self,
        id: TransactionId,
        participant_cell_ids: Vec<CellId>,
        options: &CommitOptions,
    ) -> Result<Timestamp, ServiceError> {
        self.commits
            .lock()
            .unwrap()
            .push((id, participant_cell_ids, options.clone()));
        Ok(self.next_timestamp.fetch_add(1, Ordering::SeqCst))
    }

    async fn abort(&self, id: TransactionId, _options: &tablet_client::AbortOptions) -> Result<(), ServiceError> {
        self.aborts.lock().unwrap().push(id);
        Ok(())
    }
}

pub struct TestCluster {
    pub master: Arc<TestMaster>,
    pub hub: Arc<ChannelHub>,
    pub coordinator: Arc<TestCoordinator>,
    pub client: Client,
}

pub fn cluster(name: &str, config: TabletClientConfig) -> TestCluster {
    let master = Arc::new(TestMaster::default());
    let hub = ChannelHub::new();
    let coordinator = TestCoordinator::new();

    let factory_hub = hub.clone();
    let directory = Arc::new(CellDirectory::new(
        vec!["default".to_string()],
        move |address| factory_hub.channel(address),
    ));

    let cache_directory = directory.clone();
    let mount_cache = MountCache::new(
        MountCacheConfig::default(),
        master.clone(),
        move |descriptor| cache_directory.reconfigure_cell(descriptor),
    );

    let client = Client::new(
        ClientOptions {
            cluster: name.to_string(),
            config,
        },
        mount_cache,
        directory,
        coordinator.clone(),
        None,
    );

    TestCluster {
        master,
        hub,
        coordinator,
        client,
    }
}
