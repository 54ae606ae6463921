use crate::Error;
use model::{CellId, ReplicaId, TableId, TabletId};
use row::{compare_rows, max_key, min_key, Row, SchemaKind, TableSchema, UnversionedValue, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TabletState {
    Mounting,
    Mounted,
    Unmounting,
    Unmounted,
    Freezing,
    Frozen,
    Unfreezing,
}

impl TabletState {
    fn from_proto(proto: proto_tablet::master::TabletState) -> Self {
        use proto_tablet::master::TabletState as Proto;
        match proto {
            Proto::Mounting => TabletState::Mounting,
            Proto::Mounted => TabletState::Mounted,
            Proto::Unmounting => TabletState::Unmounting,
            Proto::Unmounted => TabletState::Unmounted,
            Proto::Freezing => TabletState::Freezing,
            Proto::Frozen => TabletState::Frozen,
            Proto::Unfreezing => TabletState::Unfreezing,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InMemoryMode {
    None,
    Compressed,
    Uncompressed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReplicaMode {
    Sync,
    Async,
}

#[derive(Clone, Debug)]
pub struct ReplicaInfo {
    pub replica_id: ReplicaId,
    pub cluster_name: String,
    pub replica_path: String,
    pub mode: ReplicaMode,
}

/// One shard of a mounted dynamic table.
#[derive(Debug)]
pub struct TabletInfo {
    pub tablet_id: TabletId,
    pub cell_id: CellId,
    pub mount_revision: u64,
    pub state: TabletState,
    pub in_memory_mode: InMemoryMode,
    /// Pivot key for sorted tables; the synthetic `(index)` key for
    /// ordered tables.
    pub pivot_key: Row,
    /// When this tablet's info was fetched; drives staleness-retry pacing.
    pub update_time: Instant,
    /// Tables whose mount info reference this tablet.
    pub(crate) owners: Mutex<Vec<Weak<TableMountInfo>>>,
}

impl TabletInfo {
    /// A write may only target a mounted tablet.
    pub fn validate_writable(&self) -> Result<(), Error> {
        match self.state {
            TabletState::Mounted => Ok(()),
            _ => Err(Error::TabletNotMounted(self.tablet_id)),
        }
    }

    /// A read may also be served while the tablet freezes.
    pub fn validate_readable(&self) -> Result<(), Error> {
        match self.state {
            TabletState::Mounted | TabletState::Freezing | TabletState::Frozen => Ok(()),
            _ => Err(Error::TabletNotMounted(self.tablet_id)),
        }
    }

    pub fn owners(&self) -> Vec<Arc<TableMountInfo>> {
        self.owners
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

/// The resolved mount topology of one dynamic table.
#[derive(Debug)]
pub struct TableMountInfo {
    pub path: String,
    pub table_id: TableId,
    pub dynamic: bool,
    pub upstream_replica_id: ReplicaId,
    pub need_key_evaluation: bool,
    pub primary_revision: u64,
    pub secondary_revision: u64,
    schemas: HashMap<SchemaKind, Arc<TableSchema>>,
    pub tablets: Vec<Arc<TabletInfo>>,
    pub mounted_tablets: Vec<Arc<TabletInfo>>,
    pub replicas: Vec<ReplicaInfo>,
    pub lower_cap_bound: Row,
    pub upper_cap_bound: Row,
}

impl TableMountInfo {
    pub fn schema(&self, kind: SchemaKind) -> &Arc<TableSchema> {
        self.schemas.get(&kind).expect("all schema kinds are built")
    }

    pub fn is_sorted(&self) -> bool {
        self.schema(SchemaKind::Primary).is_sorted()
    }

    pub fn validate_dynamic(&self) -> Result<(), Error> {
        if !self.dynamic {
            return Err(Error::NotDynamic(self.path.clone()));
        }
        Ok(())
    }

    pub fn validate_sorted(&self) -> Result<(), Error> {
        if !self.is_sorted() {
            return Err(Error::NotSorted(self.path.clone()));
        }
        Ok(())
    }

    pub fn validate_ordered(&self) -> Result<(), Error> {
        if self.is_sorted() {
            return Err(Error::NotOrdered(self.path.clone()));
        }
        Ok(())
    }

    pub fn validate_not_replicated(&self) -> Result<(), Error> {
        if !self.replicas.is_empty() || !self.upstream_replica_id.is_null() {
            return Err(Error::Replicated(self.path.clone()));
        }
        Ok(())
    }

    pub fn random_mounted_tablet(&self) -> Result<Arc<TabletInfo>, Error> {
        use rand::seq::SliceRandom;
        self.mounted_tablets
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| Error::NoMountedTablet(self.path.clone()))
    }

    /// Build a `TableMountInfo` from a mount info response, wiring each
    /// tablet back to its owner.
    pub(crate) fn from_proto(
        path: &str,
        primary_revision: u64,
        proto: &proto_tablet::master::RspGetMountInfo,
    ) -> Result<Arc<Self>, Error> {
        let bad = |message: String| Error::BadMountInfo {
            path: path.to_string(),
            message,
        };

        let table_id = proto_tablet::guid_from_proto(&proto.table_id)
            .map(TableId)
            .ok_or_else(|| bad("bad table id".to_string()))?;

        let primary = Arc::new(decode_schema(
            proto
                .schema
                .as_ref()
                .ok_or_else(|| bad("missing schema".to_string()))?,
        )?);
        let sorted = primary.is_sorted();

        let mut schemas = HashMap::new();
        for kind in [
            SchemaKind::Write,
            SchemaKind::VersionedWrite,
            SchemaKind::Delete,
            SchemaKind::Query,
            SchemaKind::Lookup,
            SchemaKind::PrimaryWithTabletIndex,
        ] {
            schemas.insert(kind, Arc::new(primary.to_kind(kind)));
        }
        let need_key_evaluation = primary.has_computed_columns();
        schemas.insert(SchemaKind::Primary, primary);

        let mut tablets = Vec::with_capacity(proto.tablets.len());
        for (index, tablet) in proto.tablets.iter().enumerate() {
            let pivot_key = if sorted {
                let bytes = tablet
                    .pivot_key
                    .as_ref()
                    .ok_or_else(|| bad(format!("tablet {index} is missing its pivot key")))?;
                let mut reader = wire::Reader::new(bytes.clone().into());
                reader.read_unversioned_row()?
            } else {
                Row::new(vec![UnversionedValue::new(0, Value::Int64(index as i64))])
            };

            tablets.push(TabletInfo {
                tablet_id: proto_tablet::guid_from_proto(&tablet.tablet_id)
                    .map(TabletId)
                    .ok_or_else(|| bad(format!("tablet {index} has a bad id")))?,
                cell_id: proto_tablet::guid_from_proto(&tablet.cell_id)
                    .map(CellId)
                    .ok_or_else(|| bad(format!("tablet {index} has a bad cell id")))?,
                mount_revision: tablet.mount_revision,
                state: TabletState::from_proto(tablet.state()),
                in_memory_mode: match tablet.in_memory_mode() {
                    proto_tablet::master::InMemoryMode::None => InMemoryMode::None,
                    proto_tablet::master::InMemoryMode::Compressed => InMemoryMode::Compressed,
                    proto_tablet::master::InMemoryMode::Uncompressed => InMemoryMode::Uncompressed,
                },
                pivot_key,
                update_time: Instant::now(),
                owners: Mutex::new(Vec::new()),
            });
        }

        let (lower_cap_bound, upper_cap_bound) = if sorted {
            (min_key(), max_key())
        } else {
            (
                Row::new(vec![UnversionedValue::new(0, Value::Int64(0))]),
                Row::new(vec![UnversionedValue::new(
                    0,
                    Value::Int64(tablets.len() as i64),
                )]),
            )
        };

        if sorted {
            let key_width = schemas[&SchemaKind::Primary].key_column_count();
            for (index, pair) in tablets.windows(2).enumerate() {
                match compare_rows(&pair[0].pivot_key, &pair[1].pivot_key, key_width) {
                    Ok(Ordering::Less) => {}
                    _ => return Err(bad(format!("pivot keys of tablets {index} and {} are not strictly increasing", index + 1))),
                }
            }
            if let Some(first) = tablets.first() {
                if compare_rows(&first.pivot_key, &lower_cap_bound, key_width)
                    .map(|ord| ord != Ordering::Equal)
                    .unwrap_or(true)
                {
                    return Err(bad("first pivot key is not the lower cap bound".to_string()));
                }
            }
        }

        let replicas = proto
            .replicas
            .iter()
            .map(|replica| {
                Some(ReplicaInfo {
                    replica_id: ReplicaId(proto_tablet::guid_from_proto(&replica.replica_id)?),
                    cluster_name: replica.cluster_name.clone(),
                    replica_path: replica.replica_path.clone(),
                    mode: match replica.mode() {
                        proto_tablet::master::ReplicaMode::Sync => ReplicaMode::Sync,
                        proto_tablet::master::ReplicaMode::Async => ReplicaMode::Async,
                    },
                })
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| bad("bad replica id".to_string()))?;

        let upstream_replica_id = if proto.upstream_replica_id.is_empty() {
            ReplicaId::default()
        } else {
            ReplicaId(
                proto_tablet::guid_from_proto(&proto.upstream_replica_id)
                    .ok_or_else(|| bad("bad upstream replica id".to_string()))?,
            )
        };

        Ok(Arc::new_cyclic(|weak: &Weak<TableMountInfo>| {
            let tablets: Vec<Arc<TabletInfo>> = tablets
                .into_iter()
                .map(|tablet| {
                    tablet.owners.lock().unwrap().push(weak.clone());
                    Arc::new(tablet)
                })
                .collect();
            let mounted_tablets = tablets
                .iter()
                .filter(|tablet| tablet.state == TabletState::Mounted)
                .cloned()
                .collect();

            TableMountInfo {
                path: path.to_string(),
                table_id,
                dynamic: proto.dynamic,
                upstream_replica_id,
                need_key_evaluation,
                primary_revision,
                secondary_revision: proto.revision,
                schemas,
                tablets,
                mounted_tablets,
                replicas,
                lower_cap_bound,
                upper_cap_bound,
            }
        }))
    }
}

fn decode_schema(proto: &proto_tablet::master::TableSchema) -> Result<TableSchema, Error> {
    let columns = proto
        .columns
        .iter()
        .map(|column| {
            let type_ = row::ValueType::from_wire_code(column.r#type as u8).ok_or_else(|| {
                Error::BadMountInfo {
                    path: String::new(),
                    message: format!("column '{}' has unknown type", column.name),
                }
            })?;
            let mut schema = row::ColumnSchema::new(&column.name, type_);
            if column.sorted {
                schema = schema.sorted();
            }
            if let Some(expression) = &column.expression {
                schema = schema.computed(expression.clone());
            }
            if column.required {
                schema = schema.required();
            }
            Ok(schema)
        })
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(TableSchema::new(columns))
}
