use crate::Error;
use mount_cache::{TableMountInfo, TabletInfo};
use row::{compare_rows, Row, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// Pick the tablet of a sorted table whose pivot range contains `key`,
/// for a write: the tablet must be mounted.
///
/// The key must be schema-ordered with every computed column filled, so
/// that it compares against pivots exactly as the storage engine would.
pub fn sorted_tablet_for_row(
    table: &TableMountInfo,
    key: &Row,
) -> Result<Arc<TabletInfo>, Error> {
    let tablet = find_sorted_tablet(table, key)?;
    tablet.validate_writable()?;
    Ok(tablet)
}

/// As `sorted_tablet_for_row`, for a read: freezing and frozen tablets
/// still serve lookups.
pub fn sorted_tablet_for_lookup(
    table: &TableMountInfo,
    key: &Row,
) -> Result<Arc<TabletInfo>, Error> {
    let tablet = find_sorted_tablet(table, key)?;
    tablet.validate_readable()?;
    Ok(tablet)
}

fn find_sorted_tablet(table: &TableMountInfo, key: &Row) -> Result<Arc<TabletInfo>, Error> {
    let key_width = table
        .schema(row::SchemaKind::Primary)
        .key_column_count();

    // Upper-bound search over pivots, minus one: the last tablet whose
    // pivot is <= key.
    let mut lo = 0usize;
    let mut hi = table.tablets.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        match compare_rows(&table.tablets[mid].pivot_key, key, key_width)? {
            Ordering::Greater => hi = mid,
            Ordering::Less | Ordering::Equal => lo = mid + 1,
        }
    }
    let tablet = table
        .tablets
        .get(lo.checked_sub(1).ok_or(Error::KeyOutOfRange)?)
        .ok_or(Error::KeyOutOfRange)?;
    Ok(tablet.clone())
}

/// Pick the tablet of an ordered table for one modification row.
///
/// An explicit `$tablet_index` value in the caller's row selects the
/// tablet; rows without one go to `random_tablet`, the mounted tablet the
/// transaction picked once for this table.
pub fn ordered_tablet_for_row(
    table: &TableMountInfo,
    random_tablet: &Arc<TabletInfo>,
    tablet_index_column_id: Option<u16>,
    row: &Row,
) -> Result<Arc<TabletInfo>, Error> {
    let index_value = tablet_index_column_id.and_then(|id| row.find(id));

    let tablet = match index_value {
        None | Some(Value::Null) => random_tablet.clone(),
        Some(Value::Int64(index)) => {
            let tablet = usize::try_from(*index)
                .ok()
                .and_then(|index| table.tablets.get(index))
                .ok_or_else(|| Error::TabletIndexOutOfRange {
                    path: table.path.clone(),
                    index: *index,
                    tablet_count: table.tablets.len(),
                })?;
            tablet.clone()
        }
        Some(_) => return Err(Error::BadTabletIndexValue(table.path.clone())),
    };

    tablet.validate_writable()?;
    Ok(tablet)
}

#[cfg(test)]
mod test {
    use super::*;
    use mount_cache::{MasterClient, MountCache, MountCacheConfig};
    use model::ServiceError;
    use proto_tablet::master::{
        self, ReqGetMountInfo, ReqGetTableAttributes, RspGetMountInfo, RspGetTableAttributes,
    };
    use row::{row, UnversionedValue};

    /// Serves a fixed mount topology so router tests exercise real
    /// `TableMountInfo` construction.
    struct FixtureMaster {
        sorted: bool,
        pivots: Vec<Row>,
        tablet_count: usize,
        unmounted: Vec<usize>,
    }

    #[async_trait::async_trait]
    impl MasterClient for FixtureMaster {
        async fn get_table_attributes(
            &self,
            _req: ReqGetTableAttributes,
        ) -> Result<RspGetTableAttributes, ServiceError> {
            Ok(RspGetTableAttributes {
                table_id: proto_tablet::guid_to_proto(model::Guid::from_bytes([1; 16])),
                dynamic: true,
                external_cell_tag: 1,
                revision: 1,
            })
        }

        async fn get_mount_info(
            &self,
            _cell_tag: u32,
            _req: ReqGetMountInfo,
        ) -> Result<RspGetMountInfo, ServiceError> {
            let columns = if self.sorted {
                vec![
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
                ]
            } else {
                vec![master::ColumnSchema {
                    name: "v".to_string(),
                    r#type: row::ValueType::String.wire_code() as u32,
                    sorted: false,
                    expression: None,
                    required: false,
                }]
            };

            let tablets = (0..self.tablet_count)
                .map(|index| {
                    let pivot_key = if self.sorted {
                        let mut writer = wire::Writer::new();
                        writer.write_unversioned_row(&self.pivots[index]);
                        Some(writer.finish().to_vec())
                    } else {
                        None
                    };
                    master::TabletInfo {
                        tablet_id: proto_tablet::guid_to_proto(model::Guid::from_bytes(
                            [index as u8 + 1; 16],
                        )),
                        cell_id: proto_tablet::guid_to_proto(model::Guid::from_bytes([9; 16])),
                        mount_revision: 1,
                        state: if self.unmounted.contains(&index) {
                            master::TabletState::Unmounted as i32
                        } else {
                            master::TabletState::Mounted as i32
                        },
                        in_memory_mode: master::InMemoryMode::None as i32,
                        pivot_key,
                    }
                })
                .collect();

            Ok(RspGetMountInfo {
                table_id: proto_tablet::guid_to_proto(model::Guid::from_bytes([1; 16])),
                schema: Some(master::TableSchema { columns }),
                dynamic: true,
                upstream_replica_id: Vec::new(),
                tablets,
                tablet_cells: Vec::new(),
                replicas: Vec::new(),
                revision: 1,
            })
        }
    }

    async fn table(master: FixtureMaster) -> Arc<TableMountInfo> {
        let cache = MountCache::new(MountCacheConfig::default(), Arc::new(master), |_| {});
        cache.get_table_info("//t").await.unwrap()
    }

    fn sorted_fixture(pivots: Vec<Row>, unmounted: Vec<usize>) -> FixtureMaster {
        FixtureMaster {
            sorted: true,
            tablet_count: pivots.len(),
            pivots,
            unmounted,
        }
    }

    #[tokio::test]
    async fn routes_keys_to_pivot_ranges() {
        let table = table(sorted_fixture(
            vec![Row::default(), row![(0, 10i64)], row![(0, 20i64)]],
            vec![],
        ))
        .await;

        for (key, expected_tablet) in [(5i64, 0), (10, 1), (15, 1), (20, 2), (100, 2)] {
            let tablet = sorted_tablet_for_row(&table, &row![(0, key)]).unwrap();
            assert_eq!(
                tablet.tablet_id, table.tablets[expected_tablet].tablet_id,
                "key {key}"
            );
        }
    }

    #[tokio::test]
    async fn write_routing_requires_a_mounted_tablet() {
        let table = table(sorted_fixture(
            vec![Row::default(), row![(0, 10i64)]],
            vec![1],
        ))
        .await;

        assert!(matches!(
            sorted_tablet_for_row(&table, &row![(0, 50i64)]),
            Err(Error::Mount(mount_cache::Error::TabletNotMounted(id)))
                if id == table.tablets[1].tablet_id
        ));
    }

    #[tokio::test]
    async fn explicit_tablet_index_selects_the_shard() {
        let table = table(FixtureMaster {
            sorted: false,
            pivots: vec![],
            tablet_count: 3,
            unmounted: vec![],
        })
        .await;
        let random = table.random_mounted_tablet().unwrap();

        let name_table = row::NameTable::new();
        let index_id = name_table.register(row::TABLET_INDEX_COLUMN_NAME);
        name_table.register("v");

        let row = Row::new(vec![
            UnversionedValue::new(index_id, Value::Int64(2)),
            UnversionedValue::new(1, "x"),
        ]);
        let tablet = ordered_tablet_for_row(&table, &random, Some(index_id), &row).unwrap();
        assert_eq!(tablet.tablet_id, table.tablets[2].tablet_id);

        // Out-of-range index.
        let row = Row::new(vec![UnversionedValue::new(index_id, Value::Int64(3))]);
        assert!(matches!(
            ordered_tablet_for_row(&table, &random, Some(index_id), &row),
            Err(Error::TabletIndexOutOfRange { index: 3, tablet_count: 3, .. })
        ));

        // No index column: the transaction's pinned random tablet.
        let row = row![(1, "x")];
        let tablet = ordered_tablet_for_row(&table, &random, Some(index_id), &row).unwrap();
        assert_eq!(tablet.tablet_id, random.tablet_id);
    }
}
