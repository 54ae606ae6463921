use crate::channel::{LookupRequest, TabletChannel};
use crate::client::{call_and_retry_if_metadata_cache_is_inconsistent, ClientCore};
use crate::router;
use crate::Error;
use cell_directory::{hedge, PeerKind};
use model::{timestamp, CellId, Timestamp};
use mount_cache::{TableMountInfo, TabletInfo};
use row::{compare_rows, IdMapping, NameTable, Row, RowBuffer, SchemaKind, ValueType};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use wire::{compress_with_envelope, decompress_envelope, Command};

#[derive(Clone, Debug)]
pub struct LookupRowsOptions {
    pub timestamp: Timestamp,
    /// Name-table ids of the columns to return; `None` returns all.
    pub column_filter: Option<Vec<u16>>,
    /// Keep a `None` slot for keys the server had no row for, instead of
    /// trimming them.
    pub keep_missing_rows: bool,
    /// Wall-clock bound on the whole call, retries included.
    pub timeout: Option<std::time::Duration>,
}

impl Default for LookupRowsOptions {
    fn default() -> Self {
        Self {
            timestamp: timestamp::SYNC_LAST_COMMITTED_TIMESTAMP,
            column_filter: None,
            keep_missing_rows: false,
            timeout: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SelectRowsOptions {
    /// Overrides the read timestamp; defaults to sync-last-committed.
    pub timestamp: Option<Timestamp>,
    pub input_row_limit: Option<usize>,
    pub output_row_limit: Option<usize>,
    /// Wall-clock bound on the whole call.
    pub timeout: Option<std::time::Duration>,
}

pub(crate) async fn lookup_rows_with_retries(
    core: &ClientCore,
    path: &str,
    name_table: Arc<NameTable>,
    keys: Vec<Row>,
    options: LookupRowsOptions,
) -> Result<Vec<Option<Row>>, Error> {
    call_and_retry_if_metadata_cache_is_inconsistent(core, || {
        lookup_rows_once(core, path, name_table.clone(), keys.clone(), options.clone())
    })
    .await
}

/// One attempt of a point lookup: resolve mount info, group deduplicated
/// keys per cell, fan requests out, and reassemble rows in caller order.
async fn lookup_rows_once(
    core: &ClientCore,
    path: &str,
    name_table: Arc<NameTable>,
    keys: Vec<Row>,
    options: LookupRowsOptions,
) -> Result<Vec<Option<Row>>, Error> {
    let table = core.mount_cache.get_table_info(path).await?;
    table.validate_dynamic()?;
    table.validate_sorted()?;
    table.validate_not_replicated()?;

    let primary = table.schema(SchemaKind::Primary);
    let key_width = primary.key_column_count();
    let mapping = IdMapping::build(primary, &name_table)?;

    let column_filter = resolve_column_filter(&options, &mapping, primary)?;
    let result_types = result_value_types(primary, &column_filter);

    let evaluator = if table.need_key_evaluation {
        Some(core.evaluators.find(primary)?)
    } else {
        None
    };

    // Capture and complete each key, remembering its caller position.
    let mut row_buffer = RowBuffer::new(core.config.max_row_buffer_size);
    let mut sorted_keys = Vec::with_capacity(keys.len());
    for (index, key) in keys.iter().enumerate() {
        row::validate_key(key, primary, &mapping)?;
        let mut captured = row_buffer.capture_and_permute_key(key, primary, &mapping)?;
        if let Some(evaluator) = &evaluator {
            evaluator.evaluate_keys(&mut captured, primary)?;
        }
        sorted_keys.push((captured, index));
    }

    // The server requires keys in order; equal keys collapse into one
    // server-visible key sharing a response row.
    let mut compare_error = None;
    sorted_keys.sort_by(|(lhs, lhs_index), (rhs, rhs_index)| {
        match compare_rows(lhs, rhs, key_width) {
            Ok(Ordering::Equal) => lhs_index.cmp(rhs_index),
            Ok(order) => order,
            Err(error) => {
                compare_error.get_or_insert(error);
                Ordering::Equal
            }
        }
    });
    if let Some(error) = compare_error {
        return Err(error.into());
    }

    let mut key_index_to_result_index = vec![0usize; keys.len()];
    let mut current_result_index: Option<usize> = None;
    let mut sessions: HashMap<CellId, TabletCellLookupSession> = HashMap::new();

    for position in 0..sorted_keys.len() {
        let is_duplicate = position > 0
            && compare_rows(
                &sorted_keys[position].0,
                &sorted_keys[position - 1].0,
                key_width,
            )? == Ordering::Equal;

        if !is_duplicate {
            let key = sorted_keys[position].0.clone();
            let tablet = router::sorted_tablet_for_lookup(&table, &key)?;
            let next = current_result_index.map(|index| index + 1).unwrap_or(0);
            current_result_index = Some(next);

            sessions
                .entry(tablet.cell_id)
                .or_insert_with(|| TabletCellLookupSession::new(core, &table, &options))
                .add_key(next, tablet, key);
        }

        let result_index = current_result_index.expect("set on the first key");
        key_index_to_result_index[sorted_keys[position].1] = result_index;
    }

    let unique_count = current_result_index.map(|index| index + 1).unwrap_or(0);

    // Fan out per cell; within a cell, batches go out sequentially.
    let results = futures::future::try_join_all(
        sessions
            .into_values()
            .map(|session| session.invoke(&column_filter, &result_types)),
    )
    .await?;

    let mut unique_rows: Vec<Option<Row>> = vec![None; unique_count];
    for rows in results {
        for (result_index, row) in rows {
            unique_rows[result_index] = row;
        }
    }

    let mut result: Vec<Option<Row>> = keys
        .iter()
        .enumerate()
        .map(|(index, _)| unique_rows[key_index_to_result_index[index]].clone())
        .collect();
    if !options.keep_missing_rows {
        result.retain(Option::is_some);
    }
    Ok(result)
}

pub(crate) async fn select_rows(
    core: &ClientCore,
    query: &str,
    read_timestamp: Timestamp,
    options: &SelectRowsOptions,
) -> Result<Vec<Row>, Error> {
    let query_service = core
        .query
        .as_ref()
        .ok_or_else(|| Error::Internal("no query service is attached to this client".into()))?;

    let timestamp = options.timestamp.unwrap_or(read_timestamp);
    let rows = query_service.execute(query, timestamp, options).await?;
    Ok(rows)
}

fn resolve_column_filter(
    options: &LookupRowsOptions,
    mapping: &IdMapping,
    primary: &row::TableSchema,
) -> Result<Option<Vec<u32>>, Error> {
    let Some(filter) = &options.column_filter else {
        return Ok(None);
    };
    let mut positions = Vec::with_capacity(filter.len());
    for name_table_id in filter {
        let position = mapping
            .get(*name_table_id)
            .ok_or(row::Error::UnknownColumnId(*name_table_id))?;
        positions.push(position as u32);
    }
    positions.sort_unstable();
    positions.dedup();
    debug_assert!(positions
        .last()
        .map(|last| (*last as usize) < primary.column_count())
        .unwrap_or(true));
    Ok(Some(positions))
}

/// Value types of response rows: the primary schema narrowed by the
/// column filter.
fn result_value_types(primary: &row::TableSchema, filter: &Option<Vec<u32>>) -> Vec<ValueType> {
    match filter {
        None => primary.columns.iter().map(|c| c.type_).collect(),
        Some(positions) => positions
            .iter()
            .map(|position| primary.columns[*position as usize].type_)
            .collect(),
    }
}

/// Groups this lookup's keys bound for one cell into per-tablet batches
/// and sends them in sequence over a (possibly hedged) channel.
struct TabletCellLookupSession {
    core: ClientCore,
    timestamp: Timestamp,
    key_width: usize,
    batches: Vec<LookupBatch>,
}

struct LookupBatch {
    tablet: Arc<TabletInfo>,
    result_indexes: Vec<usize>,
    keys: Vec<Row>,
}

impl TabletCellLookupSession {
    fn new(core: &ClientCore, table: &Arc<TableMountInfo>, options: &LookupRowsOptions) -> Self {
        Self {
            core: core.clone(),
            timestamp: options.timestamp,
            key_width: table.schema(SchemaKind::Primary).key_column_count(),
            batches: Vec::new(),
        }
    }

    fn add_key(&mut self, result_index: usize, tablet: Arc<TabletInfo>, key: Row) {
        let start_new = match self.batches.last() {
            None => true,
            Some(batch) => {
                batch.tablet.tablet_id != tablet.tablet_id
                    || batch.keys.len() >= self.core.config.max_rows_per_read_request
            }
        };
        if start_new {
            self.batches.push(LookupBatch {
                tablet,
                result_indexes: Vec::new(),
                keys: Vec::new(),
            });
        }
        let batch = self.batches.last_mut().expect("pushed above");
        batch.result_indexes.push(result_index);
        batch.keys.push(key);
    }

    async fn invoke(
        self,
        column_filter: &Option<Vec<u32>>,
        result_types: &[ValueType],
    ) -> Result<Vec<(usize, Option<Row>)>, Error> {
        let cell_id = self.batches.first().map(|batch| batch.tablet.cell_id);
        let Some(cell_id) = cell_id else {
            return Ok(Vec::new());
        };

        let (primary, backup) = match self.core.config.backup_request_delay {
            Some(_) => self
                .core
                .cells
                .channel_with_backup(cell_id, PeerKind::LeaderOrFollower)?,
            None => (
                self.core
                    .cells
                    .channel(cell_id, PeerKind::LeaderOrFollower)?,
                None,
            ),
        };
        let hedge_delay = self
            .core
            .config
            .backup_request_delay
            .unwrap_or_default();

        let mut rows = Vec::new();
        for batch in &self.batches {
            let mut writer = wire::Writer::new();
            writer.write_command(Command::LookupRows);
            writer.write_message(&proto_tablet::tablet::ReqLookupRows {
                column_filter_indexes: column_filter.clone().unwrap_or_default(),
            });
            writer.write_schemaful_rowset(self.key_width, batch.keys.iter().map(Some));

            let request = LookupRequest {
                tablet_id: batch.tablet.tablet_id,
                mount_revision: batch.tablet.mount_revision,
                timestamp: self.timestamp,
                response_codec: self.core.config.lookup_response_codec,
                attachments: vec![compress_with_envelope(
                    &writer.finish(),
                    self.core.config.lookup_request_codec,
                )],
            };

            tracing::debug!(
                tablet_id = %batch.tablet.tablet_id,
                keys = batch.keys.len(),
                "sending lookup batch",
            );

            let response = hedge(primary.clone(), backup.clone(), hedge_delay, |channel| {
                let request = request.clone();
                async move { channel.lookup(request).await }
            })
            .await?;

            let mut decoded = Vec::new();
            for attachment in &response.attachments {
                let data = decompress_envelope(attachment)?;
                let mut reader = wire::Reader::new(data);
                decoded.extend(reader.read_schemaful_rowset(result_types)?);
            }
            if decoded.len() != batch.keys.len() {
                return Err(Error::Internal(format!(
                    "lookup response carries {} rows for {} keys",
                    decoded.len(),
                    batch.keys.len()
                )));
            }
            for (result_index, row) in batch.result_indexes.iter().zip(decoded) {
                rows.push((*result_index, row));
            }
        }
        Ok(rows)
    }
}
