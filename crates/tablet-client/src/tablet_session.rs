use crate::cell_session::CellCommitSession;
use crate::channel::{TabletChannel, WriteRequest};
use crate::config::TabletClientConfig;
use crate::transaction::{CommitContext, ParticipantSet};
use crate::Error;
use bytes::Bytes;
use model::{Atomicity, CellId};
use mount_cache::{TableMountInfo, TabletInfo};
use row::{compare_rows, MergedRow, Row, SchemaKind, UnversionedRowMerger};
use std::cmp::Ordering;
use std::sync::Arc;
use wire::{compress_with_envelope, Command, CompressionCodec};

/// Buffers the rows a transaction submits to one tablet and ships them as
/// a sequence of signed, envelope-compressed write batches.
pub(crate) struct TabletCommitSession {
    tablet: Arc<TabletInfo>,
    table: Arc<TableMountInfo>,
    max_rows_per_write_request: usize,
    max_rows_per_transaction: usize,
    codec: CompressionCodec,
    submitted: Vec<SubmittedRow>,
    batches: Vec<Batch>,
}

struct SubmittedRow {
    command: Command,
    row: Row,
    /// Insertion index; the tiebreaker keeping same-key edits in call
    /// order through the sort.
    sequential_id: usize,
}

struct Batch {
    writer: wire::Writer,
    row_count: usize,
}

impl TabletCommitSession {
    pub fn new(
        tablet: Arc<TabletInfo>,
        table: Arc<TableMountInfo>,
        config: &TabletClientConfig,
    ) -> Self {
        Self {
            tablet,
            table,
            max_rows_per_write_request: config.max_rows_per_write_request,
            max_rows_per_transaction: config.max_rows_per_transaction,
            codec: config.write_request_codec,
            submitted: Vec::new(),
            batches: Vec::new(),
        }
    }

    pub fn cell_id(&self) -> CellId {
        self.tablet.cell_id
    }

    pub fn tablet_id(&self) -> model::TabletId {
        self.tablet.tablet_id
    }

    pub fn submit_row(&mut self, command: Command, row: Row) -> Result<(), Error> {
        if self.submitted.len() >= self.max_rows_per_transaction {
            return Err(Error::TooManyRowsInTransaction(
                self.max_rows_per_transaction,
            ));
        }
        self.submitted.push(SubmittedRow {
            command,
            row,
            sequential_id: self.submitted.len(),
        });
        Ok(())
    }

    /// Order, merge, and serialize submitted rows into wire batches.
    /// Returns the batch count, which the owning cell session registers
    /// for signature accounting.
    pub fn prepare(&mut self) -> Result<usize, Error> {
        if self.table.is_sorted() {
            self.prepare_sorted_batches()?;
        } else {
            self.prepare_ordered_batches();
        }
        Ok(self.batches.len())
    }

    fn prepare_sorted_batches(&mut self) -> Result<(), Error> {
        let schema = self.table.schema(SchemaKind::Primary);
        let key_width = schema.key_column_count();
        let column_count = schema.column_count();

        // Any-typed key values are rejected at validation, so comparisons
        // here cannot fault; a failure is still captured and surfaced
        // rather than silently misordering the batch.
        let mut compare_error = None;
        self.submitted.sort_by(|lhs, rhs| {
            match compare_rows(&lhs.row, &rhs.row, key_width) {
                Ok(Ordering::Equal) => lhs.sequential_id.cmp(&rhs.sequential_id),
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

        let mut merger = UnversionedRowMerger::new(column_count, key_width);
        let submitted = std::mem::take(&mut self.submitted);

        let mut index = 0;
        while index < submitted.len() {
            let mut run_end = index + 1;
            while run_end < submitted.len()
                && compare_rows(&submitted[index].row, &submitted[run_end].row, key_width)?
                    == Ordering::Equal
            {
                run_end += 1;
            }

            if run_end - index == 1 {
                let submitted = &submitted[index];
                self.write_row(submitted.command, &submitted.row);
            } else {
                for submitted in &submitted[index..run_end] {
                    match submitted.command {
                        Command::WriteRow => merger.add_partial_row(&submitted.row),
                        Command::DeleteRow => merger.delete_partial_row(&submitted.row),
                        _ => unreachable!("only writes and deletes are submitted"),
                    }
                }
                match merger.build_merged_row() {
                    MergedRow::Write(row) => self.write_row(Command::WriteRow, &row),
                    MergedRow::Delete(key) => self.write_row(Command::DeleteRow, &key),
                }
            }
            index = run_end;
        }
        Ok(())
    }

    fn prepare_ordered_batches(&mut self) {
        let submitted = std::mem::take(&mut self.submitted);
        for submitted in &submitted {
            self.write_row(submitted.command, &submitted.row);
        }
    }

    fn write_row(&mut self, command: Command, row: &Row) {
        if self
            .batches
            .last()
            .map(|batch| batch.row_count >= self.max_rows_per_write_request)
            .unwrap_or(true)
        {
            self.batches.push(Batch {
                writer: wire::Writer::new(),
                row_count: 0,
            });
        }
        let batch = self.batches.last_mut().expect("pushed above");
        batch.writer.write_command(command);
        batch.writer.write_unversioned_row(row);
        batch.row_count += 1;
    }

    /// Send prepared batches strictly in order; the next batch goes out
    /// only after the previous one was acknowledged. Each acknowledged
    /// batch registers this tablet's cell as a commit participant.
    pub async fn invoke(
        self,
        channel: Arc<dyn TabletChannel>,
        ctx: CommitContext,
        cell_session: Arc<CellCommitSession>,
        participants: Arc<ParticipantSet>,
    ) -> Result<(), Error> {
        // Compress everything up front; sends then pace on the network.
        let batch_count = self.batches.len();
        let batches: Vec<(Bytes, usize)> = self
            .batches
            .into_iter()
            .map(|batch| {
                let data = batch.writer.finish();
                (compress_with_envelope(&data, self.codec), batch.row_count)
            })
            .collect();

        for (index, (payload, row_count)) in batches.into_iter().enumerate() {
            let signature = cell_session.allocate_request_signature();

            tracing::debug!(
                transaction_id = %ctx.transaction_id,
                tablet_id = %self.tablet.tablet_id,
                batch = index,
                batches = batch_count,
                rows = row_count,
                signature = format_args!("{signature:x}"),
                "sending write batch",
            );

            let atomic = ctx.atomicity == Atomicity::Full;
            channel
                .write(WriteRequest {
                    transaction_id: ctx.transaction_id,
                    transaction_start_timestamp: atomic.then_some(ctx.start_timestamp),
                    transaction_timeout: atomic.then_some(ctx.timeout),
                    tablet_id: self.tablet.tablet_id,
                    mount_revision: self.tablet.mount_revision,
                    durability: ctx.durability,
                    signature,
                    attachments: vec![payload],
                })
                .await?;

            participants.insert(self.tablet.cell_id);
        }
        Ok(())
    }
}
