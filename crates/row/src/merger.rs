use crate::row::{Row, UnversionedValue};
use crate::value::Value;

/// Outcome of folding a run of same-key edits.
#[derive(Clone, Debug, PartialEq)]
pub enum MergedRow {
    /// Emit a write carrying the folded row.
    Write(Row),
    /// Emit a delete carrying only the key.
    Delete(Row),
}

impl MergedRow {
    pub fn row(&self) -> &Row {
        match self {
            MergedRow::Write(row) | MergedRow::Delete(row) => row,
        }
    }
}

/// Folds consecutive same-key edits into the single record the server
/// should observe.
///
/// A write overlays its data columns onto the accumulated state; a delete
/// wipes accumulated data columns. The final edit decides whether the
/// merged record is a write or a delete.
#[derive(Debug)]
pub struct UnversionedRowMerger {
    column_count: usize,
    key_column_count: usize,
    key: Vec<UnversionedValue>,
    data: Vec<Option<Value>>,
    deleted_last: bool,
    started: bool,
}

impl UnversionedRowMerger {
    pub fn new(column_count: usize, key_column_count: usize) -> Self {
        Self {
            column_count,
            key_column_count,
            key: Vec::new(),
            data: vec![None; column_count - key_column_count],
            deleted_last: false,
            started: false,
        }
    }

    /// Overlay a (schema-ordered, full-key) partial write row.
    pub fn add_partial_row(&mut self, row: &Row) {
        self.start(row);
        for value in row.values().iter().skip(self.key_column_count) {
            debug_assert!((value.id as usize) < self.column_count);
            self.data[value.id as usize - self.key_column_count] = Some(value.value.clone());
        }
        self.deleted_last = false;
    }

    /// Record a delete: wipes accumulated data columns.
    pub fn delete_partial_row(&mut self, key: &Row) {
        self.start(key);
        self.data.fill(None);
        self.deleted_last = true;
    }

    /// Finish the current run and reset for the next key.
    pub fn build_merged_row(&mut self) -> MergedRow {
        debug_assert!(self.started, "no rows were merged");
        let key = std::mem::take(&mut self.key);

        let merged = if self.deleted_last {
            MergedRow::Delete(Row::new(key))
        } else {
            let mut values = key;
            for (index, value) in self.data.iter_mut().enumerate() {
                if let Some(value) = value.take() {
                    values.push(UnversionedValue {
                        id: (self.key_column_count + index) as u16,
                        value,
                    });
                }
            }
            MergedRow::Write(Row::new(values))
        };

        self.data.fill(None);
        self.deleted_last = false;
        self.started = false;
        merged
    }

    fn start(&mut self, row: &Row) {
        if !self.started {
            self.key = row.key_prefix(self.key_column_count).to_vec();
            self.started = true;
        }
    }
}
