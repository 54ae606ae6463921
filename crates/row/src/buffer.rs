use crate::mapping::IdMapping;
use crate::row::{Row, UnversionedValue};
use crate::schema::TableSchema;
use crate::value::Value;
use crate::Error;

/// Captures caller rows for the lifetime of one transaction.
///
/// Captured rows are schema-ordered: one slot per key column (computed
/// columns included, `Null` until evaluated) followed by supplied data
/// columns with ids equal to their schema positions. Cumulative captured
/// bytes are checked against a hard capacity; overflowing it is fatal to
/// the owning transaction.
#[derive(Debug)]
pub struct RowBuffer {
    capacity: usize,
    used: usize,
}

impl RowBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, used: 0 }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Capture `row` verbatim, without reordering. The row must already be
    /// schema-ordered, e.g. a row decoded from a lookup response.
    pub fn capture_row(&mut self, row: &Row) -> Result<Row, Error> {
        self.charge(row.data_weight())?;
        Ok(row.clone())
    }

    /// Capture `row`, translating name-table ids to schema positions and
    /// reordering values into schema order.
    pub fn capture_and_permute_row(
        &mut self,
        row: &Row,
        schema: &TableSchema,
        mapping: &IdMapping,
    ) -> Result<Row, Error> {
        let key_column_count = schema.key_column_count();

        let mut key: Vec<UnversionedValue> = (0..key_column_count)
            .map(|position| UnversionedValue::new(position as u16, Value::Null))
            .collect();
        let mut data: Vec<UnversionedValue> = Vec::new();

        for value in row {
            if value.id as usize >= mapping.len() {
                return Err(Error::UnknownColumnId(value.id));
            }
            let Some(position) = mapping.get(value.id) else {
                continue;
            };
            if (position as usize) < key_column_count {
                key[position as usize].value = value.value.clone();
            } else {
                data.push(UnversionedValue {
                    id: position,
                    value: value.value.clone(),
                });
            }
        }
        data.sort_by_key(|v| v.id);
        for pair in data.windows(2) {
            if pair[0].id == pair[1].id {
                let name = schema.columns[pair[0].id as usize].name.clone();
                return Err(Error::DuplicateColumn(name));
            }
        }

        key.extend(data);
        let captured = Row::new(key);
        self.charge(captured.data_weight())?;
        Ok(captured)
    }

    /// Capture only the key portion of `row`, schema-ordered, with slots
    /// for computed key columns.
    pub fn capture_and_permute_key(
        &mut self,
        row: &Row,
        schema: &TableSchema,
        mapping: &IdMapping,
    ) -> Result<Row, Error> {
        let captured = self.capture_and_permute_row(row, schema, mapping)?;
        let key_column_count = schema.key_column_count();
        Ok(Row::new(captured.key_prefix(key_column_count).to_vec()))
    }

    fn charge(&mut self, need: usize) -> Result<(), Error> {
        if self.used + need > self.capacity {
            return Err(Error::BufferOverflow {
                used: self.used,
                need,
                capacity: self.capacity,
            });
        }
        self.used += need;
        Ok(())
    }
}
