use crate::Error;
use bytes::{BufMut, Bytes, BytesMut};
use row::{Row, UnversionedValue, Value, ValueType};

const ALIGNMENT: usize = 8;

/// A null row in a schemaful rowset: a key the server had no row for.
const NULL_ROW_MARKER: i64 = -1;

/// Commands of the wire stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    LookupRows = 1,
    WriteRow = 2,
    DeleteRow = 3,
    VersionedWriteRow = 4,
}

impl Command {
    fn from_u16(raw: u16) -> Result<Self, Error> {
        Ok(match raw {
            1 => Command::LookupRows,
            2 => Command::WriteRow,
            3 => Command::DeleteRow,
            4 => Command::VersionedWriteRow,
            other => return Err(Error::BadCommand(other)),
        })
    }
}

/// Serializes commands, messages and rows into one framed buffer.
#[derive(Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_command(&mut self, command: Command) {
        self.buf.extend_from_slice(&(command as u16).to_le_bytes());
        self.pad();
    }

    /// Length-prefixed protobuf message.
    pub fn write_message<M: prost::Message>(&mut self, message: &M) {
        let encoded = message.encode_to_vec();
        self.buf
            .extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        self.pad();
        self.buf.extend_from_slice(&encoded);
        self.pad();
    }

    /// A row whose values carry explicit column ids and types.
    pub fn write_unversioned_row(&mut self, row: &Row) {
        self.buf.extend_from_slice(&(row.len() as u32).to_le_bytes());
        self.pad();
        for value in row {
            self.write_value(value);
        }
    }

    /// A rowset of schemaful rows: the schema is implicit, so values are
    /// written positionally with a null bitmap per row.
    pub fn write_schemaful_rowset<'a>(
        &mut self,
        width: usize,
        rows: impl ExactSizeIterator<Item = Option<&'a Row>>,
    ) {
        self.buf.extend_from_slice(&(rows.len() as u32).to_le_bytes());
        self.pad();
        for row in rows {
            self.write_schemaful_row(width, row);
        }
    }

    pub fn write_schemaful_row(&mut self, width: usize, row: Option<&Row>) {
        let Some(row) = row else {
            self.buf.extend_from_slice(&NULL_ROW_MARKER.to_le_bytes());
            return;
        };
        debug_assert_eq!(row.len(), width, "schemaful row must be full width");

        self.buf.extend_from_slice(&(width as i64).to_le_bytes());

        let mut bitmap = vec![0u64; width.div_ceil(64)];
        for (index, value) in row.values().iter().enumerate() {
            if matches!(value.value, Value::Null) {
                bitmap[index / 64] |= 1 << (index % 64);
            }
        }
        for word in &bitmap {
            self.buf.extend_from_slice(&word.to_le_bytes());
        }

        for value in row {
            match &value.value {
                Value::Null => {}
                Value::Int64(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
                Value::Uint64(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
                Value::Double(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
                Value::Boolean(v) => self.buf.extend_from_slice(&(*v as u64).to_le_bytes()),
                Value::String(b) | Value::Any(b) => {
                    self.buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
                    self.pad();
                    self.buf.extend_from_slice(b);
                    self.pad();
                }
                Value::Min | Value::Max => {
                    unreachable!("sentinels do not appear in schemaful rows")
                }
            }
        }
    }

    fn write_value(&mut self, value: &UnversionedValue) {
        let type_ = value.value.value_type();
        let length = match &value.value {
            Value::String(b) | Value::Any(b) => b.len() as u32,
            _ => 0,
        };
        self.buf.extend_from_slice(&value.id.to_le_bytes());
        self.buf.put_u8(type_.wire_code());
        self.buf.put_u8(0); // flags
        self.buf.extend_from_slice(&length.to_le_bytes());

        match &value.value {
            Value::Min | Value::Null | Value::Max => {}
            Value::Int64(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Value::Uint64(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Value::Double(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Value::Boolean(v) => {
                self.buf.put_u8(*v as u8);
                self.pad();
            }
            Value::String(b) | Value::Any(b) => {
                self.buf.extend_from_slice(b);
                self.pad();
            }
        }
    }

    fn pad(&mut self) {
        while self.buf.len() % ALIGNMENT != 0 {
            self.buf.put_u8(0);
        }
    }
}

/// Deserializes a framed buffer produced by `Writer`.
pub struct Reader {
    buf: Bytes,
    pos: usize,
}

impl Reader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_command(&mut self) -> Result<Command, Error> {
        let raw = u16::from_le_bytes(self.take(2)?.try_into().unwrap());
        self.align();
        Command::from_u16(raw)
    }

    pub fn read_message<M: prost::Message + Default>(&mut self) -> Result<M, Error> {
        let length = u32::from_le_bytes(self.take(4)?.try_into().unwrap()) as usize;
        self.align();
        let encoded = self.take(length)?;
        let message = M::decode(encoded)?;
        self.align();
        Ok(message)
    }

    pub fn read_unversioned_row(&mut self) -> Result<Row, Error> {
        let count = u32::from_le_bytes(self.take(4)?.try_into().unwrap()) as usize;
        self.align();
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_value()?);
        }
        Ok(Row::new(values))
    }

    /// Read a schemaful rowset; value types are given by the (possibly
    /// column-filtered) schema the response was built against. Missing
    /// rows decode as `None`.
    pub fn read_schemaful_rowset(
        &mut self,
        types: &[ValueType],
    ) -> Result<Vec<Option<Row>>, Error> {
        let count = u32::from_le_bytes(self.take(4)?.try_into().unwrap()) as usize;
        self.align();
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            rows.push(self.read_schemaful_row(types)?);
        }
        Ok(rows)
    }

    pub fn read_schemaful_row(&mut self, types: &[ValueType]) -> Result<Option<Row>, Error> {
        let marker = i64::from_le_bytes(self.take(8)?.try_into().unwrap());
        if marker == NULL_ROW_MARKER {
            return Ok(None);
        }
        if marker as usize != types.len() {
            return Err(Error::SchemaWidthMismatch {
                expected: types.len(),
                found: marker as usize,
            });
        }

        let mut bitmap = vec![0u64; types.len().div_ceil(64)];
        for word in bitmap.iter_mut() {
            *word = u64::from_le_bytes(self.take(8)?.try_into().unwrap());
        }

        let mut values = Vec::with_capacity(types.len());
        for (index, type_) in types.iter().enumerate() {
            let is_null = bitmap[index / 64] & (1 << (index % 64)) != 0;
            let value = if is_null {
                Value::Null
            } else {
                match type_ {
                    ValueType::Int64 => {
                        Value::Int64(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
                    }
                    ValueType::Uint64 => {
                        Value::Uint64(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
                    }
                    ValueType::Double => {
                        Value::Double(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
                    }
                    ValueType::Boolean => {
                        Value::Boolean(u64::from_le_bytes(self.take(8)?.try_into().unwrap()) != 0)
                    }
                    ValueType::String | ValueType::Any => {
                        let length =
                            u32::from_le_bytes(self.take(4)?.try_into().unwrap()) as usize;
                        self.align();
                        let payload = self.take(length)?.to_vec();
                        self.align();
                        if *type_ == ValueType::String {
                            Value::String(payload)
                        } else {
                            Value::Any(payload)
                        }
                    }
                    ValueType::Min | ValueType::Null | ValueType::Max => Value::Null,
                }
            };
            values.push(UnversionedValue {
                id: index as u16,
                value,
            });
        }
        Ok(Some(Row::new(values)))
    }

    fn read_value(&mut self) -> Result<UnversionedValue, Error> {
        let id = u16::from_le_bytes(self.take(2)?.try_into().unwrap());
        let type_code = self.take(1)?[0];
        let _flags = self.take(1)?[0];
        let length = u32::from_le_bytes(self.take(4)?.try_into().unwrap()) as usize;

        let type_ = ValueType::from_wire_code(type_code).ok_or(Error::BadValueType(type_code))?;
        let value = match type_ {
            ValueType::Min => Value::Min,
            ValueType::Null => Value::Null,
            ValueType::Max => Value::Max,
            ValueType::Int64 => Value::Int64(i64::from_le_bytes(self.take(8)?.try_into().unwrap())),
            ValueType::Uint64 => {
                Value::Uint64(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
            }
            ValueType::Double => {
                Value::Double(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
            }
            ValueType::Boolean => {
                let v = self.take(1)?[0] != 0;
                self.align();
                Value::Boolean(v)
            }
            ValueType::String | ValueType::Any => {
                let payload = self.take(length)?.to_vec();
                self.align();
                if type_ == ValueType::String {
                    Value::String(payload)
                } else {
                    Value::Any(payload)
                }
            }
        };
        Ok(UnversionedValue { id, value })
    }

    fn take(&mut self, len: usize) -> Result<&[u8], Error> {
        if self.pos + len > self.buf.len() {
            return Err(Error::UnexpectedEof(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn align(&mut self) {
        while self.pos % ALIGNMENT != 0 && self.pos < self.buf.len() {
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use proto_tablet::tablet::ReqLookupRows;
    use row::row;

    #[test]
    fn commands_and_messages_interleave() {
        let mut writer = Writer::new();
        writer.write_command(Command::LookupRows);
        writer.write_message(&ReqLookupRows {
            column_filter_indexes: vec![0, 2],
        });
        writer.write_command(Command::WriteRow);

        let mut reader = Reader::new(writer.finish());
        assert_eq!(reader.read_command().unwrap(), Command::LookupRows);
        let req: ReqLookupRows = reader.read_message().unwrap();
        assert_eq!(req.column_filter_indexes, vec![0, 2]);
        assert_eq!(reader.read_command().unwrap(), Command::WriteRow);
        assert!(reader.is_exhausted());
    }

    #[test]
    fn unversioned_rows_survive_the_stream() {
        let original = row![
            (0, 42i64),
            (1, "payload"),
            (2, Value::Null),
            (3, true),
            (4, 0.5f64),
            (5, Value::Any(b"{\"a\":1}".to_vec())),
        ];
        let mut writer = Writer::new();
        writer.write_unversioned_row(&original);

        let mut reader = Reader::new(writer.finish());
        assert_eq!(reader.read_unversioned_row().unwrap(), original);
    }

    #[test]
    fn schemaful_rowset_encodes_missing_rows() {
        let types = [ValueType::Int64, ValueType::String];
        let present = row![(0, 7i64), (1, "x")];

        let mut writer = Writer::new();
        writer.write_schemaful_rowset(2, [Some(&present), None].into_iter());

        let mut reader = Reader::new(writer.finish());
        let rows = reader.read_schemaful_rowset(&types).unwrap();
        assert_eq!(rows, vec![Some(present), None]);
    }

    #[test]
    fn schemaful_nulls_round_trip_through_the_bitmap() {
        let types = [ValueType::Int64, ValueType::String, ValueType::Boolean];
        let sparse = row![(0, 7i64), (1, Value::Null), (2, Value::Null)];

        let mut writer = Writer::new();
        writer.write_schemaful_row(3, Some(&sparse));

        let mut reader = Reader::new(writer.finish());
        assert_eq!(reader.read_schemaful_row(&types).unwrap(), Some(sparse));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut writer = Writer::new();
        writer.write_unversioned_row(&row![(0, "a long enough payload")]);
        let full = writer.finish();
        let truncated = full.slice(..full.len() - 8);

        let mut reader = Reader::new(truncated);
        assert!(matches!(
            reader.read_unversioned_row(),
            Err(Error::UnexpectedEof(_))
        ));
    }
}
