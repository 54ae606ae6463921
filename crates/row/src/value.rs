/// Physical type of an unversioned value.
///
/// The discriminant order defines the cross-type ordering used by row
/// comparison: `Min` sorts below everything, `Max` above, and concrete
/// types compare by rank when they differ.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Min,
    Null,
    Int64,
    Uint64,
    Double,
    Boolean,
    String,
    /// An opaque composite payload. Carried and stored verbatim; not
    /// comparable, so not usable in key columns.
    Any,
    Max,
}

impl ValueType {
    pub fn wire_code(self) -> u8 {
        match self {
            ValueType::Min => 0x00,
            ValueType::Null => 0x02,
            ValueType::Int64 => 0x03,
            ValueType::Uint64 => 0x04,
            ValueType::Double => 0x05,
            ValueType::Boolean => 0x06,
            ValueType::String => 0x10,
            ValueType::Any => 0x11,
            ValueType::Max => 0xef,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => ValueType::Min,
            0x02 => ValueType::Null,
            0x03 => ValueType::Int64,
            0x04 => ValueType::Uint64,
            0x05 => ValueType::Double,
            0x06 => ValueType::Boolean,
            0x10 => ValueType::String,
            0x11 => ValueType::Any,
            0xef => ValueType::Max,
            _ => return None,
        })
    }
}

/// An unversioned datum.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Sentinel sorting below every value. Only valid inside keys.
    Min,
    Null,
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Boolean(bool),
    String(Vec<u8>),
    Any(Vec<u8>),
    /// Sentinel sorting above every value. Only valid inside keys.
    Max,
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Min => ValueType::Min,
            Value::Null => ValueType::Null,
            Value::Int64(_) => ValueType::Int64,
            Value::Uint64(_) => ValueType::Uint64,
            Value::Double(_) => ValueType::Double,
            Value::Boolean(_) => ValueType::Boolean,
            Value::String(_) => ValueType::String,
            Value::Any(_) => ValueType::Any,
            Value::Max => ValueType::Max,
        }
    }

    /// Bytes this value contributes to row-buffer accounting: fixed-width
    /// values count their storage, variable-width values their payload.
    pub fn data_weight(&self) -> usize {
        match self {
            Value::Min | Value::Null | Value::Max => 0,
            Value::Int64(_) | Value::Uint64(_) | Value::Double(_) => 8,
            Value::Boolean(_) => 1,
            Value::String(b) | Value::Any(b) => b.len(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Value::Min | Value::Max)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.as_bytes().to_vec())
    }
}
