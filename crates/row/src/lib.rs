mod buffer;
mod compare;
mod mapping;
mod merger;
mod name_table;
mod row;
mod schema;
mod value;

pub use buffer::RowBuffer;
pub use compare::{compare_rows, compare_values, key_successor, max_key, min_key};
pub use mapping::{validate_data_row, validate_key, IdMapping};
pub use merger::{MergedRow, UnversionedRowMerger};
pub use name_table::NameTable;
pub use row::{Row, UnversionedValue};
pub use schema::{ColumnSchema, SchemaKind, SortOrder, TableSchema, TABLET_INDEX_COLUMN_NAME};
pub use value::{Value, ValueType};

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("row buffer capacity exceeded: {used} + {need} exceeds {capacity} bytes")]
    BufferOverflow {
        used: usize,
        need: usize,
        capacity: usize,
    },
    #[error("missing value for key column '{0}'")]
    MissingKeyColumn(String),
    #[error("row references unknown column id {0}")]
    UnknownColumnId(u16),
    #[error("duplicate value for column '{0}'")]
    DuplicateColumn(String),
    #[error("value type mismatch for column '{column}': expected {expected:?}, found {found:?}")]
    TypeMismatch {
        column: String,
        expected: ValueType,
        found: ValueType,
    },
    #[error("cannot compare composite value of key column '{0}'")]
    IncomparableKeyColumn(String),
    #[error("values of type {0:?} have no defined ordering")]
    Incomparable(ValueType),
    #[error("no such column '{0}' in table schema")]
    UnknownColumn(String),
    #[error("unexpected data column '{0}' in key")]
    UnexpectedDataColumn(String),
    #[error("computed column '{0}' cannot be supplied by the client")]
    ComputedColumnSupplied(String),
    #[error("key of {found} values does not match key width {expected}")]
    BadKeyWidth { expected: usize, found: usize },
}
