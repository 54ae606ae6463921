use row::{NameTable, Row};
use std::sync::Arc;
use wire::Command;

/// One buffered call to `modify_rows`, replayed during commit.
pub(crate) struct ModificationRequest {
    pub path: String,
    pub name_table: Arc<NameTable>,
    pub tablet_index_column_id: Option<u16>,
    pub modifications: Vec<RowModification>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RowModificationKind {
    Write,
    Delete,
}

impl RowModificationKind {
    pub(crate) fn command(self) -> Command {
        match self {
            RowModificationKind::Write => Command::WriteRow,
            RowModificationKind::Delete => Command::DeleteRow,
        }
    }
}

/// A single row edit: a (partial) data row to write, or a key to delete.
#[derive(Clone, Debug)]
pub struct RowModification {
    pub kind: RowModificationKind,
    pub row: Row,
}

impl RowModification {
    pub fn write(row: Row) -> Self {
        Self {
            kind: RowModificationKind::Write,
            row,
        }
    }

    pub fn delete(key: Row) -> Self {
        Self {
            kind: RowModificationKind::Delete,
            row: key,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModifyRowsOptions {
    /// Wall-clock bound on a one-shot modify call, retries included.
    pub timeout: Option<std::time::Duration>,
}
