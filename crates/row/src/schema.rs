use crate::value::ValueType;

/// Name of the virtual column addressing a shard of an ordered table.
pub const TABLET_INDEX_COLUMN_NAME: &str = "$tablet_index";

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
    /// For computed key columns, the expression deriving the value from
    /// other key columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, type_: ValueType) -> Self {
        Self {
            name: name.into(),
            type_,
            sort_order: None,
            expression: None,
            required: false,
        }
    }

    pub fn sorted(mut self) -> Self {
        self.sort_order = Some(SortOrder::Ascending);
        self
    }

    pub fn computed(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_key(&self) -> bool {
        self.sort_order.is_some()
    }

    pub fn is_computed(&self) -> bool {
        self.expression.is_some()
    }
}

/// Views over the primary schema handed to different operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    /// The table's full schema, as stored.
    Primary,
    /// What a writer supplies: non-computed key columns plus data columns.
    Write,
    /// The full schema; used by replication writers which carry versions.
    VersionedWrite,
    /// What a deleter supplies: non-computed key columns only.
    Delete,
    /// Schema exposed to the query layer.
    Query,
    /// What a point lookup supplies: non-computed key columns only.
    Lookup,
    /// Primary schema extended with the virtual tablet index column.
    PrimaryWithTabletIndex,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        debug_assert!(
            columns.iter().zip(columns.iter().skip(1)).all(|(a, b)| {
                // Key columns form a prefix.
                a.is_key() || !b.is_key()
            }),
            "key columns must precede data columns"
        );
        Self { columns }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn key_column_count(&self) -> usize {
        self.columns.iter().take_while(|c| c.is_key()).count()
    }

    pub fn key_columns(&self) -> &[ColumnSchema] {
        &self.columns[..self.key_column_count()]
    }

    pub fn find_column(&self, name: &str) -> Option<(usize, &ColumnSchema)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
    }

    pub fn has_computed_columns(&self) -> bool {
        self.columns.iter().any(|c| c.is_computed())
    }

    pub fn is_sorted(&self) -> bool {
        self.key_column_count() > 0
    }

    /// Derive the view of this (primary) schema for `kind`.
    pub fn to_kind(&self, kind: SchemaKind) -> TableSchema {
        match kind {
            SchemaKind::Primary | SchemaKind::Query | SchemaKind::VersionedWrite => self.clone(),
            SchemaKind::Write => TableSchema {
                columns: self
                    .columns
                    .iter()
                    .filter(|c| !c.is_computed())
                    .cloned()
                    .collect(),
            },
            SchemaKind::Delete | SchemaKind::Lookup => TableSchema {
                columns: self
                    .key_columns()
                    .iter()
                    .filter(|c| !c.is_computed())
                    .cloned()
                    .collect(),
            },
            SchemaKind::PrimaryWithTabletIndex => {
                let mut columns = vec![ColumnSchema::new(
                    TABLET_INDEX_COLUMN_NAME,
                    ValueType::Int64,
                )];
                columns.extend(self.columns.iter().cloned());
                TableSchema { columns }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnSchema::new("hash", ValueType::Uint64)
                .sorted()
                .computed("farm_hash(k)"),
            ColumnSchema::new("k", ValueType::Int64).sorted(),
            ColumnSchema::new("v", ValueType::String),
        ])
    }

    #[test]
    fn key_columns_form_prefix() {
        let s = schema();
        assert_eq!(s.key_column_count(), 2);
        assert!(s.is_sorted());
        assert!(s.has_computed_columns());
    }

    #[test]
    fn write_view_drops_computed_columns() {
        let w = schema().to_kind(SchemaKind::Write);
        let names: Vec<_> = w.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["k", "v"]);
    }

    #[test]
    fn lookup_view_keeps_only_supplied_keys() {
        let l = schema().to_kind(SchemaKind::Lookup);
        let names: Vec<_> = l.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["k"]);
    }

    #[test]
    fn tablet_index_view_prepends_virtual_column() {
        let t = schema().to_kind(SchemaKind::PrimaryWithTabletIndex);
        assert_eq!(t.columns[0].name, TABLET_INDEX_COLUMN_NAME);
        assert_eq!(t.column_count(), 4);
    }
}
