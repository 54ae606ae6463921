use crate::name_table::NameTable;
use crate::row::Row;
use crate::schema::TableSchema;
use crate::value::ValueType;
use crate::Error;

/// Translation from name-table ids to schema positions.
///
/// System columns (names starting with `$`) translate to `None` and are
/// dropped during capture; their values are read out-of-band, e.g. the
/// tablet index of an ordered write.
#[derive(Clone, Debug)]
pub struct IdMapping(Vec<Option<u16>>);

impl IdMapping {
    pub fn build(schema: &TableSchema, name_table: &NameTable) -> Result<Self, Error> {
        let mut mapping = Vec::with_capacity(name_table.len());
        for id in 0..name_table.len() as u16 {
            let name = name_table.name(id).expect("id below name table length");
            match schema.find_column(&name) {
                Some((position, _)) => {
                    mapping.push(Some(u16::try_from(position).expect("schema position fits u16")))
                }
                None if name.starts_with('$') => mapping.push(None),
                None => return Err(Error::UnknownColumn(name)),
            }
        }
        Ok(Self(mapping))
    }

    /// Schema position for a name-table id, or `None` for system columns.
    pub fn get(&self, name_table_id: u16) -> Option<u16> {
        self.0.get(name_table_id as usize).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Validate a caller-supplied data row against the write view of a schema.
pub fn validate_data_row(
    row: &Row,
    write_schema: &TableSchema,
    mapping: &IdMapping,
) -> Result<(), Error> {
    validate_row(row, write_schema, mapping, false)
}

/// Validate a caller-supplied key against the lookup/delete view of a
/// schema: all key columns present, nothing else.
pub fn validate_key(
    row: &Row,
    lookup_schema: &TableSchema,
    mapping: &IdMapping,
) -> Result<(), Error> {
    validate_row(row, lookup_schema, mapping, true)
}

fn validate_row(
    row: &Row,
    schema: &TableSchema,
    mapping: &IdMapping,
    key_only: bool,
) -> Result<(), Error> {
    let key_column_count = schema.key_column_count();
    let mut seen = vec![false; schema.column_count()];

    for value in row {
        if value.id as usize >= mapping.len() {
            return Err(Error::UnknownColumnId(value.id));
        }
        let Some(position) = mapping.get(value.id) else {
            // System column; consumed elsewhere.
            continue;
        };
        let column = &schema.columns[position as usize];

        if seen[position as usize] {
            return Err(Error::DuplicateColumn(column.name.clone()));
        }
        seen[position as usize] = true;

        if column.is_computed() {
            return Err(Error::ComputedColumnSupplied(column.name.clone()));
        }
        if key_only && position as usize >= key_column_count {
            return Err(Error::UnexpectedDataColumn(column.name.clone()));
        }

        let found = value.value.value_type();
        if column.is_key() && found == ValueType::Any {
            return Err(Error::IncomparableKeyColumn(column.name.clone()));
        }
        if found == ValueType::Null {
            if column.required {
                return Err(Error::TypeMismatch {
                    column: column.name.clone(),
                    expected: column.type_,
                    found,
                });
            }
            continue;
        }
        if found != column.type_ {
            return Err(Error::TypeMismatch {
                column: column.name.clone(),
                expected: column.type_,
                found,
            });
        }
    }

    for position in 0..key_column_count {
        // Computed key columns are filled by the evaluator, not supplied.
        if !seen[position] && !schema.columns[position].is_computed() {
            return Err(Error::MissingKeyColumn(schema.columns[position].name.clone()));
        }
    }
    Ok(())
}
