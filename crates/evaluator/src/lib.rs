//! Evaluation of computed key columns.
//!
//! Sorted tables may declare key columns whose values derive from other
//! key columns, e.g. `hash: farm_hash(user_id)` to spread a hot key space
//! over tablets. Writers and lookups never supply these; the client fills
//! them in before routing so that pivot-key search sees complete keys.

mod expression;

use expression::Expression;
use row::{Row, TableSchema};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("failed to parse expression '{expression}': {message}")]
    Parse { expression: String, message: String },
    #[error("expression references unknown key column '{0}'")]
    UnknownColumn(String),
    #[error("expression references non-key column '{0}'")]
    NonKeyColumn(String),
    #[error("type error evaluating computed column '{column}': {message}")]
    Eval { column: String, message: String },
}

/// Evaluates the computed key columns of one schema.
pub struct ColumnEvaluator {
    /// Parsed program per key column position; `None` for plain columns.
    programs: Vec<Option<Program>>,
}

struct Program {
    column: String,
    type_: row::ValueType,
    expression: Expression,
}

impl ColumnEvaluator {
    pub fn new(schema: &TableSchema) -> Result<Self, Error> {
        let key_column_count = schema.key_column_count();
        let mut programs = Vec::with_capacity(key_column_count);

        for column in schema.key_columns() {
            let Some(expression) = &column.expression else {
                programs.push(None);
                continue;
            };
            let parsed = Expression::parse(expression).map_err(|message| Error::Parse {
                expression: expression.clone(),
                message,
            })?;

            // Resolve referenced columns up front; evaluation is per-row
            // and must not re-validate.
            for name in parsed.column_refs() {
                match schema.find_column(name) {
                    None => return Err(Error::UnknownColumn(name.to_string())),
                    Some((position, _)) if position >= key_column_count => {
                        return Err(Error::NonKeyColumn(name.to_string()))
                    }
                    Some(_) => {}
                }
            }
            programs.push(Some(Program {
                column: column.name.clone(),
                type_: column.type_,
                expression: parsed,
            }));
        }

        Ok(Self { programs })
    }

    /// Fill the computed cells of a captured (schema-ordered, full-key)
    /// row in place.
    pub fn evaluate_keys(&self, row: &mut Row, schema: &TableSchema) -> Result<(), Error> {
        for (position, program) in self.programs.iter().enumerate() {
            let Some(program) = program else {
                continue;
            };
            let value = program
                .expression
                .evaluate(
                    |name| {
                        let (ref_position, _) = schema
                            .find_column(name)
                            .expect("column refs resolved at construction");
                        row.values()[ref_position].value.clone()
                    },
                    program.type_,
                )
                .map_err(|message| Error::Eval {
                    column: program.column.clone(),
                    message,
                })?;
            row.values_mut()[position].value = value;
        }
        Ok(())
    }

    pub fn has_programs(&self) -> bool {
        self.programs.iter().any(|p| p.is_some())
    }
}

/// Process-wide cache of evaluators, keyed by the schema's key columns.
///
/// Parsing expressions per row would dominate the write path; schemas
/// repeat across transactions, so evaluators are built once and shared.
#[derive(Default)]
pub struct ColumnEvaluatorCache {
    evaluators: Mutex<HashMap<String, Arc<ColumnEvaluator>>>,
}

impl ColumnEvaluatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, schema: &TableSchema) -> Result<Arc<ColumnEvaluator>, Error> {
        let key = fingerprint(schema);
        let mut evaluators = self.evaluators.lock().unwrap();
        if let Some(evaluator) = evaluators.get(&key) {
            return Ok(evaluator.clone());
        }
        let evaluator = Arc::new(ColumnEvaluator::new(schema)?);
        evaluators.insert(key, evaluator.clone());
        Ok(evaluator)
    }
}

fn fingerprint(schema: &TableSchema) -> String {
    use std::fmt::Write;

    let mut key = String::new();
    for column in schema.key_columns() {
        write!(
            key,
            "{}:{:?}:{};",
            column.name,
            column.type_,
            column.expression.as_deref().unwrap_or("")
        )
        .expect("writing to a String");
    }
    key
}
