use std::collections::HashMap;
use std::sync::RwLock;

/// A caller-scoped registry mapping column names to small integer ids.
///
/// Rows submitted through the client tag values with name-table ids; a
/// column id mapping then translates them to schema positions. The table
/// only grows, so ids stay stable for the lifetime of the caller.
#[derive(Debug, Default)]
pub struct NameTable {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    names: Vec<String>,
    ids: HashMap<String, u16>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a name table whose ids coincide with schema positions.
    pub fn from_schema(schema: &crate::TableSchema) -> Self {
        let table = Self::new();
        for column in &schema.columns {
            table.register(&column.name);
        }
        table
    }

    pub fn register(&self, name: &str) -> u16 {
        let mut inner = self.inner.write().unwrap();
        if let Some(id) = inner.ids.get(name) {
            return *id;
        }
        let id = u16::try_from(inner.names.len()).expect("name table overflow");
        inner.names.push(name.to_string());
        inner.ids.insert(name.to_string(), id);
        id
    }

    pub fn find_id(&self, name: &str) -> Option<u16> {
        self.inner.read().unwrap().ids.get(name).copied()
    }

    pub fn name(&self, id: u16) -> Option<String> {
        self.inner.read().unwrap().names.get(id as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
