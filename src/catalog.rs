use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use log::debug;

use crate::{
    error::{DbError, DbResult},
    heap_file::HeapFile,
    page::TableId,
    tuple::TupleDesc,
};

struct TableEntry {
    file: Arc<HeapFile>,
    name: String,
    primary_key: Option<String>,
}

#[derive(Default)]
struct CatalogState {
    tables: HashMap<TableId, TableEntry>,
    names: HashMap<String, TableId>,
}

/// Maps table ids to their backing [`HeapFile`], name and primary key.
///
/// Adding a table under a name that is already taken replaces the old table, as does
/// adding a file whose id is already registered under another name.
#[derive(Default)]
pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, file: Arc<HeapFile>, name: &str, primary_key: Option<&str>) {
        let mut state = self.state.write().unwrap();
        let table_id = file.id();
        if let Some(old_id) = state.names.remove(name) {
            state.tables.remove(&old_id);
        }
        if let Some(old) = state.tables.remove(&table_id) {
            state.names.remove(&old.name);
        }
        debug!("catalog: table {:?} -> {} ({:?})", name, table_id, file.path());
        state.names.insert(name.to_string(), table_id);
        state.tables.insert(
            table_id,
            TableEntry {
                file,
                name: name.to_string(),
                primary_key: primary_key.map(str::to_string),
            },
        );
    }

    pub fn file(&self, table_id: TableId) -> DbResult<Arc<HeapFile>> {
        self.with_entry(table_id, |entry| Arc::clone(&entry.file))
    }

    pub fn table_id(&self, name: &str) -> DbResult<TableId> {
        let state = self.state.read().unwrap();
        state
            .names
            .get(name)
            .copied()
            .ok_or_else(|| DbError::UnknownTableName(name.to_string()))
    }

    pub fn tuple_desc(&self, table_id: TableId) -> DbResult<Arc<TupleDesc>> {
        self.with_entry(table_id, |entry| Arc::clone(entry.file.desc()))
    }

    pub fn primary_key(&self, table_id: TableId) -> DbResult<Option<String>> {
        self.with_entry(table_id, |entry| entry.primary_key.clone())
    }

    pub fn table_name(&self, table_id: TableId) -> DbResult<String> {
        self.with_entry(table_id, |entry| entry.name.clone())
    }

    /// Ids of every registered table, in no particular order
    pub fn table_ids(&self) -> Vec<TableId> {
        self.state.read().unwrap().tables.keys().copied().collect()
    }

    fn with_entry<T>(&self, table_id: TableId, f: impl FnOnce(&TableEntry) -> T) -> DbResult<T> {
        let state = self.state.read().unwrap();
        state
            .tables
            .get(&table_id)
            .map(f)
            .ok_or(DbError::UnknownTable(table_id))
    }
}
