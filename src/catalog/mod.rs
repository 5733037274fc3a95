use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::RwLock;

use crate::common::types::{PageId, TableOid, INVALID_PAGE_ID};

/// OID type shared by tables and indexes
pub type IndexOid = u32;

/// Metadata for one table
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub oid: TableOid,
    pub name: String,
    /// First heap page, invalid until the executor allocates one
    pub first_page_id: PageId,
}

/// Metadata for one index
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub oid: IndexOid,
    pub name: String,
    pub table_oid: TableOid,
    /// Fixed key width in bytes (4, 8, 16, 32 or 64)
    pub key_size: usize,
}

/// In-memory registry of table and index metadata.
///
/// The core only needs names and oids: executors resolve oids for the
/// lock manager and find which indexes cover a table. Index objects
/// themselves are owned by their creators; the root page ids live in
/// the header page.
#[derive(Default)]
pub struct Catalog {
    next_oid: AtomicU32,
    tables: RwLock<HashMap<TableOid, TableInfo>>,
    table_names: RwLock<HashMap<String, TableOid>>,
    indexes: RwLock<HashMap<IndexOid, IndexInfo>>,
    table_indexes: RwLock<HashMap<String, Vec<IndexOid>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table; returns its oid, or None if the name is taken
    pub fn create_table(&self, name: impl Into<String>) -> Option<TableOid> {
        let name = name.into();
        let mut names = self.table_names.write();
        if names.contains_key(&name) {
            return None;
        }
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        names.insert(name.clone(), oid);
        self.tables.write().insert(
            oid,
            TableInfo {
                oid,
                name,
                first_page_id: INVALID_PAGE_ID,
            },
        );
        Some(oid)
    }

    pub fn get_table(&self, oid: TableOid) -> Option<TableInfo> {
        self.tables.read().get(&oid).cloned()
    }

    pub fn get_table_by_name(&self, name: &str) -> Option<TableInfo> {
        let oid = *self.table_names.read().get(name)?;
        self.get_table(oid)
    }

    pub fn set_table_first_page(&self, oid: TableOid, page_id: PageId) -> bool {
        match self.tables.write().get_mut(&oid) {
            Some(info) => {
                info.first_page_id = page_id;
                true
            }
            None => false,
        }
    }

    /// Register an index over an existing table
    pub fn create_index(
        &self,
        name: impl Into<String>,
        table_name: &str,
        key_size: usize,
    ) -> Option<IndexInfo> {
        let name = name.into();
        let table_oid = *self.table_names.read().get(table_name)?;
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let info = IndexInfo {
            oid,
            name,
            table_oid,
            key_size,
        };
        self.indexes.write().insert(oid, info.clone());
        self.table_indexes
            .write()
            .entry(table_name.to_string())
            .or_default()
            .push(oid);
        Some(info)
    }

    pub fn get_index(&self, oid: IndexOid) -> Option<IndexInfo> {
        self.indexes.read().get(&oid).cloned()
    }

    /// All indexes registered over a table
    pub fn get_table_indexes(&self, table_name: &str) -> Vec<IndexInfo> {
        let oids = match self.table_indexes.read().get(table_name) {
            Some(oids) => oids.clone(),
            None => return Vec::new(),
        };
        let indexes = self.indexes.read();
        oids.iter()
            .filter_map(|oid| indexes.get(oid).cloned())
            .collect()
    }
}
