//! Table registry: maps table ids to their storage files.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::storage::disk::StorageFile;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::TableId;

#[derive(Default)]
pub struct Catalog {
    tables: RwLock<HashMap<TableId, Arc<dyn StorageFile>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a storage file under its table id, replacing any previous
    /// registration.
    pub fn add_table(&self, file: Arc<dyn StorageFile>) {
        self.tables.write().insert(file.table_id(), file);
    }

    pub fn storage_file_for(&self, table_id: TableId) -> StorageResult<Arc<dyn StorageFile>> {
        self.tables
            .read()
            .get(&table_id)
            .cloned()
            .ok_or(StorageError::TableNotFound(table_id))
    }

    pub fn contains(&self, table_id: TableId) -> bool {
        self.tables.read().contains_key(&table_id)
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<_> = self.tables.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
