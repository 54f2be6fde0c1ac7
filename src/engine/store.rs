//! The table store: committed state shared by every thread.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::catalog::{Catalog, TableSchema};
use crate::engine::conflict::ConflictDetector;
use crate::engine::table::Table;
use crate::engine::EngineResult;
use crate::storage::{Record, RecordId, StorageBackend, TableName, WriteBatch};

/// Committed tables plus the backend they are persisted to.
///
/// Tables are only mutated by [`TableStore::commit`], which the transaction
/// manager calls while holding its commit lock.
pub struct TableStore {
    backend: Arc<dyn StorageBackend>,
    tables: RwLock<BTreeMap<TableName, Table>>,
}

impl TableStore {
    /// Load committed records for every table known to the catalog.
    pub fn load(backend: Arc<dyn StorageBackend>, catalog: &Catalog) -> EngineResult<Self> {
        let mut tables = BTreeMap::new();

        for name in catalog.list_tables() {
            let schema = catalog.get_table(&name)?;
            let records = backend.scan_table(&name)?;
            let table = Table::from_records(name.clone(), unique_fields(&schema), records)?;
            tables.insert(name, table);
        }

        for stored in backend.list_tables()? {
            if !tables.contains_key(&stored) {
                tracing::warn!(table = %stored, "stored records have no schema; skipping");
            }
        }

        Ok(Self {
            backend,
            tables: RwLock::new(tables),
        })
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Create an empty table for a newly defined schema.
    pub fn define(&self, schema: &TableSchema) {
        self.tables
            .write()
            .entry(schema.name.clone())
            .or_insert_with(|| Table::new(schema.name.clone(), unique_fields(schema)));
    }

    pub fn contains(&self, table: &TableName) -> bool {
        self.tables.read().contains_key(table)
    }

    pub fn get(&self, table: &TableName, id: &RecordId) -> Option<Record> {
        self.tables.read().get(table)?.get(id).cloned()
    }

    /// Committed records in commit order.
    pub fn scan(&self, table: &TableName) -> Vec<Record> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.records().to_vec())
            .unwrap_or_default()
    }

    pub fn count(&self, table: &TableName) -> usize {
        self.tables.read().get(table).map_or(0, Table::len)
    }

    /// Apply a batch atomically: check constraints, persist, then publish.
    ///
    /// The caller must hold the commit lock. Nothing is published unless both
    /// the conflict check and the backend write succeed.
    pub fn commit(&self, batch: &WriteBatch) -> EngineResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        {
            let tables = self.tables.read();
            ConflictDetector::new(&tables, batch).check_batch(batch)?;
        }

        self.backend.write_batch(batch)?;

        let mut tables = self.tables.write();
        for entry in batch.entries() {
            if let Some(table) = tables.get_mut(&entry.table) {
                table.apply(entry.record.clone());
            }
        }
        Ok(())
    }
}

fn unique_fields(schema: &TableSchema) -> Vec<String> {
    schema.unique_fields().into_iter().map(String::from).collect()
}

impl std::fmt::Debug for TableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("TableStore")
            .field("backend", &self.backend.name())
            .field("tables", &tables.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DataType, SchemaBuilder};
    use crate::engine::EngineError;
    use crate::storage::{MemoryBackend, WriteOp};
    use serde_json::json;

    fn setup() -> (Arc<MemoryBackend>, TableStore, TableName) {
        let backend = Arc::new(MemoryBackend::new());
        let catalog = Catalog::load(backend.clone()).unwrap();
        let schema = catalog
            .define_table(
                SchemaBuilder::new("accounts")
                    .add_required_column("name", DataType::Text)
                    .add_unique_column("version", DataType::Integer)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let store = TableStore::load(backend.clone(), &catalog).unwrap();
        store.define(&schema);
        (backend, store, schema.name.clone())
    }

    fn record(name: &str, version: i64) -> Record {
        Record::from_value(RecordId::generate(), json!({"name": name, "version": version})).unwrap()
    }

    #[test]
    fn test_commit_publishes_records() {
        let (backend, store, accounts) = setup();
        let first = record("a", 1);

        let mut batch = WriteBatch::new("tx1");
        batch.push(accounts.clone(), WriteOp::Insert, first.clone());
        batch.push(accounts.clone(), WriteOp::Insert, record("b", 2));
        store.commit(&batch).unwrap();

        assert_eq!(store.count(&accounts), 2);
        assert_eq!(store.scan(&accounts)[0].id, first.id);
        assert_eq!(store.get(&accounts, &first.id).unwrap().get("name"), Some(&json!("a")));
        assert_eq!(backend.batch_count(), 1);
    }

    #[test]
    fn test_conflict_leaves_store_and_backend_untouched() {
        let (backend, store, accounts) = setup();

        let mut batch = WriteBatch::new("tx1");
        batch.push(accounts.clone(), WriteOp::Insert, record("a", 1));
        batch.push(accounts.clone(), WriteOp::Insert, record("b", 1));

        assert!(matches!(store.commit(&batch), Err(EngineError::Conflict(_))));
        assert_eq!(store.count(&accounts), 0);
        assert_eq!(backend.record_count(), 0);
        assert_eq!(backend.batch_count(), 0);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (backend, store, _) = setup();
        store.commit(&WriteBatch::new("tx")).unwrap();
        assert_eq!(backend.batch_count(), 0);
    }

    #[test]
    fn test_reload_restores_tables() {
        let (backend, store, accounts) = setup();
        let mut batch = WriteBatch::new("tx1");
        batch.push(accounts.clone(), WriteOp::Insert, record("a", 1));
        store.commit(&batch).unwrap();

        let catalog = Catalog::load(backend.clone()).unwrap();
        let reloaded = TableStore::load(backend, &catalog).unwrap();
        assert_eq!(reloaded.count(&accounts), 1);

        let mut dup = WriteBatch::new("tx2");
        dup.push(accounts.clone(), WriteOp::Insert, record("b", 1));
        assert!(reloaded.commit(&dup).is_err());
    }
}
