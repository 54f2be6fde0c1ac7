//! Catalog manager for schema persistence and retrieval.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::schema::{SchemaError, TableSchema};
use crate::storage::{StorageBackend, TableName};

/// The catalog holds every table definition and persists new ones
/// through the storage backend.
pub struct Catalog {
    backend: Arc<dyn StorageBackend>,
    tables: RwLock<BTreeMap<TableName, Arc<TableSchema>>>,
}

impl Catalog {
    /// Load the schemas already stored in the backend.
    pub fn load(backend: Arc<dyn StorageBackend>) -> Result<Self, SchemaError> {
        let mut tables = BTreeMap::new();
        for (name, value) in backend.load_schemas()? {
            let schema: TableSchema = serde_json::from_value(value)?;
            if schema.name != name {
                return Err(SchemaError::InvalidRow(format!(
                    "schema stored as '{}' describes table '{}'",
                    name, schema.name
                )));
            }
            tables.insert(name, Arc::new(schema));
        }

        tracing::debug!(backend = backend.name(), tables = tables.len(), "catalog loaded");
        Ok(Self {
            backend,
            tables: RwLock::new(tables),
        })
    }

    /// Define a new table.
    ///
    /// Re-defining a table with an identical definition returns the stored
    /// schema, so setup code can run against a reopened database.
    pub fn define_table(&self, schema: TableSchema) -> Result<Arc<TableSchema>, SchemaError> {
        schema.validate()?;

        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(&schema.name) {
            if existing.same_definition(&schema) {
                return Ok(Arc::clone(existing));
            }
            return Err(SchemaError::TableExists(schema.name.clone()));
        }

        let document = serde_json::to_value(&schema)?;
        self.backend.put_schema(&schema.name, &document)?;

        tracing::info!(table = %schema.name, columns = schema.columns.len(), "table defined");
        let schema = Arc::new(schema);
        tables.insert(schema.name.clone(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Get a table schema by name.
    pub fn get_table(&self, name: &TableName) -> Result<Arc<TableSchema>, SchemaError> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::TableNotFound(name.to_string()))
    }

    pub fn table_exists(&self, name: &TableName) -> bool {
        self.tables.read().contains_key(name)
    }

    /// List all table names, sorted.
    pub fn list_tables(&self) -> Vec<TableName> {
        self.tables.read().keys().cloned().collect()
    }

    /// Validate a row against a table's schema.
    pub fn validate_row(&self, table: &TableName, row: &Value) -> Result<(), SchemaError> {
        self.get_table(table)?.validate_row(row)
    }

    /// Apply defaults to a row based on table schema.
    pub fn apply_defaults(&self, table: &TableName, row: &Value) -> Result<Value, SchemaError> {
        self.get_table(table)?.apply_defaults(row)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("backend", &self.backend.name())
            .field("tables", &self.list_tables())
            .finish()
    }
}
