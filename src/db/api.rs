//! Database API - high-level interface for hookdb.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::catalog::{Catalog, SchemaError, TableSchema};
use crate::engine::{ConflictError, EngineError, TableStore};
use crate::hooks::{HookContext, HookDispatcher, HookError, HookEvent, HookRegistry};
use crate::storage::{
    CommitInfo, GitBackend, GitSignature, InvalidNameError, MemoryBackend, Record, RecordId, StorageBackend,
    StorageError, TableName,
};
use crate::transaction::{PendingWrite, Transaction, TransactionError, TransactionManager, TransactionMetadata};

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Database errors.
///
/// Every error returned by a write or by [`Database::atomic`] is returned
/// after the transaction it belonged to has been rolled back (or, inside an
/// enclosing block, marked rollback-only).
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A unique constraint was violated at commit.
    #[error(transparent)]
    Conflict(ConflictError),

    #[error(transparent)]
    Hook(#[from] HookError),

    /// Illegal transaction lifecycle operation.
    #[error("transaction state error: {0}")]
    State(TransactionError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("record not found: {table}/{id}")]
    RecordNotFound { table: TableName, id: RecordId },

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("database not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DatabaseError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, DatabaseError::Conflict(_))
    }

    /// Only a concurrent move of the storage branch is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::Storage(e) if e.is_conflict())
    }

    /// The conflict behind this error, if any.
    pub fn as_conflict(&self) -> Option<&ConflictError> {
        match self {
            DatabaseError::Conflict(conflict) => Some(conflict),
            _ => None,
        }
    }
}

impl From<TransactionError> for DatabaseError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Conflict(conflict) => DatabaseError::Conflict(conflict),
            TransactionError::Storage(storage) => DatabaseError::Storage(storage),
            TransactionError::UnknownTable(table) => DatabaseError::TableNotFound(table.into_string()),
            other => DatabaseError::State(other),
        }
    }
}

impl From<EngineError> for DatabaseError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Conflict(conflict) => DatabaseError::Conflict(conflict),
            EngineError::Storage(storage) => DatabaseError::Storage(storage),
            EngineError::Schema(schema) => DatabaseError::Schema(schema),
            EngineError::UnknownTable(table) => DatabaseError::TableNotFound(table.into_string()),
        }
    }
}

/// Database configuration options.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Git repository directory; `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Create the repository if it doesn't exist.
    pub create_if_missing: bool,
    /// Deepest chain of hook-triggered writes allowed.
    pub max_hook_depth: usize,
    /// Author of the commits written to the repository.
    pub signature: GitSignature,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
            max_hook_depth: 16,
            signature: GitSignature::default(),
        }
    }
}

impl DatabaseConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Configuration for a database that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn max_hook_depth(mut self, depth: usize) -> Self {
        self.max_hook_depth = depth;
        self
    }

    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    fn validate(&self) -> DatabaseResult<()> {
        if self.max_hook_depth == 0 {
            return Err(DatabaseError::InvalidConfig(
                "max_hook_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The main database handle.
///
/// Cheap to clone; clones share tables, transactions and hooks, so a handle
/// can be moved into worker threads. Each thread has its own current
/// transaction.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    config: DatabaseConfig,
    catalog: Catalog,
    store: Arc<TableStore>,
    transactions: TransactionManager,
    hooks: HookDispatcher,
}

impl Database {
    /// Open or create a Git-backed database at the given path.
    pub fn open(path: impl AsRef<Path>, hooks: HookRegistry) -> DatabaseResult<Self> {
        Self::open_with_config(DatabaseConfig::new(path.as_ref()), hooks)
    }

    /// Open a database with custom configuration.
    pub fn open_with_config(config: DatabaseConfig, hooks: HookRegistry) -> DatabaseResult<Self> {
        config.validate()?;

        let backend: Arc<dyn StorageBackend> = match &config.path {
            Some(path) => {
                if !config.create_if_missing && !path.exists() {
                    return Err(DatabaseError::NotFound(path.clone()));
                }
                Arc::new(GitBackend::open(path, config.create_if_missing, config.signature.clone())?)
            }
            None => Arc::new(MemoryBackend::new()),
        };

        Self::with_backend(backend, config, hooks)
    }

    /// Create a new in-memory database.
    pub fn in_memory(hooks: HookRegistry) -> DatabaseResult<Self> {
        Self::open_with_config(DatabaseConfig::in_memory(), hooks)
    }

    /// Open a database over an existing backend, loading its schemas and records.
    pub fn with_backend(
        backend: Arc<dyn StorageBackend>,
        config: DatabaseConfig,
        hooks: HookRegistry,
    ) -> DatabaseResult<Self> {
        config.validate()?;

        let catalog = Catalog::load(Arc::clone(&backend))?;
        let store = Arc::new(TableStore::load(Arc::clone(&backend), &catalog)?);
        let transactions = TransactionManager::new(Arc::clone(&store));
        let hooks = HookDispatcher::new(hooks, config.max_hook_depth);

        tracing::info!(
            backend = backend.name(),
            tables = catalog.list_tables().len(),
            hooks = hooks.registry().len(),
            "database opened"
        );

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                config,
                catalog,
                store,
                transactions,
                hooks,
            }),
        })
    }

    // ==================== Schema ====================

    /// Define a table. An identical existing definition is accepted as is.
    pub fn define_table(&self, schema: TableSchema) -> DatabaseResult<Arc<TableSchema>> {
        let schema = self.inner.catalog.define_table(schema)?;
        self.inner.store.define(&schema);
        Ok(schema)
    }

    /// List all tables.
    pub fn tables(&self) -> Vec<TableName> {
        self.inner.catalog.list_tables()
    }

    pub fn table_schema(&self, table: &str) -> DatabaseResult<Arc<TableSchema>> {
        self.schema(table)
    }

    fn schema(&self, table: &str) -> DatabaseResult<Arc<TableSchema>> {
        let name = TableName::new(table)?;
        self.inner.catalog.get_table(&name).map_err(|err| match err {
            SchemaError::TableNotFound(table) => DatabaseError::TableNotFound(table),
            other => DatabaseError::Schema(other),
        })
    }

    // ==================== Writes ====================

    /// Insert a record and run the table's `AfterInsert` hooks.
    ///
    /// Without an active transaction the insert and every write its hooks
    /// make are committed together before this returns.
    pub fn insert(&self, table: &str, fields: Value) -> DatabaseResult<Record> {
        let schema = self.schema(table)?;
        let row = schema.apply_defaults(&fields)?;
        schema.validate_row(&row)?;
        let record = Record::from_value(RecordId::generate(), row)?;

        self.inner.transactions.run(true, || {
            self.inner
                .transactions
                .stage(PendingWrite::insert(schema.name.clone(), record.clone()))?;
            tracing::debug!(table = %schema.name, id = %record.id, "insert staged");
            self.dispatch(&schema.name, HookEvent::AfterInsert, &record, true)?;
            Ok(record)
        })
    }

    /// Merge `changes` into a record and run the table's `AfterUpdate` hooks.
    pub fn update(&self, table: &str, id: &str, changes: Value) -> DatabaseResult<Record> {
        let schema = self.schema(table)?;
        let id = RecordId::new(id)?;
        let changes = match changes {
            Value::Object(map) => map,
            _ => return Err(SchemaError::InvalidRow("changes must be a JSON object".into()).into()),
        };

        let mut record = self
            .lookup(&schema.name, &id)
            .ok_or_else(|| DatabaseError::RecordNotFound {
                table: schema.name.clone(),
                id: id.clone(),
            })?;
        record.merge_fields(changes.into_iter().collect());
        schema.validate_row(&record.to_value())?;

        self.inner.transactions.run(true, || {
            self.inner
                .transactions
                .stage(PendingWrite::update(schema.name.clone(), record.clone()))?;
            tracing::debug!(table = %schema.name, id = %record.id, version = record.version, "update staged");
            self.dispatch(&schema.name, HookEvent::AfterUpdate, &record, false)?;
            Ok(record)
        })
    }

    fn dispatch(&self, table: &TableName, event: HookEvent, record: &Record, created: bool) -> DatabaseResult<()> {
        let transactions = &self.inner.transactions;
        let depth = transactions
            .with_current(Transaction::enter_hook)
            .ok_or(TransactionError::NoActiveTransaction)?;

        let ctx = HookContext {
            db: self,
            table,
            event,
            record,
            created,
            depth,
        };
        let result = self.inner.hooks.dispatch(&ctx);
        transactions.with_current(Transaction::exit_hook);

        if let Err(err) = &result {
            tracing::warn!(table = %table, event = %event, hook = %err.name, error = %err.cause, "hook failed");
        }
        Ok(result?)
    }

    // ==================== Reads ====================

    /// Fetch a record. Inside a transaction, its own staged writes are visible.
    pub fn get(&self, table: &str, id: &str) -> DatabaseResult<Option<Record>> {
        let schema = self.schema(table)?;
        let id = RecordId::new(id)?;
        Ok(self.lookup(&schema.name, &id))
    }

    /// All records of a table: committed ones in commit order, then this
    /// thread's staged inserts.
    pub fn scan(&self, table: &str) -> DatabaseResult<Vec<Record>> {
        let schema = self.schema(table)?;
        let mut records = self.inner.store.scan(&schema.name);

        for staged in self.staged(&schema.name) {
            match records.iter_mut().find(|r| r.id == staged.id) {
                Some(slot) => *slot = staged,
                None => records.push(staged),
            }
        }
        Ok(records)
    }

    pub fn count(&self, table: &str) -> DatabaseResult<usize> {
        Ok(self.scan(table)?.len())
    }

    /// Records whose `field` equals `value`.
    pub fn find_by(&self, table: &str, field: &str, value: &Value) -> DatabaseResult<Vec<Record>> {
        let mut records = self.scan(table)?;
        records.retain(|r| r.get(field) == Some(value));
        Ok(records)
    }

    fn lookup(&self, table: &TableName, id: &RecordId) -> Option<Record> {
        self.inner
            .transactions
            .with_current(|tx| tx.staged(table, id).cloned())
            .flatten()
            .or_else(|| self.inner.store.get(table, id))
    }

    fn staged(&self, table: &TableName) -> Vec<Record> {
        self.inner
            .transactions
            .with_current(|tx| {
                tx.to_batch()
                    .entries()
                    .iter()
                    .filter(|entry| &entry.table == table)
                    .map(|entry| entry.record.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ==================== Transactions ====================

    /// Run `body` in a transaction.
    ///
    /// Commits when `body` returns `Ok`, rolls back on `Err` or panic. Called
    /// inside another transaction, `body` joins it; if `body` fails the outer
    /// transaction can then only roll back.
    pub fn atomic<T, F>(&self, body: F) -> DatabaseResult<T>
    where
        F: FnOnce(&Database) -> DatabaseResult<T>,
    {
        self.inner.transactions.run(false, || body(self))
    }

    /// Begin an explicit transaction on the calling thread.
    pub fn begin(&self) -> DatabaseResult<String> {
        Ok(self.inner.transactions.begin(false)?)
    }

    /// Commit the calling thread's transaction.
    pub fn commit(&self) -> DatabaseResult<()> {
        Ok(self.inner.transactions.commit()?)
    }

    /// Roll back the calling thread's transaction.
    pub fn rollback(&self) -> DatabaseResult<()> {
        Ok(self.inner.transactions.rollback()?)
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.transactions.in_transaction()
    }

    /// ID of the calling thread's transaction.
    pub fn current_transaction(&self) -> Option<String> {
        self.inner.transactions.current_id()
    }

    /// Transactions currently open on any thread.
    pub fn active_transactions(&self) -> Vec<TransactionMetadata> {
        let transactions = &self.inner.transactions;
        transactions
            .active_transactions()
            .iter()
            .filter_map(|tx_id| transactions.get_transaction_info(tx_id))
            .collect()
    }

    // ==================== Introspection ====================

    /// Commit history, newest first. Empty for the in-memory backend.
    pub fn history(&self, limit: Option<usize>) -> DatabaseResult<Vec<CommitInfo>> {
        Ok(self.inner.store.backend().history(limit)?)
    }

    /// Get database statistics.
    pub fn stats(&self) -> DatabaseStats {
        let tables = self.inner.catalog.list_tables();
        let total_records = tables.iter().map(|t| self.inner.store.count(t)).sum();
        DatabaseStats {
            tables: tables.len(),
            total_records,
            hooks: self.inner.hooks.registry().len(),
            active_transactions: self.inner.transactions.active_count(),
        }
    }

    /// Get the database path, if it lives on disk.
    pub fn path(&self) -> Option<&Path> {
        self.inner.config.path.as_deref()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.config.path)
            .field("store", &self.inner.store)
            .field("hooks", self.inner.hooks.registry())
            .finish()
    }
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Number of tables.
    pub tables: usize,
    /// Committed records across all tables.
    pub total_records: usize,
    /// Registered hooks.
    pub hooks: usize,
    /// Number of active transactions.
    pub active_transactions: usize,
}
