//! pluggable durable storage behind the in-memory tables.
//!
//! the engine keeps committed state in memory and hands every committed
//! transaction to a [`StorageBackend`] as a single [`WriteBatch`]. A batch
//! is accepted whole or rejected whole.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use parking_lot::Mutex;
use serde_json::Value;

use crate::storage::blob::Record;
use crate::storage::commit::CommitInfo;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::repository::GitRepository;
use crate::storage::types::{GitSignature, RecordId, TableName};

/// kind of write applied to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOp {
    Insert,
    Update,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOp::Insert => write!(f, "insert"),
            WriteOp::Update => write!(f, "update"),
        }
    }
}

/// final image of one record written by a transaction
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub table: TableName,
    pub op: WriteOp,
    pub record: Record,
}

/// everything a transaction commits, one entry per distinct record
#[derive(Debug, Clone)]
pub struct WriteBatch {
    tx_id: String,
    entries: Vec<BatchEntry>,
}

impl WriteBatch {
    pub fn new(tx_id: impl Into<String>) -> Self {
        Self {
            tx_id: tx_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, table: TableName, op: WriteOp, record: Record) {
        self.entries.push(BatchEntry { table, op, record });
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn inserts(&self) -> usize {
        self.entries.iter().filter(|e| e.op == WriteOp::Insert).count()
    }

    pub fn updates(&self) -> usize {
        self.entries.iter().filter(|e| e.op == WriteOp::Update).count()
    }
}

/// durable home of committed records and table schemas
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// short name used in logs
    fn name(&self) -> &'static str;

    /// tables holding at least one record
    fn list_tables(&self) -> StorageResult<Vec<TableName>>;

    /// every record of a table
    fn scan_table(&self, table: &TableName) -> StorageResult<Vec<Record>>;

    /// stored schema documents
    fn load_schemas(&self) -> StorageResult<Vec<(TableName, Value)>>;

    fn put_schema(&self, table: &TableName, schema: &Value) -> StorageResult<()>;

    /// persist a committed transaction atomically
    fn write_batch(&self, batch: &WriteBatch) -> StorageResult<()>;

    /// commit log, newest first (empty for backends without one)
    fn history(&self, _limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        Ok(Vec::new())
    }
}

/// Git-backed storage: one commit on `main` per committed transaction.
#[derive(Debug, Clone)]
pub struct GitBackend {
    repo: GitRepository,
}

impl GitBackend {
    pub fn open(path: impl AsRef<Path>, create_if_missing: bool, signature: GitSignature) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = if create_if_missing {
            GitRepository::open_or_init(path, signature)?
        } else {
            GitRepository::open(path, signature)?
        };
        Ok(Self { repo })
    }

    pub fn repository(&self) -> &GitRepository {
        &self.repo
    }
}

impl StorageBackend for GitBackend {
    fn name(&self) -> &'static str {
        "git"
    }

    fn list_tables(&self) -> StorageResult<Vec<TableName>> {
        let head = self.repo.head()?;
        self.repo.list_tables(head)
    }

    fn scan_table(&self, table: &TableName) -> StorageResult<Vec<Record>> {
        let head = self.repo.head()?;
        self.repo.scan_table(table, head)
    }

    fn load_schemas(&self) -> StorageResult<Vec<(TableName, Value)>> {
        let head = self.repo.head()?;
        self.repo.load_schemas(head)
    }

    fn put_schema(&self, table: &TableName, schema: &Value) -> StorageResult<()> {
        self.repo.put_schema(table, schema).map(|_| ())
    }

    fn write_batch(&self, batch: &WriteBatch) -> StorageResult<()> {
        let commit_id = self.repo.commit_batch(batch)?;
        tracing::debug!(tx_id = batch.tx_id(), commit = %commit_id.short(), records = batch.len(), "git batch committed");
        Ok(())
    }

    fn history(&self, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        self.repo.history(limit)
    }
}

#[derive(Debug, Default)]
struct MemoryTable {
    records: Vec<Record>,
    positions: HashMap<RecordId, usize>,
}

impl MemoryTable {
    fn upsert(&mut self, record: Record) {
        match self.positions.get(&record.id) {
            Some(&pos) => self.records[pos] = record,
            None => {
                self.positions.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<TableName, MemoryTable>,
    schemas: BTreeMap<TableName, Value>,
    batches: usize,
}

/// Keeps committed batches in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// number of batches accepted so far
    pub fn batch_count(&self) -> usize {
        self.state.lock().batches
    }

    /// total records across all tables
    pub fn record_count(&self) -> usize {
        self.state.lock().tables.values().map(|t| t.records.len()).sum()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn list_tables(&self) -> StorageResult<Vec<TableName>> {
        Ok(self.state.lock().tables.keys().cloned().collect())
    }

    fn scan_table(&self, table: &TableName) -> StorageResult<Vec<Record>> {
        Ok(self
            .state
            .lock()
            .tables
            .get(table)
            .map(|t| t.records.clone())
            .unwrap_or_default())
    }

    fn load_schemas(&self) -> StorageResult<Vec<(TableName, Value)>> {
        Ok(self
            .state
            .lock()
            .schemas
            .iter()
            .map(|(table, schema)| (table.clone(), schema.clone()))
            .collect())
    }

    fn put_schema(&self, table: &TableName, schema: &Value) -> StorageResult<()> {
        self.state.lock().schemas.insert(table.clone(), schema.clone());
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> StorageResult<()> {
        let mut state = self.state.lock();

        // reject before touching anything so a bad batch leaves no trace
        for entry in batch.entries() {
            let exists = state
                .tables
                .get(&entry.table)
                .is_some_and(|t| t.positions.contains_key(&entry.record.id));
            match (entry.op, exists) {
                (WriteOp::Insert, true) => {
                    return Err(StorageError::Internal(format!(
                        "record {}/{} already stored",
                        entry.table, entry.record.id
                    )))
                }
                (WriteOp::Update, false) => {
                    return Err(StorageError::RecordNotFound {
                        table: entry.table.clone(),
                        id: entry.record.id.clone(),
                    })
                }
                _ => {}
            }
        }

        for entry in batch.entries() {
            state
                .tables
                .entry(entry.table.clone())
                .or_default()
                .upsert(entry.record.clone());
        }
        state.batches += 1;
        Ok(())
    }
}
