//! A transaction's private working set and lifecycle.
//!
//! ```text
//! Idle ──first write──► Active ──commit──► Committing ──► Committed
//!   │                     │                    │
//!   └──────rollback───────┴────────────────────┴────────► RolledBack
//! ```
//!
//! Committed and RolledBack are terminal. Writes are only staged here;
//! shared tables are untouched until the manager commits the batch.

use std::collections::HashMap;
use std::fmt;
use std::thread::{self, ThreadId};

use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::storage::{Record, RecordId, TableName, WriteBatch, WriteOp};
use crate::transaction::error::{TransactionError, TransactionResult};

/// Lifecycle states of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Idle,
    Active,
    Committing,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Idle, Active)
                | (Idle, Committed)
                | (Idle, RolledBack)
                | (Active, Committing)
                | (Active, RolledBack)
                | (Committing, Committed)
                | (Committing, RolledBack)
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Idle => "idle",
            TransactionState::Active => "active",
            TransactionState::Committing => "committing",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        write!(f, "{}", name)
    }
}

/// Transaction metadata tracked by the manager.
#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    pub tx_id: String,
    /// opened by a bare write rather than an explicit block
    pub implicit: bool,
    /// the thread that owns the transaction
    pub thread: ThreadId,
    pub started_at: DateTime<Utc>,
}

/// One staged write: the full record image after the operation.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub table: TableName,
    pub op: WriteOp,
    pub record: Record,
}

impl PendingWrite {
    pub fn insert(table: TableName, record: Record) -> Self {
        Self {
            table,
            op: WriteOp::Insert,
            record,
        }
    }

    pub fn update(table: TableName, record: Record) -> Self {
        Self {
            table,
            op: WriteOp::Update,
            record,
        }
    }
}

/// A transaction owned by one thread.
#[derive(Debug)]
pub struct Transaction {
    metadata: TransactionMetadata,
    state: TransactionState,
    writes: Vec<PendingWrite>,
    /// nested `atomic` blocks currently joined to this transaction
    nesting: usize,
    /// hook dispatches currently running inside this transaction
    hook_depth: usize,
    rollback_only: bool,
}

impl Transaction {
    /// Start a new transaction in the `Idle` state on the calling thread.
    pub fn begin(implicit: bool) -> Self {
        Self {
            metadata: TransactionMetadata {
                tx_id: Ulid::new().to_string().to_lowercase(),
                implicit,
                thread: thread::current().id(),
                started_at: Utc::now(),
            },
            state: TransactionState::Idle,
            writes: Vec::new(),
            nesting: 0,
            hook_depth: 0,
            rollback_only: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.tx_id
    }

    pub fn metadata(&self) -> &TransactionMetadata {
        &self.metadata
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_implicit(&self) -> bool {
        self.metadata.implicit
    }

    pub fn writes(&self) -> &[PendingWrite] {
        &self.writes
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    pub fn mark_rollback_only(&mut self) {
        if !self.rollback_only {
            tracing::debug!(tx_id = %self.metadata.tx_id, "transaction marked rollback-only");
        }
        self.rollback_only = true;
    }

    pub fn nesting(&self) -> usize {
        self.nesting
    }

    pub(crate) fn enter_nested(&mut self) {
        self.nesting += 1;
    }

    pub(crate) fn exit_nested(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    pub fn hook_depth(&self) -> usize {
        self.hook_depth
    }

    pub(crate) fn enter_hook(&mut self) -> usize {
        self.hook_depth += 1;
        self.hook_depth
    }

    pub(crate) fn exit_hook(&mut self) {
        self.hook_depth = self.hook_depth.saturating_sub(1);
    }

    /// Move to `next`, enforcing the lifecycle.
    pub fn transition(&mut self, next: TransactionState) -> TransactionResult<()> {
        if self.state.is_terminal() {
            return Err(TransactionError::NotActive {
                tx_id: self.metadata.tx_id.clone(),
                state: self.state,
            });
        }
        if !self.state.can_transition_to(next) {
            return Err(TransactionError::InvalidTransition {
                tx_id: self.metadata.tx_id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Add a write to the working set. The first write activates the transaction.
    pub fn stage(&mut self, write: PendingWrite) -> TransactionResult<()> {
        match self.state {
            TransactionState::Idle => self.transition(TransactionState::Active)?,
            TransactionState::Active => {}
            state => {
                return Err(TransactionError::NotActive {
                    tx_id: self.metadata.tx_id.clone(),
                    state,
                })
            }
        }
        self.writes.push(write);
        Ok(())
    }

    /// Latest staged image of a record, if this transaction wrote it.
    pub fn staged(&self, table: &TableName, id: &RecordId) -> Option<&Record> {
        self.writes
            .iter()
            .rev()
            .find(|w| &w.table == table && &w.record.id == id)
            .map(|w| &w.record)
    }

    /// Collapse the working set into one entry per record.
    ///
    /// Entries keep the order in which each record first appeared and carry
    /// its final image. A record inserted and then updated here stays an insert.
    pub fn to_batch(&self) -> WriteBatch {
        let mut order: Vec<(TableName, RecordId)> = Vec::new();
        let mut latest: HashMap<(TableName, RecordId), (WriteOp, &Record)> = HashMap::new();

        for write in &self.writes {
            let key = (write.table.clone(), write.record.id.clone());
            match latest.get_mut(&key) {
                Some(slot) => slot.1 = &write.record,
                None => {
                    order.push(key.clone());
                    latest.insert(key, (write.op, &write.record));
                }
            }
        }

        let mut batch = WriteBatch::new(self.metadata.tx_id.clone());
        for key in order {
            if let Some((op, record)) = latest.remove(&key) {
                batch.push(key.0, op, record.clone());
            }
        }
        batch
    }
}
