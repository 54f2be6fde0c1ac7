//! Transaction manager - coordinates all transaction operations.
//!
//! The TransactionManager handles:
//! - the per-thread current transaction slot
//! - implicit wrapping and flat nesting of scoped blocks
//! - tracking active transactions across threads
//! - serializing commits to the table store

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::engine::TableStore;
use crate::transaction::context::{PendingWrite, Transaction, TransactionMetadata, TransactionState};
use crate::transaction::error::{TransactionError, TransactionResult};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// current transaction of this thread, per manager
    static CURRENT: RefCell<HashMap<u64, Transaction>> = RefCell::new(HashMap::new());
}

/// Transaction manager - coordinates all transaction operations.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
/// A transaction itself never leaves the thread that began it.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

struct TransactionManagerInner {
    /// key of this manager's entry in the thread-local slot
    id: u64,
    store: Arc<TableStore>,
    /// Active transactions tracked by ID.
    active: RwLock<HashMap<String, TransactionMetadata>>,
    /// Serializes conflict checks and publication of commits.
    commit_lock: Mutex<()>,
}

impl Drop for TransactionManagerInner {
    /// Discards a transaction this thread left open. Slots on other threads
    /// are unreachable and are freed when those threads exit.
    fn drop(&mut self) {
        let id = self.id;
        let abandoned = CURRENT
            .try_with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.remove(&id)))
            .ok()
            .flatten();
        if let Some(tx) = abandoned {
            tracing::warn!(tx_id = %tx.id(), "transaction manager dropped with an open transaction");
        }
    }
}

impl TransactionManager {
    pub fn new(store: Arc<TableStore>) -> Self {
        Self {
            inner: Arc::new(TransactionManagerInner {
                id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
                store,
                active: RwLock::new(HashMap::new()),
                commit_lock: Mutex::new(()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<TableStore> {
        &self.inner.store
    }

    // ==================== Thread-local slot ====================

    /// Run `f` against this thread's current transaction, if any.
    ///
    /// The slot is borrowed only for the duration of `f`; do not call back
    /// into the manager from inside it.
    pub fn with_current<R>(&self, f: impl FnOnce(&mut Transaction) -> R) -> Option<R> {
        let id = self.inner.id;
        CURRENT.with(|slot| slot.borrow_mut().get_mut(&id).map(f))
    }

    fn take_current(&self) -> TransactionResult<Transaction> {
        let id = self.inner.id;
        CURRENT
            .with(|slot| slot.borrow_mut().remove(&id))
            .ok_or(TransactionError::NoActiveTransaction)
    }

    /// Is a transaction active on the calling thread?
    pub fn in_transaction(&self) -> bool {
        self.with_current(|_| ()).is_some()
    }

    /// ID of the calling thread's transaction.
    pub fn current_id(&self) -> Option<String> {
        self.with_current(|tx| tx.id().to_string())
    }

    // ==================== Lifecycle ====================

    /// Begin a transaction on the calling thread.
    pub fn begin(&self, implicit: bool) -> TransactionResult<String> {
        if let Some(tx_id) = self.current_id() {
            return Err(TransactionError::AlreadyActive { tx_id });
        }

        let tx = Transaction::begin(implicit);
        let tx_id = tx.id().to_string();
        self.inner.active.write().insert(tx_id.clone(), tx.metadata().clone());

        let id = self.inner.id;
        CURRENT.with(|slot| slot.borrow_mut().insert(id, tx));

        tracing::debug!(tx_id = %tx_id, implicit, "transaction started");
        Ok(tx_id)
    }

    /// Stage a write in the calling thread's transaction.
    pub fn stage(&self, write: PendingWrite) -> TransactionResult<()> {
        self.with_current(|tx| tx.stage(write))
            .unwrap_or(Err(TransactionError::NoActiveTransaction))
    }

    /// Commit the calling thread's transaction.
    ///
    /// The conflict check and the publication happen under the commit lock.
    /// On any failure the transaction ends rolled back.
    pub fn commit(&self) -> TransactionResult<()> {
        let mut tx = self.take_current()?;
        let result = self.commit_taken(&mut tx);
        self.mark_completed(tx.id());
        result
    }

    fn commit_taken(&self, tx: &mut Transaction) -> TransactionResult<()> {
        if tx.is_rollback_only() {
            tx.transition(TransactionState::RolledBack)?;
            tracing::warn!(tx_id = %tx.id(), "rollback-only transaction rolled back at commit");
            return Err(TransactionError::RollbackOnly {
                tx_id: tx.id().to_string(),
            });
        }

        if tx.state() == TransactionState::Idle {
            tx.transition(TransactionState::Committed)?;
            tracing::debug!(tx_id = %tx.id(), "empty transaction committed");
            return Ok(());
        }

        tx.transition(TransactionState::Committing)?;
        let batch = tx.to_batch();

        let outcome = {
            let _guard = self.inner.commit_lock.lock();
            self.inner.store.commit(&batch)
        };

        match outcome {
            Ok(()) => {
                tx.transition(TransactionState::Committed)?;
                tracing::info!(
                    tx_id = %tx.id(),
                    records = batch.len(),
                    implicit = tx.is_implicit(),
                    "transaction committed"
                );
                Ok(())
            }
            Err(err) => {
                tx.transition(TransactionState::RolledBack)?;
                let err = TransactionError::from(err);
                match &err {
                    TransactionError::Conflict(conflict) => tracing::warn!(
                        tx_id = %tx.id(),
                        table = %conflict.table,
                        field = %conflict.field,
                        value = %conflict.value,
                        "commit aborted by unique conflict"
                    ),
                    other => tracing::warn!(tx_id = %tx.id(), error = %other, "commit failed"),
                }
                Err(err)
            }
        }
    }

    /// Roll back the calling thread's transaction, discarding its writes.
    pub fn rollback(&self) -> TransactionResult<()> {
        let mut tx = self.take_current()?;
        let result = tx.transition(TransactionState::RolledBack);
        self.mark_completed(tx.id());
        tracing::debug!(tx_id = %tx.id(), discarded = tx.writes().len(), "transaction rolled back");
        result
    }

    fn mark_completed(&self, tx_id: &str) {
        self.inner.active.write().remove(tx_id);
    }

    /// Execute `body` inside a transaction.
    ///
    /// With no transaction on this thread, a new one is begun, committed when
    /// `body` returns `Ok` and rolled back on `Err` or panic. Inside an active
    /// transaction, `body` joins it; a failure marks it rollback-only.
    pub fn run<T, E, F>(&self, implicit: bool, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<TransactionError>,
    {
        if self.in_transaction() {
            self.with_current(Transaction::enter_nested);
            let mut guard = ScopeGuard::new(self, Scope::Joined);
            let result = body();
            if result.is_err() {
                self.with_current(Transaction::mark_rollback_only);
            }
            guard.disarm();
            self.with_current(Transaction::exit_nested);
            return result;
        }

        self.begin(implicit)?;
        let mut guard = ScopeGuard::new(self, Scope::Root);
        let result = body();
        guard.disarm();

        match result {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                self.rollback()?;
                Err(err)
            }
        }
    }

    // ==================== Introspection ====================

    /// Get the number of active transactions across all threads.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// List all active transaction IDs.
    pub fn active_transactions(&self) -> Vec<String> {
        self.inner.active.read().keys().cloned().collect()
    }

    pub fn get_transaction_info(&self, tx_id: &str) -> Option<TransactionMetadata> {
        self.inner.active.read().get(tx_id).cloned()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("id", &self.inner.id)
            .field("active_count", &self.active_count())
            .finish()
    }
}

enum Scope {
    Root,
    Joined,
}

/// Cleans up a scope that is left by unwinding.
struct ScopeGuard<'a> {
    manager: &'a TransactionManager,
    scope: Scope,
    armed: bool,
}

impl<'a> ScopeGuard<'a> {
    fn new(manager: &'a TransactionManager, scope: Scope) -> Self {
        Self {
            manager,
            scope,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.scope {
            Scope::Root => {
                if let Err(err) = self.manager.rollback() {
                    tracing::warn!(error = %err, "rollback after panic failed");
                }
            }
            Scope::Joined => {
                self.manager.with_current(|tx| {
                    tx.mark_rollback_only();
                    tx.exit_nested();
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, DataType, SchemaBuilder};
    use crate::storage::{MemoryBackend, Record, RecordId, TableName};
    use serde_json::json;
    use std::panic::{self, AssertUnwindSafe};

    fn setup() -> (TransactionManager, TableName) {
        let backend = Arc::new(MemoryBackend::new());
        let catalog = Catalog::load(backend.clone()).unwrap();
        let schema = catalog
            .define_table(
                SchemaBuilder::new("accounts")
                    .add_unique_column("version", DataType::Integer)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let store = Arc::new(TableStore::load(backend, &catalog).unwrap());
        store.define(&schema);
        (TransactionManager::new(store), schema.name.clone())
    }

    fn write(table: &TableName, version: i64) -> PendingWrite {
        let record = Record::from_value(RecordId::generate(), json!({ "version": version })).unwrap();
        PendingWrite::insert(table.clone(), record)
    }

    #[test]
    fn test_begin_commit() {
        let (manager, accounts) = setup();
        assert!(!manager.in_transaction());

        let tx_id = manager.begin(false).unwrap();
        assert_eq!(manager.current_id(), Some(tx_id.clone()));
        assert_eq!(manager.active_transactions(), vec![tx_id.clone()]);
        assert!(manager.get_transaction_info(&tx_id).is_some());

        manager.stage(write(&accounts, 1)).unwrap();
        manager.commit().unwrap();

        assert!(!manager.in_transaction());
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.store().count(&accounts), 1);
    }

    #[test]
    fn test_dropping_manager_clears_open_transaction() {
        let (manager, accounts) = setup();
        let id = manager.inner.id;
        manager.begin(false).unwrap();
        manager.stage(write(&accounts, 1)).unwrap();
        assert!(CURRENT.with(|slot| slot.borrow().contains_key(&id)));

        drop(manager);
        assert!(!CURRENT.with(|slot| slot.borrow().contains_key(&id)));
    }

    #[test]
    fn test_double_begin_and_orphan_commit() {
        let (manager, _) = setup();
        manager.begin(false).unwrap();
        assert!(matches!(manager.begin(false), Err(TransactionError::AlreadyActive { .. })));
        manager.rollback().unwrap();

        assert!(matches!(manager.commit(), Err(TransactionError::NoActiveTransaction)));
        assert!(matches!(manager.rollback(), Err(TransactionError::NoActiveTransaction)));
    }

    #[test]
    fn test_stage_without_transaction() {
        let (manager, accounts) = setup();
        assert!(matches!(
            manager.stage(write(&accounts, 1)),
            Err(TransactionError::NoActiveTransaction)
        ));
    }

    #[test]
    fn test_rollback_discards_writes() {
        let (manager, accounts) = setup();
        manager.begin(false).unwrap();
        manager.stage(write(&accounts, 1)).unwrap();
        manager.rollback().unwrap();
        assert_eq!(manager.store().count(&accounts), 0);
    }

    #[test]
    fn test_conflict_rolls_back() {
        let (manager, accounts) = setup();
        let result: TransactionResult<()> = manager.run(false, || {
            manager.stage(write(&accounts, 1))?;
            manager.stage(write(&accounts, 1))?;
            Ok(())
        });

        assert!(matches!(result, Err(TransactionError::Conflict(_))));
        assert!(!manager.in_transaction());
        assert_eq!(manager.store().count(&accounts), 0);
    }

    #[test]
    fn test_nested_run_joins() {
        let (manager, accounts) = setup();
        manager
            .run(false, || {
                let outer = manager.current_id();
                manager.run(false, || {
                    assert_eq!(manager.current_id(), outer);
                    assert_eq!(manager.with_current(|tx| tx.nesting()), Some(1));
                    manager.stage(write(&accounts, 1))
                })?;
                // nothing is visible before the outer commit
                assert_eq!(manager.store().count(&accounts), 0);
                Ok::<_, TransactionError>(())
            })
            .unwrap();

        assert_eq!(manager.store().count(&accounts), 1);
    }

    #[test]
    fn test_failed_nested_block_poisons_outer() {
        let (manager, accounts) = setup();
        let result: TransactionResult<()> = manager.run(false, || {
            manager.stage(write(&accounts, 1))?;
            let inner: TransactionResult<()> = manager.run(false, || Err(TransactionError::NoActiveTransaction));
            assert!(inner.is_err());
            // the outer block swallows the inner failure
            Ok(())
        });

        assert!(matches!(result, Err(TransactionError::RollbackOnly { .. })));
        assert_eq!(manager.store().count(&accounts), 0);
    }

    #[test]
    fn test_panic_rolls_back() {
        let (manager, accounts) = setup();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: TransactionResult<()> = manager.run(false, || {
                manager.stage(write(&accounts, 1))?;
                panic!("boom");
            });
        }));

        assert!(outcome.is_err());
        assert!(!manager.in_transaction());
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.store().count(&accounts), 0);
    }

    #[test]
    fn test_empty_run_commits() {
        let (manager, _) = setup();
        let value: TransactionResult<i32> = manager.run(true, || Ok(7));
        assert_eq!(value.unwrap(), 7);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_managers_have_separate_slots() {
        let (first, accounts) = setup();
        let (second, _) = setup();

        first.begin(false).unwrap();
        assert!(!second.in_transaction());
        first.stage(write(&accounts, 1)).unwrap();
        first.rollback().unwrap();
    }
}
