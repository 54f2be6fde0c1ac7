//! # Hooks and Shared Transactions
//!
//! Hooks run in the writer's transaction: a hook-triggered write that breaks
//! a unique constraint rolls back the write that triggered it, whether the
//! transaction was opened implicitly by a bare insert or by an explicit
//! `atomic` block.
//!
//! ```sh
//! cargo test --test hook_transactions -- --nocapture
//! ```

mod common;

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use common::{duplicating_hooks, logging_hooks, memory_db};
use hookdb::{DatabaseError, HookEvent, HookRegistry};
use parking_lot::Mutex;
use serde_json::json;

// ============================================================================
// DUPLICATE VERSION SCENARIOS
// ============================================================================

#[test]
fn implicit_transaction_rolls_back_with_hook_conflict() {
    let db = memory_db(duplicating_hooks());

    let err = db
        .insert("accounts", json!({ "name": "Test Account 1", "balance": 1000, "version": 1 }))
        .unwrap_err();

    let conflict = err.as_conflict().expect("unique conflict");
    assert_eq!(conflict.table.as_str(), "accounts");
    assert_eq!(conflict.field, "version");
    assert_eq!(conflict.value, json!(1));

    assert_eq!(db.count("accounts").unwrap(), 0);
    assert_eq!(db.count("logs").unwrap(), 0);
    assert!(!db.in_transaction());
    assert!(db.active_transactions().is_empty());
}

#[test]
fn explicit_transaction_rolls_back_with_hook_conflict() {
    let db = memory_db(duplicating_hooks());

    let err = db
        .atomic(|db| {
            db.insert("accounts", json!({ "name": "Test Account 2", "balance": 2000, "version": 2 }))?;
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, DatabaseError::Conflict(ref c) if c.value == json!(2)));
    assert_eq!(db.count("accounts").unwrap(), 0);
    assert_eq!(db.count("logs").unwrap(), 0);
    assert!(!db.in_transaction());
}

#[test]
fn logging_hook_commits_with_its_write() {
    let db = memory_db(logging_hooks());

    let account = db
        .atomic(|db| db.insert("accounts", json!({ "name": "Test Account 3", "balance": 3000, "version": 3 })))
        .unwrap();

    assert_eq!(db.count("accounts").unwrap(), 1);
    assert_eq!(db.count("logs").unwrap(), 1);

    let logs = db.find_by("logs", "account", &json!(account.id.as_str())).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].get("action"), Some(&json!("successful_creation")));
}

#[test]
fn scenarios_in_sequence_leave_only_the_clean_write() {
    let db = memory_db(duplicating_hooks());
    assert!(db.insert("accounts", json!({ "name": "Test Account 1", "version": 1 })).is_err());
    assert!(db
        .atomic(|db| db.insert("accounts", json!({ "name": "Test Account 2", "version": 2 })))
        .is_err());

    // a different registry cannot be swapped in, so the clean run uses its own database
    let clean = memory_db(logging_hooks());
    clean
        .atomic(|db| db.insert("accounts", json!({ "name": "Test Account 3", "version": 3 })))
        .unwrap();

    assert_eq!(db.count("accounts").unwrap(), 0);
    assert_eq!(clean.count("accounts").unwrap(), 1);
    assert_eq!(clean.count("logs").unwrap(), 1);
}

// ============================================================================
// HOOK FAILURES AND NESTING
// ============================================================================

#[test]
fn failing_hook_discards_earlier_hook_writes() {
    let mut hooks = logging_hooks();
    hooks
        .register_named("accounts", HookEvent::AfterInsert, "reject", |_| Err("account rejected".into()))
        .unwrap();
    let db = memory_db(hooks);

    let err = db.insert("accounts", json!({ "name": "a", "version": 1 })).unwrap_err();
    match err {
        DatabaseError::Hook(hook) => {
            assert_eq!(hook.name, "reject");
            assert_eq!(hook.hook, 1);
            assert_eq!(hook.table.as_str(), "accounts");
        }
        other => panic!("expected hook error, got {other:?}"),
    }
    assert_eq!(db.count("accounts").unwrap(), 0);
    assert_eq!(db.count("logs").unwrap(), 0);
}

#[test]
fn failing_hook_stops_remaining_hooks() {
    let ran = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = HookRegistry::new();
    {
        let ran = Arc::clone(&ran);
        hooks
            .register("accounts", HookEvent::AfterInsert, move |_| {
                ran.lock().push("first");
                Err("stop".into())
            })
            .unwrap();
    }
    {
        let ran = Arc::clone(&ran);
        hooks
            .register("accounts", HookEvent::AfterInsert, move |_| {
                ran.lock().push("second");
                Ok(())
            })
            .unwrap();
    }
    let db = memory_db(hooks);

    assert!(db.insert("accounts", json!({ "name": "a" })).is_err());
    assert_eq!(*ran.lock(), vec!["first"]);
}

#[test]
fn nested_atomic_joins_outer_transaction() {
    let db = memory_db(logging_hooks());

    db.atomic(|db| {
        let outer = db.current_transaction();
        db.insert("accounts", json!({ "name": "a", "version": 1 }))?;
        db.atomic(|db| {
            assert_eq!(db.current_transaction(), outer);
            db.insert("accounts", json!({ "name": "b", "version": 2 }))
        })?;
        Ok(())
    })
    .unwrap();

    assert_eq!(db.count("accounts").unwrap(), 2);
    assert_eq!(db.count("logs").unwrap(), 2);
}

#[test]
fn failed_inner_block_forces_outer_rollback() {
    let db = memory_db(logging_hooks());

    let err = db
        .atomic(|db| {
            db.insert("accounts", json!({ "name": "a", "version": 1 }))?;
            let inner = db.atomic(|db| db.insert("missing", json!({})));
            assert!(matches!(inner, Err(DatabaseError::TableNotFound(_))));
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, DatabaseError::State(_)));
    assert_eq!(db.count("accounts").unwrap(), 0);
    assert_eq!(db.count("logs").unwrap(), 0);
}

#[test]
fn hooks_see_the_staged_record() {
    let mut hooks = HookRegistry::new();
    hooks
        .register("accounts", HookEvent::AfterInsert, |ctx| {
            assert!(ctx.db.in_transaction());
            assert_eq!(ctx.depth, 1);
            let staged = ctx.db.get("accounts", ctx.record.id.as_str())?;
            assert_eq!(staged.as_ref(), Some(ctx.record));
            Ok(())
        })
        .unwrap();
    let db = memory_db(hooks);

    db.insert("accounts", json!({ "name": "a" })).unwrap();
    assert_eq!(db.count("accounts").unwrap(), 1);
}

#[test]
fn update_hook_runs_in_update_transaction() {
    let mut hooks = HookRegistry::new();
    hooks
        .register("accounts", HookEvent::AfterUpdate, |ctx| {
            assert!(!ctx.created);
            ctx.db.insert(
                "logs",
                json!({ "account": ctx.record.id.as_str(), "action": "account_updated", "status": "success" }),
            )?;
            Ok(())
        })
        .unwrap();
    let db = memory_db(hooks);

    let account = db.insert("accounts", json!({ "name": "a", "version": 1 })).unwrap();
    assert_eq!(db.count("logs").unwrap(), 0);

    let updated = db
        .update("accounts", account.id.as_str(), json!({ "balance": 12.5 }))
        .unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(db.count("logs").unwrap(), 1);
}

#[test]
fn update_into_taken_value_conflicts() {
    let db = memory_db(HookRegistry::new());
    db.insert("accounts", json!({ "name": "a", "version": 1 })).unwrap();
    let b = db.insert("accounts", json!({ "name": "b", "version": 2 })).unwrap();

    let err = db.update("accounts", b.id.as_str(), json!({ "version": 1 })).unwrap_err();
    assert!(err.is_conflict());
    let stored = db.get("accounts", b.id.as_str()).unwrap().unwrap();
    assert_eq!(stored.get("version"), Some(&json!(2)));
}

// ============================================================================
// SYNCHRONOUS DISPATCH
// ============================================================================

#[test]
fn blocking_hook_delays_the_write() {
    let delay = Duration::from_millis(100);
    let mut hooks = HookRegistry::new();
    hooks
        .register("accounts", HookEvent::AfterInsert, move |_| {
            thread::sleep(delay);
            Ok(())
        })
        .unwrap();
    let db = memory_db(hooks);

    let started = Instant::now();
    db.insert("accounts", json!({ "name": "slow" })).unwrap();
    assert!(started.elapsed() >= delay);
}

fn recording_hooks(seen: Arc<Mutex<Vec<ThreadId>>>) -> HookRegistry {
    let mut hooks = HookRegistry::new();
    hooks
        .register("accounts", HookEvent::AfterInsert, move |_| {
            seen.lock().push(thread::current().id());
            Ok(())
        })
        .unwrap();
    hooks
}

#[test]
fn hooks_run_on_the_writing_thread() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let db = memory_db(recording_hooks(Arc::clone(&seen)));

    let main_id = thread::current().id();
    db.insert("accounts", json!({ "name": "main", "version": 1 })).unwrap();

    let worker = db.clone();
    let spawned_id = thread::spawn(move || {
        worker.insert("accounts", json!({ "name": "worker", "version": 2 })).unwrap();
        thread::current().id()
    })
    .join()
    .unwrap();

    assert_ne!(main_id, spawned_id);
    assert_eq!(*seen.lock(), vec![main_id, spawned_id]);
    assert_eq!(db.count("accounts").unwrap(), 2);
}

#[test]
fn hooks_run_in_registration_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = HookRegistry::new();
    for name in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        hooks
            .register("accounts", HookEvent::AfterInsert, move |_| {
                order.lock().push(name);
                Ok(())
            })
            .unwrap();
    }
    let db = memory_db(hooks);

    for run in 0..5 {
        order.lock().clear();
        db.insert("accounts", json!({ "name": format!("run {run}"), "version": run + 1 }))
            .unwrap();
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }
    assert_eq!(db.count("accounts").unwrap(), 5);
}
