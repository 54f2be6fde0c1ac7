//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Once;

use hookdb::catalog::{ColumnDef, Constraint, DataType, SchemaBuilder};
use hookdb::{Database, HookEvent, HookRegistry};
use serde_json::json;
use tracing_subscriber::EnvFilter;

pub const DUPLICATE_NAME: &str = "Duplicate Version Account";

static INIT: Once = Once::new();

/// Route library logs to the test harness. `RUST_LOG` overrides the filter.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hookdb=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// `accounts` (unique `version`) and `logs`.
pub fn define_tables(db: &Database) {
    db.define_table(
        SchemaBuilder::new("accounts")
            .add_required_column("name", DataType::Text)
            .add_column("balance", DataType::Float)
            .column(
                ColumnDef::new("version", DataType::Integer)
                    .with_constraint(Constraint::Unique)
                    .with_constraint(Constraint::Default(json!(1))),
            )
            .build()
            .unwrap(),
    )
    .unwrap();
    db.define_table(
        SchemaBuilder::new("logs")
            .add_required_column("account", DataType::Text)
            .add_column("action", DataType::Text)
            .add_column("status", DataType::Text)
            .build()
            .unwrap(),
    )
    .unwrap();
}

pub fn memory_db(hooks: HookRegistry) -> Database {
    init_tracing();
    let db = Database::in_memory(hooks).unwrap();
    define_tables(&db);
    db
}

/// Logs every account insert, then inserts a second account reusing the
/// triggering account's version.
pub fn duplicating_hooks() -> HookRegistry {
    let mut hooks = HookRegistry::new();
    hooks
        .register("accounts", HookEvent::AfterInsert, |ctx| {
            let action = if ctx.created { "account_created" } else { "account_updated" };
            ctx.db.insert(
                "logs",
                json!({ "account": ctx.record.id.as_str(), "action": action, "status": "success" }),
            )?;

            // the duplicate's own dispatch must not duplicate again
            if ctx.record.get("name") != Some(&json!(DUPLICATE_NAME)) {
                let version = ctx.record.get("version").cloned().unwrap_or(json!(1));
                ctx.db.insert(
                    "accounts",
                    json!({ "name": DUPLICATE_NAME, "balance": 0, "version": version }),
                )?;
            }
            Ok(())
        })
        .unwrap();
    hooks
}

/// Logs every account insert.
pub fn logging_hooks() -> HookRegistry {
    let mut hooks = HookRegistry::new();
    hooks
        .register("accounts", HookEvent::AfterInsert, |ctx| {
            ctx.db.insert(
                "logs",
                json!({ "account": ctx.record.id.as_str(), "action": "successful_creation", "status": "success" }),
            )?;
            Ok(())
        })
        .unwrap();
    hooks
}
