//! hookdb - a transactional record store with synchronous write hooks
//!
//! Records live in tables with declared columns and unique constraints.
//! Every write runs in a transaction: explicitly inside [`Database::atomic`],
//! or implicitly around a single write. Hooks registered for a table run in
//! the writing thread right after the write is staged, and whatever they
//! write joins the same transaction. Unique constraints are checked when the
//! transaction commits, so a hook that duplicates a unique value rolls back
//! its own triggering write.
//!
//! Committed transactions are persisted through a [`storage::StorageBackend`]:
//! one Git commit each with the Git backend, or kept in memory.
//!
//! # Example
//!
//! ```no_run
//! use hookdb::catalog::{DataType, SchemaBuilder};
//! use hookdb::hooks::{HookEvent, HookRegistry};
//! use hookdb::Database;
//! use serde_json::json;
//!
//! let mut hooks = HookRegistry::new();
//! hooks
//!     .register("accounts", HookEvent::AfterInsert, |ctx| {
//!         ctx.db.insert("logs", json!({ "account": ctx.record.id.as_str() }))?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let db = Database::open("./my_database", hooks).unwrap();
//! db.define_table(
//!     SchemaBuilder::new("accounts")
//!         .add_unique_column("version", DataType::Integer)
//!         .build()
//!         .unwrap(),
//! )
//! .unwrap();
//! db.define_table(
//!     SchemaBuilder::new("logs")
//!         .add_column("account", DataType::Text)
//!         .build()
//!         .unwrap(),
//! )
//! .unwrap();
//!
//! db.insert("accounts", json!({ "version": 1 })).unwrap();
//! assert_eq!(db.count("logs").unwrap(), 1);
//! ```

pub mod catalog;
pub mod db;
pub mod engine;
pub mod hooks;
pub mod storage;
pub mod transaction;

pub use db::{Database, DatabaseConfig, DatabaseError, DatabaseResult};
pub use engine::ConflictError;
pub use hooks::{HookContext, HookError, HookEvent, HookRegistry};
