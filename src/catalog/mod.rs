//! Catalog module for schema management.
//!
//! Table definitions declare columns, types and constraints. Unique
//! constraints are the ones the conflict detector enforces at commit.
//! Schemas are persisted through the storage backend (`_schemas/` in Git).

mod manager;
mod schema;
mod types;

pub use manager::Catalog;
pub use schema::{SchemaBuilder, SchemaError, TableSchema};
pub use types::{ColumnDef, Constraint, DataType};
