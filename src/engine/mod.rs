//! Storage engine: committed tables, unique indexes and commit-time
//! conflict detection.
//!
//! ```text
//!   WriteBatch ──► ConflictDetector ──► StorageBackend ──► Table::apply
//!                  (unique checks)      (durable write)    (publish)
//! ```

mod conflict;
mod store;
mod table;

use thiserror::Error;

use crate::catalog::SchemaError;
use crate::storage::{StorageError, TableName};

pub use conflict::{ConflictDetector, ConflictError};
pub use store::TableStore;
pub use table::Table;

/// Errors raised while committing to or loading the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("table is not defined: {0}")]
    UnknownTable(TableName),
}

pub type EngineResult<T> = Result<T, EngineError>;
