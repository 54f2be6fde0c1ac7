//! Transaction error types.

use thiserror::Error;

use crate::engine::{ConflictError, EngineError};
use crate::storage::{StorageError, TableName};
use crate::transaction::context::TransactionState;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// A unique constraint was violated at commit; nothing was applied.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The backend refused the commit; nothing was applied.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The write set references a table the engine does not know.
    #[error("table is not defined: {0}")]
    UnknownTable(TableName),

    /// Operation on a transaction that already committed or rolled back.
    #[error("transaction {tx_id} is no longer active (state: {state})")]
    NotActive { tx_id: String, state: TransactionState },

    /// A state change the lifecycle does not allow.
    #[error("transaction {tx_id} cannot move from {from} to {to}")]
    InvalidTransition {
        tx_id: String,
        from: TransactionState,
        to: TransactionState,
    },

    /// commit or rollback with no transaction on this thread
    #[error("no active transaction on this thread")]
    NoActiveTransaction,

    /// begin while a transaction is already active on this thread
    #[error("transaction {tx_id} is already active on this thread")]
    AlreadyActive { tx_id: String },

    /// A nested block failed, so the shared transaction can only roll back.
    #[error("transaction {tx_id} was marked rollback-only and has been rolled back")]
    RollbackOnly { tx_id: String },
}

impl TransactionError {
    /// Check if this error is retryable.
    ///
    /// Only a concurrent move of the storage branch qualifies; constraint
    /// conflicts fail the same way on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransactionError::Storage(e) if e.is_conflict())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, TransactionError::Conflict(_))
    }
}

impl From<EngineError> for TransactionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Conflict(conflict) => TransactionError::Conflict(conflict),
            EngineError::Storage(storage) => TransactionError::Storage(storage),
            EngineError::UnknownTable(table) => TransactionError::UnknownTable(table),
            EngineError::Schema(schema) => {
                TransactionError::Storage(StorageError::Internal(format!("schema error during commit: {}", schema)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_retryable() {
        let conflict = TransactionError::Conflict(ConflictError::new(
            TableName::new("accounts").unwrap(),
            "version",
            json!(1),
        ));
        assert!(conflict.is_conflict());
        assert!(!conflict.is_retryable());

        let moved = TransactionError::Storage(StorageError::ConcurrentModification {
            branch: "main".to_string(),
        });
        assert!(moved.is_retryable());

        let not_active = TransactionError::NotActive {
            tx_id: "tx001".to_string(),
            state: TransactionState::Committed,
        };
        assert!(!not_active.is_retryable());
        assert_eq!(not_active.to_string(), "transaction tx001 is no longer active (state: committed)");
    }

    #[test]
    fn test_engine_error_mapping() {
        let err: TransactionError = EngineError::UnknownTable(TableName::new("logs").unwrap()).into();
        assert!(matches!(err, TransactionError::UnknownTable(_)));
    }
}
