//! Errors raised by storage backends.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::{InvalidNameError, RecordId, TableName};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// an update targeted a record the backend does not hold
    #[error("record not found: table={table}, id={id}")]
    RecordNotFound { table: TableName, id: RecordId },

    /// a stored path does not form a valid table name or record id
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// no repository at the path and creation was not requested
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// a record or table path holds the wrong kind of git object
    #[error("unexpected entry type at {path}: expected {expected}, found {found}")]
    UnexpectedEntryType {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// main moved underneath a batch commit
    #[error("concurrent modification: branch {branch} was updated outside this database")]
    ConcurrentModification { branch: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Missing record, ref, commit or repository.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::RecordNotFound { .. }
                | StorageError::RefNotFound(_)
                | StorageError::CommitNotFound(_)
                | StorageError::NotInitialized(_)
        )
    }

    /// Another writer moved the branch first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::ConcurrentModification { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
