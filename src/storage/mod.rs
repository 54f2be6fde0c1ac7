//! storage layer for hookdb
//!
//! committed records live in memory inside the engine; this module is
//! where they become durable. Upper layers talk to a [`StorageBackend`]
//! and never touch git2 directly.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐   ┌───────────────┐
//! │          GitBackend          │   │ MemoryBackend │
//! └──────────────────────────────┘   └───────────────┘
//!                │
//!                ▼
//! ┌──────────────────────────────┐
//! │        GitRepository         │
//! │ (records, schemas, history)  │
//! └──────────────────────────────┘
//!                │
//!        ┌───────┼────────┐
//!        ▼       ▼        ▼
//!     ┌──────┐┌──────┐┌──────┐
//!     │ tree ││ blob ││ refs │
//!     └──────┘└──────┘└──────┘
//!                │
//!                ▼
//!           ┌────────┐
//!           │ commit │
//!           └────────┘
//! ```
//!
//! # Layout in Git
//!
//! ```text
//! accounts/01hx....json     one blob per record
//! logs/01hy....json
//! _schemas/accounts.json    table definitions
//! ```

mod backend;
mod blob;
mod commit;
mod error;
mod refs;
mod repository;
mod tree;
mod types;

pub use backend::{BatchEntry, GitBackend, MemoryBackend, StorageBackend, WriteBatch, WriteOp};
pub use blob::Record;
pub use commit::CommitInfo;
pub use error::{StorageError, StorageResult};
pub use repository::GitRepository;
pub use types::{BranchName, CommitId, GitSignature, InvalidNameError, RecordId, RecordPath, TableName};
