//! Transaction coordination for hookdb.
//!
//! Every write runs inside a transaction. A write issued with no active
//! transaction is wrapped in an implicit one; an explicit block
//! (`Database::atomic`) opens one for its whole body. Blocks nested inside
//! an active transaction join it, there are no savepoints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │  (thread-local current tx, nesting, commit lock)            │
//! └─────────────────────────────────────────────────────────────┘
//!                │                               │
//!                ▼                               ▼
//!  ┌──────────────────────────┐     ┌──────────────────────────┐
//!  │       Transaction        │     │        TableStore        │
//!  │ (working set, lifecycle) │     │  (conflict check, apply) │
//!  └──────────────────────────┘     └──────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let manager = TransactionManager::new(store);
//!
//! manager.run(false, || {
//!     manager.stage(PendingWrite::insert(table, record))?;
//!     Ok::<_, TransactionError>(())
//! })?;
//! ```

mod context;
mod error;
mod manager;

pub use context::{PendingWrite, Transaction, TransactionMetadata, TransactionState};
pub use error::{TransactionError, TransactionResult};
pub use manager::TransactionManager;
