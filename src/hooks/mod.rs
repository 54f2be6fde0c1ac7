//! Post-write hooks.
//!
//! Hooks are plain callbacks registered per (table, event) in a
//! [`HookRegistry`] and owned by the database. They run synchronously in the
//! writing thread, after the record is staged and before the transaction
//! commits, so anything they write commits or rolls back with it.

mod dispatcher;
mod registry;

pub use dispatcher::{HookDepthExceeded, HookDispatcher, HookError};
pub use registry::{HookContext, HookEvent, HookFailure, HookRegistry, HookResult, RegisteredHook};
