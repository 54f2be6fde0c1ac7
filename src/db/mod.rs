//! High-level Database API.
//!
//! [`Database`] ties the catalog, the table store, the transaction manager
//! and the hook dispatcher together behind one cloneable handle.

mod api;

pub use api::{Database, DatabaseConfig, DatabaseError, DatabaseResult, DatabaseStats};
