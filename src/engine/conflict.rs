//! Commit-time unique constraint checking.
//!
//! Uniqueness is never enforced while writes are staged. When a transaction
//! commits, every record of its write set is checked against the committed
//! tables and against the other records of the same set. The first collision
//! aborts the whole commit.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use thiserror::Error;

use crate::engine::table::Table;
use crate::engine::EngineError;
use crate::storage::{RecordId, TableName, WriteBatch};

/// A unique constraint violation found at commit.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("unique constraint violated: {table}.{field} = {value}")]
pub struct ConflictError {
    pub table: TableName,
    pub field: String,
    pub value: Value,
}

impl ConflictError {
    pub fn new(table: TableName, field: impl Into<String>, value: Value) -> Self {
        Self {
            table,
            field: field.into(),
            value,
        }
    }
}

/// Canonical comparison key for a unique value; `None` for null.
pub(crate) fn unique_key(value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }
    Some(value.to_string())
}

/// Checks one write batch against committed state.
///
/// Records written by the batch release the values they held before, so an
/// update may keep or swap its own unique values.
pub struct ConflictDetector<'a> {
    tables: &'a BTreeMap<TableName, Table>,
    released: HashSet<(TableName, RecordId)>,
    claimed: HashMap<(TableName, String, String), RecordId>,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(tables: &'a BTreeMap<TableName, Table>, batch: &WriteBatch) -> Self {
        let released = batch
            .entries()
            .iter()
            .map(|entry| (entry.table.clone(), entry.record.id.clone()))
            .collect();

        Self {
            tables,
            released,
            claimed: HashMap::new(),
        }
    }

    /// Is `value` free for `excluding_id` in `table.field`?
    ///
    /// Considers values claimed earlier in this batch, then committed
    /// holders that the batch does not rewrite.
    pub fn check_unique(
        &self,
        table: &TableName,
        field: &str,
        value: &Value,
        excluding_id: &RecordId,
    ) -> Result<(), ConflictError> {
        let key = match unique_key(value) {
            Some(key) => key,
            None => return Ok(()),
        };

        let claim = (table.clone(), field.to_string(), key);
        if let Some(holder) = self.claimed.get(&claim) {
            if holder != excluding_id {
                return Err(ConflictError::new(table.clone(), field, value.clone()));
            }
        }

        if let Some(holder) = self.tables.get(table).and_then(|t| t.holder(field, value)) {
            let released = self.released.contains(&(table.clone(), holder.clone()));
            if holder != excluding_id && !released {
                return Err(ConflictError::new(table.clone(), field, value.clone()));
            }
        }

        Ok(())
    }

    /// Check every unique field of every record, in batch order.
    pub fn check_batch(mut self, batch: &WriteBatch) -> Result<(), EngineError> {
        for entry in batch.entries() {
            let table = self
                .tables
                .get(&entry.table)
                .ok_or_else(|| EngineError::UnknownTable(entry.table.clone()))?;

            for field in table.unique_fields() {
                let value = match entry.record.get(field) {
                    Some(value) => value,
                    None => continue,
                };
                self.check_unique(&entry.table, field, value, &entry.record.id)?;

                if let Some(key) = unique_key(value) {
                    self.claimed
                        .insert((entry.table.clone(), field.clone(), key), entry.record.id.clone());
                }
            }
        }
        Ok(())
    }
}
