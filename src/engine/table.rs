//! Committed records of one table, with an index per unique field.

use std::collections::HashMap;

use serde_json::Value;

use crate::engine::conflict::{unique_key, ConflictError};
use crate::storage::{Record, RecordId, TableName};

/// A table's committed state.
///
/// Records keep commit order while the process runs. A table rebuilt by
/// [`Table::from_records`] is ordered by creation time instead, so a record
/// staged early in a long transaction can move ahead of records committed
/// before it. Each unique field maps the canonical form of every non-null
/// value to the single record holding it.
#[derive(Debug, Clone)]
pub struct Table {
    name: TableName,
    unique_fields: Vec<String>,
    records: Vec<Record>,
    positions: HashMap<RecordId, usize>,
    unique_index: HashMap<String, HashMap<String, RecordId>>,
}

impl Table {
    pub fn new(name: TableName, unique_fields: Vec<String>) -> Self {
        let unique_index = unique_fields
            .iter()
            .map(|field| (field.clone(), HashMap::new()))
            .collect();

        Self {
            name,
            unique_fields,
            records: Vec::new(),
            positions: HashMap::new(),
            unique_index,
        }
    }

    /// Rebuild a table from stored records.
    ///
    /// Records are ordered by creation time. Stored data that already breaks
    /// a unique constraint is reported instead of silently indexed.
    pub fn from_records(
        name: TableName,
        unique_fields: Vec<String>,
        mut records: Vec<Record>,
    ) -> Result<Self, ConflictError> {
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut table = Self::new(name, unique_fields);
        for record in records {
            for field in &table.unique_fields {
                if let Some(value) = record.get(field) {
                    if let Some(holder) = table.holder(field, value) {
                        if holder != &record.id {
                            return Err(ConflictError::new(table.name.clone(), field.clone(), value.clone()));
                        }
                    }
                }
            }
            table.apply(record);
        }
        Ok(table)
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    pub fn unique_fields(&self) -> &[String] {
        &self.unique_fields
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.positions.get(id).map(|&pos| &self.records[pos])
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The committed record holding `value` in a unique field.
    pub fn holder(&self, field: &str, value: &Value) -> Option<&RecordId> {
        let key = unique_key(value)?;
        self.unique_index.get(field)?.get(&key)
    }

    /// Insert or replace a committed record, keeping the unique index in step.
    ///
    /// Only called after the conflict detector has cleared the record.
    pub fn apply(&mut self, record: Record) {
        let previous = match self.positions.get(&record.id) {
            Some(&pos) => Some(std::mem::replace(&mut self.records[pos], record.clone())),
            None => {
                self.positions.insert(record.id.clone(), self.records.len());
                self.records.push(record.clone());
                None
            }
        };

        for field in &self.unique_fields {
            let index = self.unique_index.entry(field.clone()).or_default();

            if let Some(old_key) = previous.as_ref().and_then(|r| r.get(field)).and_then(unique_key) {
                if index.get(&old_key) == Some(&record.id) {
                    index.remove(&old_key);
                }
            }
            if let Some(new_key) = record.get(field).and_then(unique_key) {
                index.insert(new_key, record.id.clone());
            }
        }
    }
}
