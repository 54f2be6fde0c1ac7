//! Table schema definitions and validation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::{ColumnDef, Constraint, DataType};
use crate::storage::{InvalidNameError, StorageError, TableName};

/// Table schema definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: TableName,
    pub columns: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TableSchema {
    pub fn new(name: TableName, columns: Vec<ColumnDef>) -> Self {
        Self {
            name,
            columns,
            description: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Columns carrying a unique constraint, in declaration order.
    pub fn unique_fields(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_unique())
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Same columns and constraints, ignoring timestamps.
    pub fn same_definition(&self, other: &TableSchema) -> bool {
        self.name == other.name && self.columns == other.columns
    }

    /// Validate the schema itself.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for col in &self.columns {
            if col.name.is_empty() || col.name.starts_with('_') {
                return Err(SchemaError::ReservedColumn(col.name.clone()));
            }
            if !seen.insert(&col.name) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
            if let Some(default) = col.default_value() {
                col.validate(Some(default))?;
            }
        }

        Ok(())
    }

    /// Validate a row against this schema.
    ///
    /// every column is checked and fields not declared by the schema are rejected
    pub fn validate_row(&self, row: &Value) -> Result<(), SchemaError> {
        let obj = row
            .as_object()
            .ok_or_else(|| SchemaError::InvalidRow("row must be a JSON object".into()))?;

        for key in obj.keys() {
            if self.get_column(key).is_none() {
                return Err(SchemaError::UnknownColumn {
                    table: self.name.clone(),
                    column: key.clone(),
                });
            }
        }

        for col in &self.columns {
            col.validate(obj.get(&col.name))?;
        }

        Ok(())
    }

    /// Apply defaults to a row, returning a new row with defaults filled in.
    pub fn apply_defaults(&self, row: &Value) -> Result<Value, SchemaError> {
        let mut obj: Map<String, Value> = row
            .as_object()
            .cloned()
            .ok_or_else(|| SchemaError::InvalidRow("row must be a JSON object".into()))?;

        for col in &self.columns {
            if obj.get(&col.name).map_or(true, Value::is_null) {
                if let Some(default) = col.default_value() {
                    obj.insert(col.name.clone(), default.clone());
                }
            }
        }

        Ok(Value::Object(obj))
    }
}

/// Schema-related errors.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("column name is reserved: '{0}'")]
    ReservedColumn(String),

    #[error("table {table} has no column '{column}'")]
    UnknownColumn { table: TableName, column: String },

    #[error("column '{column}' expects type {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        found: Value,
    },

    #[error("column '{0}' cannot be null")]
    NullViolation(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("invalid table name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("table already exists with a different definition: {0}")]
    TableExists(TableName),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("stored schema is unreadable: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Builder for creating table schemas.
///
/// ```ignore
/// let accounts = SchemaBuilder::new("accounts")
///     .add_required_column("name", DataType::Text)
///     .add_unique_column("version", DataType::Integer)
///     .build()?;
/// ```
pub struct SchemaBuilder {
    name: String,
    columns: Vec<ColumnDef>,
    description: Option<String>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            description: None,
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a nullable column with just name and type.
    pub fn add_column(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.column(ColumnDef::new(name, data_type))
    }

    /// Add a non-nullable column.
    pub fn add_required_column(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.column(ColumnDef::new(name, data_type).with_constraint(Constraint::NotNull))
    }

    /// Add a column whose non-null values must be unique within the table.
    pub fn add_unique_column(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.column(ColumnDef::new(name, data_type).with_constraint(Constraint::Unique))
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn build(self) -> Result<TableSchema, SchemaError> {
        let mut schema = TableSchema::new(TableName::new(self.name)?, self.columns);
        if let Some(desc) = self.description {
            schema = schema.with_description(desc);
        }
        schema.validate()?;
        Ok(schema)
    }
}
