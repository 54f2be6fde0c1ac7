//! Column types and constraints.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::schema::SchemaError;

/// Value types a column can hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Text,
    /// whole numbers only
    Integer,
    /// any JSON number
    Float,
    Boolean,
    /// JSON objects or arrays.
    Json,
    /// RFC 3339 strings (or naive `%Y-%m-%dT%H:%M:%S`).
    Timestamp,
}

impl DataType {
    /// Whether a non-null value fits the column type.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (DataType::Text, Value::String(_)) => true,
            (DataType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (DataType::Float, Value::Number(_)) => true,
            (DataType::Boolean, Value::Bool(_)) => true,
            (DataType::Json, Value::Object(_) | Value::Array(_)) => true,
            (DataType::Timestamp, Value::String(s)) => {
                chrono::DateTime::parse_from_rfc3339(s).is_ok()
                    || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
            }
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Boolean => "boolean",
            DataType::Json => "json",
            DataType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Column constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    /// Column cannot be null or absent.
    NotNull,
    /// No two committed records of the table may share a non-null value.
    /// Checked when a transaction commits.
    Unique,
    /// Value filled in on insert when the column is absent.
    Default(Value),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::NotNull => write!(f, "not null"),
            Constraint::Unique => write!(f, "unique"),
            Constraint::Default(v) => write!(f, "default {}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn is_nullable(&self) -> bool {
        !self.constraints.contains(&Constraint::NotNull)
    }

    pub fn is_unique(&self) -> bool {
        self.constraints.contains(&Constraint::Unique)
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Default(v) => Some(v),
            _ => None,
        })
    }

    /// Check one field value. An explicit `null` counts as absent.
    pub fn validate(&self, value: Option<&Value>) -> Result<(), SchemaError> {
        match value.filter(|v| !v.is_null()) {
            Some(v) if self.data_type.matches(v) => Ok(()),
            Some(v) => Err(SchemaError::TypeMismatch {
                column: self.name.clone(),
                expected: self.data_type.clone(),
                found: v.clone(),
            }),
            None if self.is_nullable() => Ok(()),
            None => Err(SchemaError::NullViolation(self.name.clone())),
        }
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        for constraint in &self.constraints {
            write!(f, " {}", constraint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_type_matches() {
        assert!(DataType::Text.matches(&json!("hello")));
        assert!(!DataType::Text.matches(&json!(123)));

        assert!(DataType::Integer.matches(&json!(42)));
        assert!(DataType::Integer.matches(&json!(-17)));
        assert!(!DataType::Integer.matches(&json!(2.5)));

        assert!(DataType::Float.matches(&json!(2.5)));
        assert!(DataType::Float.matches(&json!(42)));

        assert!(DataType::Boolean.matches(&json!(true)));
        assert!(!DataType::Boolean.matches(&json!("true")));

        assert!(DataType::Json.matches(&json!({"key": "value"})));
        assert!(DataType::Json.matches(&json!([1, 2, 3])));

        assert!(DataType::Timestamp.matches(&json!("2024-05-01T10:00:00Z")));
        assert!(!DataType::Timestamp.matches(&json!("yesterday")));
    }

    #[test]
    fn test_column_validation() {
        let col = ColumnDef::new("name", DataType::Text).with_constraint(Constraint::NotNull);

        assert!(col.validate(Some(&json!("Alice"))).is_ok());
        assert!(matches!(
            col.validate(Some(&json!(123))),
            Err(SchemaError::TypeMismatch { .. })
        ));
        assert!(matches!(col.validate(None), Err(SchemaError::NullViolation(_))));
        assert!(col.validate(Some(&Value::Null)).is_err());

        let nullable_col = ColumnDef::new("nickname", DataType::Text);
        assert!(nullable_col.validate(None).is_ok());
        assert!(nullable_col.validate(Some(&Value::Null)).is_ok());
    }

    #[test]
    fn test_column_flags() {
        let col = ColumnDef::new("version", DataType::Integer)
            .with_constraint(Constraint::Unique)
            .with_constraint(Constraint::Default(json!(0)));

        assert!(col.is_unique());
        assert!(col.is_nullable());
        assert_eq!(col.default_value(), Some(&json!(0)));
        assert_eq!(col.to_string(), "version integer unique default 0");
    }
}
