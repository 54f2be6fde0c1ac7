//! Record representation and its JSON blob format.
//!
//! Each record is stored by the Git backend as a separate JSON file with a
//! consistent layout that carries metadata for version tracking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, RecordId};

/// A stored record: identity, metadata and field values.
///
/// The format written to Git:
/// ```text
/// {
///   "_pk": "01hx...",
///   "_version": 1,
///   "_created_at": "xxxx-xx-xxT00:00:00Z",
///   "_updated_at": "xxxx-xx-xxT00:00:00Z",
///   "name": "abc",
///   "version": 3
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// primary key (matches the filename without `.json`)
    pub id: RecordId,
    /// bumped on every update
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
    /// field values
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// creates a new record at version 1 stamped with the current time
    pub fn new(id: RecordId, fields: BTreeMap<String, Value>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            version: 1,
            created_at: now.clone(),
            updated_at: now,
            fields,
        }
    }

    /// create a new record from a JSON object
    pub fn from_value(id: RecordId, value: Value) -> StorageResult<Self> {
        match value {
            Value::Object(map) => Ok(Self::new(id, map.into_iter().collect())),
            _ => Err(StorageError::CorruptedData {
                path: format!("{}.json", id).into(),
                reason: "record data must be a JSON object".to_string(),
            }),
        }
    }

    /// merge changes into the field map, bumping version and timestamp
    pub fn merge_fields(&mut self, changes: BTreeMap<String, Value>) {
        self.fields.extend(changes);
        self.version += 1;
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }

    /// get a field value by name
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// the field map as a JSON object (for schema validation)
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// internal format for JSON serialization
///
/// uses `_` prefix for metadata fields to avoid clashing with user fields
#[derive(Serialize, Deserialize)]
struct RecordJson {
    #[serde(rename = "_pk")]
    pk: String,
    #[serde(rename = "_version")]
    version: u64,
    #[serde(rename = "_created_at")]
    created_at: String,
    #[serde(rename = "_updated_at")]
    updated_at: String,
    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

/// serialize a record to JSON bytes
///
/// BTreeMap keeps key ordering stable, so identical records hash to the same blob
pub fn serialize_record(record: &Record) -> StorageResult<Vec<u8>> {
    let json = RecordJson {
        pk: record.id.as_str().to_string(),
        version: record.version,
        created_at: record.created_at.clone(),
        updated_at: record.updated_at.clone(),
        fields: record.fields.clone(),
    };

    Ok(serde_json::to_vec_pretty(&json)?)
}

/// deserialize a record from JSON bytes
///
/// validates that the primary key in the JSON matches the expected id
pub fn deserialize_record(bytes: &[u8], expected_id: &RecordId) -> StorageResult<Record> {
    let json: RecordJson = serde_json::from_slice(bytes)?;

    if json.pk != expected_id.as_str() {
        return Err(StorageError::CorruptedData {
            path: format!("{}.json", expected_id).into(),
            reason: format!(
                "primary key mismatch: file name suggests '{}' but content has '{}'",
                expected_id, json.pk
            ),
        });
    }

    Ok(Record {
        id: expected_id.clone(),
        version: json.version,
        created_at: json.created_at,
        updated_at: json.updated_at,
        fields: json.fields,
    })
}

/// write a record as a blob to the repository
pub fn write_blob(repo: &git2::Repository, record: &Record) -> StorageResult<BlobId> {
    let bytes = serialize_record(record)?;
    let oid = repo.blob(&bytes)?;
    Ok(BlobId::new(oid))
}

/// write raw bytes as a blob (schema documents)
pub fn write_raw_blob(repo: &git2::Repository, bytes: &[u8]) -> StorageResult<BlobId> {
    Ok(BlobId::new(repo.blob(bytes)?))
}

/// read a blob's content from the repository
pub fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation() {
        let id = RecordId::new("test123").unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::String("Alice".to_string()));
        fields.insert("version".to_string(), Value::Number(1.into()));

        let record = Record::new(id.clone(), fields);

        assert_eq!(record.id, id);
        assert_eq!(record.version, 1);
        assert_eq!(record.get("name"), Some(&Value::String("Alice".to_string())));
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_serialization_format() {
        let id = RecordId::new("abc").unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("b_field".to_string(), Value::Number(2.into()));
        fields.insert("a_field".to_string(), Value::Number(1.into()));

        let record = Record::new(id, fields);
        let bytes = serialize_record(&record).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed["_pk"], "abc");
        assert_eq!(parsed["_version"], 1);
        assert_eq!(parsed["a_field"], 1);

        let restored = deserialize_record(&bytes, &record.id).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_merge_fields_bumps_version() {
        let mut fields = BTreeMap::new();
        fields.insert("balance".to_string(), Value::Number(10.into()));
        let mut record = Record::new(RecordId::new("r1").unwrap(), fields);

        let mut changes = BTreeMap::new();
        changes.insert("balance".to_string(), Value::Number(20.into()));
        changes.insert("status".to_string(), Value::String("open".into()));
        record.merge_fields(changes);

        assert_eq!(record.version, 2);
        assert_eq!(record.get("balance"), Some(&Value::Number(20.into())));
        assert_eq!(record.get("status"), Some(&Value::String("open".into())));
    }

    #[test]
    fn test_from_value_requires_object() {
        let id = RecordId::new("r1").unwrap();
        assert!(Record::from_value(id.clone(), serde_json::json!({"a": 1})).is_ok());
        assert!(Record::from_value(id, serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_key_mismatch_detection() {
        let record = Record::new(RecordId::new("correct").unwrap(), BTreeMap::new());
        let bytes = serialize_record(&record).unwrap();

        let result = deserialize_record(&bytes, &RecordId::new("wrong").unwrap());
        assert!(matches!(result, Err(StorageError::CorruptedData { .. })));
    }
}
