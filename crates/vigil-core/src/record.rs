//! Validated records delivered by the data source.
//!
//! Documents arrive as loosely-typed JSON. They are turned into [`Record`]s
//! exactly once, at the ingestion boundary, so downstream code can rely on
//! a non-empty `id` and typed field accessors instead of probing raw JSON.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

// =============================================================================
// FIELD PATHS
// =============================================================================

/// Dotted path into a record's fields, e.g. `"legion.id"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Parse a dotted path. Empty segments never match a record.
    pub fn new(path: &str) -> Self {
        Self(path.split('.').map(str::to_string).collect())
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True if the path addresses a nested sub-field.
    pub fn is_nested(&self) -> bool {
        self.0.len() > 1
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for FieldPath {
    fn from(path: String) -> Self {
        Self::new(&path)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

// =============================================================================
// RECORD
// =============================================================================

/// A document from one collection.
///
/// The `id` is held outside the field map; serializing a record puts it back
/// under the `"id"` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Record {
    id: String,
    fields: Map<String, Value>,
}

impl Record {
    /// Build a record from an id and its fields. An `"id"` entry inside
    /// `fields` is dropped in favour of `id`.
    pub fn new(id: impl Into<String>, mut fields: Map<String, Value>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidRecord("record id must not be empty".into()));
        }
        fields.remove("id");
        Ok(Self { id, fields })
    }

    /// Validate a raw JSON document. It must be an object carrying a
    /// non-empty string `id`.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Error::InvalidRecord("document is not an object".into()));
        };
        let id = match fields.remove("id") {
            Some(Value::String(id)) => id,
            Some(other) => {
                return Err(Error::InvalidRecord(format!(
                    "id must be a string, got {other}"
                )))
            }
            None => return Err(Error::InvalidRecord("document has no id".into())),
        };
        Self::new(id, fields)
    }

    /// Record id, unique within its collection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All fields except `id`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Look up a possibly nested field.
    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let mut current = self.fields.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// String value of a field, if present and a string.
    pub fn str_field(&self, path: &FieldPath) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Numeric value of a field. Numeric strings are accepted.
    pub fn number_field(&self, path: &FieldPath) -> Option<f64> {
        match self.get(path)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    /// Timestamp value of a field; `None` when absent or unparseable.
    pub fn timestamp(&self, path: &FieldPath) -> Option<DateTime<Utc>> {
        self.get(path).and_then(parse_timestamp)
    }
}

impl TryFrom<Value> for Record {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_json(value)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        let mut fields = record.fields;
        fields.insert("id".to_string(), Value::String(record.id));
        Value::Object(fields)
    }
}

/// Interpret a JSON value as a UTC timestamp.
///
/// Accepted shapes:
/// - RFC 3339 strings (`"2026-03-01T10:00:00Z"`)
/// - plain dates (`"2026-03-01"`, midnight UTC)
/// - epoch milliseconds (`1772359200000`)
/// - `{ "seconds": n, "nanoseconds": n }` objects
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        }
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::Object(obj) => {
            let seconds = obj.get("seconds")?.as_i64()?;
            let nanos = obj
                .get("nanoseconds")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            DateTime::from_timestamp(seconds, u32::try_from(nanos).ok()?)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_json(value).unwrap()
    }

    #[test]
    fn test_from_json_requires_object() {
        let err = Record::from_json(json!([1, 2])).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
    }

    #[test]
    fn test_from_json_requires_string_id() {
        assert!(Record::from_json(json!({"plate": "ABC"})).is_err());
        assert!(Record::from_json(json!({"id": 7})).is_err());
        assert!(Record::from_json(json!({"id": "  "})).is_err());
    }

    #[test]
    fn test_id_removed_from_fields() {
        let r = record(json!({"id": "v1", "plate": "ABC123"}));
        assert_eq!(r.id(), "v1");
        assert!(r.fields().get("id").is_none());
        assert_eq!(r.str_field(&"plate".into()), Some("ABC123"));
    }

    #[test]
    fn test_nested_get() {
        let r = record(json!({"id": "v1", "legion": {"id": "north", "name": "North"}}));
        assert_eq!(r.str_field(&"legion.id".into()), Some("north"));
        assert!(r.get(&"legion.missing".into()).is_none());
        assert!(r.get(&"plate.inner".into()).is_none());
    }

    #[test]
    fn test_number_field_accepts_numeric_strings() {
        let r = record(json!({"id": "r1", "amount": "250.5", "bad": "abc", "n": 3}));
        assert_eq!(r.number_field(&"amount".into()), Some(250.5));
        assert_eq!(r.number_field(&"n".into()), Some(3.0));
        assert_eq!(r.number_field(&"bad".into()), None);
    }

    #[test]
    fn test_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let r = record(json!({
            "id": "c1",
            "rfc": "2026-03-01T10:00:00Z",
            "millis": expected.timestamp_millis(),
            "object": {"seconds": expected.timestamp(), "nanoseconds": 0},
            "date": "2026-03-01",
            "junk": "yesterday",
            "flag": true,
        }));
        assert_eq!(r.timestamp(&"rfc".into()), Some(expected));
        assert_eq!(r.timestamp(&"millis".into()), Some(expected));
        assert_eq!(r.timestamp(&"object".into()), Some(expected));
        assert_eq!(
            r.timestamp(&"date".into()),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(r.timestamp(&"junk".into()), None);
        assert_eq!(r.timestamp(&"flag".into()), None);
        assert_eq!(r.timestamp(&"absent".into()), None);
    }

    #[test]
    fn test_serde_round_trip_restores_id() {
        let r = record(json!({"id": "v9", "make": "Toyota"}));
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value, json!({"id": "v9", "make": "Toyota"}));
        let back: Record = serde_json::from_value(value).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_deserialize_rejects_invalid_document() {
        let result: std::result::Result<Record, _> = serde_json::from_value(json!({"make": "x"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_field_path_display() {
        let path = FieldPath::new("legion.id");
        assert!(path.is_nested());
        assert_eq!(path.to_string(), "legion.id");
        assert!(!FieldPath::new("status").is_nested());
    }
}
