/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Dynamic record payloads. Incoming sync records arrive as open-ended JSON
//! maps; [`Record::parse`] pins one to a synchronized table, validates the
//! shape against the table's column metadata, and strips everything that must
//! not reach a store write (unknown fields, the server-only
//! `server_updated_at`, the local-only `sync_status`).

use crate::table::{Column, ColumnKind, SyncTable};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Value};
use types::{Amount, Timestamp};
use uuid::Uuid;

type JsonMap = Map<String, Value>;

/// Mint a fresh record identifier: a random v4 UUID in its lowercase
/// hyphenated form.
pub fn random_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("{table}: missing required field {field}")]
    MissingField { table: &'static str, field: &'static str },
    #[error("{table}.{field}: {reason}")]
    InvalidField {
        table: &'static str,
        field: &'static str,
        reason: String,
    },
}

/// A validated payload for one row of one synchronized table.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    table: SyncTable,
    fields: JsonMap,
}

impl Record {
    /// Validate `value` as a record of `table`. Unknown fields are tolerated
    /// but dropped; known fields must match their declared kind.
    pub fn parse(table: SyncTable, value: Value) -> Result<Record, RecordError> {
        let incoming = match value {
            Value::Object(map) => map,
            _ => return Err(RecordError::NotAnObject),
        };
        let mut fields = JsonMap::new();
        for column in table.columns() {
            match incoming.get(column.name) {
                None | Some(Value::Null) => {
                    if column.required {
                        return Err(RecordError::MissingField {
                            table: table.name(),
                            field: column.name,
                        });
                    }
                }
                Some(value) => {
                    check_kind(table, column, value)?;
                    fields.insert(column.name.to_string(), value.clone());
                }
            }
        }
        let record = Record { table, fields };
        for field in ["id", "device_id"] {
            if record.text(field).map_or(true, str::is_empty) {
                return Err(RecordError::InvalidField {
                    table: table.name(),
                    field: table.column(field).unwrap().name,
                    reason: "must be a non-empty string".into(),
                });
            }
        }
        Ok(record)
    }

    pub fn table(&self) -> SyncTable {
        self.table
    }

    pub fn fields(&self) -> &JsonMap {
        &self.fields
    }

    pub fn id(&self) -> &str {
        self.text("id").unwrap_or_default()
    }

    pub fn device_id(&self) -> &str {
        self.text("device_id").unwrap_or_default()
    }

    pub fn created_at(&self) -> Timestamp {
        self.timestamp("created_at").unwrap_or_default()
    }

    pub fn updated_at(&self) -> Timestamp {
        self.timestamp("updated_at").unwrap_or_default()
    }

    fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    fn timestamp(&self, field: &str) -> Option<Timestamp> {
        parse_timestamp(self.fields.get(field)?)
    }

    /// The value to bind for `column` in an INSERT/UPDATE against the typed
    /// store. Missing optional fields bind NULL.
    pub fn sql_value(&self, column: &Column) -> SqlValue {
        match self.fields.get(column.name) {
            None | Some(Value::Null) => SqlValue::Null,
            Some(value) => wire_to_sql(column.kind, value),
        }
    }

    pub fn into_wire(self) -> Value {
        Value::Object(self.fields)
    }
}

fn check_kind(table: SyncTable, column: &Column, value: &Value) -> Result<(), RecordError> {
    let ok = match column.kind {
        ColumnKind::Text => value.is_string(),
        ColumnKind::Integer => value.is_i64() || value.is_u64(),
        ColumnKind::Timestamp => parse_timestamp(value).is_some(),
        ColumnKind::Amount => value.is_number(),
        // Anything serializes; objects are most common but a pre-serialized
        // string is accepted too.
        ColumnKind::Json => true,
    };
    if ok {
        Ok(())
    } else {
        Err(RecordError::InvalidField {
            table: table.name(),
            field: column.name,
            reason: format!("expected {:?}, got {}", column.kind, value),
        })
    }
}

fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::String(s) => Timestamp::from_rfc3339(s),
        Value::Number(n) => n.as_u64().map(Timestamp),
        _ => None,
    }
}

/// Convert one wire value into the storage representation for its column.
pub fn wire_to_sql(kind: ColumnKind, value: &Value) -> SqlValue {
    match (kind, value) {
        (_, Value::Null) => SqlValue::Null,
        (ColumnKind::Text, Value::String(s)) => SqlValue::Text(s.clone()),
        (ColumnKind::Integer, Value::Number(n)) => {
            n.as_i64().map(SqlValue::Integer).unwrap_or(SqlValue::Null)
        }
        (ColumnKind::Timestamp, v) => parse_timestamp(v)
            .map(|ts| SqlValue::Integer(ts.as_millis_i64()))
            .unwrap_or(SqlValue::Null),
        (ColumnKind::Amount, Value::Number(n)) => n
            .as_f64()
            .and_then(Amount::from_f64)
            .map(|a| SqlValue::Integer(a.as_cents()))
            .unwrap_or(SqlValue::Null),
        (ColumnKind::Json, Value::String(s)) => SqlValue::Text(s.clone()),
        (ColumnKind::Json, v) => SqlValue::Text(v.to_string()),
        // Validation rejects these shapes before a write can see them.
        (_, v) => SqlValue::Text(v.to_string()),
    }
}

/// Convert one storage value back into its wire form.
pub fn sql_to_wire(kind: ColumnKind, value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => match kind {
            ColumnKind::Timestamp => Value::String(Timestamp(i.max(0) as u64).to_rfc3339()),
            ColumnKind::Amount => serde_json::Number::from_f64(Amount(i).as_f64())
                .map(Value::Number)
                .unwrap_or(Value::Null),
            _ => Value::Number(i.into()),
        },
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => {
            let s = String::from_utf8_lossy(bytes).into_owned();
            match kind {
                ColumnKind::Json => serde_json::from_str(&s).unwrap_or(Value::String(s)),
                _ => Value::String(s),
            }
        }
        ValueRef::Blob(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn customer_json() -> Value {
        json!({
            "id": "5f0c3f9a-8a5d-4f4e-9c56-0a0d4f9a7e21",
            "device_id": "d7b8f3f0-1111-4f4e-9c56-0a0d4f9a7e21",
            "name": "Ada's Bakery",
            "phone": "555-0101",
            "outstanding_balance": 120.50,
            "created_at": "2024-01-01T10:00:00Z",
            "updated_at": "2024-01-02T10:00:00Z",
        })
    }

    #[test]
    fn test_parse_valid() {
        let record = Record::parse(SyncTable::Customers, customer_json()).unwrap();
        assert_eq!(record.id(), "5f0c3f9a-8a5d-4f4e-9c56-0a0d4f9a7e21");
        assert_eq!(
            record.updated_at(),
            Timestamp::from_rfc3339("2024-01-02T10:00:00Z").unwrap()
        );
        assert!(record.created_at() < record.updated_at());
    }

    #[test]
    fn test_parse_strips_server_and_local_fields() {
        let mut value = customer_json();
        let obj = value.as_object_mut().unwrap();
        obj.insert("server_updated_at".into(), json!("2024-01-03T00:00:00Z"));
        obj.insert("sync_status".into(), json!("SYNCED"));
        obj.insert("some_future_field".into(), json!(42));
        let record = Record::parse(SyncTable::Customers, value).unwrap();
        assert!(record.fields().get("server_updated_at").is_none());
        assert!(record.fields().get("sync_status").is_none());
        assert!(record.fields().get("some_future_field").is_none());
    }

    #[test]
    fn test_parse_missing_required() {
        let mut value = customer_json();
        value.as_object_mut().unwrap().remove("name");
        assert_eq!(
            Record::parse(SyncTable::Customers, value),
            Err(RecordError::MissingField {
                table: "customers",
                field: "name"
            })
        );
    }

    #[test]
    fn test_parse_rejects_empty_identity() {
        let mut value = customer_json();
        value.as_object_mut().unwrap().insert("device_id".into(), json!(""));
        assert!(matches!(
            Record::parse(SyncTable::Customers, value),
            Err(RecordError::InvalidField { field: "device_id", .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_kind() {
        let mut value = customer_json();
        value.as_object_mut().unwrap().insert("name".into(), json!(17));
        assert!(matches!(
            Record::parse(SyncTable::Customers, value),
            Err(RecordError::InvalidField { field: "name", .. })
        ));
    }

    #[test]
    fn test_codec_round_trip() {
        let record = Record::parse(SyncTable::Customers, customer_json()).unwrap();
        let balance_col = SyncTable::Customers.column("outstanding_balance").unwrap();
        assert_eq!(record.sql_value(balance_col), SqlValue::Integer(12050));
        let updated_col = SyncTable::Customers.column("updated_at").unwrap();
        let ms = Timestamp::from_rfc3339("2024-01-02T10:00:00Z").unwrap().as_millis_i64();
        assert_eq!(record.sql_value(updated_col), SqlValue::Integer(ms));

        // and back out to the wire
        assert_eq!(
            sql_to_wire(ColumnKind::Amount, ValueRef::Integer(12050)),
            json!(120.5)
        );
        assert_eq!(
            sql_to_wire(ColumnKind::Timestamp, ValueRef::Integer(ms)),
            json!("2024-01-02T10:00:00.000Z")
        );
    }

    #[test]
    fn test_random_id_shape() {
        let id = random_id();
        assert_eq!(id.len(), 36);
        assert_eq!(id, id.to_lowercase());
        assert_ne!(id, random_id());
    }
}
