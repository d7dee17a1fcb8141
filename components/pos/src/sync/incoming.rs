/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Applying downloaded rows to the local store. The policy is coarse
//! last-writer-wins: a strictly newer `updated_at` overwrites every column
//! except `id`; anything else is a no-op. A foreign-key failure is not an
//! error here - the record is reported as deferred so the caller can park it
//! on the dependency queue.

use crate::error::*;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use sql_support::{repeat_sql_vars, ConnExt};
use std::collections::HashMap;
use sync_model::{Record, SyncStatus};
use types::Timestamp;

/// What applying one incoming record did.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// No local row existed; the record was inserted.
    Inserted,
    /// A strictly older local row was overwritten.
    Updated,
    /// The local row is the same age or newer (or the table is append-only
    /// and already has the row); nothing changed.
    UpToDate,
    /// A foreign key constraint fired; these referenced rows are absent.
    Deferred { missing: HashMap<String, Vec<String>> },
}

/// Apply one validated incoming record. Downloaded rows land as SYNCED; they
/// are the server's copy, not local work awaiting upload.
pub fn apply_incoming(conn: &Connection, record: &Record) -> Result<ApplyOutcome> {
    let table = record.table();
    let local_updated: Option<Timestamp> = conn.try_query_row(
        &format!(
            "SELECT updated_at FROM {} WHERE id = :id",
            table.name()
        ),
        rusqlite::named_params! { ":id": record.id() },
        |row| row.get(0).map_err(Error::from),
    )?;
    match local_updated {
        None => match insert_record(conn, record) {
            Ok(()) => Ok(ApplyOutcome::Inserted),
            Err(err) => defer_on_fk(conn, record, err),
        },
        Some(_) if table.is_append_only() => Ok(ApplyOutcome::UpToDate),
        Some(local) if record.updated_at() > local => match overwrite_record(conn, record) {
            Ok(()) => Ok(ApplyOutcome::Updated),
            Err(err) => defer_on_fk(conn, record, err),
        },
        Some(_) => Ok(ApplyOutcome::UpToDate),
    }
}

fn defer_on_fk(
    conn: &Connection,
    record: &Record,
    err: rusqlite::Error,
) -> Result<ApplyOutcome> {
    if !is_foreign_key_violation(&err) {
        return Err(err.into());
    }
    let missing = missing_refs(conn, record)?;
    log::debug!(
        "deferring {} record {}: missing {:?}",
        record.table(),
        record.id(),
        missing
    );
    Ok(ApplyOutcome::Deferred { missing })
}

fn insert_record(conn: &Connection, record: &Record) -> rusqlite::Result<()> {
    let table = record.table();
    let columns = table.columns();
    let names: Vec<&str> = columns.iter().map(|c| c.name).collect();
    let sql = format!(
        "INSERT INTO {table} ({cols}, sync_status) VALUES ({vars}, ?)",
        table = table.name(),
        cols = names.join(", "),
        vars = repeat_sql_vars(columns.len()),
    );
    let mut params: Vec<SqlValue> = columns.iter().map(|c| record.sql_value(c)).collect();
    params.push(SqlValue::from(SyncStatus::Synced.as_str().to_string()));
    conn.execute(&sql, params_from_iter(params))?;
    Ok(())
}

/// Overwrite every column except `id` with the incoming values.
fn overwrite_record(conn: &Connection, record: &Record) -> rusqlite::Result<()> {
    let table = record.table();
    let columns: Vec<_> = table.columns().iter().filter(|c| c.name != "id").collect();
    let assignments: Vec<String> = columns.iter().map(|c| format!("{} = ?", c.name)).collect();
    let sql = format!(
        "UPDATE {table} SET {assignments}, sync_status = ? WHERE id = ?",
        table = table.name(),
        assignments = assignments.join(", "),
    );
    let mut params: Vec<SqlValue> = columns.iter().map(|c| record.sql_value(c)).collect();
    params.push(SqlValue::from(SyncStatus::Synced.as_str().to_string()));
    params.push(SqlValue::from(record.id().to_string()));
    conn.execute(&sql, params_from_iter(params))?;
    Ok(())
}

/// Which referenced rows the local store does not have yet, keyed by the
/// referenced table's name.
pub fn missing_refs(
    conn: &Connection,
    record: &Record,
) -> Result<HashMap<String, Vec<String>>> {
    let mut missing: HashMap<String, Vec<String>> = HashMap::new();
    for fref in record.table().foreign_refs() {
        let id = match record.fields().get(fref.field).and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => id,
            _ => continue,
        };
        let sql = format!(
            "SELECT 1 FROM {} WHERE id = :id",
            fref.references.name()
        );
        if !conn.exists(&sql, rusqlite::named_params! { ":id": id })? {
            missing
                .entry(fref.references.name().to_string())
                .or_default()
                .push(id.to_string());
        }
    }
    Ok(missing)
}
