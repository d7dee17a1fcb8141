/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The server store and its ingest rules: per-(id, device_id) idempotent
//! upserts with strict last-writer-wins on `updated_at`, append-only ingest
//! for the ledger and audit tables, referential validation with a deferred
//! queue for early arrivals, and `server_updated_at` cursoring for
//! downloads.

use crate::error::*;
use crate::schema::ServerConnectionInitializer;

use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Value};
use sql_support::{open_database, repeat_sql_vars, ConnExt};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;
use sync_model::{
    sql_to_wire, ColumnKind, DependencyFetchResponse, DownloadResponse, FailedRecord,
    HealthResponse, QueuedRecord, Record, SkippedRecord, SyncTable, SyncedRecord, UploadResponse,
    TIER_ORDER,
};
use types::Timestamp;

const DEFERRED_MAX_RETRIES: u32 = 10;

pub struct ServerDb {
    conn: Mutex<Connection>,
    started: Instant,
}

enum UpsertOutcome {
    Applied,
    /// The stored row's `updated_at` is the same or newer.
    SkippedStale,
    /// Append-only table already has this `(id, device_id)`.
    SkippedDuplicate,
}

impl ServerDb {
    pub fn new(path: impl AsRef<Path>) -> ServerResult<Self> {
        let conn = open_database::open_database(path, &ServerConnectionInitializer)?;
        Ok(Self {
            conn: Mutex::new(conn),
            started: Instant::now(),
        })
    }

    pub fn new_memory(name: &str) -> ServerResult<Self> {
        let conn = open_database::open_memory_database(name, &ServerConnectionInitializer)?;
        Ok(Self {
            conn: Mutex::new(conn),
            started: Instant::now(),
        })
    }

    fn table(table_name: &str) -> ServerResult<SyncTable> {
        SyncTable::from_name(table_name)
            .ok_or_else(|| ServerError::UnknownTable(table_name.to_string()))
    }

    /// Ingest one device's batch for one table. Replay-safe: immutable
    /// tables ignore duplicates, mutable tables only move forward in
    /// `updated_at`. Afterwards the deferred queue gets a drain pass, since
    /// this batch may have supplied someone's missing prerequisites.
    pub fn upload(
        &self,
        device_id: &str,
        table_name: &str,
        records: Vec<Value>,
    ) -> ServerResult<UploadResponse> {
        let table = Self::table(table_name)?;
        let conn = self.conn.lock();
        let mut response = UploadResponse::default();
        let tx = conn.unchecked_transaction()?;
        for value in records {
            let record_id = value
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let record = match Record::parse(table, value) {
                Ok(record) => record,
                Err(e) => {
                    response.failed.push(FailedRecord {
                        record_id,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            // Note: the record's own device_id is the server key, not the
            // caller's header. A device re-uploading a row it did not
            // originate is unusual but legal; last-writer-wins decides.
            let missing = missing_refs(&tx, &record)?;
            if !missing.is_empty() {
                enqueue_deferred(&tx, record.device_id(), &record, &missing)?;
                response.queued.push(QueuedRecord { record_id, missing });
                continue;
            }
            match upsert_record(&tx, &record)? {
                UpsertOutcome::Applied => response.synced.push(SyncedRecord { record_id }),
                UpsertOutcome::SkippedStale => response.skipped.push(SkippedRecord {
                    record_id,
                    reason: "older than stored updated_at".to_string(),
                }),
                UpsertOutcome::SkippedDuplicate => response.skipped.push(SkippedRecord {
                    record_id,
                    reason: "duplicate of immutable record".to_string(),
                }),
            }
        }
        tx.commit()?;
        drain_deferred(&conn)?;
        log::debug!(
            "upload from {}: table={} synced={} queued={} skipped={} failed={}",
            device_id,
            table_name,
            response.synced.len(),
            response.queued.len(),
            response.skipped.len(),
            response.failed.len(),
        );
        Ok(response.tally())
    }

    /// Page of records other devices wrote since `since`, ascending by
    /// ingest time. `next_cursor` is the last row's `server_updated_at`.
    pub fn download(
        &self,
        device_id: &str,
        table_name: &str,
        limit: u32,
        since: Option<Timestamp>,
    ) -> ServerResult<DownloadResponse> {
        let table = Self::table(table_name)?;
        let limit = limit.max(1) as usize;
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {cols}, server_updated_at FROM {table}
             WHERE server_updated_at > :since AND device_id != :device_id
             ORDER BY server_updated_at, id
             LIMIT :limit",
            cols = select_cols(table),
            table = table.name(),
        );
        let mut rows: Vec<(Value, Timestamp)> = conn.query_rows_and_then(
            &sql,
            rusqlite::named_params! {
                ":since": since.unwrap_or_default(),
                ":device_id": device_id,
                // over-fetch by one to learn whether more pages exist
                ":limit": (limit + 1) as i64,
            },
            |row| -> ServerResult<(Value, Timestamp)> {
                let wire = row_to_wire(table, row)?;
                let cursor: Timestamp = row.get("server_updated_at")?;
                Ok((wire, cursor))
            },
        )?;
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = rows.last().map(|(_, cursor)| *cursor);
        Ok(DownloadResponse {
            records: rows.into_iter().map(|(wire, _)| wire).collect(),
            has_more,
            next_cursor,
        })
    }

    /// The named rows plus everything they transitively reference, keyed by
    /// table. A client drains its dependency queue with this.
    pub fn fetch_dependencies(
        &self,
        table_name: &str,
        record_ids: &[String],
    ) -> ServerResult<DependencyFetchResponse> {
        let table = Self::table(table_name)?;
        let conn = self.conn.lock();
        let mut response = DependencyFetchResponse::default();
        let mut visited: HashSet<(SyncTable, String)> = HashSet::new();
        let mut work: Vec<(SyncTable, String)> = record_ids
            .iter()
            .map(|id| (table, id.clone()))
            .collect();
        while let Some((table, id)) = work.pop() {
            if !visited.insert((table, id.clone())) {
                continue;
            }
            let sql = format!(
                "SELECT {cols}, server_updated_at FROM {table} WHERE id = :id",
                cols = select_cols(table),
                table = table.name(),
            );
            let rows: Vec<Value> = conn.query_rows_and_then(
                &sql,
                rusqlite::named_params! { ":id": id },
                |row| row_to_wire(table, row),
            )?;
            for wire in rows {
                for fref in table.foreign_refs() {
                    if let Some(ref_id) = wire.get(fref.field).and_then(Value::as_str) {
                        work.push((fref.references, ref_id.to_string()));
                    }
                }
                response
                    .dependencies
                    .entry(table.name().to_string())
                    .or_default()
                    .push(wire);
            }
        }
        Ok(response)
    }

    pub fn health(&self) -> ServerResult<HealthResponse> {
        let conn = self.conn.lock();
        ConnExt::query_one::<i64>(&*conn, "SELECT 1")
            .map_err(|_| ServerError::Unavailable)?;
        Ok(HealthResponse {
            status: "ok".to_string(),
            uptime: self.started.elapsed().as_secs(),
            timestamp: Timestamp::now(),
        })
    }

    /// Deferred items that exhausted their retries; operator tooling reads
    /// these.
    pub fn failed_deferred_count(&self) -> ServerResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row_and_then_cached(
            "SELECT COUNT(*) FROM deferred_records WHERE status = 'FAILED'",
            [],
            |row| row.get(0).map_err(ServerError::from),
        )?;
        Ok(count as usize)
    }
}

fn select_cols(table: SyncTable) -> String {
    table
        .columns()
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Serialize a stored row to wire form. `server_updated_at` rides along so
/// clients can log it; their record validation strips it before any write.
fn row_to_wire(table: SyncTable, row: &rusqlite::Row<'_>) -> ServerResult<Value> {
    let mut map = Map::new();
    for (idx, column) in table.columns().iter().enumerate() {
        let value = sql_to_wire(column.kind, row.get_ref(idx)?);
        if !value.is_null() {
            map.insert(column.name.to_string(), value);
        }
    }
    let cursor = row.get_ref(table.columns().len())?;
    map.insert(
        "server_updated_at".to_string(),
        sql_to_wire(ColumnKind::Timestamp, cursor),
    );
    Ok(Value::Object(map))
}

/// Ingest timestamps must be strictly increasing for the download cursor to
/// be exact, so the wall clock is bumped past the previously issued value
/// when several ingests land in the same millisecond.
fn next_server_timestamp(conn: &Connection) -> ServerResult<Timestamp> {
    let last: i64 = conn
        .try_query_row(
            "SELECT value FROM server_meta WHERE key = 'last_server_ts'",
            [],
            |row| -> ServerResult<String> { row.get(0).map_err(ServerError::from) },
        )?
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0);
    let next = Timestamp::now().as_millis_i64().max(last + 1);
    conn.execute_cached(
        "INSERT OR REPLACE INTO server_meta (key, value) VALUES ('last_server_ts', :value)",
        rusqlite::named_params! { ":value": next.to_string() },
    )?;
    Ok(Timestamp(next as u64))
}

/// Does any device's row with this id exist in `table`? References are by
/// bare id: whichever origin supplied the row satisfies the prerequisite.
fn record_exists(conn: &Connection, table: SyncTable, id: &str) -> ServerResult<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = :id", table.name());
    Ok(conn.exists(&sql, rusqlite::named_params! { ":id": id })?)
}

fn missing_refs(
    conn: &Connection,
    record: &Record,
) -> ServerResult<HashMap<String, Vec<String>>> {
    let mut missing: HashMap<String, Vec<String>> = HashMap::new();
    for fref in record.table().foreign_refs() {
        let id = match record.fields().get(fref.field).and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id,
            _ => continue,
        };
        if !record_exists(conn, fref.references, id)? {
            missing
                .entry(fref.references.name().to_string())
                .or_default()
                .push(id.to_string());
        }
    }
    Ok(missing)
}

fn upsert_record(conn: &Connection, record: &Record) -> ServerResult<UpsertOutcome> {
    let table = record.table();
    let columns = table.columns();
    let names: Vec<&str> = columns.iter().map(|c| c.name).collect();
    let server_updated_at = next_server_timestamp(conn)?;
    let mut params: Vec<SqlValue> = columns.iter().map(|c| record.sql_value(c)).collect();
    params.push(SqlValue::Integer(server_updated_at.as_millis_i64()));
    if table.is_append_only() {
        let sql = format!(
            "INSERT OR IGNORE INTO {table} ({cols}, server_updated_at)
             VALUES ({vars}, ?)",
            table = table.name(),
            cols = names.join(", "),
            vars = repeat_sql_vars(columns.len()),
        );
        let changed = conn.execute(&sql, params_from_iter(params))?;
        return Ok(if changed == 1 {
            UpsertOutcome::Applied
        } else {
            UpsertOutcome::SkippedDuplicate
        });
    }
    let assignments: Vec<String> = names
        .iter()
        .filter(|name| **name != "id" && **name != "device_id")
        .map(|name| format!("{name} = excluded.{name}"))
        .collect();
    let sql = format!(
        "INSERT INTO {table} ({cols}, server_updated_at)
         VALUES ({vars}, ?)
         ON CONFLICT (id, device_id) DO UPDATE SET
             {assignments},
             server_updated_at = excluded.server_updated_at
         WHERE excluded.updated_at > updated_at",
        table = table.name(),
        cols = names.join(", "),
        vars = repeat_sql_vars(columns.len()),
        assignments = assignments.join(",\n             "),
    );
    let changed = conn.execute(&sql, params_from_iter(params))?;
    Ok(if changed == 1 {
        UpsertOutcome::Applied
    } else {
        UpsertOutcome::SkippedStale
    })
}

fn enqueue_deferred(
    conn: &Connection,
    device_id: &str,
    record: &Record,
    missing: &HashMap<String, Vec<String>>,
) -> ServerResult<()> {
    conn.execute_cached(
        "INSERT INTO deferred_records (
            table_name, record_id, device_id, payload, missing_refs,
            retry_count, max_retries, status, created_at
        ) VALUES (
            :table_name, :record_id, :device_id, :payload, :missing_refs,
            0, :max_retries, 'PENDING', :created_at
        )
        ON CONFLICT (table_name, record_id, device_id) DO UPDATE SET
            payload      = excluded.payload,
            missing_refs = excluded.missing_refs,
            retry_count  = retry_count + 1,
            status       = 'PENDING'",
        rusqlite::named_params! {
            ":table_name": record.table().name(),
            ":record_id": record.id(),
            ":device_id": device_id,
            ":payload": serde_json::to_string(record.fields())?,
            ":missing_refs": serde_json::to_string(missing)?,
            ":max_retries": DEFERRED_MAX_RETRIES,
            ":created_at": Timestamp::now(),
        },
    )?;
    Ok(())
}

/// Walk the deferred queue in tier order and ingest everything whose
/// references have arrived; an attempt against still-missing references
/// consumes one retry. Runs after every upload batch, since that is exactly
/// when prerequisites appear.
fn drain_deferred(conn: &Connection) -> ServerResult<usize> {
    let mut completed = 0;
    loop {
        let mut progressed = false;
        for table in TIER_ORDER {
            let pending: Vec<(i64, String, u32, u32)> = conn.query_rows_and_then(
                "SELECT queue_id, payload, retry_count, max_retries
                 FROM deferred_records
                 WHERE table_name = :table_name AND status = 'PENDING'
                 ORDER BY queue_id",
                rusqlite::named_params! { ":table_name": table.name() },
                |row| -> ServerResult<(i64, String, u32, u32)> {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                },
            )?;
            for (queue_id, payload, retry_count, max_retries) in pending {
                let parsed: ServerResult<Record> = serde_json::from_str(&payload)
                    .map_err(ServerError::from)
                    .and_then(|value: Value| {
                        Record::parse(table, value)
                            .map_err(|e| ServerError::BadRequest(e.to_string()))
                    });
                let record = match parsed {
                    Ok(record) => record,
                    Err(e) => {
                        log::warn!("dropping undecodable deferred record: {}", e);
                        mark_deferred(conn, queue_id, "FAILED", retry_count)?;
                        continue;
                    }
                };
                if missing_refs(conn, &record)?.is_empty() {
                    upsert_record(conn, &record)?;
                    mark_deferred(conn, queue_id, "COMPLETED", retry_count)?;
                    completed += 1;
                    progressed = true;
                } else {
                    let attempts = retry_count + 1;
                    let status = if attempts >= max_retries {
                        "FAILED"
                    } else {
                        "PENDING"
                    };
                    mark_deferred(conn, queue_id, status, attempts)?;
                }
            }
        }
        if !progressed {
            break;
        }
    }
    Ok(completed)
}

fn mark_deferred(
    conn: &Connection,
    queue_id: i64,
    status: &str,
    retry_count: u32,
) -> ServerResult<()> {
    conn.execute_cached(
        "UPDATE deferred_records
         SET status = :status, retry_count = :retry_count, last_retry_at = :now
         WHERE queue_id = :queue_id",
        rusqlite::named_params! {
            ":status": status,
            ":retry_count": retry_count,
            ":now": Timestamp::now(),
            ":queue_id": queue_id,
        },
    )?;
    Ok(())
}
