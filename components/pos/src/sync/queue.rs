/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The durable dependency queue. Tier order guarantees prerequisites within
//! one device's data, but two devices can originate related rows
//! concurrently - a payment can land here before its customer. Rather than
//! reorder globally, such rows are parked in `sync_queue` and retried, with
//! a bounded number of attempts and an optional ask to the server for the
//! missing rows themselves.

use crate::config::SyncConfig;
use crate::error::*;
use crate::sync::incoming::{self, ApplyOutcome};
use crate::sync::transport::SyncTransport;

use rusqlite::Connection;
use serde::Serialize;
use sql_support::ConnExt;
use std::collections::HashMap;
use std::time::Duration;
use sync_model::{QueueStatus, Record, SyncTable, TIER_ORDER};
use types::Timestamp;

/// Completed items older than this are purged.
pub const COMPLETED_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub queue_id: i64,
    pub table: SyncTable,
    pub record_id: String,
    pub payload: String,
    pub missing_refs: HashMap<String, Vec<String>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: QueueStatus,
    pub created_at: Timestamp,
    pub last_retry_at: Option<Timestamp>,
}

impl QueueItem {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self> {
        let table_name: String = row.get("table_name")?;
        let table = SyncTable::from_name(&table_name).ok_or_else(|| {
            Error::InvalidArgument(format!("queue holds unknown table {table_name}"))
        })?;
        let missing_json: String = row.get("missing_refs")?;
        Ok(Self {
            queue_id: row.get("queue_id")?,
            table,
            record_id: row.get("record_id")?,
            payload: row.get("payload")?,
            missing_refs: serde_json::from_str(&missing_json).unwrap_or_default(),
            retry_count: row.get("retry_count")?,
            max_retries: row.get("max_retries")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            last_retry_at: row.get("last_retry_at")?,
        })
    }

    /// Re-validate the stored payload into a record.
    pub fn record(&self) -> Result<Record> {
        Ok(Record::parse(self.table, serde_json::from_str(&self.payload)?)?)
    }

    /// An item becomes eligible again once its exponential backoff interval
    /// has elapsed; fresh items are eligible immediately.
    fn is_due(&self, now: Timestamp, config: &SyncConfig) -> bool {
        match self.last_retry_at {
            None => true,
            Some(last) => {
                let wait = config.backoff_for(self.retry_count.saturating_sub(1));
                now.duration_since(last).map_or(false, |aged| aged >= wait)
            }
        }
    }
}

/// Park a record whose references are absent. Re-enqueuing the same
/// `(table, record id)` is idempotent: it bumps the retry count and
/// refreshes the stored payload and missing-ref map.
pub fn enqueue(
    conn: &Connection,
    record: &Record,
    missing: &HashMap<String, Vec<String>>,
    config: &SyncConfig,
) -> Result<()> {
    conn.execute_cached(
        "INSERT INTO sync_queue (
            table_name, record_id, payload, missing_refs,
            retry_count, max_retries, status, created_at
        ) VALUES (
            :table_name, :record_id, :payload, :missing_refs,
            0, :max_retries, 'PENDING', :created_at
        )
        ON CONFLICT (table_name, record_id) DO UPDATE SET
            payload      = excluded.payload,
            missing_refs = excluded.missing_refs,
            retry_count  = retry_count + 1,
            status       = 'PENDING'",
        rusqlite::named_params! {
            ":table_name": record.table().name(),
            ":record_id": record.id(),
            ":payload": serde_json::to_string(record.fields())?,
            ":missing_refs": serde_json::to_string(missing)?,
            ":max_retries": config.max_retries,
            ":created_at": Timestamp::now(),
        },
    )?;
    Ok(())
}

/// What one resolution pass over the queue accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub completed: usize,
    pub failed: usize,
    pub still_waiting: usize,
    pub dependencies_fetched: usize,
}

/// Walk the queue in tier order, inserting every record whose references
/// have arrived. When a transport is given, missing rows are requested from
/// the server's dependency-fetch endpoint; rows inserted that way can
/// resolve further items, so the walk repeats until it stops making
/// progress. Items that exhaust `max_retries` are marked FAILED and counted
/// for the operator.
pub fn process(
    conn: &Connection,
    transport: Option<&dyn SyncTransport>,
    config: &SyncConfig,
) -> Result<QueueSummary> {
    let mut summary = QueueSummary::default();
    loop {
        let mut progressed = false;
        for table in TIER_ORDER {
            let now = Timestamp::now();
            for item in pending_items_for(conn, table)? {
                if !item.is_due(now, config) {
                    continue;
                }
                set_status(conn, item.queue_id, QueueStatus::Processing, None)?;
                match try_resolve(conn, transport, &item, &mut summary) {
                    Ok(true) => {
                        set_status(conn, item.queue_id, QueueStatus::Completed, Some(now))?;
                        summary.completed += 1;
                        progressed = true;
                    }
                    Ok(false) => {
                        retry_or_fail(conn, &item, now, &mut summary)?;
                    }
                    Err(e) => {
                        log::warn!(
                            "queue item {}/{} errored: {}",
                            item.table,
                            item.record_id,
                            e
                        );
                        retry_or_fail(conn, &item, now, &mut summary)?;
                    }
                }
            }
        }
        if !progressed {
            break;
        }
    }
    summary.still_waiting = count_with_status(conn, QueueStatus::Pending)?;
    Ok(summary)
}

/// Attempt one item: fetch absent prerequisites if we can, then insert.
fn try_resolve(
    conn: &Connection,
    transport: Option<&dyn SyncTransport>,
    item: &QueueItem,
    summary: &mut QueueSummary,
) -> Result<bool> {
    let record = item.record()?;
    let mut missing = incoming::missing_refs(conn, &record)?;
    if !missing.is_empty() {
        if let Some(transport) = transport {
            summary.dependencies_fetched += fetch_missing(conn, transport, &missing)?;
            missing = incoming::missing_refs(conn, &record)?;
        }
    }
    if !missing.is_empty() {
        update_missing_refs(conn, item.queue_id, &missing)?;
        return Ok(false);
    }
    match incoming::apply_incoming(conn, &record)? {
        ApplyOutcome::Deferred { missing } => {
            update_missing_refs(conn, item.queue_id, &missing)?;
            Ok(false)
        }
        _ => Ok(true),
    }
}

/// Pull the named missing rows (and whatever they depend on) from the
/// server and apply them tier-ascending. Returns how many rows landed.
fn fetch_missing(
    conn: &Connection,
    transport: &dyn SyncTransport,
    missing: &HashMap<String, Vec<String>>,
) -> Result<usize> {
    let mut inserted = 0;
    for (table_name, ids) in missing {
        let table = match SyncTable::from_name(table_name) {
            Some(table) => table,
            None => continue,
        };
        let response = transport.fetch_dependencies(table, ids)?;
        // Apply in tier order so fetched rows satisfy each other.
        for dep_table in TIER_ORDER {
            let Some(rows) = response.dependencies.get(dep_table.name()) else {
                continue;
            };
            for row in rows {
                let record = match Record::parse(dep_table, row.clone()) {
                    Ok(record) => record,
                    Err(e) => {
                        log::warn!("dependency fetch returned bad {} row: {}", dep_table, e);
                        continue;
                    }
                };
                match incoming::apply_incoming(conn, &record)? {
                    ApplyOutcome::Inserted | ApplyOutcome::Updated => inserted += 1,
                    _ => {}
                }
            }
        }
    }
    Ok(inserted)
}

fn retry_or_fail(
    conn: &Connection,
    item: &QueueItem,
    now: Timestamp,
    summary: &mut QueueSummary,
) -> Result<()> {
    let attempts = item.retry_count + 1;
    if attempts >= item.max_retries {
        conn.execute_cached(
            "UPDATE sync_queue
             SET retry_count = :retry_count, status = 'FAILED', last_retry_at = :now
             WHERE queue_id = :queue_id",
            rusqlite::named_params! {
                ":retry_count": attempts,
                ":now": now,
                ":queue_id": item.queue_id,
            },
        )?;
        summary.failed += 1;
        log::warn!(
            "queue item {}/{} failed permanently after {} attempts",
            item.table,
            item.record_id,
            attempts
        );
    } else {
        conn.execute_cached(
            "UPDATE sync_queue
             SET retry_count = :retry_count, status = 'PENDING', last_retry_at = :now
             WHERE queue_id = :queue_id",
            rusqlite::named_params! {
                ":retry_count": attempts,
                ":now": now,
                ":queue_id": item.queue_id,
            },
        )?;
    }
    Ok(())
}

fn set_status(
    conn: &Connection,
    queue_id: i64,
    status: QueueStatus,
    retried_at: Option<Timestamp>,
) -> Result<()> {
    conn.execute_cached(
        "UPDATE sync_queue
         SET status = :status,
             last_retry_at = COALESCE(:retried_at, last_retry_at)
         WHERE queue_id = :queue_id",
        rusqlite::named_params! {
            ":status": status,
            ":retried_at": retried_at,
            ":queue_id": queue_id,
        },
    )?;
    Ok(())
}

fn update_missing_refs(
    conn: &Connection,
    queue_id: i64,
    missing: &HashMap<String, Vec<String>>,
) -> Result<()> {
    conn.execute_cached(
        "UPDATE sync_queue SET missing_refs = :missing WHERE queue_id = :queue_id",
        rusqlite::named_params! {
            ":missing": serde_json::to_string(missing)?,
            ":queue_id": queue_id,
        },
    )?;
    Ok(())
}

const ITEM_COLS: &str = "queue_id, table_name, record_id, payload, missing_refs,
    retry_count, max_retries, status, created_at, last_retry_at";

fn pending_items_for(conn: &Connection, table: SyncTable) -> Result<Vec<QueueItem>> {
    conn.query_rows_and_then(
        &format!(
            "SELECT {ITEM_COLS} FROM sync_queue
             WHERE table_name = :table_name AND status = 'PENDING'
             ORDER BY queue_id"
        ),
        rusqlite::named_params! { ":table_name": table.name() },
        |row| QueueItem::from_row(row),
    )
}

/// Items the operator needs to look at (hit `max_retries`).
pub fn failed_items(conn: &Connection) -> Result<Vec<QueueItem>> {
    conn.query_rows_and_then(
        &format!(
            "SELECT {ITEM_COLS} FROM sync_queue
             WHERE status = 'FAILED'
             ORDER BY queue_id"
        ),
        [],
        |row| QueueItem::from_row(row),
    )
}

pub fn count_with_status(conn: &Connection, status: QueueStatus) -> Result<usize> {
    let count: i64 = conn.query_row_and_then_cached(
        "SELECT COUNT(*) FROM sync_queue WHERE status = :status",
        rusqlite::named_params! { ":status": status },
        |row| row.get(0).map_err(Error::from),
    )?;
    Ok(count as usize)
}

/// Drop COMPLETED items that resolved more than the retention window ago.
pub fn purge_completed(conn: &Connection, now: Timestamp) -> Result<usize> {
    let cutoff = now
        .checked_sub(COMPLETED_RETENTION)
        .unwrap_or(Timestamp(0));
    let purged = conn.execute_cached(
        "DELETE FROM sync_queue
         WHERE status = 'COMPLETED'
           AND COALESCE(last_retry_at, created_at) < :cutoff",
        rusqlite::named_params! { ":cutoff": cutoff },
    )?;
    Ok(purged)
}
