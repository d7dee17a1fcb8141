/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Non-mutating helpers over the sync metadata: enumerate what is pending,
//! move sets of rows through the status lifecycle, and aggregate counts for
//! the statistics surface the operator sees.

use crate::error::*;

use rusqlite::Connection;
use serde_json::{Map, Value};
use sql_support::{each_chunk, repeat_sql_vars, ConnExt};
use sync_model::{sql_to_wire, SyncStatus, SyncTable, TIER_ORDER};

/// One cell of the per-table, per-status statistics grid.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SyncCount {
    pub table: &'static str,
    pub status: SyncStatus,
    pub count: u32,
}

fn select_cols(table: SyncTable) -> String {
    table
        .columns()
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read up to `limit` PENDING rows of `table` in wire form, oldest edit
/// first so a capped batch drains fairly.
pub fn pending_rows(conn: &Connection, table: SyncTable, limit: u32) -> Result<Vec<Value>> {
    let sql = format!(
        "SELECT {cols} FROM {table}
         WHERE sync_status = 'PENDING'
         ORDER BY updated_at, id
         LIMIT :limit",
        cols = select_cols(table),
        table = table.name(),
    );
    conn.query_rows_and_then(&sql, rusqlite::named_params! { ":limit": limit }, |row| {
        let mut map = Map::new();
        for (idx, column) in table.columns().iter().enumerate() {
            let value = sql_to_wire(column.kind, row.get_ref(idx)?);
            if !value.is_null() {
                map.insert(column.name.to_string(), value);
            }
        }
        Ok(Value::Object(map))
    })
}

/// Bulk-transition rows to `status`, chunked to stay under the bind-variable
/// limit. Returns how many rows actually moved.
pub fn set_sync_status(
    conn: &Connection,
    table: SyncTable,
    ids: &[String],
    status: SyncStatus,
) -> Result<usize> {
    let mut changed = 0;
    each_chunk(ids, |chunk, _| -> Result<()> {
        let sql = format!(
            "UPDATE {table} SET sync_status = '{status}'
             WHERE id IN ({vars})",
            table = table.name(),
            status = status.as_str(),
            vars = repeat_sql_vars(chunk.len()),
        );
        changed += conn.execute(&sql, chunk)?;
        Ok(())
    })?;
    Ok(changed)
}

/// Put FAILED rows back into PENDING so the next sync retries them. With no
/// table given, every synchronized table is reset.
pub fn reset_failed(conn: &Connection, table: Option<SyncTable>) -> Result<usize> {
    let tables: &[SyncTable] = match &table {
        Some(t) => std::slice::from_ref(t),
        None => &TIER_ORDER,
    };
    let mut changed = 0;
    for table in tables {
        let sql = format!(
            "UPDATE {} SET sync_status = 'PENDING' WHERE sync_status = 'FAILED'",
            table.name()
        );
        changed += conn.execute(&sql, [])?;
    }
    Ok(changed)
}

/// Row counts per table per status; zero cells are skipped.
pub fn sync_counts(conn: &Connection) -> Result<Vec<SyncCount>> {
    let mut counts = Vec::new();
    for table in TIER_ORDER {
        let sql = format!(
            "SELECT sync_status, COUNT(*) FROM {} GROUP BY sync_status",
            table.name()
        );
        let rows: Vec<(SyncStatus, u32)> =
            conn.query_rows_and_then(&sql, [], |row| -> Result<(SyncStatus, u32)> {
                Ok((row.get(0)?, row.get(1)?))
            })?;
        for (status, count) in rows {
            counts.push(SyncCount {
                table: table.name(),
                status,
                count,
            });
        }
    }
    Ok(counts)
}

/// Total rows still waiting to reach the server.
pub fn pending_total(conn: &Connection) -> Result<u32> {
    Ok(sync_counts(conn)?
        .into_iter()
        .filter(|c| c.status == SyncStatus::Pending)
        .map(|c| c.count)
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewCustomerFields;
    use crate::db::test::new_mem_db;
    use crate::db::{customers, PosDb};

    fn add_customers(db: &PosDb, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                customers::add_customer(
                    db,
                    NewCustomerFields {
                        name: format!("customer {}", i),
                        ..NewCustomerFields::default()
                    },
                )
                .unwrap()
                .metadata
                .id
            })
            .collect()
    }

    #[test]
    fn test_pending_rows_wire_shape() {
        let db = new_mem_db();
        add_customers(&db, 2);
        let rows = pending_rows(&db.writer, SyncTable::Customers, 10).unwrap();
        assert_eq!(rows.len(), 2);
        let first = rows[0].as_object().unwrap();
        assert!(first.contains_key("id"));
        assert!(first.contains_key("device_id"));
        // Wire timestamps are strings, not integer millis.
        assert!(first["created_at"].is_string());
        // Local-only state never crosses the wire.
        assert!(!first.contains_key("sync_status"));
        // Absent optionals are omitted entirely.
        assert!(!first.contains_key("phone"));
    }

    #[test]
    fn test_pending_rows_respects_limit() {
        let db = new_mem_db();
        add_customers(&db, 5);
        let rows = pending_rows(&db.writer, SyncTable::Customers, 3).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_status_transitions_and_counts() {
        let db = new_mem_db();
        let ids = add_customers(&db, 3);
        let moved =
            set_sync_status(&db.writer, SyncTable::Customers, &ids[..2], SyncStatus::Synced)
                .unwrap();
        assert_eq!(moved, 2);
        let moved = set_sync_status(
            &db.writer,
            SyncTable::Customers,
            &ids[2..],
            SyncStatus::Failed,
        )
        .unwrap();
        assert_eq!(moved, 1);

        let counts = sync_counts(&db.writer).unwrap();
        let of = |status: SyncStatus| {
            counts
                .iter()
                .find(|c| c.table == "customers" && c.status == status)
                .map(|c| c.count)
                .unwrap_or(0)
        };
        assert_eq!(of(SyncStatus::Synced), 2);
        assert_eq!(of(SyncStatus::Failed), 1);

        // Failed rows return to pending on reset.
        assert_eq!(reset_failed(&db.writer, None).unwrap(), 1);
        assert_eq!(pending_rows(&db.writer, SyncTable::Customers, 10).unwrap().len(), 1);
        // The audit rows from the three creates are still pending too.
        assert!(pending_total(&db.writer).unwrap() >= 4);
    }
}
