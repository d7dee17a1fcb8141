/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The append-only audit trail. Every mutation writes one of these inside
//! the same transaction as its primary row; references are textual so the
//! table sits in the last dependency tier.

use crate::db::models::{AuditEvent, SyncMetadata};
use crate::error::*;

use rusqlite::Connection;
use sql_support::ConnExt;

pub(crate) const AUDIT_COLS: &str = "
    id,
    device_id,
    entity_type,
    entity_id,
    action,
    details,
    created_at,
    updated_at,
    sync_status";

/// Append one audit row. The caller supplies the transactional scope; this
/// never opens its own.
pub fn record_event(
    conn: &Connection,
    device_id: &str,
    entity_type: &str,
    entity_id: &str,
    action: &str,
    details: Option<serde_json::Value>,
) -> Result<AuditEvent> {
    let event = AuditEvent {
        metadata: SyncMetadata::new(device_id),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        action: action.to_string(),
        details: details.map(|d| d.to_string()),
    };
    conn.execute_cached(
        &format!(
            "INSERT INTO audit_log ({cols}) VALUES (
                :id, :device_id, :entity_type, :entity_id, :action, :details,
                :created_at, :updated_at, :sync_status
            )",
            cols = AUDIT_COLS
        ),
        rusqlite::named_params! {
            ":id": event.metadata.id,
            ":device_id": event.metadata.device_id,
            ":entity_type": event.entity_type,
            ":entity_id": event.entity_id,
            ":action": event.action,
            ":details": event.details,
            ":created_at": event.metadata.created_at,
            ":updated_at": event.metadata.updated_at,
            ":sync_status": event.metadata.sync_status,
        },
    )?;
    Ok(event)
}

pub fn events_for_entity(
    conn: &impl ConnExt,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<AuditEvent>> {
    conn.query_rows_and_then(
        &format!(
            "SELECT {cols} FROM audit_log
             WHERE entity_type = :entity_type AND entity_id = :entity_id
             ORDER BY created_at, id",
            cols = AUDIT_COLS
        ),
        rusqlite::named_params! { ":entity_type": entity_type, ":entity_id": entity_id },
        |row| AuditEvent::from_row(row).map_err(Error::from),
    )
}
