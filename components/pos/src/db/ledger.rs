/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The double-entry ledger writer. Rows are insert-only (enforced by store
//! triggers); corrections are new ADJUSTMENT rows referencing the original.
//! Each row carries a running balance computed at write time over the same
//! customer's entries in `(created_at, id)` order, or over the global cash
//! ledger (customer absent) for shop-level money movement.

use crate::db::models::{LedgerEntry, NewExpenseFields, SyncMetadata};
use crate::db::{audit, customers, PosDb};
use crate::error::*;

use rusqlite::Connection;
use serde_json::json;
use sql_support::ConnExt;
use sync_model::EntryType;
use types::{Amount, Timestamp};

pub(crate) const LEDGER_COLS: &str = "
    id,
    device_id,
    entry_type,
    reference_type,
    reference_id,
    customer_id,
    debit,
    credit,
    balance,
    note,
    created_at,
    updated_at,
    sync_status";

/// What a financial mutation asks the ledger to record. `reference` names
/// the primary row this entry was written for, e.g. `("jobs", job_id)`.
#[derive(Debug, Clone, Default)]
pub struct NewLedgerEntry {
    pub entry_type: Option<EntryType>,
    pub reference: Option<(String, String)>,
    pub customer_id: Option<String>,
    pub debit: Amount,
    pub credit: Amount,
    pub note: Option<String>,
}

/// Append one entry, computing its running balance. The caller supplies the
/// transactional scope; this never opens its own.
pub fn add_entry(conn: &Connection, device_id: &str, entry: NewLedgerEntry) -> Result<LedgerEntry> {
    let entry_type = entry
        .entry_type
        .ok_or_else(|| Error::InvalidArgument("ledger entry needs an entry_type".into()))?;
    if entry.debit.is_negative() || entry.credit.is_negative() {
        return Err(Error::InvalidArgument(
            "ledger debit and credit must be non-negative".into(),
        ));
    }
    let previous = last_balance(conn, entry.customer_id.as_deref())?;
    let balance = previous + entry.debit - entry.credit;
    let (reference_type, reference_id) = match &entry.reference {
        Some((t, id)) => (Some(t.as_str()), Some(id.as_str())),
        None => (None, None),
    };
    let row = LedgerEntry {
        metadata: SyncMetadata::new(device_id),
        entry_type,
        reference_type: reference_type.map(str::to_string),
        reference_id: reference_id.map(str::to_string),
        customer_id: entry.customer_id.clone(),
        debit: entry.debit,
        credit: entry.credit,
        balance,
        note: entry.note.clone(),
    };
    conn.execute_cached(
        &format!(
            "INSERT INTO ledger_entries ({cols}) VALUES (
                :id, :device_id, :entry_type, :reference_type, :reference_id,
                :customer_id, :debit, :credit, :balance, :note,
                :created_at, :updated_at, :sync_status
            )",
            cols = LEDGER_COLS
        ),
        rusqlite::named_params! {
            ":id": row.metadata.id,
            ":device_id": row.metadata.device_id,
            ":entry_type": row.entry_type,
            ":reference_type": row.reference_type,
            ":reference_id": row.reference_id,
            ":customer_id": row.customer_id,
            ":debit": row.debit,
            ":credit": row.credit,
            ":balance": row.balance,
            ":note": row.note,
            ":created_at": row.metadata.created_at,
            ":updated_at": row.metadata.updated_at,
            ":sync_status": row.metadata.sync_status,
        },
    )?;
    Ok(row)
}

/// The balance of the most recent entry on a customer's ledger (or the
/// global cash ledger), in `(created_at, id)` order.
fn last_balance(conn: &Connection, customer_id: Option<&str>) -> Result<Amount> {
    let balance = match customer_id {
        Some(id) => conn.try_query_row(
            "SELECT balance FROM ledger_entries
             WHERE customer_id = :customer_id
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            rusqlite::named_params! { ":customer_id": id },
            |row| row.get::<_, Amount>(0).map_err(Error::from),
        )?,
        None => conn.try_query_row(
            "SELECT balance FROM ledger_entries
             WHERE customer_id IS NULL
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            [],
            |row| row.get::<_, Amount>(0).map_err(Error::from),
        )?,
    };
    Ok(balance.unwrap_or(Amount::ZERO))
}

/// Net position of a ledger: sum of debits minus sum of credits.
pub fn ledger_total(conn: &impl ConnExt, customer_id: Option<&str>) -> Result<Amount> {
    let cents: i64 = match customer_id {
        Some(id) => conn.query_row_and_then_cached(
            "SELECT COALESCE(SUM(debit) - SUM(credit), 0) FROM ledger_entries
             WHERE customer_id = :customer_id",
            rusqlite::named_params! { ":customer_id": id },
            |row| row.get(0).map_err(Error::from),
        )?,
        None => conn.query_row_and_then_cached(
            "SELECT COALESCE(SUM(debit) - SUM(credit), 0) FROM ledger_entries
             WHERE customer_id IS NULL",
            [],
            |row| row.get(0).map_err(Error::from),
        )?,
    };
    Ok(Amount::from_cents(cents))
}

pub fn get_entry(conn: &impl ConnExt, id: &str) -> Result<LedgerEntry> {
    conn.try_query_row(
        &format!(
            "SELECT {cols} FROM ledger_entries WHERE id = :id",
            cols = LEDGER_COLS
        ),
        rusqlite::named_params! { ":id": id },
        |row| LedgerEntry::from_row(row).map_err(Error::from),
    )?
    .ok_or_else(|| Error::RefNotFound {
        table: "ledger_entries",
        id: id.to_string(),
    })
}

pub fn entries_for_customer(conn: &impl ConnExt, customer_id: &str) -> Result<Vec<LedgerEntry>> {
    conn.query_rows_and_then(
        &format!(
            "SELECT {cols} FROM ledger_entries
             WHERE customer_id = :customer_id
             ORDER BY created_at, id",
            cols = LEDGER_COLS
        ),
        rusqlite::named_params! { ":customer_id": customer_id },
        |row| LedgerEntry::from_row(row).map_err(Error::from),
    )
}

/// Record a shop-level expense against the global cash ledger. The ledger
/// row *is* the primary row of this mutation; it commits atomically with its
/// audit row.
pub fn record_expense(db: &PosDb, fields: NewExpenseFields) -> Result<LedgerEntry> {
    if fields.amount.is_negative() || fields.amount == Amount::ZERO {
        return Err(Error::InvalidArgument("expense amount must be positive".into()));
    }
    let device_id = db.device_id()?.to_string();
    let tx = db.unchecked_transaction()?;
    let entry = add_entry(
        &tx,
        &device_id,
        NewLedgerEntry {
            entry_type: Some(EntryType::ExpenseRecorded),
            customer_id: None,
            credit: fields.amount,
            note: fields.note.clone(),
            ..NewLedgerEntry::default()
        },
    )?;
    audit::record_event(
        &tx,
        &device_id,
        "ledger_entries",
        &entry.metadata.id,
        "CREATE",
        Some(json!({ "entry_type": "EXPENSE_RECORDED", "amount": fields.amount })),
    )?;
    tx.commit()?;
    Ok(entry)
}

/// Correct an existing entry with a new ADJUSTMENT row referencing it. The
/// original is never touched.
pub fn add_adjustment(
    db: &PosDb,
    original_id: &str,
    debit: Amount,
    credit: Amount,
    note: Option<String>,
) -> Result<LedgerEntry> {
    let device_id = db.device_id()?.to_string();
    let tx = db.unchecked_transaction()?;
    let original = get_entry(&tx, original_id)?;
    let entry = add_entry(
        &tx,
        &device_id,
        NewLedgerEntry {
            entry_type: Some(EntryType::Adjustment),
            reference: Some(("ledger_entries".into(), original.metadata.id.clone())),
            customer_id: original.customer_id.clone(),
            debit,
            credit,
            note,
        },
    )?;
    audit::record_event(
        &tx,
        &device_id,
        "ledger_entries",
        &entry.metadata.id,
        "CREATE",
        Some(json!({ "entry_type": "ADJUSTMENT", "adjusts": original.metadata.id })),
    )?;
    if let Some(customer_id) = &original.customer_id {
        customers::recompute_balance(&tx, customer_id, Timestamp::now())?;
    }
    tx.commit()?;
    Ok(entry)
}
