/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::db::models::{Customer, NewCustomerFields, SyncMetadata};
use crate::db::{audit, ledger, PosDb};
use crate::error::*;

use rusqlite::Connection;
use serde_json::json;
use sql_support::ConnExt;
use sync_model::{EntryType, SyncStatus};
use types::{Amount, Timestamp};

pub(crate) const CUSTOMER_COLS: &str = "
    id,
    device_id,
    name,
    phone,
    email,
    address,
    opening_balance,
    outstanding_balance,
    created_at,
    updated_at,
    sync_status";

pub fn add_customer(db: &PosDb, fields: NewCustomerFields) -> Result<Customer> {
    if fields.name.is_empty() {
        return Err(Error::InvalidArgument("customer name must not be empty".into()));
    }
    if fields.opening_balance.is_negative() {
        return Err(Error::InvalidArgument(
            "opening balance must be non-negative".into(),
        ));
    }
    let device_id = db.device_id()?.to_string();
    let tx = db.unchecked_transaction()?;
    let customer = Customer {
        metadata: SyncMetadata::new(&device_id),
        name: fields.name,
        phone: fields.phone,
        email: fields.email,
        address: fields.address,
        opening_balance: fields.opening_balance,
        outstanding_balance: Amount::ZERO,
    };
    tx.execute_cached(
        &format!(
            "INSERT INTO customers ({cols}) VALUES (
                :id, :device_id, :name, :phone, :email, :address,
                :opening_balance, :outstanding_balance,
                :created_at, :updated_at, :sync_status
            )",
            cols = CUSTOMER_COLS
        ),
        rusqlite::named_params! {
            ":id": customer.metadata.id,
            ":device_id": customer.metadata.device_id,
            ":name": customer.name,
            ":phone": customer.phone,
            ":email": customer.email,
            ":address": customer.address,
            ":opening_balance": customer.opening_balance,
            ":outstanding_balance": customer.outstanding_balance,
            ":created_at": customer.metadata.created_at,
            ":updated_at": customer.metadata.updated_at,
            ":sync_status": customer.metadata.sync_status,
        },
    )?;
    if customer.opening_balance != Amount::ZERO {
        ledger::add_entry(
            &tx,
            &device_id,
            ledger::NewLedgerEntry {
                entry_type: Some(EntryType::OpeningBalance),
                reference: Some(("customers".into(), customer.metadata.id.clone())),
                customer_id: Some(customer.metadata.id.clone()),
                debit: customer.opening_balance,
                ..ledger::NewLedgerEntry::default()
            },
        )?;
        recompute_balance(&tx, &customer.metadata.id, customer.metadata.updated_at)?;
    }
    audit::record_event(
        &tx,
        &device_id,
        "customers",
        &customer.metadata.id,
        "CREATE",
        Some(json!({ "name": customer.name })),
    )?;
    let created = get_customer(&tx, &customer.metadata.id)?;
    tx.commit()?;
    Ok(created)
}

/// Update a customer's editable fields. The derived `outstanding_balance`
/// (and of course the identity/creation metadata) cannot be set this way.
pub fn update_customer(db: &PosDb, customer: &Customer) -> Result<Customer> {
    let device_id = db.device_id()?.to_string();
    let tx = db.unchecked_transaction()?;
    let now = Timestamp::now();
    let changed = tx.execute_cached(
        "UPDATE customers
         SET name        = :name,
             phone       = :phone,
             email       = :email,
             address     = :address,
             updated_at  = :updated_at,
             sync_status = :sync_status
         WHERE id = :id",
        rusqlite::named_params! {
            ":name": customer.name,
            ":phone": customer.phone,
            ":email": customer.email,
            ":address": customer.address,
            ":updated_at": now,
            ":sync_status": SyncStatus::Pending,
            ":id": customer.metadata.id,
        },
    )?;
    if changed == 0 {
        return Err(Error::RefNotFound {
            table: "customers",
            id: customer.metadata.id.clone(),
        });
    }
    audit::record_event(
        &tx,
        &device_id,
        "customers",
        &customer.metadata.id,
        "UPDATE",
        Some(json!({ "name": customer.name })),
    )?;
    let updated = get_customer(&tx, &customer.metadata.id)?;
    tx.commit()?;
    Ok(updated)
}

pub fn get_customer(conn: &impl ConnExt, id: &str) -> Result<Customer> {
    conn.try_query_row(
        &format!(
            "SELECT {cols} FROM customers WHERE id = :id",
            cols = CUSTOMER_COLS
        ),
        rusqlite::named_params! { ":id": id },
        |row| Customer::from_row(row).map_err(Error::from),
    )?
    .ok_or_else(|| Error::RefNotFound {
        table: "customers",
        id: id.to_string(),
    })
}

pub fn list_customers(conn: &impl ConnExt) -> Result<Vec<Customer>> {
    conn.query_rows_and_then(
        &format!(
            "SELECT {cols} FROM customers ORDER BY name",
            cols = CUSTOMER_COLS
        ),
        [],
        |row| Customer::from_row(row).map_err(Error::from),
    )
}

pub fn exists(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.exists("SELECT 1 FROM customers WHERE id = :id", [id])?)
}

/// Re-derive `outstanding_balance` from the ledger. The ledger is canonical;
/// the stored balance is a materialized view refreshed whenever a mutation
/// in the customer's chain of custody occurs.
pub fn recompute_balance(conn: &Connection, customer_id: &str, now: Timestamp) -> Result<Amount> {
    let balance = ledger::ledger_total(conn, Some(customer_id))?;
    conn.execute_cached(
        "UPDATE customers
         SET outstanding_balance = :balance,
             updated_at          = :updated_at,
             sync_status         = :sync_status
         WHERE id = :id AND outstanding_balance != :balance",
        rusqlite::named_params! {
            ":balance": balance,
            ":updated_at": now,
            ":sync_status": SyncStatus::Pending,
            ":id": customer_id,
        },
    )?;
    Ok(balance)
}

/// Refresh every customer whose stored balance drifted from their ledger.
/// Downloads can land ledger rows after the customer row, so the engine runs
/// this at the end of each download pass.
pub fn recompute_all_balances(conn: &Connection) -> Result<usize> {
    let stale: Vec<String> = conn.query_rows_and_then(
        "SELECT c.id FROM customers c
         WHERE c.outstanding_balance !=
            (SELECT COALESCE(SUM(l.debit) - SUM(l.credit), 0)
             FROM ledger_entries l WHERE l.customer_id = c.id)",
        [],
        |row| row.get::<_, String>(0).map_err(Error::from),
    )?;
    let now = Timestamp::now();
    for id in &stale {
        recompute_balance(conn, id, now)?;
    }
    Ok(stale.len())
}
