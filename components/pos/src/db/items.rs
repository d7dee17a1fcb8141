/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::db::models::{Item, NewItemFields, SyncMetadata};
use crate::db::{audit, PosDb};
use crate::error::*;

use rusqlite::Connection;
use serde_json::json;
use sql_support::ConnExt;
use sync_model::SyncStatus;
use types::Timestamp;

pub(crate) const ITEM_COLS: &str = "
    id,
    device_id,
    name,
    sku,
    unit_price,
    stock_qty,
    created_at,
    updated_at,
    sync_status";

pub fn add_item(db: &PosDb, fields: NewItemFields) -> Result<Item> {
    if fields.name.is_empty() {
        return Err(Error::InvalidArgument("item name must not be empty".into()));
    }
    if fields.unit_price.is_negative() {
        return Err(Error::InvalidArgument("unit price must be non-negative".into()));
    }
    let device_id = db.device_id()?.to_string();
    let tx = db.unchecked_transaction()?;
    let item = Item {
        metadata: SyncMetadata::new(&device_id),
        name: fields.name,
        sku: fields.sku,
        unit_price: fields.unit_price,
        stock_qty: fields.stock_qty,
    };
    tx.execute_cached(
        &format!(
            "INSERT INTO items ({cols}) VALUES (
                :id, :device_id, :name, :sku, :unit_price, :stock_qty,
                :created_at, :updated_at, :sync_status
            )",
            cols = ITEM_COLS
        ),
        rusqlite::named_params! {
            ":id": item.metadata.id,
            ":device_id": item.metadata.device_id,
            ":name": item.name,
            ":sku": item.sku,
            ":unit_price": item.unit_price,
            ":stock_qty": item.stock_qty,
            ":created_at": item.metadata.created_at,
            ":updated_at": item.metadata.updated_at,
            ":sync_status": item.metadata.sync_status,
        },
    )?;
    audit::record_event(
        &tx,
        &device_id,
        "items",
        &item.metadata.id,
        "CREATE",
        Some(json!({ "name": item.name })),
    )?;
    tx.commit()?;
    Ok(item)
}

pub fn update_item(db: &PosDb, item: &Item) -> Result<Item> {
    let device_id = db.device_id()?.to_string();
    let tx = db.unchecked_transaction()?;
    let now = Timestamp::now();
    let changed = tx.execute_cached(
        "UPDATE items
         SET name        = :name,
             sku         = :sku,
             unit_price  = :unit_price,
             stock_qty   = :stock_qty,
             updated_at  = :updated_at,
             sync_status = :sync_status
         WHERE id = :id",
        rusqlite::named_params! {
            ":name": item.name,
            ":sku": item.sku,
            ":unit_price": item.unit_price,
            ":stock_qty": item.stock_qty,
            ":updated_at": now,
            ":sync_status": SyncStatus::Pending,
            ":id": item.metadata.id,
        },
    )?;
    if changed == 0 {
        return Err(Error::RefNotFound {
            table: "items",
            id: item.metadata.id.clone(),
        });
    }
    audit::record_event(
        &tx,
        &device_id,
        "items",
        &item.metadata.id,
        "UPDATE",
        Some(json!({ "name": item.name })),
    )?;
    let updated = get_item(&tx, &item.metadata.id)?;
    tx.commit()?;
    Ok(updated)
}

pub fn get_item(conn: &impl ConnExt, id: &str) -> Result<Item> {
    conn.try_query_row(
        &format!("SELECT {cols} FROM items WHERE id = :id", cols = ITEM_COLS),
        rusqlite::named_params! { ":id": id },
        |row| Item::from_row(row).map_err(Error::from),
    )?
    .ok_or_else(|| Error::RefNotFound {
        table: "items",
        id: id.to_string(),
    })
}

pub fn list_items(conn: &impl ConnExt) -> Result<Vec<Item>> {
    conn.query_rows_and_then(
        &format!("SELECT {cols} FROM items ORDER BY name", cols = ITEM_COLS),
        [],
        |row| Item::from_row(row).map_err(Error::from),
    )
}

pub fn exists(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.exists("SELECT 1 FROM items WHERE id = :id", [id])?)
}
