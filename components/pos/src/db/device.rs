/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::error::*;
use rusqlite::Connection;
use sql_support::ConnExt;

const DEVICE_ID_KEY: &str = "device_id";

/// Read the device identifier, minting and persisting a fresh one on the
/// very first call for this store file. The identifier never changes after
/// that; every row this device originates is stamped with it.
pub fn get_or_create_device_id(conn: &Connection) -> Result<String> {
    if let Some(id) = peek_device_id(conn)? {
        return Ok(id);
    }
    let id = sync_model::random_id();
    // INSERT OR IGNORE so a concurrent writer racing us keeps its value; we
    // re-read rather than assume ours won.
    conn.execute_cached(
        "INSERT OR IGNORE INTO meta (key, value) VALUES (:key, :value)",
        rusqlite::named_params! { ":key": DEVICE_ID_KEY, ":value": id },
    )?;
    let id = peek_device_id(conn)?.ok_or(Error::NotInitialized)?;
    log::info!("device initialized as {}", id);
    Ok(id)
}

/// The stored identifier, if one has been minted.
pub fn peek_device_id(conn: &Connection) -> Result<Option<String>> {
    conn.try_query_row(
        "SELECT value FROM meta WHERE key = :key",
        rusqlite::named_params! { ":key": DEVICE_ID_KEY },
        |row| row.get::<_, String>(0).map_err(Error::from),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test::new_mem_db;

    #[test]
    fn test_device_id_is_stable() {
        let db = new_mem_db();
        assert!(peek_device_id(&db).unwrap().is_none());
        let first = get_or_create_device_id(&db).unwrap();
        assert_eq!(first.len(), 36);
        let second = get_or_create_device_id(&db).unwrap();
        assert_eq!(first, second);
        assert_eq!(peek_device_id(&db).unwrap(), Some(first));
    }

    #[test]
    fn test_handle_caches() {
        let db = new_mem_db();
        let id = db.device_id().unwrap().to_string();
        assert_eq!(db.device_id().unwrap(), id);
    }
}
