/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::db::models::{NewUserFields, SyncMetadata, User};
use crate::db::{audit, PosDb};
use crate::error::*;

use serde_json::json;
use sql_support::ConnExt;
use sync_model::SyncStatus;
use types::Timestamp;

pub(crate) const USER_COLS: &str = "
    id,
    device_id,
    username,
    display_name,
    role,
    created_at,
    updated_at,
    sync_status";

pub fn add_user(db: &PosDb, fields: NewUserFields) -> Result<User> {
    if fields.username.is_empty() {
        return Err(Error::InvalidArgument("username must not be empty".into()));
    }
    let device_id = db.device_id()?.to_string();
    let tx = db.unchecked_transaction()?;
    let user = User {
        metadata: SyncMetadata::new(&device_id),
        username: fields.username,
        display_name: fields.display_name,
        role: fields.role,
    };
    tx.execute_cached(
        &format!(
            "INSERT INTO users ({cols}) VALUES (
                :id, :device_id, :username, :display_name, :role,
                :created_at, :updated_at, :sync_status
            )",
            cols = USER_COLS
        ),
        rusqlite::named_params! {
            ":id": user.metadata.id,
            ":device_id": user.metadata.device_id,
            ":username": user.username,
            ":display_name": user.display_name,
            ":role": user.role,
            ":created_at": user.metadata.created_at,
            ":updated_at": user.metadata.updated_at,
            ":sync_status": user.metadata.sync_status,
        },
    )?;
    audit::record_event(
        &tx,
        &device_id,
        "users",
        &user.metadata.id,
        "CREATE",
        Some(json!({ "username": user.username })),
    )?;
    tx.commit()?;
    Ok(user)
}

pub fn update_user(db: &PosDb, user: &User) -> Result<User> {
    let device_id = db.device_id()?.to_string();
    let tx = db.unchecked_transaction()?;
    let now = Timestamp::now();
    let changed = tx.execute_cached(
        "UPDATE users
         SET username     = :username,
             display_name = :display_name,
             role         = :role,
             updated_at   = :updated_at,
             sync_status  = :sync_status
         WHERE id = :id",
        rusqlite::named_params! {
            ":username": user.username,
            ":display_name": user.display_name,
            ":role": user.role,
            ":updated_at": now,
            ":sync_status": SyncStatus::Pending,
            ":id": user.metadata.id,
        },
    )?;
    if changed == 0 {
        return Err(Error::RefNotFound {
            table: "users",
            id: user.metadata.id.clone(),
        });
    }
    audit::record_event(
        &tx,
        &device_id,
        "users",
        &user.metadata.id,
        "UPDATE",
        Some(json!({ "username": user.username })),
    )?;
    let updated = get_user(&tx, &user.metadata.id)?;
    tx.commit()?;
    Ok(updated)
}

pub fn get_user(conn: &impl ConnExt, id: &str) -> Result<User> {
    conn.try_query_row(
        &format!("SELECT {cols} FROM users WHERE id = :id", cols = USER_COLS),
        rusqlite::named_params! { ":id": id },
        |row| User::from_row(row).map_err(Error::from),
    )?
    .ok_or_else(|| Error::RefNotFound {
        table: "users",
        id: id.to_string(),
    })
}

pub fn list_users(conn: &impl ConnExt) -> Result<Vec<User>> {
    conn.query_rows_and_then(
        &format!(
            "SELECT {cols} FROM users ORDER BY username",
            cols = USER_COLS
        ),
        [],
        |row| User::from_row(row).map_err(Error::from),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test::new_mem_db;

    #[test]
    fn test_add_and_update_user() {
        let db = new_mem_db();
        let user = add_user(
            &db,
            NewUserFields {
                username: "amara".into(),
                display_name: Some("Amara N.".into()),
                role: "owner".into(),
            },
        )
        .unwrap();
        assert_eq!(user.metadata.sync_status, SyncStatus::Pending);
        assert_eq!(user.metadata.device_id, db.device_id().unwrap());

        let mut edited = user.clone();
        edited.role = "staff".into();
        let updated = update_user(&db, &edited).unwrap();
        assert_eq!(updated.role, "staff");
        // id, device_id and created_at survive updates untouched.
        assert_eq!(updated.metadata.id, user.metadata.id);
        assert_eq!(updated.metadata.device_id, user.metadata.device_id);
        assert_eq!(updated.metadata.created_at, user.metadata.created_at);
        assert!(updated.metadata.updated_at >= user.metadata.updated_at);
    }

    #[test]
    fn test_update_missing_user() {
        let db = new_mem_db();
        let user = User {
            metadata: crate::db::models::SyncMetadata::new("nowhere"),
            username: "ghost".into(),
            display_name: None,
            role: "staff".into(),
        };
        assert!(matches!(
            update_user(&db, &user),
            Err(Error::RefNotFound { table: "users", .. })
        ));
    }
}
