/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

pub mod audit;
pub mod customers;
pub mod device;
pub mod items;
pub mod jobs;
pub mod ledger;
pub mod models;
pub mod payments;
pub mod schema;
pub mod users;

use crate::error::*;

use once_cell::sync::OnceCell;
use rusqlite::{Connection, OpenFlags};
use sql_support::open_database;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

/// The open device store: one writer connection, WAL mode, foreign keys on.
pub struct PosDb {
    pub writer: Connection,
    device_id: OnceCell<String>,
}

impl PosDb {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        // We always create the read-write connection for an initial open so
        // we can create the schema and/or apply new migrations.
        let flags = OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_READ_WRITE;
        let conn = open_database::open_database_with_flags(
            open_database::DatabaseLocation::File(PathBuf::from(db_path.as_ref())),
            flags,
            &schema::PosConnectionInitializer,
        )?;
        Ok(Self {
            writer: conn,
            device_id: OnceCell::new(),
        })
    }

    /// A shared in-memory database, used by tests; `name` keeps concurrently
    /// open test stores apart.
    pub fn new_memory(name: &str) -> Result<Self> {
        let conn = open_database::open_memory_database(name, &schema::PosConnectionInitializer)?;
        Ok(Self {
            writer: conn,
            device_id: OnceCell::new(),
        })
    }

    /// The identifier of this device: minted on first call for the lifetime
    /// of the store file, cached for the lifetime of this handle.
    pub fn device_id(&self) -> Result<&str> {
        self.device_id
            .get_or_try_init(|| device::get_or_create_device_id(&self.writer))
            .map(String::as_str)
    }
}

impl Deref for PosDb {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.writer
    }
}

impl DerefMut for PosDb {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.writer
    }
}
