/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::Connection;
use sql_support::open_database::{ConnectionInitializer, Migration, Result};

const CREATE_SCHEMA_SQL: &str = include_str!("../sql/create_schema.sql");

pub struct ServerConnectionInitializer;

impl ConnectionInitializer for ServerConnectionInitializer {
    const NAME: &'static str = "pos server db";

    fn prepare(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            PRAGMA temp_store = 2;
            PRAGMA journal_mode = WAL;
            -- referential checks happen in the ingest path, not as sqlite
            -- constraints, so rows can be deferred instead of rejected
            PRAGMA foreign_keys = OFF;
        ",
        )?;
        conn.set_prepared_statement_cache_capacity(128);
        Ok(())
    }

    fn migrations(&self) -> &[Migration] {
        MIGRATIONS
    }
}

const MIGRATIONS: &[Migration] = &[Migration {
    name: "create_server_schema",
    run: create_server_schema,
}];

fn create_server_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_SCHEMA_SQL)?;
    Ok(())
}
