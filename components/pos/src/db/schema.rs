/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::Connection;
use sql_support::open_database::{ConnectionInitializer, Migration, Result};

const CREATE_SCHEMA_SQL: &str = include_str!("../../sql/create_schema.sql");
const CREATE_TRIGGERS_SQL: &str = include_str!("../../sql/create_triggers.sql");

pub struct PosConnectionInitializer;

impl ConnectionInitializer for PosConnectionInitializer {
    const NAME: &'static str = "pos db";

    fn prepare(&self, conn: &Connection) -> Result<()> {
        let initial_pragmas = "
            -- use in-memory storage for temp tables
            PRAGMA temp_store = 2;
            -- crash-safe write-ahead logging
            PRAGMA journal_mode = WAL;
            -- the tiered schema leans on these being enforced
            PRAGMA foreign_keys = ON;
        ";
        conn.execute_batch(initial_pragmas)?;
        conn.set_prepared_statement_cache_capacity(128);
        Ok(())
    }

    fn migrations(&self) -> &[Migration] {
        MIGRATIONS
    }
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "create_initial_schema",
        run: create_initial_schema,
    },
    Migration {
        name: "create_immutability_triggers",
        run: create_immutability_triggers,
    },
];

fn create_initial_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_SCHEMA_SQL)?;
    Ok(())
}

fn create_immutability_triggers(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TRIGGERS_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test::new_mem_db;

    #[test]
    fn test_create_schema_twice() {
        let db = new_mem_db();
        // Every statement is IF NOT EXISTS, so re-running is harmless even
        // though the migration registry would normally prevent it.
        db.execute_batch(CREATE_SCHEMA_SQL)
            .expect("should allow running main schema creation twice");
        db.execute_batch(CREATE_TRIGGERS_SQL)
            .expect("should allow running trigger creation twice");
    }

    #[test]
    fn test_foreign_keys_are_on() {
        let db = new_mem_db();
        let fk: i64 = db
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_all_sync_tables_exist() {
        let db = new_mem_db();
        for table in sync_model::TIER_ORDER {
            let sql = format!("SELECT COUNT(*) FROM {}", table.name());
            let count: i64 = db.query_row(&sql, [], |row| row.get(0)).unwrap();
            assert_eq!(count, 0, "{} should exist and be empty", table);
        }
    }
}
