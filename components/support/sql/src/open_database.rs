/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Use this module to open a new SQLite database connection.
//!
//! The code handles some common cases:
//!
//!   - Opening new databases. If this is the first time opening the database,
//!     every migration runs against the empty file.
//!
//!   - Migrating existing databases. The applied migrations are recorded by
//!     name in a single-column `schema_migrations` registry; on open, any
//!     migration not yet in the registry runs inside its own transaction and
//!     is then recorded.
//!
//! Each migration is expected to be idempotent so that a crash between a
//! migration committing and the process dying never wedges the store.

use crate::ConnExt;
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Something went wrong inside a migration body. Return this from an
    /// upgrade function to signal that the database is beyond repair.
    #[error("MigrationError: {0}")]
    MigrationError(String),
    /// Error with the migration list itself, e.g. duplicate names.
    #[error("MigrationLogicError: {0}")]
    MigrationLogicError(String),
    #[error("Error executing SQL: {0}")]
    SqlError(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub type MigrationFunc = fn(&Connection) -> Result<()>;

/// One named, idempotent schema step.
#[derive(Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    pub run: MigrationFunc,
}

/// Implemented by each component that owns a database file.
pub trait ConnectionInitializer {
    /// Name to display in the logs.
    const NAME: &'static str;

    /// Runs immediately after the connection opens, outside any transaction.
    /// Pragmas (journal mode, foreign keys) belong here.
    fn prepare(&self, _conn: &Connection) -> Result<()> {
        Ok(())
    }

    /// The linear migration log, oldest first. Names must be unique; applied
    /// names are recorded and skipped on subsequent opens.
    fn migrations(&self) -> &[Migration];

    /// Runs after all migrations, on every open. Temp tables and triggers
    /// that must exist per-connection belong here.
    fn finish(&self, _conn: &Connection) -> Result<()> {
        Ok(())
    }
}

pub enum DatabaseLocation {
    File(PathBuf),
    Memory(String),
}

impl DatabaseLocation {
    fn open(&self, open_flags: OpenFlags) -> Result<Connection> {
        match self {
            DatabaseLocation::Memory(name) => {
                let uri = format!("file:{}?mode=memory&cache=shared", name);
                Ok(Connection::open_with_flags(
                    uri,
                    open_flags | OpenFlags::SQLITE_OPEN_URI,
                )?)
            }
            DatabaseLocation::File(path) => Ok(Connection::open_with_flags(path, open_flags)?),
        }
    }
}

pub fn open_database<CI: ConnectionInitializer>(
    path: impl AsRef<Path>,
    initializer: &CI,
) -> Result<Connection> {
    open_database_with_flags(
        DatabaseLocation::File(path.as_ref().to_owned()),
        OpenFlags::default(),
        initializer,
    )
}

pub fn open_memory_database<CI: ConnectionInitializer>(
    name: &str,
    initializer: &CI,
) -> Result<Connection> {
    open_database_with_flags(
        DatabaseLocation::Memory(name.to_owned()),
        OpenFlags::default(),
        initializer,
    )
}

pub fn open_database_with_flags<CI: ConnectionInitializer>(
    location: DatabaseLocation,
    open_flags: OpenFlags,
    initializer: &CI,
) -> Result<Connection> {
    sanity_check_migrations(initializer.migrations())?;

    log::debug!("{}: opening database", CI::NAME);
    let conn = location.open(open_flags)?;
    log::debug!("{}: preparing", CI::NAME);
    initializer.prepare(&conn)?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY
        ) WITHOUT ROWID;",
    )?;
    let applied: HashSet<String> = conn
        .query_column("SELECT name FROM schema_migrations", [])?
        .into_iter()
        .collect();

    for migration in initializer.migrations() {
        if applied.contains(migration.name) {
            continue;
        }
        log::debug!("{}: applying migration {}", CI::NAME, migration.name);
        let tx = crate::UncheckedTransaction::new(&conn, TransactionBehavior::Immediate)?;
        (migration.run)(&tx)?;
        tx.execute_cached(
            "INSERT INTO schema_migrations (name) VALUES (?1)",
            [migration.name],
        )?;
        tx.commit()?;
    }

    log::debug!("{}: finishing database open", CI::NAME);
    initializer.finish(&conn)?;
    log::debug!("{}: database open successful", CI::NAME);
    Ok(conn)
}

fn sanity_check_migrations(migrations: &[Migration]) -> Result<()> {
    let mut seen = HashSet::new();
    for migration in migrations {
        if !seen.insert(migration.name) {
            return Err(Error::MigrationLogicError(format!(
                "Duplicate migration name: {}",
                migration.name
            )));
        }
    }
    Ok(())
}

/// It would be nice for this to be #[cfg(test)], but that doesn't allow it to
/// be used in tests for our other crates.
pub mod test_utils {
    use super::*;
    use tempfile::TempDir;

    /// Database file that we can programmatically re-open to prove migrations
    /// always run against a freshly opened DB, like they would in the real
    /// world.
    pub struct MigratedDatabaseFile<CI> {
        // Keep around a TempDir to ensure the database file stays around
        // until this struct is dropped.
        _tempdir: TempDir,
        pub initializer: CI,
        pub path: PathBuf,
    }

    impl<CI: ConnectionInitializer> MigratedDatabaseFile<CI> {
        pub fn new(initializer: CI) -> Self {
            let tempdir = tempfile::tempdir().unwrap();
            let path = tempdir.path().join("db.sql");
            Self {
                _tempdir: tempdir,
                initializer,
                path,
            }
        }

        pub fn open(&self) -> Connection {
            open_database(&self.path, &self.initializer).unwrap()
        }
    }
}
