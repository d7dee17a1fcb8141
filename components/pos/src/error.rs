/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use interrupt_support::Interrupted;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The store has not been opened; fatal to the caller.
    #[error("Store is not initialized")]
    NotInitialized,

    /// A second sync was requested while one is running. Wait and retry.
    #[error("A sync operation is already in progress")]
    AlreadyInProgress,

    /// A mutation referenced a row that does not exist locally.
    #[error("No {table} row with id {id}")]
    RefNotFound { table: &'static str, id: String },

    /// The store rejected a write (constraint violation).
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// An update or delete hit the ledger/audit immutability triggers. Never
    /// raised in normal flow; a defensive assertion.
    #[error("Attempted to modify an immutable row: {0}")]
    ImmutableEntry(String),

    /// The transport failed before a response arrived. Retryable.
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The 30-second request deadline expired. Retryable.
    #[error("Request timed out")]
    RequestTimeout,

    /// The server answered non-2xx.
    #[error("Server rejected request ({status}): {message}")]
    ServerRejected { status: u16, message: String },

    /// An incoming record could not be inserted because its references are
    /// absent; it has been placed on the dependency queue, not surfaced.
    #[error("{table} record {record_id} is waiting on missing dependencies")]
    DependencyMissing { table: String, record_id: String },

    /// A dependency-queue item hit `max_retries`; operator attention needed.
    #[error("{table} record {record_id} exhausted its dependency retries")]
    QueueExhausted { table: String, record_id: String },

    #[error("Rejected argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid sync payload: {0}")]
    InvalidRecord(#[from] sync_model::RecordError),

    #[error("Error opening database: {0}")]
    OpenDatabase(#[from] sql_support::open_database::Error),

    #[error("Error executing SQL: {0}")]
    Sql(rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation interrupted")]
    Interrupted(#[from] Interrupted),
}

/// True when the error is sqlite telling us a foreign key constraint fired.
/// The download path uses this to divert a record into the dependency queue
/// instead of failing the sync.
pub fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

fn is_immutability_trigger(err: &rusqlite::Error) -> bool {
    // RAISE(ABORT, ...) from a trigger surfaces as SQLITE_CONSTRAINT_TRIGGER
    // carrying the trigger's message.
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_TRIGGER
                && msg.contains("immutable")
    )
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if is_immutability_trigger(&err) {
            return Error::ImmutableEntry(err.to_string());
        }
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::IntegrityViolation(err.to_string())
            }
            _ => Error::Sql(err),
        }
    }
}
