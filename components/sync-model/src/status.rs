/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Result as RusqliteResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local-only lifecycle of a synchronized row. Never transmitted as
/// authoritative state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SYNCED")]
    Synced,
    #[serde(rename = "FAILED")]
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(SyncStatus::Pending),
            "SYNCED" => Some(SyncStatus::Synced),
            "FAILED" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for SyncStatus {
    fn to_sql(&self) -> RusqliteResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SyncStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        SyncStatus::from_str(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

/// Lifecycle of a dependency-queue item (client side and server side alike).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Processing => "PROCESSING",
            QueueStatus::Completed => "COMPLETED",
            QueueStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(QueueStatus::Pending),
            "PROCESSING" => Some(QueueStatus::Processing),
            "COMPLETED" => Some(QueueStatus::Completed),
            "FAILED" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for QueueStatus {
    fn to_sql(&self) -> RusqliteResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for QueueStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        QueueStatus::from_str(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

/// The kinds of double-entry ledger rows the engine writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    #[serde(rename = "JOB_CREATED")]
    JobCreated,
    #[serde(rename = "PAYMENT_RECEIVED")]
    PaymentReceived,
    #[serde(rename = "PAYMENT_MADE")]
    PaymentMade,
    #[serde(rename = "EXPENSE_RECORDED")]
    ExpenseRecorded,
    #[serde(rename = "ADJUSTMENT")]
    Adjustment,
    #[serde(rename = "OPENING_BALANCE")]
    OpeningBalance,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::JobCreated => "JOB_CREATED",
            EntryType::PaymentReceived => "PAYMENT_RECEIVED",
            EntryType::PaymentMade => "PAYMENT_MADE",
            EntryType::ExpenseRecorded => "EXPENSE_RECORDED",
            EntryType::Adjustment => "ADJUSTMENT",
            EntryType::OpeningBalance => "OPENING_BALANCE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "JOB_CREATED" => Some(EntryType::JobCreated),
            "PAYMENT_RECEIVED" => Some(EntryType::PaymentReceived),
            "PAYMENT_MADE" => Some(EntryType::PaymentMade),
            "EXPENSE_RECORDED" => Some(EntryType::ExpenseRecorded),
            "ADJUSTMENT" => Some(EntryType::Adjustment),
            "OPENING_BALANCE" => Some(EntryType::OpeningBalance),
            _ => None,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for EntryType {
    fn to_sql(&self) -> RusqliteResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EntryType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        EntryType::from_str(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips() {
        for s in [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Failed] {
            assert_eq!(SyncStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(SyncStatus::from_str("synced"), None);
    }

    #[test]
    fn test_entry_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&EntryType::PaymentReceived).unwrap(),
            "\"PAYMENT_RECEIVED\""
        );
        assert_eq!(
            serde_json::from_str::<EntryType>("\"OPENING_BALANCE\"").unwrap(),
            EntryType::OpeningBalance
        );
    }
}
