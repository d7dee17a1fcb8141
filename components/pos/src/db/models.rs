/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Result as RusqliteResult, Row};
use sync_model::{EntryType, SyncStatus};
use types::{Amount, Timestamp};

/// The five fields every synchronized row carries. `id`, `device_id` and
/// `created_at` are fixed at creation; `updated_at` moves forward on every
/// local mutation; `sync_status` is local-only and never transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMetadata {
    pub id: String,
    pub device_id: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub sync_status: SyncStatus,
}

impl SyncMetadata {
    /// Metadata for a row being created right now on this device.
    pub fn new(device_id: &str) -> Self {
        let now = Timestamp::now();
        Self {
            id: sync_model::random_id(),
            device_id: device_id.to_string(),
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
        }
    }

    pub fn from_row(row: &Row<'_>) -> RusqliteResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            device_id: row.get("device_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            sync_status: row.get("sync_status")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub metadata: SyncMetadata,
    pub username: String,
    pub display_name: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewUserFields {
    pub username: String,
    pub display_name: Option<String>,
    pub role: String,
}

impl User {
    pub fn from_row(row: &Row<'_>) -> RusqliteResult<Self> {
        Ok(Self {
            metadata: SyncMetadata::from_row(row)?,
            username: row.get("username")?,
            display_name: row.get("display_name")?,
            role: row.get("role")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub metadata: SyncMetadata,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub opening_balance: Amount,
    /// Derived from the ledger; never canonical (the ledger is).
    pub outstanding_balance: Amount,
}

#[derive(Debug, Clone, Default)]
pub struct NewCustomerFields {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub opening_balance: Amount,
}

impl Customer {
    pub fn from_row(row: &Row<'_>) -> RusqliteResult<Self> {
        Ok(Self {
            metadata: SyncMetadata::from_row(row)?,
            name: row.get("name")?,
            phone: row.get("phone")?,
            email: row.get("email")?,
            address: row.get("address")?,
            opening_balance: row.get("opening_balance")?,
            outstanding_balance: row.get("outstanding_balance")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub metadata: SyncMetadata,
    pub name: String,
    pub sku: Option<String>,
    pub unit_price: Amount,
    pub stock_qty: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewItemFields {
    pub name: String,
    pub sku: Option<String>,
    pub unit_price: Amount,
    pub stock_qty: Option<i64>,
}

impl Item {
    pub fn from_row(row: &Row<'_>) -> RusqliteResult<Self> {
        Ok(Self {
            metadata: SyncMetadata::from_row(row)?,
            name: row.get("name")?,
            sku: row.get("sku")?,
            unit_price: row.get("unit_price")?,
            stock_qty: row.get("stock_qty")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Open,
    Done,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Open => "OPEN",
            JobStatus::Done => "DONE",
        }
    }
}

impl ToSql for JobStatus {
    fn to_sql(&self) -> RusqliteResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "OPEN" => Ok(JobStatus::Open),
            "DONE" => Ok(JobStatus::Done),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub metadata: SyncMetadata,
    pub customer_id: String,
    pub item_id: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub unit_price: Amount,
    pub total_amount: Amount,
    pub paid_amount: Amount,
    pub job_status: JobStatus,
}

#[derive(Debug, Clone, Default)]
pub struct NewJobFields {
    pub customer_id: String,
    pub item_id: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub unit_price: Amount,
}

impl Job {
    pub fn from_row(row: &Row<'_>) -> RusqliteResult<Self> {
        Ok(Self {
            metadata: SyncMetadata::from_row(row)?,
            customer_id: row.get("customer_id")?,
            item_id: row.get("item_id")?,
            description: row.get("description")?,
            quantity: row.get("quantity")?,
            unit_price: row.get("unit_price")?,
            total_amount: row.get("total_amount")?,
            paid_amount: row.get("paid_amount")?,
            job_status: row.get("job_status")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Transfer => "TRANSFER",
        }
    }
}

impl Default for PaymentMethod {
    fn default() -> Self {
        PaymentMethod::Cash
    }
}

impl ToSql for PaymentMethod {
    fn to_sql(&self) -> RusqliteResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for PaymentMethod {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "CASH" => Ok(PaymentMethod::Cash),
            "CARD" => Ok(PaymentMethod::Card),
            "TRANSFER" => Ok(PaymentMethod::Transfer),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub metadata: SyncMetadata,
    pub customer_id: String,
    pub job_id: Option<String>,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewPaymentFields {
    pub customer_id: String,
    pub job_id: Option<String>,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub note: Option<String>,
}

impl Payment {
    pub fn from_row(row: &Row<'_>) -> RusqliteResult<Self> {
        Ok(Self {
            metadata: SyncMetadata::from_row(row)?,
            customer_id: row.get("customer_id")?,
            job_id: row.get("job_id")?,
            amount: row.get("amount")?,
            method: row.get("method")?,
            note: row.get("note")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub metadata: SyncMetadata,
    pub entry_type: EntryType,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub customer_id: Option<String>,
    pub debit: Amount,
    pub credit: Amount,
    /// Running balance at write time over the same customer's entries (or
    /// the global cash ledger when customer is absent).
    pub balance: Amount,
    pub note: Option<String>,
}

impl LedgerEntry {
    pub fn from_row(row: &Row<'_>) -> RusqliteResult<Self> {
        Ok(Self {
            metadata: SyncMetadata::from_row(row)?,
            entry_type: row.get("entry_type")?,
            reference_type: row.get("reference_type")?,
            reference_id: row.get("reference_id")?,
            customer_id: row.get("customer_id")?,
            debit: row.get("debit")?,
            credit: row.get("credit")?,
            balance: row.get("balance")?,
            note: row.get("note")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub metadata: SyncMetadata,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub details: Option<String>,
}

impl AuditEvent {
    pub fn from_row(row: &Row<'_>) -> RusqliteResult<Self> {
        Ok(Self {
            metadata: SyncMetadata::from_row(row)?,
            entity_type: row.get("entity_type")?,
            entity_id: row.get("entity_id")?,
            action: row.get("action")?,
            details: row.get("details")?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewExpenseFields {
    pub amount: Amount,
    pub note: Option<String>,
}
