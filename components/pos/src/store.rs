/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The public face of the engine: the UI calls these methods and nothing
//! else. A `Store` owns the device's database; clone an `Arc<Store>` into
//! the sync engine so mutations and sync serialize on the same connection.

use crate::db::models::*;
use crate::db::{audit, customers, items, jobs, ledger, payments, users, PosDb};
use crate::error::*;
use crate::sync::{queue, util};

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use types::Amount;

pub struct Store {
    db: Mutex<PosDb>,
}

impl Store {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: Mutex::new(PosDb::new(db_path)?),
        })
    }

    /// A store backed by a named in-memory database; used by tests and the
    /// demo tooling.
    pub fn new_memory(name: &str) -> Result<Self> {
        Ok(Self {
            db: Mutex::new(PosDb::new_memory(name)?),
        })
    }

    /// This device's stable identifier (minted on first call).
    pub fn device_id(&self) -> Result<String> {
        let db = self.db.lock();
        Ok(db.device_id()?.to_string())
    }

    /// Run `f` against the open connection. This is how the sync layer gets
    /// at the store; every access serializes on the one writer.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let db = self.db.lock();
        f(&db.writer)
    }

    // Users ---------------------------------------------------------------

    pub fn add_user(&self, fields: NewUserFields) -> Result<User> {
        users::add_user(&self.db.lock(), fields)
    }

    pub fn update_user(&self, user: &User) -> Result<User> {
        users::update_user(&self.db.lock(), user)
    }

    pub fn get_user(&self, id: &str) -> Result<User> {
        users::get_user(&self.db.lock().writer, id)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        users::list_users(&self.db.lock().writer)
    }

    // Customers -----------------------------------------------------------

    pub fn add_customer(&self, fields: NewCustomerFields) -> Result<Customer> {
        customers::add_customer(&self.db.lock(), fields)
    }

    pub fn update_customer(&self, customer: &Customer) -> Result<Customer> {
        customers::update_customer(&self.db.lock(), customer)
    }

    pub fn get_customer(&self, id: &str) -> Result<Customer> {
        customers::get_customer(&self.db.lock().writer, id)
    }

    pub fn list_customers(&self) -> Result<Vec<Customer>> {
        customers::list_customers(&self.db.lock().writer)
    }

    /// The ledger-derived balance, recomputed on the spot (the stored column
    /// is a cache; this is the authoritative number).
    pub fn customer_balance(&self, id: &str) -> Result<Amount> {
        let db = self.db.lock();
        ledger::ledger_total(&db.writer, Some(id))
    }

    // Items ---------------------------------------------------------------

    pub fn add_item(&self, fields: NewItemFields) -> Result<Item> {
        items::add_item(&self.db.lock(), fields)
    }

    pub fn update_item(&self, item: &Item) -> Result<Item> {
        items::update_item(&self.db.lock(), item)
    }

    pub fn get_item(&self, id: &str) -> Result<Item> {
        items::get_item(&self.db.lock().writer, id)
    }

    pub fn list_items(&self) -> Result<Vec<Item>> {
        items::list_items(&self.db.lock().writer)
    }

    // Jobs ----------------------------------------------------------------

    pub fn create_job(&self, fields: NewJobFields) -> Result<Job> {
        jobs::create_job(&self.db.lock(), fields)
    }

    pub fn update_job_description(&self, id: &str, description: Option<String>) -> Result<Job> {
        jobs::update_job_description(&self.db.lock(), id, description)
    }

    pub fn get_job(&self, id: &str) -> Result<Job> {
        jobs::get_job(&self.db.lock().writer, id)
    }

    pub fn list_jobs_for_customer(&self, customer_id: &str) -> Result<Vec<Job>> {
        jobs::list_jobs_for_customer(&self.db.lock().writer, customer_id)
    }

    // Payments & money ----------------------------------------------------

    pub fn record_payment(&self, fields: NewPaymentFields) -> Result<Payment> {
        payments::record_payment(&self.db.lock(), fields)
    }

    pub fn get_payment(&self, id: &str) -> Result<Payment> {
        payments::get_payment(&self.db.lock().writer, id)
    }

    pub fn list_payments_for_customer(&self, customer_id: &str) -> Result<Vec<Payment>> {
        payments::list_payments_for_customer(&self.db.lock().writer, customer_id)
    }

    pub fn record_expense(&self, fields: NewExpenseFields) -> Result<LedgerEntry> {
        ledger::record_expense(&self.db.lock(), fields)
    }

    pub fn add_ledger_adjustment(
        &self,
        original_id: &str,
        debit: Amount,
        credit: Amount,
        note: Option<String>,
    ) -> Result<LedgerEntry> {
        ledger::add_adjustment(&self.db.lock(), original_id, debit, credit, note)
    }

    pub fn ledger_for_customer(&self, customer_id: &str) -> Result<Vec<LedgerEntry>> {
        ledger::entries_for_customer(&self.db.lock().writer, customer_id)
    }

    pub fn audit_trail(&self, entity_type: &str, entity_id: &str) -> Result<Vec<AuditEvent>> {
        audit::events_for_entity(&self.db.lock().writer, entity_type, entity_id)
    }

    // Sync statistics & maintenance ---------------------------------------

    /// Row counts per table per sync status; what the UI's sync badge shows.
    pub fn sync_counts(&self) -> Result<Vec<util::SyncCount>> {
        self.with_conn(util::sync_counts)
    }

    pub fn pending_total(&self) -> Result<u32> {
        self.with_conn(util::pending_total)
    }

    /// Return FAILED rows to PENDING so the next sync retries them.
    pub fn reset_failed(&self) -> Result<usize> {
        self.with_conn(|conn| util::reset_failed(conn, None))
    }

    /// Dependency-queue items needing operator attention.
    pub fn failed_queue_items(&self) -> Result<Vec<queue::QueueItem>> {
        self.with_conn(queue::failed_items)
    }

    /// How many dependency-queue items sit in `status`.
    pub fn queue_count(&self, status: sync_model::QueueStatus) -> Result<usize> {
        self.with_conn(|conn| queue::count_with_status(conn, status))
    }

    /// Surface exhausted queue items as errors for diagnosis tooling.
    pub fn queue_exhausted_errors(&self) -> Result<Vec<Error>> {
        Ok(self
            .failed_queue_items()?
            .into_iter()
            .map(|item| Error::QueueExhausted {
                table: item.table.name().to_string(),
                record_id: item.record_id,
            })
            .collect())
    }
}
