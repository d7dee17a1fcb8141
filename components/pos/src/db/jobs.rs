/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::db::models::{Job, JobStatus, NewJobFields, SyncMetadata};
use crate::db::{audit, customers, items, ledger, PosDb};
use crate::error::*;

use serde_json::json;
use sql_support::ConnExt;
use sync_model::{EntryType, SyncStatus};
use types::{Amount, Timestamp};

pub(crate) const JOB_COLS: &str = "
    id,
    device_id,
    customer_id,
    item_id,
    description,
    quantity,
    unit_price,
    total_amount,
    paid_amount,
    job_status,
    created_at,
    updated_at,
    sync_status";

/// Create a work unit. This is a financial mutation: the job row, a
/// JOB_CREATED ledger debit for its total, an audit row and the refreshed
/// customer balance all commit together or not at all.
pub fn create_job(db: &PosDb, fields: NewJobFields) -> Result<Job> {
    if fields.quantity <= 0 {
        return Err(Error::InvalidArgument("quantity must be positive".into()));
    }
    if fields.unit_price.is_negative() {
        return Err(Error::InvalidArgument("unit price must be non-negative".into()));
    }
    let total = fields
        .unit_price
        .checked_mul(fields.quantity)
        .ok_or_else(|| Error::InvalidArgument("job total overflows".into()))?;
    let device_id = db.device_id()?.to_string();
    let tx = db.unchecked_transaction()?;
    if !customers::exists(&tx, &fields.customer_id)? {
        return Err(Error::RefNotFound {
            table: "customers",
            id: fields.customer_id,
        });
    }
    if !items::exists(&tx, &fields.item_id)? {
        return Err(Error::RefNotFound {
            table: "items",
            id: fields.item_id,
        });
    }
    let job = Job {
        metadata: SyncMetadata::new(&device_id),
        customer_id: fields.customer_id,
        item_id: fields.item_id,
        description: fields.description,
        quantity: fields.quantity,
        unit_price: fields.unit_price,
        total_amount: total,
        paid_amount: Amount::ZERO,
        job_status: JobStatus::Open,
    };
    tx.execute_cached(
        &format!(
            "INSERT INTO jobs ({cols}) VALUES (
                :id, :device_id, :customer_id, :item_id, :description,
                :quantity, :unit_price, :total_amount, :paid_amount,
                :job_status, :created_at, :updated_at, :sync_status
            )",
            cols = JOB_COLS
        ),
        rusqlite::named_params! {
            ":id": job.metadata.id,
            ":device_id": job.metadata.device_id,
            ":customer_id": job.customer_id,
            ":item_id": job.item_id,
            ":description": job.description,
            ":quantity": job.quantity,
            ":unit_price": job.unit_price,
            ":total_amount": job.total_amount,
            ":paid_amount": job.paid_amount,
            ":job_status": job.job_status,
            ":created_at": job.metadata.created_at,
            ":updated_at": job.metadata.updated_at,
            ":sync_status": job.metadata.sync_status,
        },
    )?;
    ledger::add_entry(
        &tx,
        &device_id,
        ledger::NewLedgerEntry {
            entry_type: Some(EntryType::JobCreated),
            reference: Some(("jobs".into(), job.metadata.id.clone())),
            customer_id: Some(job.customer_id.clone()),
            debit: total,
            ..ledger::NewLedgerEntry::default()
        },
    )?;
    audit::record_event(
        &tx,
        &device_id,
        "jobs",
        &job.metadata.id,
        "CREATE",
        Some(json!({ "customer_id": job.customer_id, "total": total })),
    )?;
    customers::recompute_balance(&tx, &job.customer_id, job.metadata.updated_at)?;
    tx.commit()?;
    Ok(job)
}

/// Update the free-text description of a job. Money-bearing fields are
/// immutable through this path; payments move `paid_amount`, and corrections
/// go through ledger adjustments.
pub fn update_job_description(db: &PosDb, id: &str, description: Option<String>) -> Result<Job> {
    let device_id = db.device_id()?.to_string();
    let tx = db.unchecked_transaction()?;
    let now = Timestamp::now();
    let changed = tx.execute_cached(
        "UPDATE jobs
         SET description = :description,
             updated_at  = :updated_at,
             sync_status = :sync_status
         WHERE id = :id",
        rusqlite::named_params! {
            ":description": description,
            ":updated_at": now,
            ":sync_status": SyncStatus::Pending,
            ":id": id,
        },
    )?;
    if changed == 0 {
        return Err(Error::RefNotFound {
            table: "jobs",
            id: id.to_string(),
        });
    }
    audit::record_event(&tx, &device_id, "jobs", id, "UPDATE", None)?;
    let job = get_job(&tx, id)?;
    tx.commit()?;
    Ok(job)
}

pub fn get_job(conn: &impl ConnExt, id: &str) -> Result<Job> {
    conn.try_query_row(
        &format!("SELECT {cols} FROM jobs WHERE id = :id", cols = JOB_COLS),
        rusqlite::named_params! { ":id": id },
        |row| Job::from_row(row).map_err(Error::from),
    )?
    .ok_or_else(|| Error::RefNotFound {
        table: "jobs",
        id: id.to_string(),
    })
}

pub fn list_jobs_for_customer(conn: &impl ConnExt, customer_id: &str) -> Result<Vec<Job>> {
    conn.query_rows_and_then(
        &format!(
            "SELECT {cols} FROM jobs
             WHERE customer_id = :customer_id
             ORDER BY created_at, id",
            cols = JOB_COLS
        ),
        rusqlite::named_params! { ":customer_id": customer_id },
        |row| Job::from_row(row).map_err(Error::from),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{NewCustomerFields, NewItemFields};
    use crate::db::test::new_mem_db;

    fn fixture(db: &PosDb) -> (String, String) {
        let customer = customers::add_customer(
            db,
            NewCustomerFields {
                name: "Ada".into(),
                ..NewCustomerFields::default()
            },
        )
        .unwrap();
        let item = items::add_item(
            db,
            NewItemFields {
                name: "Loaf".into(),
                unit_price: Amount(6_00),
                ..NewItemFields::default()
            },
        )
        .unwrap();
        (customer.metadata.id, item.metadata.id)
    }

    #[test]
    fn test_create_job_writes_ledger_audit_and_balance() {
        let db = new_mem_db();
        let (customer_id, item_id) = fixture(&db);
        let job = create_job(
            &db,
            NewJobFields {
                customer_id: customer_id.clone(),
                item_id,
                quantity: 3,
                unit_price: Amount(6_00),
                ..NewJobFields::default()
            },
        )
        .unwrap();
        assert_eq!(job.total_amount, Amount(18_00));
        assert_eq!(job.job_status, JobStatus::Open);

        let entries = ledger::entries_for_customer(&db.writer, &customer_id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::JobCreated);
        assert_eq!(entries[0].debit, Amount(18_00));

        let events = audit::events_for_entity(&db.writer, "jobs", &job.metadata.id).unwrap();
        assert_eq!(events.len(), 1);

        let customer = customers::get_customer(&db.writer, &customer_id).unwrap();
        assert_eq!(customer.outstanding_balance, Amount(18_00));
    }

    #[test]
    fn test_create_job_rolls_back_when_ledger_write_fails() {
        let db = new_mem_db();
        let (customer_id, item_id) = fixture(&db);
        // Inject a failure into the middle of the financial transaction.
        db.execute_batch(
            "CREATE TEMP TRIGGER fail_ledger_insert BEFORE INSERT ON ledger_entries
             BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
        )
        .unwrap();
        let fields = NewJobFields {
            customer_id: customer_id.clone(),
            item_id: item_id.clone(),
            quantity: 1,
            unit_price: Amount(9_00),
            ..NewJobFields::default()
        };
        let result = create_job(&db, fields.clone());
        assert!(matches!(result, Err(Error::IntegrityViolation(_))));

        // No partial effect is observable: no job, no ledger row, no audit
        // row, no balance movement.
        let jobs: i64 = ConnExt::query_one(&*db, "SELECT COUNT(*) FROM jobs").unwrap();
        assert_eq!(jobs, 0);
        let entries: i64 = ConnExt::query_one(&*db, "SELECT COUNT(*) FROM ledger_entries").unwrap();
        assert_eq!(entries, 0);
        let audits: i64 = ConnExt::query_one(&*db, "SELECT COUNT(*) FROM audit_log WHERE entity_type = 'jobs'")
            .unwrap();
        assert_eq!(audits, 0);
        let customer = customers::get_customer(&db.writer, &customer_id).unwrap();
        assert_eq!(customer.outstanding_balance, Amount::ZERO);

        // With the injection removed the same mutation succeeds and yields
        // exactly one of each.
        db.execute_batch("DROP TRIGGER fail_ledger_insert").unwrap();
        create_job(&db, fields).unwrap();
        let jobs: i64 = ConnExt::query_one(&*db, "SELECT COUNT(*) FROM jobs").unwrap();
        assert_eq!(jobs, 1);
        let entries: i64 = ConnExt::query_one(&*db, "SELECT COUNT(*) FROM ledger_entries").unwrap();
        assert_eq!(entries, 1);
        let audits: i64 = ConnExt::query_one(&*db, "SELECT COUNT(*) FROM audit_log WHERE entity_type = 'jobs'")
            .unwrap();
        assert_eq!(audits, 1);
    }

    #[test]
    fn test_create_job_missing_refs() {
        let db = new_mem_db();
        let (customer_id, _item_id) = fixture(&db);
        let result = create_job(
            &db,
            NewJobFields {
                customer_id,
                item_id: "no-such-item".into(),
                quantity: 1,
                unit_price: Amount(100),
                ..NewJobFields::default()
            },
        );
        assert!(matches!(
            result,
            Err(Error::RefNotFound { table: "items", .. })
        ));
        // Nothing partial leaked: no job, no ledger rows, no audit rows.
        let jobs: i64 = ConnExt::query_one(&*db, "SELECT COUNT(*) FROM jobs").unwrap();
        assert_eq!(jobs, 0);
        let entries: i64 = ConnExt::query_one(&*db, "SELECT COUNT(*) FROM ledger_entries").unwrap();
        assert_eq!(entries, 0);
        let audits: i64 = ConnExt::query_one(&*db, "SELECT COUNT(*) FROM audit_log WHERE entity_type = 'jobs'")
            .unwrap();
        assert_eq!(audits, 0);
    }
}
