/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::db::models::{NewPaymentFields, Payment, SyncMetadata};
use crate::db::{audit, customers, jobs, ledger, PosDb};
use crate::error::*;

use serde_json::json;
use sql_support::ConnExt;
use sync_model::{EntryType, SyncStatus};
use types::Amount;

pub(crate) const PAYMENT_COLS: &str = "
    id,
    device_id,
    customer_id,
    job_id,
    amount,
    method,
    note,
    created_at,
    updated_at,
    sync_status";

/// Record money received from a customer. Financial mutation: the payment
/// row, a PAYMENT_RECEIVED ledger credit, the audit row, the job's
/// `paid_amount` and the refreshed customer balance commit atomically.
pub fn record_payment(db: &PosDb, fields: NewPaymentFields) -> Result<Payment> {
    if fields.amount.is_negative() || fields.amount == Amount::ZERO {
        return Err(Error::InvalidArgument("payment amount must be positive".into()));
    }
    let device_id = db.device_id()?.to_string();
    let tx = db.unchecked_transaction()?;
    if !customers::exists(&tx, &fields.customer_id)? {
        return Err(Error::RefNotFound {
            table: "customers",
            id: fields.customer_id,
        });
    }
    if let Some(job_id) = &fields.job_id {
        let job = jobs::get_job(&tx, job_id)?;
        if job.customer_id != fields.customer_id {
            return Err(Error::InvalidArgument(format!(
                "job {} belongs to a different customer",
                job_id
            )));
        }
    }
    let payment = Payment {
        metadata: SyncMetadata::new(&device_id),
        customer_id: fields.customer_id,
        job_id: fields.job_id,
        amount: fields.amount,
        method: fields.method,
        note: fields.note,
    };
    tx.execute_cached(
        &format!(
            "INSERT INTO payments ({cols}) VALUES (
                :id, :device_id, :customer_id, :job_id, :amount, :method,
                :note, :created_at, :updated_at, :sync_status
            )",
            cols = PAYMENT_COLS
        ),
        rusqlite::named_params! {
            ":id": payment.metadata.id,
            ":device_id": payment.metadata.device_id,
            ":customer_id": payment.customer_id,
            ":job_id": payment.job_id,
            ":amount": payment.amount,
            ":method": payment.method,
            ":note": payment.note,
            ":created_at": payment.metadata.created_at,
            ":updated_at": payment.metadata.updated_at,
            ":sync_status": payment.metadata.sync_status,
        },
    )?;
    ledger::add_entry(
        &tx,
        &device_id,
        ledger::NewLedgerEntry {
            entry_type: Some(EntryType::PaymentReceived),
            reference: Some(("payments".into(), payment.metadata.id.clone())),
            customer_id: Some(payment.customer_id.clone()),
            credit: payment.amount,
            ..ledger::NewLedgerEntry::default()
        },
    )?;
    if let Some(job_id) = &payment.job_id {
        // Settle the job: bump paid_amount and flip OPEN -> DONE once fully
        // covered. The row re-enters the sync lifecycle like any edit.
        tx.execute_cached(
            "UPDATE jobs
             SET paid_amount = paid_amount + :amount,
                 job_status  = CASE
                     WHEN paid_amount + :amount >= total_amount THEN 'DONE'
                     ELSE job_status
                 END,
                 updated_at  = :updated_at,
                 sync_status = :sync_status
             WHERE id = :id",
            rusqlite::named_params! {
                ":amount": payment.amount,
                ":updated_at": payment.metadata.updated_at,
                ":sync_status": SyncStatus::Pending,
                ":id": job_id,
            },
        )?;
    }
    audit::record_event(
        &tx,
        &device_id,
        "payments",
        &payment.metadata.id,
        "CREATE",
        Some(json!({
            "customer_id": payment.customer_id,
            "amount": payment.amount,
            "method": payment.method.as_str(),
        })),
    )?;
    customers::recompute_balance(&tx, &payment.customer_id, payment.metadata.updated_at)?;
    tx.commit()?;
    Ok(payment)
}

pub fn get_payment(conn: &impl ConnExt, id: &str) -> Result<Payment> {
    conn.try_query_row(
        &format!(
            "SELECT {cols} FROM payments WHERE id = :id",
            cols = PAYMENT_COLS
        ),
        rusqlite::named_params! { ":id": id },
        |row| Payment::from_row(row).map_err(Error::from),
    )?
    .ok_or_else(|| Error::RefNotFound {
        table: "payments",
        id: id.to_string(),
    })
}

pub fn list_payments_for_customer(conn: &impl ConnExt, customer_id: &str) -> Result<Vec<Payment>> {
    conn.query_rows_and_then(
        &format!(
            "SELECT {cols} FROM payments
             WHERE customer_id = :customer_id
             ORDER BY created_at, id",
            cols = PAYMENT_COLS
        ),
        rusqlite::named_params! { ":customer_id": customer_id },
        |row| Payment::from_row(row).map_err(Error::from),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{JobStatus, NewCustomerFields, NewItemFields, NewJobFields};
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
        let item = crate::db::items::add_item(
            db,
            NewItemFields {
                name: "Loaf".into(),
                unit_price: Amount(6_00),
                ..NewItemFields::default()
            },
        )
        .unwrap();
        let job = jobs::create_job(
            db,
            NewJobFields {
                customer_id: customer.metadata.id.clone(),
                item_id: item.metadata.id,
                quantity: 2,
                unit_price: Amount(6_00),
                ..NewJobFields::default()
            },
        )
        .unwrap();
        (customer.metadata.id, job.metadata.id)
    }

    #[test]
    fn test_payment_settles_job_and_balance() {
        let db = new_mem_db();
        let (customer_id, job_id) = fixture(&db);

        let payment = record_payment(
            &db,
            NewPaymentFields {
                customer_id: customer_id.clone(),
                job_id: Some(job_id.clone()),
                amount: Amount(5_00),
                ..NewPaymentFields::default()
            },
        )
        .unwrap();
        let job = jobs::get_job(&db.writer, &job_id).unwrap();
        assert_eq!(job.paid_amount, Amount(5_00));
        assert_eq!(job.job_status, JobStatus::Open);
        let customer = customers::get_customer(&db.writer, &customer_id).unwrap();
        assert_eq!(customer.outstanding_balance, Amount(7_00));

        record_payment(
            &db,
            NewPaymentFields {
                customer_id: customer_id.clone(),
                job_id: Some(job_id.clone()),
                amount: Amount(7_00),
                ..NewPaymentFields::default()
            },
        )
        .unwrap();
        let job = jobs::get_job(&db.writer, &job_id).unwrap();
        assert_eq!(job.paid_amount, Amount(12_00));
        assert_eq!(job.job_status, JobStatus::Done);
        let customer = customers::get_customer(&db.writer, &customer_id).unwrap();
        assert_eq!(customer.outstanding_balance, Amount::ZERO);

        // Balance coherence: derived column always equals the ledger sum.
        assert_eq!(
            ledger::ledger_total(&db.writer, Some(&customer_id)).unwrap(),
            customer.outstanding_balance
        );
        assert_eq!(
            list_payments_for_customer(&db.writer, &customer_id)
                .unwrap()
                .len(),
            2
        );
        assert_eq!(payment.method, crate::db::models::PaymentMethod::Cash);
    }

    #[test]
    fn test_payment_requires_matching_customer() {
        let db = new_mem_db();
        let (_customer_id, job_id) = fixture(&db);
        let other = customers::add_customer(
            &db,
            NewCustomerFields {
                name: "Eve".into(),
                ..NewCustomerFields::default()
            },
        )
        .unwrap();
        let result = record_payment(
            &db,
            NewPaymentFields {
                customer_id: other.metadata.id,
                job_id: Some(job_id),
                amount: Amount(1_00),
                ..NewPaymentFields::default()
            },
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        // Atomicity: the rejected mutation left nothing behind.
        let payments: i64 = ConnExt::query_one(&*db, "SELECT COUNT(*) FROM payments").unwrap();
        assert_eq!(payments, 0);
    }

    #[test]
    fn test_rejects_zero_amount() {
        let db = new_mem_db();
        let (customer_id, _job_id) = fixture(&db);
        let result = record_payment(
            &db,
            NewPaymentFields {
                customer_id,
                amount: Amount::ZERO,
                ..NewPaymentFields::default()
            },
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
