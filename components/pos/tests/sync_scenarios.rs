/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! End-to-end sync scenarios: real client stores and a real server store,
//! joined by an in-process transport instead of HTTP.

use parking_lot::Mutex;
use pos::db::models::*;
use pos::sync::transport::SyncTransport;
use pos::{Store, SyncConfig, SyncEngine};
use pos_server::{ServerDb, ServerError};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use sync_model::{
    DependencyFetchResponse, DownloadResponse, HealthResponse, QueueStatus, SyncStatus, SyncTable,
    UploadResponse,
};
use types::{Amount, Timestamp};

static DEVICE_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn to_client_error(e: ServerError) -> pos::Error {
    let status = match &e {
        ServerError::UnknownTable(_) | ServerError::BadRequest(_) | ServerError::MissingHeader(_) => 400,
        ServerError::Unavailable => 503,
        _ => 500,
    };
    pos::Error::ServerRejected {
        status,
        message: e.to_string(),
    }
}

/// Speaks directly to a `ServerDb`, wearing one device's identity.
struct ServerTransport {
    server: Arc<ServerDb>,
    device_id: String,
    /// When set, the next download for this table returns an empty page;
    /// emulates a row that was not yet visible server-side at walk time.
    suppress_once: Mutex<Option<SyncTable>>,
}

impl ServerTransport {
    fn new(server: Arc<ServerDb>, device_id: String) -> Self {
        Self {
            server,
            device_id,
            suppress_once: Mutex::new(None),
        }
    }
}

impl SyncTransport for ServerTransport {
    fn upload(&self, table: SyncTable, records: Vec<Value>) -> pos::Result<UploadResponse> {
        self.server
            .upload(&self.device_id, table.name(), records)
            .map_err(to_client_error)
    }

    fn download(
        &self,
        table: SyncTable,
        limit: u32,
        since: Option<Timestamp>,
    ) -> pos::Result<DownloadResponse> {
        let mut suppress = self.suppress_once.lock();
        if *suppress == Some(table) {
            *suppress = None;
            return Ok(DownloadResponse::default());
        }
        self.server
            .download(&self.device_id, table.name(), limit, since)
            .map_err(to_client_error)
    }

    fn fetch_dependencies(
        &self,
        table: SyncTable,
        record_ids: &[String],
    ) -> pos::Result<DependencyFetchResponse> {
        self.server
            .fetch_dependencies(table.name(), record_ids)
            .map_err(to_client_error)
    }

    fn health(&self) -> pos::Result<HealthResponse> {
        self.server.health().map_err(to_client_error)
    }
}

struct Device {
    store: Arc<Store>,
    engine: SyncEngine,
    device_id: String,
}

fn new_device(label: &str, server: &Arc<ServerDb>) -> Device {
    let _ = env_logger::try_init();
    let n = DEVICE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let store = Arc::new(Store::new_memory(&format!("scenario-{label}-{n}")).unwrap());
    let device_id = store.device_id().unwrap();
    let transport = ServerTransport::new(Arc::clone(server), device_id.clone());
    let engine = SyncEngine::new(Arc::clone(&store), Box::new(transport), SyncConfig::default());
    Device {
        store,
        engine,
        device_id,
    }
}

fn new_server(label: &str) -> Arc<ServerDb> {
    let n = DEVICE_COUNTER.fetch_add(1, Ordering::Relaxed);
    Arc::new(ServerDb::new_memory(&format!("scenario-server-{label}-{n}")).unwrap())
}

#[test]
fn test_two_devices_disjoint_rows() {
    let server = new_server("disjoint");
    let a = new_device("a", &server);
    let b = new_device("b", &server);

    let ada = a
        .store
        .add_customer(NewCustomerFields {
            name: "Ada".into(),
            ..Default::default()
        })
        .unwrap();
    let bo = b
        .store
        .add_customer(NewCustomerFields {
            name: "Bo".into(),
            ..Default::default()
        })
        .unwrap();

    assert!(a.engine.sync_all().unwrap().succeeded());
    assert!(b.engine.sync_all().unwrap().succeeded());
    // A synced before B uploaded; one more cycle picks B's row up.
    assert!(a.engine.sync_all().unwrap().succeeded());

    for device in [&a, &b] {
        let customers = device.store.list_customers().unwrap();
        assert_eq!(customers.len(), 2);
        // Origin is preserved on both sides.
        let fetched_ada = device.store.get_customer(&ada.metadata.id).unwrap();
        assert_eq!(fetched_ada.metadata.device_id, a.device_id);
        let fetched_bo = device.store.get_customer(&bo.metadata.id).unwrap();
        assert_eq!(fetched_bo.metadata.device_id, b.device_id);
        // Nothing needed the dependency queue.
        assert_eq!(device.store.queue_count(QueueStatus::Pending).unwrap(), 0);
        assert_eq!(device.store.queue_count(QueueStatus::Failed).unwrap(), 0);
    }
}

#[test]
fn test_cross_device_dependency_defers_on_server() {
    let server = new_server("serverqueue");
    let a = new_device("a", &server);
    let b = new_device("b", &server);

    // A's customer and item reach the server and then device B.
    let customer = a
        .store
        .add_customer(NewCustomerFields {
            name: "Shared customer".into(),
            ..Default::default()
        })
        .unwrap();
    let item = a
        .store
        .add_item(NewItemFields {
            name: "Shared item".into(),
            unit_price: Amount(10_00),
            ..Default::default()
        })
        .unwrap();
    assert!(a.engine.sync_all().unwrap().succeeded());
    assert!(b.engine.sync_all().unwrap().succeeded());

    // The central store is replaced (fresh database), losing the rows.
    let server = new_server("serverqueue-replacement");
    let a = Device {
        engine: SyncEngine::new(
            Arc::clone(&a.store),
            Box::new(ServerTransport::new(Arc::clone(&server), a.device_id.clone())),
            SyncConfig::default(),
        ),
        ..a
    };
    let b = Device {
        engine: SyncEngine::new(
            Arc::clone(&b.store),
            Box::new(ServerTransport::new(Arc::clone(&server), b.device_id.clone())),
            SyncConfig::default(),
        ),
        ..b
    };

    // B references A's rows in a new job and uploads before A does.
    let job = b
        .store
        .create_job(NewJobFields {
            customer_id: customer.metadata.id.clone(),
            item_id: item.metadata.id.clone(),
            quantity: 2,
            unit_price: Amount(10_00),
            ..Default::default()
        })
        .unwrap();
    let summary = b.engine.sync_all().unwrap();
    let jobs_upload = summary
        .uploads
        .iter()
        .find(|u| u.table == "jobs")
        .expect("jobs were uploaded");
    // The server deferred the job for missing prerequisites.
    assert_eq!(jobs_upload.queued, 1);
    assert_eq!(
        b.store.get_job(&job.metadata.id).unwrap().metadata.sync_status,
        SyncStatus::Pending
    );

    // A touches the customer so it re-enters PENDING, then uploads; the
    // server's drain then ingests the deferred job.
    let mut edited = a.store.get_customer(&customer.metadata.id).unwrap();
    edited.name = "Shared customer v2".into();
    a.store.update_customer(&edited).unwrap();
    let mut refreshed_item = a.store.get_item(&item.metadata.id).unwrap();
    refreshed_item.stock_qty = Some(5);
    a.store.update_item(&refreshed_item).unwrap();
    assert!(a.engine.sync_all().unwrap().succeeded());

    // A third device receives customer, item and job in tier order with no
    // local queueing at all.
    let c = new_device("c", &server);
    assert!(c.engine.sync_all().unwrap().succeeded());
    let fetched = c.store.get_job(&job.metadata.id).unwrap();
    assert_eq!(fetched.metadata.device_id, b.device_id);
    assert_eq!(c.store.queue_count(QueueStatus::Pending).unwrap(), 0);

    // B's next cycle re-uploads the job; the server already holds it, so the
    // row settles as SYNCED.
    assert!(b.engine.sync_all().unwrap().succeeded());
    assert_eq!(
        b.store.get_job(&job.metadata.id).unwrap().metadata.sync_status,
        SyncStatus::Synced
    );
}

#[test]
fn test_out_of_order_download_uses_local_queue() {
    let server = new_server("localqueue");
    let a = new_device("a", &server);

    let customer = a
        .store
        .add_customer(NewCustomerFields {
            name: "Queued customer".into(),
            ..Default::default()
        })
        .unwrap();
    let item = a
        .store
        .add_item(NewItemFields {
            name: "Queued item".into(),
            unit_price: Amount(3_00),
            ..Default::default()
        })
        .unwrap();
    let job = a
        .store
        .create_job(NewJobFields {
            customer_id: customer.metadata.id.clone(),
            item_id: item.metadata.id.clone(),
            quantity: 1,
            unit_price: Amount(3_00),
            ..Default::default()
        })
        .unwrap();
    assert!(a.engine.sync_all().unwrap().succeeded());

    // Device C walks customers before the customer row was visible to it
    // (the suppressed first page emulates the race), so the job arrives
    // with its references absent and parks on the local queue; the queue
    // pass then pulls the missing rows via the dependency-fetch endpoint.
    let c_store = Arc::new(Store::new_memory("scenario-c-localqueue").unwrap());
    let c_device_id = c_store.device_id().unwrap();
    let transport = ServerTransport::new(Arc::clone(&server), c_device_id);
    *transport.suppress_once.lock() = Some(SyncTable::Customers);
    let c_engine = SyncEngine::new(Arc::clone(&c_store), Box::new(transport), SyncConfig::default());

    let summary = c_engine.sync_all().unwrap();
    let downloads: Vec<_> = summary.downloads.iter().map(|d| d.table).collect();
    assert!(downloads.contains(&"jobs"));
    let jobs_download = summary.downloads.iter().find(|d| d.table == "jobs").unwrap();
    assert_eq!(jobs_download.deferred, 1);

    // The same cycle's queue pass resolved everything that was parked (the
    // job and the customer's ledger entry) by fetching the missing customer
    // from the server.
    let queue_run = summary.queue.expect("queue pass ran");
    assert_eq!(queue_run.completed, 2);
    assert!(queue_run.dependencies_fetched >= 1);
    assert_eq!(c_store.queue_count(QueueStatus::Completed).unwrap(), 2);
    assert_eq!(c_store.queue_count(QueueStatus::Pending).unwrap(), 0);

    let fetched = c_store.get_job(&job.metadata.id).unwrap();
    assert_eq!(fetched.total_amount, Amount(3_00));
    // Balance coherence holds on the receiving device too.
    let balance = c_store.customer_balance(&customer.metadata.id).unwrap();
    let stored = c_store
        .get_customer(&customer.metadata.id)
        .unwrap()
        .outstanding_balance;
    assert_eq!(balance, stored);
}

#[test]
fn test_conflicting_edits_last_writer_wins() {
    let server = new_server("conflict");
    let a = new_device("a", &server);
    let b = new_device("b", &server);

    let customer = a
        .store
        .add_customer(NewCustomerFields {
            name: "Original".into(),
            ..Default::default()
        })
        .unwrap();
    assert!(a.engine.sync_all().unwrap().succeeded());
    assert!(b.engine.sync_all().unwrap().succeeded());

    // A edits first; B edits the same row (still tagged with A's origin)
    // strictly later, and uploads after A.
    let mut on_a = a.store.get_customer(&customer.metadata.id).unwrap();
    on_a.name = "X".into();
    a.store.update_customer(&on_a).unwrap();
    assert!(a.engine.sync_all().unwrap().succeeded());

    std::thread::sleep(std::time::Duration::from_millis(5));
    let mut on_b = b.store.get_customer(&customer.metadata.id).unwrap();
    assert_eq!(on_b.metadata.device_id, a.device_id);
    on_b.name = "Y".into();
    b.store.update_customer(&on_b).unwrap();
    assert!(b.engine.sync_all().unwrap().succeeded());

    // The server keeps the later write for the one (id, device_id) row.
    let c = new_device("c", &server);
    assert!(c.engine.sync_all().unwrap().succeeded());
    let settled = c.store.get_customer(&customer.metadata.id).unwrap();
    assert_eq!(settled.name, "Y");
    assert_eq!(settled.metadata.device_id, a.device_id);
    assert_eq!(c.store.list_customers().unwrap().len(), 1);
}

#[test]
fn test_financial_state_converges_across_devices() {
    let server = new_server("money");
    let a = new_device("a", &server);

    let customer = a
        .store
        .add_customer(NewCustomerFields {
            name: "Payer".into(),
            opening_balance: Amount(5_00),
            ..Default::default()
        })
        .unwrap();
    let item = a
        .store
        .add_item(NewItemFields {
            name: "Widget".into(),
            unit_price: Amount(20_00),
            ..Default::default()
        })
        .unwrap();
    let job = a
        .store
        .create_job(NewJobFields {
            customer_id: customer.metadata.id.clone(),
            item_id: item.metadata.id.clone(),
            quantity: 1,
            unit_price: Amount(20_00),
            ..Default::default()
        })
        .unwrap();
    a.store
        .record_payment(NewPaymentFields {
            customer_id: customer.metadata.id.clone(),
            job_id: Some(job.metadata.id.clone()),
            amount: Amount(25_00),
            method: PaymentMethod::Card,
            ..Default::default()
        })
        .unwrap();
    assert!(a.engine.sync_all().unwrap().succeeded());

    let b = new_device("b", &server);
    assert!(b.engine.sync_all().unwrap().succeeded());

    // The whole financial history arrived: ledger, payment, settled job.
    let entries = b.store.ledger_for_customer(&customer.metadata.id).unwrap();
    assert_eq!(entries.len(), 3); // opening balance, job, payment
    let fetched_job = b.store.get_job(&job.metadata.id).unwrap();
    assert_eq!(fetched_job.job_status, JobStatus::Done);
    assert_eq!(fetched_job.paid_amount, Amount(25_00));

    // Balance coherence on the replica: stored balance equals the
    // ledger-derived balance.
    let on_b = b.store.get_customer(&customer.metadata.id).unwrap();
    assert_eq!(on_b.outstanding_balance, Amount::ZERO);
    assert_eq!(
        b.store.customer_balance(&customer.metadata.id).unwrap(),
        Amount::ZERO
    );
    // Audit history crossed over too.
    assert!(!b
        .store
        .audit_trail("jobs", &job.metadata.id)
        .unwrap()
        .is_empty());
}
