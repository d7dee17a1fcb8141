/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The sync orchestrator: one state machine per device driving upload then
//! download in tier order, with a process-wide single-flight guard, an
//! in-memory download watermark, and per-(table, phase) error accumulation.

use crate::config::SyncConfig;
use crate::error::*;
use crate::store::Store;
use crate::sync::incoming::{self, ApplyOutcome};
use crate::sync::transport::SyncTransport;
use crate::sync::{queue, util, SyncFailure, SyncPhase, SyncSummary, TableDownload, TableUpload};

use interrupt_support::{InterruptHandle, Interruptee};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sync_model::{Record, SyncStatus, SyncTable, TIER_ORDER};
use types::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Uploading,
    Downloading,
}

pub struct SyncEngine {
    store: Arc<Store>,
    transport: Box<dyn SyncTransport>,
    config: SyncConfig,
    is_syncing: AtomicBool,
    state: Mutex<SyncState>,
    /// Greatest server cursor seen across a full download; kept for the
    /// process lifetime only, so a restart re-walks from the beginning and
    /// relies on last-writer-wins to make that cheap.
    watermark: Mutex<Option<Timestamp>>,
    interrupt_handle: Arc<InterruptHandle>,
}

/// Clears the single-flight flag and resets the state on every exit path.
struct SyncGuard<'a> {
    engine: &'a SyncEngine,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        *self.engine.state.lock() = SyncState::Idle;
        self.engine.is_syncing.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    pub fn new(store: Arc<Store>, transport: Box<dyn SyncTransport>, config: SyncConfig) -> Self {
        Self {
            store,
            transport,
            config,
            is_syncing: AtomicBool::new(false),
            state: Mutex::new(SyncState::Idle),
            watermark: Mutex::new(None),
            interrupt_handle: Arc::new(InterruptHandle::new()),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    pub fn watermark(&self) -> Option<Timestamp> {
        *self.watermark.lock()
    }

    /// Ask a running sync to stop at the next table boundary. In-flight
    /// requests still run to their deadline; rows mid-batch finish.
    pub fn request_interrupt(&self) {
        self.interrupt_handle.interrupt();
    }

    /// Is the server reachable? For the UI's connectivity indicator; never
    /// called as part of a sync.
    pub fn check_server(&self) -> Result<sync_model::HealthResponse> {
        self.transport.health()
    }

    /// Grab the single-flight flag or report a sync already running.
    fn begin(&self) -> Result<SyncGuard<'_>> {
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyInProgress);
        }
        Ok(SyncGuard { engine: self })
    }

    /// Push local PENDING rows up, tier order, one batch per table.
    pub fn upload_pending(&self) -> Result<SyncSummary> {
        let _guard = self.begin()?;
        let scope = self.interrupt_handle.begin_interrupt_scope();
        let mut summary = SyncSummary::default();
        self.run_upload(&scope, &mut summary);
        Ok(summary)
    }

    /// Pull new rows down, tier order, paginating each table to exhaustion.
    pub fn download_new(&self) -> Result<SyncSummary> {
        let _guard = self.begin()?;
        let scope = self.interrupt_handle.begin_interrupt_scope();
        let mut summary = SyncSummary::default();
        self.run_download(&scope, &mut summary);
        Ok(summary)
    }

    /// Full cycle: upload, download, then give the dependency queue a chance
    /// to drain (fetching stragglers from the server) and purge old entries.
    pub fn sync_all(&self) -> Result<SyncSummary> {
        let _guard = self.begin()?;
        let scope = self.interrupt_handle.begin_interrupt_scope();
        let mut summary = SyncSummary::default();
        self.run_upload(&scope, &mut summary);
        if !summary.interrupted {
            self.run_download(&scope, &mut summary);
        }
        if !summary.interrupted {
            let queue_summary = self.store.with_conn(|conn| {
                let run = queue::process(conn, Some(self.transport.as_ref()), &self.config)?;
                queue::purge_completed(conn, Timestamp::now())?;
                Ok(run)
            });
            match queue_summary {
                Ok(run) => summary.queue = Some(run),
                Err(e) => log::warn!("dependency queue pass failed: {}", e),
            }
        }
        log::info!(
            "sync finished: {} upload tables, {} download tables, {} failures{}",
            summary.uploads.len(),
            summary.downloads.len(),
            summary.failures.len(),
            if summary.interrupted { " (interrupted)" } else { "" },
        );
        Ok(summary)
    }

    fn run_upload(&self, scope: &impl Interruptee, summary: &mut SyncSummary) {
        *self.state.lock() = SyncState::Uploading;
        for table in TIER_ORDER {
            if scope.was_interrupted() {
                summary.interrupted = true;
                return;
            }
            match self.upload_table(table) {
                Ok(Some(outcome)) => summary.uploads.push(outcome),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("upload of {} failed: {}", table, e);
                    summary.failures.push(SyncFailure {
                        table: table.name(),
                        phase: SyncPhase::Upload,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    fn upload_table(&self, table: SyncTable) -> Result<Option<TableUpload>> {
        let records = self
            .store
            .with_conn(|conn| util::pending_rows(conn, table, self.config.batch_size))?;
        if records.is_empty() {
            return Ok(None);
        }
        let sent = records.len();
        let response = self.transport.upload(table, records)?;
        let outcome = TableUpload {
            table: table.name(),
            sent,
            synced: response.synced.len(),
            queued: response.queued.len(),
            skipped: response.skipped.len(),
            failed: response.failed.len(),
        };
        self.store.with_conn(|conn| {
            // The server owns synced rows now; skipped means it already has
            // an equal-or-newer copy. Queued rows stay PENDING - the server
            // deferred them and re-upload is idempotent.
            let acked: Vec<String> = response
                .synced
                .iter()
                .map(|r| r.record_id.clone())
                .chain(response.skipped.iter().map(|r| r.record_id.clone()))
                .collect();
            util::set_sync_status(conn, table, &acked, SyncStatus::Synced)?;
            let failed: Vec<String> = response
                .failed
                .iter()
                .map(|r| r.record_id.clone())
                .collect();
            util::set_sync_status(conn, table, &failed, SyncStatus::Failed)?;
            Ok(())
        })?;
        for failure in &response.failed {
            log::warn!(
                "server rejected {} record {}: {}",
                table,
                failure.record_id,
                failure.error
            );
        }
        // Tiny sanity check the response sets really are disjoint.
        debug_assert!(outcome.synced + outcome.queued + outcome.skipped + outcome.failed <= sent);
        Ok(Some(outcome))
    }

    fn run_download(&self, scope: &impl Interruptee, summary: &mut SyncSummary) {
        *self.state.lock() = SyncState::Downloading;
        let since = *self.watermark.lock();
        let mut max_seen = since;
        for table in TIER_ORDER {
            if scope.was_interrupted() {
                summary.interrupted = true;
                break;
            }
            match self.download_table(table, scope, since, &mut max_seen) {
                Ok(Some(outcome)) => summary.downloads.push(outcome),
                Ok(None) => {}
                Err(Error::Interrupted(_)) => {
                    summary.interrupted = true;
                    break;
                }
                Err(e) => {
                    // A failed page aborts this table's pagination but the
                    // walk continues with the next table.
                    log::warn!("download of {} failed: {}", table, e);
                    summary.failures.push(SyncFailure {
                        table: table.name(),
                        phase: SyncPhase::Download,
                        error: e.to_string(),
                    });
                }
            }
        }
        *self.watermark.lock() = max_seen;
        // Ledger rows may have landed after their customers; re-derive any
        // balance the download made stale.
        if let Err(e) = self
            .store
            .with_conn(|conn| crate::db::customers::recompute_all_balances(conn).map(|_| ()))
        {
            log::warn!("balance recompute after download failed: {}", e);
        }
    }

    fn download_table(
        &self,
        table: SyncTable,
        scope: &impl Interruptee,
        since: Option<Timestamp>,
        max_seen: &mut Option<Timestamp>,
    ) -> Result<Option<TableDownload>> {
        let mut outcome = TableDownload {
            table: table.name(),
            ..TableDownload::default()
        };
        let mut cursor = since;
        loop {
            scope.err_if_interrupted()?;
            let page = self
                .transport
                .download(table, self.config.batch_size, cursor)?;
            outcome.fetched += page.records.len();
            for value in &page.records {
                let record = match Record::parse(table, value.clone()) {
                    Ok(record) => record,
                    Err(e) => {
                        log::warn!("skipping malformed {} download row: {}", table, e);
                        outcome.skipped += 1;
                        continue;
                    }
                };
                let applied = self.store.with_conn(|conn| {
                    match incoming::apply_incoming(conn, &record)? {
                        ApplyOutcome::Inserted | ApplyOutcome::Updated => Ok(1),
                        ApplyOutcome::UpToDate => Ok(0),
                        ApplyOutcome::Deferred { missing } => {
                            queue::enqueue(conn, &record, &missing, &self.config)?;
                            // Parked, not surfaced; the queue owns it now.
                            log::debug!(
                                "{}",
                                Error::DependencyMissing {
                                    table: record.table().name().to_string(),
                                    record_id: record.id().to_string(),
                                }
                            );
                            Ok(2)
                        }
                    }
                })?;
                match applied {
                    1 => outcome.applied += 1,
                    2 => outcome.deferred += 1,
                    _ => outcome.skipped += 1,
                }
            }
            if let Some(next) = page.next_cursor {
                if max_seen.map_or(true, |seen| next > seen) {
                    *max_seen = Some(next);
                }
                cursor = Some(next);
            }
            if !page.has_more {
                break;
            }
        }
        if outcome.fetched == 0 {
            return Ok(None);
        }
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use parking_lot::Mutex as PlMutex;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use sync_model::{
        DependencyFetchResponse, DownloadResponse, HealthResponse, SyncedRecord, UploadResponse,
    };

    /// A canned transport: every upload acks everything, downloads replay a
    /// scripted page list per table.
    #[derive(Default)]
    struct FakeTransport {
        pages: PlMutex<HashMap<&'static str, Vec<DownloadResponse>>>,
        uploads: PlMutex<Vec<(String, usize)>>,
    }

    impl SyncTransport for FakeTransport {
        fn upload(&self, table: SyncTable, records: Vec<Value>) -> Result<UploadResponse> {
            self.uploads.lock().push((table.name().into(), records.len()));
            Ok(UploadResponse {
                synced: records
                    .iter()
                    .map(|r| SyncedRecord {
                        record_id: r["id"].as_str().unwrap_or_default().to_string(),
                    })
                    .collect(),
                ..UploadResponse::default()
            }
            .tally())
        }

        fn download(
            &self,
            table: SyncTable,
            _limit: u32,
            _since: Option<Timestamp>,
        ) -> Result<DownloadResponse> {
            let mut pages = self.pages.lock();
            Ok(pages
                .get_mut(table.name())
                .and_then(|list| if list.is_empty() { None } else { Some(list.remove(0)) })
                .unwrap_or_default())
        }

        fn fetch_dependencies(
            &self,
            _table: SyncTable,
            _record_ids: &[String],
        ) -> Result<DependencyFetchResponse> {
            Ok(DependencyFetchResponse::default())
        }

        fn health(&self) -> Result<HealthResponse> {
            Ok(HealthResponse {
                status: "ok".into(),
                uptime: 0,
                timestamp: Timestamp::now(),
            })
        }
    }

    static ENGINE_COUNTER: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    fn new_engine(pages: HashMap<&'static str, Vec<DownloadResponse>>) -> SyncEngine {
        let _ = env_logger::try_init();
        let n = ENGINE_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let store = Arc::new(Store::new_memory(&format!("engine-test-{}", n)).unwrap());
        let transport = FakeTransport {
            pages: PlMutex::new(pages),
            ..FakeTransport::default()
        };
        SyncEngine::new(store, Box::new(transport), SyncConfig::default())
    }

    fn customer_page(id: &str, updated_at: &str, has_more: bool, cursor: u64) -> DownloadResponse {
        DownloadResponse {
            records: vec![json!({
                "id": id,
                "device_id": "device-remote",
                "name": format!("customer {}", id),
                "created_at": "2024-01-01T10:00:00Z",
                "updated_at": updated_at,
            })],
            has_more,
            next_cursor: Some(Timestamp(cursor)),
        }
    }

    #[test]
    fn test_upload_marks_rows_synced() {
        let engine = new_engine(HashMap::new());
        let customer = engine
            .store
            .add_customer(crate::db::models::NewCustomerFields {
                name: "Ada".into(),
                ..Default::default()
            })
            .unwrap();

        let summary = engine.upload_pending().unwrap();
        assert!(summary.succeeded());
        // customers + the audit row for the create.
        assert_eq!(summary.uploads.len(), 2);
        let statuses = engine.store.sync_counts().unwrap();
        assert!(statuses
            .iter()
            .all(|c| c.status == SyncStatus::Synced));
        let refreshed = engine.store.get_customer(&customer.metadata.id).unwrap();
        assert_eq!(refreshed.metadata.sync_status, SyncStatus::Synced);
        assert_eq!(engine.state(), SyncState::Idle);
    }

    #[test]
    fn test_download_applies_and_advances_watermark() {
        let pages = HashMap::from([(
            "customers",
            vec![
                customer_page("c1", "2024-01-02T10:00:00Z", true, 100),
                customer_page("c2", "2024-01-03T10:00:00Z", false, 200),
            ],
        )]);
        let engine = new_engine(pages);
        let summary = engine.download_new().unwrap();
        assert!(summary.succeeded());
        assert_eq!(summary.downloads.len(), 1);
        assert_eq!(summary.downloads[0].fetched, 2);
        assert_eq!(summary.downloads[0].applied, 2);
        assert_eq!(engine.watermark(), Some(Timestamp(200)));
        assert_eq!(engine.store.list_customers().unwrap().len(), 2);
    }

    #[test]
    fn test_download_defers_missing_refs_to_queue() {
        let pages = HashMap::from([(
            "jobs",
            vec![DownloadResponse {
                records: vec![json!({
                    "id": "j1",
                    "device_id": "device-remote",
                    "customer_id": "c-unknown",
                    "item_id": "i-unknown",
                    "quantity": 1,
                    "unit_price": 5.0,
                    "total_amount": 5.0,
                    "paid_amount": 0,
                    "job_status": "OPEN",
                    "created_at": "2024-01-01T10:00:00Z",
                    "updated_at": "2024-01-01T10:00:00Z",
                })],
                has_more: false,
                next_cursor: Some(Timestamp(50)),
            }],
        )]);
        let engine = new_engine(pages);
        let summary = engine.download_new().unwrap();
        assert_eq!(summary.downloads[0].deferred, 1);
        let waiting = engine
            .store
            .with_conn(|conn| queue::count_with_status(conn, sync_model::QueueStatus::Pending))
            .unwrap();
        assert_eq!(waiting, 1);
    }

    #[test]
    fn test_check_server() {
        let engine = new_engine(HashMap::new());
        assert_eq!(engine.check_server().unwrap().status, "ok");
    }

    #[test]
    fn test_single_flight() {
        let engine = new_engine(HashMap::new());
        let _guard = engine.begin().unwrap();
        assert!(matches!(
            engine.upload_pending(),
            Err(Error::AlreadyInProgress)
        ));
        drop(_guard);
        assert!(engine.upload_pending().is_ok());
    }

    #[test]
    fn test_interrupt_stops_at_table_boundary() {
        let engine = new_engine(HashMap::new());
        engine.request_interrupt();
        // The scope is created after the interrupt, so it starts clean and
        // the sync proceeds.
        assert!(engine.upload_pending().unwrap().succeeded());
        // An interrupt delivered mid-operation flags the summary instead.
        let scope = engine.interrupt_handle.begin_interrupt_scope();
        engine.request_interrupt();
        let mut summary = SyncSummary::default();
        engine.run_upload(&scope, &mut summary);
        assert!(summary.interrupted);
    }
}
