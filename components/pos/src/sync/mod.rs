/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

pub mod engine;
pub mod incoming;
pub mod queue;
pub mod transport;
pub mod util;

use serde::Serialize;

/// Which half of a sync cycle an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncPhase {
    Upload,
    Download,
}

/// Outcome of uploading one table's pending batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableUpload {
    pub table: &'static str,
    pub sent: usize,
    pub synced: usize,
    pub queued: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome of downloading one table's pages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableDownload {
    pub table: &'static str,
    pub fetched: usize,
    pub applied: usize,
    pub skipped: usize,
    pub deferred: usize,
}

/// One (table, phase) failure. Sync keeps going past these; the caller gets
/// the whole list at the end.
#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    pub table: &'static str,
    pub phase: SyncPhase,
    pub error: String,
}

/// What a sync operation did. Partial progress is real progress: rows
/// already transitioned stay transitioned even when later tables failed or
/// the operation was interrupted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub uploads: Vec<TableUpload>,
    pub downloads: Vec<TableDownload>,
    pub failures: Vec<SyncFailure>,
    pub queue: Option<queue::QueueSummary>,
    pub interrupted: bool,
}

impl SyncSummary {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }
}
