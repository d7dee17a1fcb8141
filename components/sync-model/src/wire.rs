/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Request and response bodies for the sync endpoints. Everything is JSON
//! with camelCase keys; timestamps are RFC-3339 strings (see
//! [`types::Timestamp`]'s serde impls).

use crate::is_default;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use types::Timestamp;

/// `POST /sync/upload` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub table_name: String,
    pub records: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedRecord {
    pub record_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRecord {
    pub record_id: String,
    /// `referenced table -> ids absent on the server`.
    #[serde(default, skip_serializing_if = "is_default")]
    pub missing: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRecord {
    pub record_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRecord {
    pub record_id: String,
    pub error: String,
}

/// `POST /sync/upload` response. The four sets are disjoint; the counts are
/// denormalized so a UI can show progress without walking the arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub synced: Vec<SyncedRecord>,
    pub queued: Vec<QueuedRecord>,
    pub skipped: Vec<SkippedRecord>,
    pub failed: Vec<FailedRecord>,
    pub synced_count: usize,
    pub queued_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
}

impl UploadResponse {
    /// Refresh the `*Count` fields from the sets.
    pub fn tally(mut self) -> Self {
        self.synced_count = self.synced.len();
        self.queued_count = self.queued.len();
        self.skipped_count = self.skipped.len();
        self.failed_count = self.failed.len();
        self
    }
}

/// `GET /sync/download` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub records: Vec<Value>,
    pub has_more: bool,
    /// The greatest `server_updated_at` in this page, i.e. the `since` value
    /// that continues the walk.
    #[serde(default, skip_serializing_if = "is_default")]
    pub next_cursor: Option<Timestamp>,
}

/// `POST /dependencies/fetch` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyFetchRequest {
    pub table_name: String,
    pub record_ids: Vec<String>,
}

/// `POST /dependencies/fetch` response: the requested rows plus every row
/// they transitively depend on, keyed by table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyFetchResponse {
    pub dependencies: HashMap<String, Vec<Value>>,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    /// Seconds since the server started.
    pub uptime: u64,
    pub timestamp: Timestamp,
}

/// Error body attached to non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Header carrying the originating device on every sync request.
pub const HEADER_DEVICE_ID: &str = "X-Device-ID";
/// Header carrying the sender's wall clock, for server-side skew detection.
pub const HEADER_CLIENT_TIMESTAMP: &str = "X-Client-Timestamp";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upload_response_wire_shape() {
        let response = UploadResponse {
            synced: vec![SyncedRecord {
                record_id: "a".into(),
            }],
            queued: vec![QueuedRecord {
                record_id: "b".into(),
                missing: HashMap::from([("customers".to_string(), vec!["c1".to_string()])]),
            }],
            skipped: vec![],
            failed: vec![],
            ..Default::default()
        }
        .tally();
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["syncedCount"], json!(1));
        assert_eq!(value["queued"][0]["recordId"], json!("b"));
        assert_eq!(value["queued"][0]["missing"]["customers"], json!(["c1"]));
    }

    #[test]
    fn test_download_response_cursor() {
        let response = DownloadResponse {
            records: vec![json!({"id": "x"})],
            has_more: true,
            next_cursor: Some(Timestamp(1_704_103_200_000)),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["hasMore"], json!(true));
        assert_eq!(value["nextCursor"], json!("2024-01-01T10:00:00.000Z"));
        let parsed: DownloadResponse = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.next_cursor, response.next_cursor);
    }

    #[test]
    fn test_missing_cursor_is_omitted() {
        let response = DownloadResponse::default();
        let text = serde_json::to_string(&response).unwrap();
        assert!(!text.contains("nextCursor"));
        let parsed: DownloadResponse = serde_json::from_str("{\"records\":[],\"hasMore\":false}").unwrap();
        assert!(parsed.next_cursor.is_none());
    }
}
