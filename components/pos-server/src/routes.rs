/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::error::*;
use crate::store::ServerDb;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use sync_model::{
    DependencyFetchRequest, DependencyFetchResponse, DownloadResponse, HealthResponse,
    UploadRequest, UploadResponse, HEADER_CLIENT_TIMESTAMP, HEADER_DEVICE_ID,
};
use types::Timestamp;

/// Sender clocks further out than this get a log line; last-writer-wins
/// still runs on whatever they claim.
const CLOCK_SKEW_WARN: Duration = Duration::from_secs(30);

pub fn router(db: Arc<ServerDb>) -> Router {
    Router::new()
        .route("/sync/upload", post(upload))
        .route("/sync/download", get(download))
        .route("/dependencies/fetch", post(fetch_dependencies))
        .route("/health", get(health))
        .with_state(db)
}

fn require_device_id(headers: &HeaderMap) -> ServerResult<String> {
    headers
        .get(HEADER_DEVICE_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ServerError::MissingHeader(HEADER_DEVICE_ID))
}

fn note_clock_skew(headers: &HeaderMap, device_id: &str) {
    let claimed = headers
        .get(HEADER_CLIENT_TIMESTAMP)
        .and_then(|v| v.to_str().ok())
        .and_then(Timestamp::from_rfc3339);
    if let Some(claimed) = claimed {
        let now = Timestamp::now();
        let skew = now
            .duration_since(claimed)
            .or_else(|| claimed.duration_since(now))
            .unwrap_or_default();
        if skew > CLOCK_SKEW_WARN {
            log::warn!("device {} clock is {:?} off server time", device_id, skew);
        }
    }
}

/// Run a blocking store call off the async worker threads.
async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ServerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("worker task failed: {e}")))?
}

async fn upload(
    State(db): State<Arc<ServerDb>>,
    headers: HeaderMap,
    Json(request): Json<UploadRequest>,
) -> ServerResult<Json<UploadResponse>> {
    let device_id = require_device_id(&headers)?;
    note_clock_skew(&headers, &device_id);
    let response =
        blocking(move || db.upload(&device_id, &request.table_name, request.records)).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadParams {
    table_name: String,
    limit: Option<u32>,
    since: Option<String>,
}

fn parse_since(raw: Option<&str>) -> ServerResult<Option<Timestamp>> {
    match raw {
        None | Some("") => Ok(None),
        Some(raw) => Timestamp::from_rfc3339(raw)
            .or_else(|| raw.parse::<u64>().ok().map(Timestamp))
            .map(Some)
            .ok_or_else(|| ServerError::BadRequest(format!("invalid since cursor: {raw}"))),
    }
}

async fn download(
    State(db): State<Arc<ServerDb>>,
    headers: HeaderMap,
    Query(params): Query<DownloadParams>,
) -> ServerResult<Json<DownloadResponse>> {
    let device_id = require_device_id(&headers)?;
    note_clock_skew(&headers, &device_id);
    let since = parse_since(params.since.as_deref())?;
    let limit = params.limit.unwrap_or(500).clamp(1, 1000);
    let response =
        blocking(move || db.download(&device_id, &params.table_name, limit, since)).await?;
    Ok(Json(response))
}

async fn fetch_dependencies(
    State(db): State<Arc<ServerDb>>,
    Json(request): Json<DependencyFetchRequest>,
) -> ServerResult<Json<DependencyFetchResponse>> {
    let response =
        blocking(move || db.fetch_dependencies(&request.table_name, &request.record_ids)).await?;
    Ok(Json(response))
}

async fn health(State(db): State<Arc<ServerDb>>) -> ServerResult<Json<HealthResponse>> {
    let response = blocking(move || db.health()).await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_since() {
        assert_eq!(parse_since(None).unwrap(), None);
        assert_eq!(parse_since(Some("")).unwrap(), None);
        assert_eq!(
            parse_since(Some("2024-01-01T10:00:00Z")).unwrap(),
            Some(Timestamp(1_704_103_200_000))
        );
        assert_eq!(
            parse_since(Some("1704103200000")).unwrap(),
            Some(Timestamp(1_704_103_200_000))
        );
        assert!(parse_since(Some("yesterday")).is_err());
    }

    #[test]
    fn test_require_device_id() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            require_device_id(&headers),
            Err(ServerError::MissingHeader(_))
        ));
        headers.insert(HEADER_DEVICE_ID, "dev-a".parse().unwrap());
        assert_eq!(require_device_id(&headers).unwrap(), "dev-a");
    }
}
