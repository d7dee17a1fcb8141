/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The HTTP transport: synchronous request/response JSON with the device
//! identity header on every call and a hard per-request deadline. No retries
//! happen at this layer, and TLS is a deployment concern, not ours.

use crate::config::SyncConfig;
use crate::error::*;

use serde_json::Value;
use sync_model::{
    DependencyFetchRequest, DependencyFetchResponse, DownloadResponse, ErrorBody, HealthResponse,
    SyncTable, UploadRequest, UploadResponse, HEADER_CLIENT_TIMESTAMP, HEADER_DEVICE_ID,
};
use types::Timestamp;
use url::Url;

/// The wire seam of the orchestrator and the dependency queue. Tests swap in
/// an in-process implementation; production uses [`HttpTransport`].
pub trait SyncTransport: Send + Sync {
    /// `POST /sync/upload`
    fn upload(&self, table: SyncTable, records: Vec<Value>) -> Result<UploadResponse>;

    /// `GET /sync/download`
    fn download(
        &self,
        table: SyncTable,
        limit: u32,
        since: Option<Timestamp>,
    ) -> Result<DownloadResponse>;

    /// `POST /dependencies/fetch`
    fn fetch_dependencies(
        &self,
        table: SyncTable,
        record_ids: &[String],
    ) -> Result<DependencyFetchResponse>;

    /// `GET /health`
    fn health(&self) -> Result<HealthResponse>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
    base_url: Url,
    device_id: String,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig, device_id: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::NetworkUnreachable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.server_url.clone(),
            device_id,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::InvalidArgument(format!("bad endpoint {}: {}", path, e)))
    }

    /// Stamp the identity headers, send, and normalize failures. Non-2xx
    /// responses surface the server's structured error message when there is
    /// one, the HTTP status phrase otherwise.
    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<reqwest::blocking::Response> {
        let response = request
            .header(HEADER_DEVICE_ID, self.device_id.as_str())
            .header(HEADER_CLIENT_TIMESTAMP, Timestamp::now().to_rfc3339())
            .send()
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ErrorBody>()
            .map(|body| body.error)
            .unwrap_or_else(|_| {
                status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string()
            });
        Err(Error::ServerRejected {
            status: status.as_u16(),
            message,
        })
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::RequestTimeout
    } else {
        Error::NetworkUnreachable(err.to_string())
    }
}

impl SyncTransport for HttpTransport {
    fn upload(&self, table: SyncTable, records: Vec<Value>) -> Result<UploadResponse> {
        let body = UploadRequest {
            table_name: table.name().to_string(),
            records,
        };
        let response = self.send(self.client.post(self.url("/sync/upload")?).json(&body))?;
        Ok(response.json().map_err(transport_error)?)
    }

    fn download(
        &self,
        table: SyncTable,
        limit: u32,
        since: Option<Timestamp>,
    ) -> Result<DownloadResponse> {
        let mut query: Vec<(&str, String)> = vec![
            ("tableName", table.name().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339()));
        }
        let response = self.send(self.client.get(self.url("/sync/download")?).query(&query))?;
        Ok(response.json().map_err(transport_error)?)
    }

    fn fetch_dependencies(
        &self,
        table: SyncTable,
        record_ids: &[String],
    ) -> Result<DependencyFetchResponse> {
        let body = DependencyFetchRequest {
            table_name: table.name().to_string(),
            record_ids: record_ids.to_vec(),
        };
        let response = self.send(self.client.post(self.url("/dependencies/fetch")?).json(&body))?;
        Ok(response.json().map_err(transport_error)?)
    }

    fn health(&self) -> Result<HealthResponse> {
        let response = self.send(self.client.get(self.url("/health")?))?;
        Ok(response.json().map_err(transport_error)?)
    }
}
