/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Engine configuration. Defaults match a single-shop deployment with the
/// server on the same LAN; every knob can be overridden through `POS_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the sync server.
    pub server_url: Url,
    /// Max records per upload batch and per download page.
    pub batch_size: u32,
    /// Attempts before a dependency-queue item is marked FAILED.
    pub max_retries: u32,
    /// Per-request deadline on the HTTP transport.
    pub request_timeout: Duration,
    /// Backoff schedule between dependency-queue retries; the final entry
    /// repeats for later attempts.
    pub retry_backoff: Vec<Duration>,
    /// Where the sqlite store lives. None means the caller picks.
    pub store_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: Url::parse("http://localhost:3001").unwrap(),
            batch_size: 500,
            max_retries: 10,
            request_timeout: Duration::from_secs(30),
            retry_backoff: [1000, 2000, 4000, 8000, 16000]
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            store_path: None,
        }
    }
}

impl SyncConfig {
    /// Build a config from the environment, falling back to defaults for
    /// anything unset or unparsable (which is logged, not fatal).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = read_env("POS_SERVER_URL") {
            match Url::parse(&url) {
                Ok(url) => config.server_url = url,
                Err(e) => log::warn!("ignoring invalid POS_SERVER_URL {:?}: {}", url, e),
            }
        }
        if let Some(n) = read_parsed::<u32>("POS_BATCH_SIZE") {
            config.batch_size = n.max(1);
        }
        if let Some(n) = read_parsed::<u32>("POS_MAX_RETRIES") {
            config.max_retries = n;
        }
        if let Some(ms) = read_parsed::<u64>("POS_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(list) = read_env("POS_RETRY_BACKOFF_MS") {
            let parsed: Vec<Duration> = list
                .split(',')
                .filter_map(|part| part.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .collect();
            if parsed.is_empty() {
                log::warn!("ignoring empty POS_RETRY_BACKOFF_MS {:?}", list);
            } else {
                config.retry_backoff = parsed;
            }
        }
        if let Some(path) = read_env("POS_STORE_PATH") {
            config.store_path = Some(PathBuf::from(path));
        }
        config
    }

    /// Backoff to wait before retry number `attempt` (0-based); attempts past
    /// the end of the schedule reuse the final entry.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.retry_backoff.len().saturating_sub(1));
        self.retry_backoff
            .get(idx)
            .copied()
            .unwrap_or(Duration::from_secs(1))
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = read_env(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring unparsable {} {:?}", name, raw);
            None
        }
    }
}
