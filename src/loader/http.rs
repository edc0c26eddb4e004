//! Remote part files over HTTP range requests.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tracing::debug;

use crate::config::HttpConfig;
use crate::error::{IndexError, Result};

use super::handles::TrackedHandle;
use super::RangeReader;

/// TCP keep-alive probe interval when keep-alive is enabled.
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// Build the pooled blocking client for `config`.
pub fn build_client(config: &HttpConfig) -> Result<Client> {
    let idle_per_host = if config.keep_alive {
        config.max_host_connections
    } else {
        0
    };
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.read_timeout())
        .pool_max_idle_per_host(idle_per_host)
        .tcp_keepalive(config.keep_alive.then_some(TCP_KEEPALIVE));
    if config.stale_check {
        builder = builder.pool_idle_timeout(config.connect_timeout());
    }
    builder.build().map_err(|e| IndexError::Http {
        location: "<client>".to_string(),
        message: e.to_string(),
    })
}

/// `host:port` of a URL, the key for per-host limits. Unparseable URLs
/// are their own key.
pub fn host_key(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => url.to_string(),
        },
        Err(_) => url.to_string(),
    }
}

// ── Connection Gate ────────────────────────────────────────────────

/// Caps the number of in-flight HTTP requests, either across all hosts or
/// for a single host.
#[derive(Debug)]
pub struct ConnectionGate {
    max: usize,
    in_use: Mutex<usize>,
    freed: Condvar,
}

impl ConnectionGate {
    /// A gate admitting `max` concurrent requests. 0 means unlimited.
    pub fn new(max: usize) -> Self {
        Self {
            max,
            in_use: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    /// Wait up to `timeout` for a slot.
    pub fn acquire(&self, timeout: Duration) -> Option<GatePermit<'_>> {
        let mut in_use = self.in_use.lock().unwrap();
        if self.max > 0 {
            let (guard, result) = self
                .freed
                .wait_timeout_while(in_use, timeout, |n| *n >= self.max)
                .unwrap();
            in_use = guard;
            if result.timed_out() && *in_use >= self.max {
                return None;
            }
        }
        *in_use += 1;
        Some(GatePermit { gate: self })
    }

    pub fn in_use(&self) -> usize {
        *self.in_use.lock().unwrap()
    }

    pub fn capacity(&self) -> usize {
        self.max
    }
}

/// Slot held for the duration of one request.
pub struct GatePermit<'a> {
    gate: &'a ConnectionGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        let mut in_use = self.gate.in_use.lock().unwrap();
        *in_use = in_use.saturating_sub(1);
        self.gate.freed.notify_one();
    }
}

// ── Reader ─────────────────────────────────────────────────────────

/// Range reader over an HTTP(S) URL.
///
/// Each request holds a slot in the loader-wide gate and one in the gate of
/// its host.
pub struct HttpRangeReader {
    url: String,
    client: Option<Client>,
    gate: Arc<ConnectionGate>,
    host_gate: Arc<ConnectionGate>,
    wait: Duration,
    pos: u64,
    handle: TrackedHandle,
}

impl HttpRangeReader {
    pub fn new(
        url: &str,
        client: Client,
        gate: Arc<ConnectionGate>,
        host_gate: Arc<ConnectionGate>,
        wait: Duration,
        handle: TrackedHandle,
    ) -> Self {
        Self {
            url: url.to_string(),
            client: Some(client),
            gate,
            host_gate,
            wait,
            pos: 0,
            handle,
        }
    }

    fn client(&self) -> Result<&Client> {
        if self.handle.is_closed() {
            return Err(IndexError::ReaderClosed(self.url.clone()));
        }
        self.client
            .as_ref()
            .ok_or_else(|| IndexError::ReaderClosed(self.url.clone()))
    }

    fn http_error(&self, message: impl Into<String>) -> IndexError {
        IndexError::Http {
            location: self.url.clone(),
            message: message.into(),
        }
    }
}

impl RangeReader for HttpRangeReader {
    fn location(&self) -> &str {
        &self.url
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.client()?;
        self.pos = offset;
        Ok(())
    }

    fn read_range(&mut self, offset: u64, max_len: u64) -> Result<Vec<u8>> {
        if max_len == 0 {
            return Ok(Vec::new());
        }
        let client = self.client()?.clone();
        let _permit = self
            .gate
            .acquire(self.wait)
            .ok_or_else(|| self.http_error("connection limit reached"))?;
        let _host_permit = self
            .host_gate
            .acquire(self.wait)
            .ok_or_else(|| self.http_error("per-host connection limit reached"))?;

        let last = offset + max_len - 1;
        debug!(url = %self.url, offset, len = max_len, "HTTP range request");
        let response = client
            .get(&self.url)
            .header(RANGE, format!("bytes={offset}-{last}"))
            .send()
            .map_err(|e| self.http_error(e.to_string()))?;

        let status = response.status();
        let body = match status {
            StatusCode::PARTIAL_CONTENT => response
                .bytes()
                .map_err(|e| self.http_error(e.to_string()))?
                .to_vec(),
            // Server ignored the Range header; cut the range out ourselves.
            StatusCode::OK => {
                let full = response
                    .bytes()
                    .map_err(|e| self.http_error(e.to_string()))?;
                let start = (offset as usize).min(full.len());
                let end = (offset.saturating_add(max_len) as usize).min(full.len());
                full[start..end].to_vec()
            }
            other => return Err(self.http_error(format!("unexpected status {other}"))),
        };
        self.pos = offset + body.len() as u64;
        Ok(body)
    }

    fn close(&mut self) {
        self.client = None;
        self.handle.mark_closed();
    }

    fn is_open(&self) -> bool {
        self.client.is_some() && !self.handle.is_closed()
    }
}
