//! Shared HTTP client, SSE parsing, and auth utilities.

use std::sync::OnceLock;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::error::RelayError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// Streams can run for a long time, so only the connect phase is bounded.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    if let Some(api_key) = api_key {
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    headers
}

/// Parse an SSE "data:" line, returning None for "[DONE]" and non-data lines.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Map a non-success HTTP status to an error.
pub fn status_to_error(status: u16, body: &str) -> RelayError {
    match status {
        401 | 403 => RelayError::Authentication(body.to_string()),
        429 => RelayError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => RelayError::api(status, body),
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}

/// Splits an SSE byte stream into lines.
///
/// Bytes are buffered until a full line arrives, so a multi-byte character
/// split across network frames is decoded intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and drain every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line = self.pending.drain(..=end).collect::<Vec<_>>();
            lines.push(decode_line(&line[..end]));
        }
        lines
    }

    /// The unterminated tail left when the body ends, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.pending);
        Some(decode_line(&tail))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
