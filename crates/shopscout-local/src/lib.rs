use shopscout_core::{Error, Result};
use std::time::Duration;

pub mod context;
pub mod extract;
pub mod openai_compat;
pub mod search;

/// Default hard cap on bytes read from a fetched page body.
///
/// Product pages are routinely multi-megabyte; everything past this point is
/// chrome and tracking payloads, not paragraphs.
const DEFAULT_MAX_BYTES: usize = 2 * 1024 * 1024;

/// Shared HTTP client with safety defaults: avoid "hang forever" on DNS/TLS/body
/// stalls. Per-request timeouts can still tighten this.
pub fn default_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("shopscout-local/0.1")
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| Error::Fetch(e.to_string()))
}

/// Retrieves raw HTML for a single URL. One request, no retries: callers that
/// can tolerate a missing page are expected to skip on error.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl PageFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub async fn fetch_html(&self, url: &str, timeout_ms: u64) -> Result<String> {
        let url = url::Url::parse(url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let t0 = std::time::Instant::now();

        let resp = self
            .client
            .get(url.clone())
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("HTTP {status} fetching {url}")));
        }

        let mut bytes: Vec<u8> = Vec::new();
        let mut stream = resp.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Fetch(e.to_string()))?;
            if bytes.len().saturating_add(chunk.len()) > self.max_bytes {
                let can_take = self.max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                tracing::debug!(%url, max_bytes = self.max_bytes, "page body truncated");
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        tracing::debug!(%url, elapsed_ms = t0.elapsed().as_millis() as u64, bytes = bytes.len(), "fetched page");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
