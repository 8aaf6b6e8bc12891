use crate::extract::norm_ws;
use shopscout_core::{Error, Result, SearchProvider, SearchQuery, SearchResponse, SearchResult};
use std::collections::BTreeMap;
use std::time::Instant;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn search_endpoint_from_env() -> Option<String> {
    env("SHOPSCOUT_SEARCH_ENDPOINT")
}

fn timeout_ms_from_query(q: &SearchQuery) -> u64 {
    // Results pages can hang indefinitely without an explicit timeout.
    // Keep a conservative cap even if callers pass something huge.
    q.timeout_ms.unwrap_or(20_000).clamp(1_000, 60_000)
}

fn is_http(u: &url::Url) -> bool {
    matches!(u.scheme(), "http" | "https")
}

/// Unwrap a results-page link to its destination URL.
///
/// Search engines wrap organic links in a `/url?q=<dest>` redirect; the
/// destination is what callers want. Plain absolute links pass through.
/// Returns `None` for anything that does not resolve to an http(s) URL.
fn unwrap_redirect(href: &str, base: &url::Url) -> Option<url::Url> {
    let abs = match url::Url::parse(href) {
        Ok(u) => u,
        Err(_) => base.join(href).ok()?,
    };
    if abs.path() == "/url" {
        let dest = abs
            .query_pairs()
            .find(|(k, _)| k == "q" || k == "url")
            .map(|(_, v)| v.into_owned())?;
        return url::Url::parse(&dest).ok().filter(is_http);
    }
    Some(abs).filter(is_http)
}

/// Best-effort snippet: the block that follows the result's link container.
fn snippet_for(anchor: &html_scraper::ElementRef) -> Option<String> {
    let parent = anchor.parent()?;
    let sibling = parent
        .next_siblings()
        .filter_map(html_scraper::ElementRef::wrap)
        .next()?;
    let text = norm_ws(&sibling.text().collect::<Vec<_>>().join(" "));
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Parse organic results out of a search results page.
///
/// An organic result is an anchor wrapping a heading. Results are returned in
/// page order, up to `max_results`; entries missing a link or a non-empty
/// title are skipped rather than failing the whole parse.
pub fn parse_results(html: &str, base: &url::Url, max_results: usize) -> Vec<SearchResult> {
    let anchor_sel = match html_scraper::Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let heading_sel = match html_scraper::Selector::parse("h3") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let doc = html_scraper::Html::parse_document(html);
    let mut out = Vec::new();
    for anchor in doc.select(&anchor_sel) {
        if out.len() >= max_results {
            break;
        }
        let Some(heading) = anchor.select(&heading_sel).next() else {
            continue;
        };
        let title = norm_ws(&heading.text().collect::<Vec<_>>().join(" "));
        if title.is_empty() {
            continue;
        }
        let href = match anchor.value().attr("href") {
            Some(h) => h.trim(),
            None => continue,
        };
        if href.is_empty() {
            continue;
        }
        let Some(dest) = unwrap_redirect(href, base) else {
            continue;
        };

        out.push(SearchResult {
            url: dest.to_string(),
            title: Some(title),
            snippet: snippet_for(&anchor),
            source: "google".to_string(),
        });
    }
    out
}

/// Resolves free-text queries to candidate URLs by scraping a search engine's
/// HTML results page (no API key required).
#[derive(Debug, Clone)]
pub struct GoogleSearchProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl GoogleSearchProvider {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Endpoint defaults to Google's results page; SHOPSCOUT_SEARCH_ENDPOINT
    /// overrides it (fixture servers in tests rely on this).
    pub fn from_env(client: reqwest::Client) -> Self {
        let endpoint = search_endpoint_from_env()
            .unwrap_or_else(|| "https://www.google.com/search".to_string());
        Self::new(client, endpoint)
    }

    fn query_url(&self, query: &str) -> Result<url::Url> {
        let mut u =
            url::Url::parse(&self.endpoint).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        u.query_pairs_mut().append_pair("q", query);
        Ok(u)
    }
}

#[async_trait::async_trait]
impl SearchProvider for GoogleSearchProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let max_results = q.max_results.unwrap_or(3).min(20);
        let timeout_ms = timeout_ms_from_query(q);

        let url = self.query_url(&q.query)?;
        let resp = self
            .client
            .get(url.clone())
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        // Non-2xx is fatal here: the results page either works or it doesn't,
        // and an empty-but-successful page is the "no results" signal instead.
        if !status.is_success() {
            return Err(Error::Search(format!("results page HTTP {status}")));
        }

        let html = resp.text().await.map_err(|e| Error::Search(e.to_string()))?;
        let results = parse_results(&html, &url, max_results);

        let mut timings_ms = BTreeMap::new();
        timings_ms.insert("search".to_string(), t0.elapsed().as_millis());
        tracing::debug!(query = %q.query, results = results.len(), "search resolved");

        Ok(SearchResponse {
            results,
            provider: "google".to_string(),
            timings_ms,
        })
    }
}
