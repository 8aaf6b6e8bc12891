use crate::extract;
use crate::PageFetcher;
use futures_util::future::join_all;
use shopscout_core::{PageOutcome, Result, SearchProvider, SearchQuery};
use std::sync::Arc;

/// How many candidate URLs the search fallback contributes.
const SEARCH_RESULT_CAP: usize = 3;

const DEFAULT_FETCH_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_MAX_PAGE_CHARS: usize = 20_000;

/// Scan free text for absolute http(s) URLs.
///
/// Token-based: whitespace delimits candidates, trailing sentence punctuation
/// is trimmed, and anything `url::Url` rejects is not a URL. Order is
/// preserved and duplicates are kept.
pub fn find_urls(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for token in text.split_whitespace() {
        let t = token
            .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')' | ']' | '"' | '\''));
        if !(t.starts_with("http://") || t.starts_with("https://")) {
            continue;
        }
        if url::Url::parse(t).is_ok() {
            out.push(t.to_string());
        }
    }
    out
}

/// Turns a user query into concatenated page text: explicit links first,
/// search fallback only when asked for, empty text when neither applies.
pub struct ContextResolver {
    fetcher: PageFetcher,
    search: Arc<dyn SearchProvider>,
    fetch_timeout_ms: u64,
    max_page_chars: usize,
}

impl ContextResolver {
    pub fn new(fetcher: PageFetcher, search: Arc<dyn SearchProvider>) -> Self {
        Self {
            fetcher,
            search,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            max_page_chars: DEFAULT_MAX_PAGE_CHARS,
        }
    }

    pub fn with_fetch_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.fetch_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_page_chars(mut self, max_page_chars: usize) -> Self {
        self.max_page_chars = max_page_chars;
        self
    }

    async fn page_outcome(&self, url: &str) -> PageOutcome {
        match self.fetcher.fetch_html(url, self.fetch_timeout_ms).await {
            Ok(html) => {
                let text = extract::paragraph_text(&html);
                if text.is_empty() {
                    return PageOutcome::NoContext;
                }
                let (text, truncated) = extract::truncate_chars(&text, self.max_page_chars);
                if truncated {
                    tracing::debug!(%url, max_chars = self.max_page_chars, "page text truncated");
                }
                PageOutcome::Fetched(text)
            }
            Err(e) => PageOutcome::Failed(e.to_string()),
        }
    }

    /// Resolve the context for one query.
    ///
    /// Explicit URLs in the query always win; the search fallback only runs
    /// when the query has none and the caller opted in. A page that fails to
    /// fetch or extract is skipped, it never aborts the other pages. The only
    /// hard failure is the fallback search itself: at that point it is the
    /// sole operation and there is nothing left to fall back to.
    ///
    /// Empty output is a meaningful value ("no context available"), not an
    /// error.
    pub async fn resolve(&self, query: &str, allow_search_fallback: bool) -> Result<String> {
        let mut urls = find_urls(query);
        if urls.is_empty() {
            if !allow_search_fallback {
                return Ok(String::new());
            }
            let q = SearchQuery {
                query: query.to_string(),
                max_results: Some(SEARCH_RESULT_CAP),
                timeout_ms: None,
            };
            let resp = self.search.search(&q).await?;
            urls = resp
                .results
                .into_iter()
                .take(SEARCH_RESULT_CAP)
                .map(|r| r.url)
                .collect();
            if urls.is_empty() {
                return Ok(String::new());
            }
        }

        // Fetches are independent; run them concurrently but merge in the
        // original resolution order.
        let outcomes = join_all(urls.iter().map(|u| self.page_outcome(u))).await;

        let mut parts: Vec<String> = Vec::new();
        for (url, outcome) in urls.iter().zip(outcomes) {
            match outcome {
                PageOutcome::Fetched(text) => parts.push(text),
                PageOutcome::NoContext => {
                    tracing::debug!(%url, "page had no paragraph text");
                }
                PageOutcome::Failed(reason) => {
                    tracing::warn!(%url, %reason, "skipping page");
                }
            }
        }
        Ok(parts.join("\n"))
    }
}
