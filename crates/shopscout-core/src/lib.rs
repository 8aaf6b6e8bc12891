use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("completion failed: {0}")]
    Completion(String),
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One entry of a conversation history. Histories are append-only: once a
/// message is in a session, it is never edited in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: Option<usize>,
    pub timeout_ms: Option<u64>,
}

/// Title and snippet are best-effort and may be missing; `url` is the only
/// field consumed downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub provider: String,
    pub timings_ms: BTreeMap<String, u128>,
}

/// Outcome of resolving one candidate page while assembling context.
///
/// "Nothing there" and "it broke" are different facts and callers merge them
/// differently: `NoContext` and `Failed` pages contribute nothing to the
/// merged text, but only `Failed` is worth logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    NoContext,
    Fetched(String),
    Failed(String),
}

impl PageOutcome {
    pub fn into_text(self) -> Option<String> {
        match self {
            PageOutcome::Fetched(text) => Some(text),
            PageOutcome::NoContext | PageOutcome::Failed(_) => None,
        }
    }
}

/// Ordered, lazy, finite sequence of completion text deltas.
///
/// Dropping the stream cancels the in-flight generation.
pub type DeltaStream = futures_util::stream::BoxStream<'static, Result<String>>;

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse>;
}

#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<DeltaStream>;
}

/// Sink for one outgoing assistant message. Per turn the caller invokes
/// `begin_message`, then `push_token` zero or more times, then
/// `finalize_message`, in that order.
#[async_trait::async_trait]
pub trait ChatTransport: Send {
    async fn begin_message(&mut self) -> Result<()>;
    async fn push_token(&mut self, token: &str) -> Result<()>;
    async fn finalize_message(&mut self) -> Result<()>;
}
