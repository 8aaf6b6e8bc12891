use serde::{Deserialize, Serialize};
use shopscout_core::{
    ChatMessage, CompletionBackend, DeltaStream, Error, GenerationParams, Result,
};
use std::collections::VecDeque;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn base_url_from_env() -> Option<String> {
    env("SHOPSCOUT_OPENAI_COMPAT_BASE_URL")
}

fn api_key_from_env() -> Option<String> {
    env("SHOPSCOUT_OPENAI_COMPAT_API_KEY")
}

const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Streaming client for any `/v1/chat/completions`-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

impl OpenAiCompatClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let base_url = base_url_from_env().ok_or_else(|| {
            Error::NotConfigured("missing SHOPSCOUT_OPENAI_COMPAT_BASE_URL".to_string())
        })?;
        Ok(Self::new(client, base_url, api_key_from_env()))
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_chat_completions(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u64,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Incremental `text/event-stream` decoder.
///
/// Network chunks split events at arbitrary byte offsets, including inside
/// multi-byte characters, so the buffer stays raw bytes and lines are only
/// decoded once a full `\n` arrives. Comment lines (keep-alives) and blank
/// separators are dropped; `data: [DONE]` ends the stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Feed one network chunk; returns the `data:` payloads completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.buf.extend_from_slice(chunk);

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
            let mut line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload == "[DONE]" {
                self.done = true;
                break;
            }
            out.push(payload.to_string());
        }
        out
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

fn delta_from_payload(payload: &str) -> Option<String> {
    // Unparseable payloads are provider noise (keep-alives, usage frames),
    // not fatal.
    let parsed: ChatCompletionsChunk = serde_json::from_str(payload).ok()?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty())
}

#[async_trait::async_trait]
impl CompletionBackend for OpenAiCompatClient {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<DeltaStream> {
        let req = ChatCompletionsRequest {
            model: &params.model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stream: true,
        };

        let mut rb = self
            .client
            .post(self.endpoint_chat_completions())
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        let resp = rb
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Completion(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Completion(format!(
                "chat.completions HTTP {status}"
            )));
        }

        struct StreamState {
            resp: reqwest::Response,
            decoder: SseDecoder,
            pending: VecDeque<String>,
        }

        let state = StreamState {
            resp,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
        };

        // Dropping the returned stream drops the response and aborts the
        // transfer, so consumer cancellation reaches the producer.
        let stream = futures_util::stream::try_unfold(state, |mut st| async move {
            loop {
                if let Some(delta) = st.pending.pop_front() {
                    return Ok(Some((delta, st)));
                }
                if st.decoder.is_done() {
                    return Ok(None);
                }
                let chunk = st
                    .resp
                    .chunk()
                    .await
                    .map_err(|e| Error::Completion(e.to_string()))?;
                let Some(chunk) = chunk else {
                    return Ok(None);
                };
                for payload in st.decoder.feed(&chunk) {
                    if let Some(delta) = delta_from_payload(&payload) {
                        st.pending.push_back(delta);
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, http::StatusCode, routing::post, Router};
    use futures_util::StreamExt;
    use shopscout_core::ChatRole;
    use std::net::SocketAddr;

    fn params() -> GenerationParams {
        GenerationParams {
            model: "test-model".to_string(),
            temperature: 0.3,
            max_tokens: 500,
        }
    }

    #[test]
    fn request_serializes_wire_shape() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let req = ChatCompletionsRequest {
            model: "m",
            messages: &messages,
            max_tokens: 500,
            temperature: 0.3,
            stream: true,
        };
        let js = serde_json::to_value(&req).unwrap();
        assert_eq!(js["stream"], true);
        assert_eq!(js["messages"][0]["role"], "system");
        assert_eq!(js["messages"][1]["content"], "hi");
    }

    #[test]
    fn decoder_reassembles_payloads_split_across_chunks() {
        let mut d = SseDecoder::default();
        assert!(d.feed(b"data: {\"choices\":[{\"del").is_empty());
        let got = d.feed(b"ta\":{\"content\":\"Top\"}}]}\n\n");
        assert_eq!(got, vec!["{\"choices\":[{\"delta\":{\"content\":\"Top\"}}]}"]);
    }

    #[test]
    fn decoder_handles_crlf_comments_and_done() {
        let mut d = SseDecoder::default();
        let got = d.feed(b": keep-alive\r\ndata: one\r\n\r\ndata: two\ndata: [DONE]\ndata: late\n");
        assert_eq!(got, vec!["one", "two"]);
        assert!(d.is_done());
        assert!(d.feed(b"data: more\n").is_empty());
    }

    #[test]
    fn decoder_ignores_incomplete_trailing_line() {
        let mut d = SseDecoder::default();
        assert!(d.feed(b"data: partial").is_empty());
        assert_eq!(d.feed(b" line\n"), vec!["partial line"]);
    }

    #[test]
    fn delta_parsing_skips_noise_and_empty_content() {
        assert_eq!(
            delta_from_payload("{\"choices\":[{\"delta\":{\"content\":\" 3\"}}]}").as_deref(),
            Some(" 3")
        );
        assert_eq!(delta_from_payload("{\"choices\":[{\"delta\":{}}]}"), None);
        assert_eq!(
            delta_from_payload("{\"choices\":[{\"delta\":{\"content\":\"\"}}]}"),
            None
        );
        assert_eq!(delta_from_payload("not json"), None);
        assert_eq!(delta_from_payload("{}"), None);
    }

    fn sse_body(deltas: &[&str]) -> String {
        let mut out = String::new();
        for d in deltas {
            out.push_str(&format!(
                "data: {{\"choices\":[{{\"delta\":{{\"content\":{}}}}}]}}\n\n",
                serde_json::to_string(d).unwrap()
            ));
        }
        out.push_str("data: [DONE]\n\n");
        out
    }

    async fn serve_sse(body: String) -> SocketAddr {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let body = body.clone();
                async move { ([(header::CONTENT_TYPE, "text/event-stream")], body) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn stream_chat_yields_deltas_in_order() {
        let addr = serve_sse(sse_body(&["Top", " 3", "", " picks:"])).await;
        let client =
            OpenAiCompatClient::new(reqwest::Client::new(), format!("http://{addr}"), None);

        let messages = vec![ChatMessage::user("best earbuds")];
        let mut stream = client.stream_chat(&messages, &params()).await.unwrap();
        let mut got = Vec::new();
        while let Some(d) = stream.next().await {
            got.push(d.unwrap());
        }
        // The empty delta is dropped at the source.
        assert_eq!(got, vec!["Top", " 3", " picks:"]);
    }

    #[tokio::test]
    async fn stream_chat_fails_on_non_success_status() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::UNAUTHORIZED, "no key") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client =
            OpenAiCompatClient::new(reqwest::Client::new(), format!("http://{addr}"), None);
        let err = client
            .stream_chat(&[ChatMessage::user("hi")], &params())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Completion(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn zero_delta_stream_is_a_valid_empty_reply() {
        let addr = serve_sse(sse_body(&[])).await;
        let client =
            OpenAiCompatClient::new(reqwest::Client::new(), format!("http://{addr}"), None);

        let mut stream = client
            .stream_chat(&[ChatMessage::user("hi")], &params())
            .await
            .unwrap();
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn chat_role_roundtrips_through_wire_shape() {
        let msg: ChatMessage =
            serde_json::from_str("{\"role\":\"assistant\",\"content\":\"ok\"}").unwrap();
        assert_eq!(msg.role, ChatRole::Assistant);
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let c = OpenAiCompatClient::new(reqwest::Client::new(), "http://x/", None);
        assert_eq!(
            c.endpoint_chat_completions(),
            "http://x/v1/chat/completions"
        );
    }
}
