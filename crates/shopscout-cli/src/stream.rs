use futures_util::StreamExt;
use shopscout_core::{ChatMessage, ChatTransport, CompletionBackend, GenerationParams, Result};

/// Drive one completion and assemble the reply.
///
/// Deltas are consumed strictly in arrival order: each non-empty delta goes to
/// the transport immediately and into the accumulator. The loop is sequential
/// by construction. Zero deltas is a valid, empty reply.
///
/// The transport is only opened once the completion call itself has been
/// accepted, so a backend that fails up front leaves the transport untouched.
pub async fn stream_reply(
    backend: &dyn CompletionBackend,
    history: &[ChatMessage],
    params: &GenerationParams,
    transport: &mut dyn ChatTransport,
) -> Result<String> {
    let mut stream = backend.stream_chat(history, params).await?;

    transport.begin_message().await?;
    let mut reply = String::new();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        if delta.is_empty() {
            continue;
        }
        transport.push_token(&delta).await?;
        reply.push_str(&delta);
    }
    transport.finalize_message().await?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopscout_core::{DeltaStream, Error};

    struct ScriptedBackend {
        deltas: Vec<Result<&'static str>>,
    }

    impl ScriptedBackend {
        fn new(deltas: Vec<Result<&'static str>>) -> Self {
            Self { deltas }
        }
    }

    #[async_trait::async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn stream_chat(
            &self,
            _messages: &[ChatMessage],
            _params: &GenerationParams,
        ) -> Result<DeltaStream> {
            let items: Vec<Result<String>> = self
                .deltas
                .iter()
                .map(|d| match d {
                    Ok(s) => Ok(s.to_string()),
                    Err(e) => Err(Error::Completion(e.to_string())),
                })
                .collect();
            Ok(Box::pin(futures_util::stream::iter(items)))
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        began: usize,
        tokens: Vec<String>,
        finalized: usize,
    }

    #[async_trait::async_trait]
    impl ChatTransport for RecordingTransport {
        async fn begin_message(&mut self) -> Result<()> {
            self.began += 1;
            Ok(())
        }

        async fn push_token(&mut self, token: &str) -> Result<()> {
            self.tokens.push(token.to_string());
            Ok(())
        }

        async fn finalize_message(&mut self) -> Result<()> {
            self.finalized += 1;
            Ok(())
        }
    }

    fn params() -> GenerationParams {
        GenerationParams {
            model: "test-model".to_string(),
            temperature: 0.3,
            max_tokens: 500,
        }
    }

    #[tokio::test]
    async fn forwards_each_delta_and_returns_the_whole_reply() {
        let backend = ScriptedBackend::new(vec![Ok("Top"), Ok(" 3"), Ok(" picks:")]);
        let mut transport = RecordingTransport::default();

        let reply = stream_reply(&backend, &[ChatMessage::user("hi")], &params(), &mut transport)
            .await
            .unwrap();
        assert_eq!(reply, "Top 3 picks:");
        assert_eq!(transport.tokens, vec!["Top", " 3", " picks:"]);
        assert_eq!(transport.began, 1);
        assert_eq!(transport.finalized, 1);
    }

    #[tokio::test]
    async fn empty_deltas_are_not_forwarded() {
        let backend = ScriptedBackend::new(vec![Ok(""), Ok("a"), Ok(""), Ok("b")]);
        let mut transport = RecordingTransport::default();

        let reply = stream_reply(&backend, &[ChatMessage::user("hi")], &params(), &mut transport)
            .await
            .unwrap();
        assert_eq!(reply, "ab");
        assert_eq!(transport.tokens, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn zero_tokens_is_a_valid_empty_reply() {
        let backend = ScriptedBackend::new(vec![]);
        let mut transport = RecordingTransport::default();

        let reply = stream_reply(&backend, &[ChatMessage::user("hi")], &params(), &mut transport)
            .await
            .unwrap();
        assert_eq!(reply, "");
        assert_eq!(transport.began, 1);
        assert_eq!(transport.finalized, 1);
    }

    #[tokio::test]
    async fn mid_stream_failure_propagates_without_finalizing() {
        let backend = ScriptedBackend::new(vec![Ok("a"), Err(Error::Completion("cut".into()))]);
        let mut transport = RecordingTransport::default();

        let err = stream_reply(&backend, &[ChatMessage::user("hi")], &params(), &mut transport)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Completion(_)), "got {err:?}");
        assert_eq!(transport.tokens, vec!["a"]);
        assert_eq!(transport.finalized, 0);
    }
}
