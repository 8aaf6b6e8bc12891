use crate::stream;
use shopscout_core::{
    ChatMessage, ChatRole, ChatTransport, CompletionBackend, GenerationParams, Result,
};
use shopscout_local::context::ContextResolver;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Static instruction text. Resolved product context is appended after it,
/// never in place of it.
pub const SYSTEM_PROMPT: &str = "\
You are an expert consumer product researcher. When the user asks for a product \
suggestion, reply with a ranked list of the top 3 products. For each ranked item, \
give product information for the following criteria only:
- cost
- reviews
- pros and cons

Keep responses brief and clear so they stream smoothly, but detailed enough for \
the user to make a decision.

Guidelines:
1. If the user provides a link, never say you cannot access external links; the \
page content is supplied to you as part of the user input.
2. If additional ranking criteria are given, rank the top 3 using those criteria only.
3. If the user asks for more than the top 3, include up to the top 5.
4. Quote prices in USD unless the user specifies another currency.
5. Stick to the criteria above unless the user asks for others.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No history yet.
    Empty,
    /// System and user turns appended, completion in flight.
    AwaitingReply,
    /// Assistant turn appended; accepting the next user message.
    Ready,
}

/// Per-conversation ordered history. Append-only; there is no terminal state,
/// a session lives until the registry drops it.
#[derive(Debug)]
pub struct ChatSession {
    history: Vec<ChatMessage>,
    state: SessionState,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            state: SessionState::Empty,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide session map keyed by connection id. Sessions are created on
/// first use and discarded on close; nothing persists across restarts.
///
/// Each session sits behind its own async mutex: holding it for the whole
/// turn is the per-session serialization point that keeps history mutation
/// single-file, while distinct sessions proceed concurrently.
pub struct SessionRegistry {
    inner: Mutex<HashMap<String, Arc<Mutex<ChatSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub async fn open(&self, id: &str) -> Arc<Mutex<ChatSession>> {
        let mut map = self.inner.lock().await;
        map.entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ChatSession::new())))
            .clone()
    }

    pub async fn close(&self, id: &str) -> bool {
        self.inner.lock().await.remove(id).is_some()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrates one user turn: system prompt, enrichment, completion, history.
pub struct ChatEngine {
    resolver: ContextResolver,
    backend: Arc<dyn CompletionBackend>,
    generation: GenerationParams,
    enable_system_prompt: bool,
    enable_product_context: bool,
}

impl ChatEngine {
    pub fn new(
        resolver: ContextResolver,
        backend: Arc<dyn CompletionBackend>,
        generation: GenerationParams,
        enable_system_prompt: bool,
        enable_product_context: bool,
    ) -> Self {
        Self {
            resolver,
            backend,
            generation,
            enable_system_prompt,
            enable_product_context,
        }
    }

    /// Enrichment must stay invisible to the user: a resolver failure degrades
    /// to empty context, it never fails the turn.
    async fn enrich(&self, query: &str, allow_search_fallback: bool) -> String {
        match self.resolver.resolve(query, allow_search_fallback).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "context enrichment failed");
                String::new()
            }
        }
    }

    /// Process one user message and stream the assistant reply.
    ///
    /// On the first turn the system prompt is built once — static instructions
    /// plus, when product context is on, context resolved from the message
    /// with search fallback — and inserted at index 0. It is never rebuilt or
    /// reordered afterwards, even if later messages carry richer links.
    ///
    /// Every turn enriches the user message itself from explicit links only
    /// (no unsolicited searches per turn). On completion failure the turn's
    /// history mutations are rolled back so no partial assistant entry is ever
    /// committed, and the error propagates for user-visible reporting.
    pub async fn handle_user_turn(
        &self,
        session: &mut ChatSession,
        transport: &mut dyn ChatTransport,
        raw_message: &str,
    ) -> Result<()> {
        session.state = SessionState::AwaitingReply;

        let mut inserted_system = false;
        if self.enable_system_prompt
            && session.history.first().map(|m| m.role) != Some(ChatRole::System)
        {
            let mut content = SYSTEM_PROMPT.to_string();
            if self.enable_product_context {
                let product_context = self.enrich(raw_message, true).await;
                if !product_context.is_empty() {
                    content.push('\n');
                    content.push_str(&product_context);
                }
            }
            session.history.insert(0, ChatMessage::system(content));
            inserted_system = true;
        }

        let enrichment = self.enrich(raw_message, false).await;
        let user_content = if enrichment.is_empty() {
            raw_message.to_string()
        } else {
            format!("{enrichment}\n{raw_message}")
        };
        session.history.push(ChatMessage::user(user_content));

        match stream::stream_reply(
            self.backend.as_ref(),
            &session.history,
            &self.generation,
            transport,
        )
        .await
        {
            Ok(reply) => {
                session.history.push(ChatMessage::assistant(reply));
                session.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                // Undo exactly this turn's mutations: the user turn always,
                // the system prompt only if this turn inserted it.
                session.history.pop();
                if inserted_system {
                    session.history.remove(0);
                }
                session.state = if session.history.is_empty() {
                    SessionState::Empty
                } else {
                    SessionState::Ready
                };
                Err(e)
            }
        }
    }
}
