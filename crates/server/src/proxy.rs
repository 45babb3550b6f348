//! Streaming session proxy
//!
//! Supervises one SSE session: `Init → Streaming → (Completed | Failed)
//! → Closed`. The direct variant wraps the local generation stream; the
//! upstream variant forwards a remote service's byte stream while
//! inspecting its frames. Both announce the interaction id before any
//! upstream byte, emit a comment keep-alive when forwarding goes idle,
//! persist the accumulated answer exactly once at the terminal
//! transition, and always close with exactly one `end` event.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::json;
use uuid::Uuid;

use guideline_rag_config::constants::generation::KEEPALIVE_IDLE_SECS;
use guideline_rag_llm::{format_sources_block, GenerationEvent};
use guideline_rag_persistence::{Interaction, InteractionCompletion, InteractionStore};

use crate::metrics::record_sse_event;
use crate::session::ChatSession;
use crate::sse::{keepalive_line, ParsedFrame, SseEvent};
use crate::state::AppState;

/// Machine-readable error kind carried in SSE `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UpstreamConnection,
    UpstreamStream,
    UpstreamStatus,
    ModelUnavailable,
    Validation,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UpstreamConnection => "upstream_connection_error",
            ErrorKind::UpstreamStream => "upstream_stream_error",
            ErrorKind::UpstreamStatus => "upstream_status_error",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

fn frame(event: &SseEvent) -> Bytes {
    record_sse_event(event.name());
    Bytes::from(event.to_wire())
}

fn error_event(kind: ErrorKind, detail: impl Into<String>, interaction_id: Option<Uuid>) -> SseEvent {
    SseEvent::Error {
        error: kind.as_str().to_string(),
        detail: Some(detail.into()),
        interaction_id: interaction_id.map(|id| id.to_string()),
    }
}

fn ping() -> Bytes {
    Bytes::from(keepalive_line(chrono::Utc::now().timestamp()))
}

async fn persist_create(store: &Arc<dyn InteractionStore>, interaction: &Interaction) {
    if let Err(e) = store.create(interaction).await {
        tracing::warn!(
            interaction_id = %interaction.id,
            error = %e,
            "Failed to persist interaction, continuing"
        );
    }
}

async fn persist_completion(
    store: &Arc<dyn InteractionStore>,
    session_id: &str,
    id: Uuid,
    completion: InteractionCompletion,
) {
    if let Err(e) = store.complete(session_id, id, completion).await {
        tracing::warn!(
            interaction_id = %id,
            error = %e,
            "Failed to persist interaction completion"
        );
    }
}

/// Two-event `error` + `end` stream for requests rejected before any
/// retrieval or generation starts.
pub fn failure_stream(
    kind: ErrorKind,
    detail: impl Into<String>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let detail = detail.into();
    async_stream::stream! {
        yield Ok(frame(&error_event(kind, detail, None)));
        yield Ok(frame(&SseEvent::End));
    }
}

/// Direct variant: drive the local generation stream for one question.
pub fn direct_stream(
    state: AppState,
    session: Arc<ChatSession>,
    query: String,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let total_start = Instant::now();
        let rag_enabled = state.retriever.is_some();
        let mut interaction = Interaction::new(&session.id, &query, rag_enabled);
        let interaction_id = interaction.id;

        tracing::debug!(interaction_id = %interaction_id, session_id = %session.id, "Session streaming");
        yield Ok(frame(&SseEvent::Init { interaction_id: interaction_id.to_string() }));

        if !state.generator.is_available().await {
            let detail = format!("model '{}' is not reachable", state.generator.model_name());
            interaction.error_message = Some(detail.clone());
            persist_create(&state.interactions, &interaction).await;
            yield Ok(frame(&error_event(ErrorKind::ModelUnavailable, detail, Some(interaction_id))));
            yield Ok(frame(&SseEvent::End));
            return;
        }

        let mut retrieval_ms: Option<i64> = None;
        let mut documents = Vec::new();
        let mut no_context = false;
        if let Some(retriever) = &state.retriever {
            let started = Instant::now();
            let outcome = retriever.retrieve(&query).await;
            retrieval_ms = Some(started.elapsed().as_millis() as i64);
            no_context = outcome.is_empty();
            documents = outcome.documents;
        }

        interaction.retrieved_chunk_refs = documents
            .iter()
            .map(|d| format!("{}#{}", d.source_id, d.chunk_index))
            .collect();
        interaction.combined_context = documents
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        persist_create(&state.interactions, &interaction).await;

        let llm_start = Instant::now();
        let mut events = if no_context {
            state
                .generator
                .no_context_stream(query, Arc::clone(&session.history))
                .boxed()
        } else {
            state
                .generator
                .generate_stream(query, documents, Arc::clone(&session.history))
                .boxed()
        };

        let mut raw_output = String::new();
        let mut answer = String::new();
        let mut error_message: Option<String> = None;

        loop {
            let idle = tokio::time::sleep(Duration::from_secs(KEEPALIVE_IDLE_SECS));
            tokio::select! {
                event = events.next() => match event {
                    Some(GenerationEvent::Token(token)) => {
                        raw_output.push_str(&token);
                        answer.push_str(&token);
                        yield Ok(frame(&SseEvent::Token { token }));
                    }
                    Some(GenerationEvent::Sources(sources)) => {
                        answer.push_str(&format_sources_block(&sources));
                        yield Ok(frame(&SseEvent::Sources { sources }));
                    }
                    Some(GenerationEvent::Error(detail)) => {
                        error_message = Some(detail.clone());
                        yield Ok(frame(&error_event(ErrorKind::UpstreamStream, detail, Some(interaction_id))));
                    }
                    Some(GenerationEvent::End) | None => break,
                },
                _ = idle => {
                    yield Ok(ping());
                }
            }
        }

        let llm_ms = llm_start.elapsed().as_millis() as i64;
        let total_ms = total_start.elapsed().as_millis() as i64;

        let completion = if error_message.is_some() {
            Some(InteractionCompletion {
                error_message,
                retrieval_latency_ms: retrieval_ms,
                llm_latency_ms: Some(llm_ms),
                total_latency_ms: Some(total_ms),
                ..Default::default()
            })
        } else if !answer.is_empty() {
            Some(InteractionCompletion {
                raw_model_output: Some(raw_output),
                final_response_text: Some(answer),
                retrieval_latency_ms: retrieval_ms,
                llm_latency_ms: Some(llm_ms),
                total_latency_ms: Some(total_ms),
                ..Default::default()
            })
        } else {
            None
        };
        if let Some(completion) = completion {
            persist_completion(&state.interactions, &session.id, interaction_id, completion).await;
        }

        tracing::debug!(interaction_id = %interaction_id, total_ms, "Session closed");
        yield Ok(frame(&SseEvent::End));
    }
}

/// Upstream variant: forward a remote `/generate_stream` SSE response.
pub fn upstream_stream(
    state: AppState,
    session_id: String,
    query: String,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let interaction = Interaction::new(&session_id, &query, true);
        let interaction_id = interaction.id;

        yield Ok(frame(&SseEvent::Init { interaction_id: interaction_id.to_string() }));
        persist_create(&state.interactions, &interaction).await;

        let connect_timeout = Duration::from_secs(state.settings.upstream.connect_timeout_secs);
        let endpoint = format!(
            "{}/generate_stream",
            state.settings.upstream.endpoint.trim_end_matches('/')
        );

        let client = match reqwest::Client::builder().connect_timeout(connect_timeout).build() {
            Ok(client) => client,
            Err(e) => {
                let detail = e.to_string();
                yield Ok(frame(&error_event(ErrorKind::Internal, detail.clone(), Some(interaction_id))));
                persist_completion(&state.interactions, &session_id, interaction_id, InteractionCompletion {
                    error_message: Some(detail),
                    ..Default::default()
                }).await;
                yield Ok(frame(&SseEvent::End));
                return;
            }
        };

        let response = match client
            .post(&endpoint)
            .json(&json!({ "query": query, "session_id": session_id }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let detail = e.to_string();
                tracing::warn!(endpoint = %endpoint, error = %detail, "Upstream connection failed");
                yield Ok(frame(&error_event(ErrorKind::UpstreamConnection, detail.clone(), Some(interaction_id))));
                persist_completion(&state.interactions, &session_id, interaction_id, InteractionCompletion {
                    error_message: Some(detail),
                    ..Default::default()
                }).await;
                yield Ok(frame(&SseEvent::End));
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = format!("upstream returned {}: {}", status, truncate(&body, 500));
            tracing::warn!(endpoint = %endpoint, %status, "Upstream status error");
            yield Ok(frame(&error_event(ErrorKind::UpstreamStatus, detail.clone(), Some(interaction_id))));
            persist_completion(&state.interactions, &session_id, interaction_id, InteractionCompletion {
                error_message: Some(detail),
                ..Default::default()
            }).await;
            yield Ok(frame(&SseEvent::End));
            return;
        }

        let inner = forward_upstream(state, session_id, interaction_id, response.bytes_stream());
        let mut inner = Box::pin(inner);
        while let Some(item) = inner.next().await {
            yield item;
        }
    }
}

/// Forwarding loop shared by the upstream variant and its tests.
///
/// The proxy owns the session envelope: its own `init` precedes this
/// loop, and it emits the single terminal `end`, so upstream `init`
/// and `end` frames are consumed rather than forwarded. Everything
/// else is forwarded verbatim, one complete frame at a time.
pub(crate) fn forward_upstream<S, E>(
    state: AppState,
    session_id: String,
    interaction_id: Uuid,
    upstream: S,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        let mut parser = crate::sse::FrameParser::new();
        let mut raw_output = String::new();
        let mut answer = String::new();
        let mut upstream_error: Option<String> = None;
        let mut done = false;

        while !done {
            let idle = tokio::time::sleep(Duration::from_secs(KEEPALIVE_IDLE_SECS));
            tokio::select! {
                chunk = upstream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes);
                        for item in parser.push(&text) {
                            match item.parsed {
                                ParsedFrame::Token(token) => {
                                    record_sse_event("token");
                                    raw_output.push_str(&token);
                                    answer.push_str(&token);
                                    yield Ok(Bytes::from(item.raw));
                                }
                                ParsedFrame::Sources(sources) => {
                                    record_sse_event("sources");
                                    answer.push_str(&format_sources_block(&sources));
                                    yield Ok(Bytes::from(item.raw));
                                }
                                ParsedFrame::Error { error } => {
                                    record_sse_event("error");
                                    tracing::warn!(interaction_id = %interaction_id, error = %error, "Upstream reported error");
                                    upstream_error = Some(error);
                                    yield Ok(Bytes::from(item.raw));
                                }
                                ParsedFrame::End => {
                                    done = true;
                                    break;
                                }
                                ParsedFrame::Init => {}
                                ParsedFrame::Comment | ParsedFrame::Other => {
                                    yield Ok(Bytes::from(item.raw));
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let detail = e.to_string();
                        tracing::warn!(interaction_id = %interaction_id, error = %detail, "Upstream stream broke");
                        upstream_error = Some(detail.clone());
                        yield Ok(frame(&error_event(ErrorKind::UpstreamStream, detail, Some(interaction_id))));
                        done = true;
                    }
                    None => done = true,
                },
                _ = idle => {
                    yield Ok(ping());
                }
            }
        }

        let completion = if let Some(error) = upstream_error {
            Some(InteractionCompletion {
                error_message: Some(error),
                ..Default::default()
            })
        } else if !answer.is_empty() {
            Some(InteractionCompletion {
                raw_model_output: Some(raw_output),
                final_response_text: Some(answer),
                ..Default::default()
            })
        } else {
            None
        };
        if let Some(completion) = completion {
            persist_completion(&state.interactions, &session_id, interaction_id, completion).await;
        }

        yield Ok(frame(&SseEvent::End));
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use guideline_rag_config::Settings;
    use guideline_rag_llm::{
        FinishReason, GenerationResult, LlmBackend, LlmError, LocalBackend, Message, PromptBuilder,
        StreamingGenerator, TokenIter,
    };
    use guideline_rag_persistence::InMemoryInteractionStore;
    use tokio::sync::mpsc;

    struct UnavailableBackend;

    #[async_trait]
    impl LlmBackend for UnavailableBackend {
        async fn generate_stream(
            &self,
            _messages: &[Message],
            _tx: mpsc::Sender<String>,
        ) -> Result<GenerationResult, LlmError> {
            Err(LlmError::ModelUnavailable("not loaded".to_string()))
        }

        async fn is_available(&self) -> bool {
            false
        }

        fn model_name(&self) -> &str {
            "unavailable"
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl LlmBackend for FailingBackend {
        async fn generate_stream(
            &self,
            _messages: &[Message],
            _tx: mpsc::Sender<String>,
        ) -> Result<GenerationResult, LlmError> {
            Err(LlmError::Api("backend failure".to_string()))
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    /// Emits tokens with a fixed pause before each one.
    struct SlowBackend {
        tokens: Vec<&'static str>,
        pause: Duration,
    }

    #[async_trait]
    impl LlmBackend for SlowBackend {
        async fn generate_stream(
            &self,
            _messages: &[Message],
            tx: mpsc::Sender<String>,
        ) -> Result<GenerationResult, LlmError> {
            let mut text = String::new();
            for token in &self.tokens {
                tokio::time::sleep(self.pause).await;
                if tx.send(token.to_string()).await.is_err() {
                    break;
                }
                text.push_str(token);
            }
            Ok(GenerationResult {
                text,
                tokens: self.tokens.len(),
                time_to_first_token_ms: 0,
                total_time_ms: 0,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    fn token_backend(tokens: &'static [&'static str]) -> Arc<dyn LlmBackend> {
        Arc::new(LocalBackend::new("stub", move |_| {
            let iter: TokenIter =
                Box::new(tokens.iter().map(|t| Ok(t.to_string())).collect::<Vec<_>>().into_iter());
            Ok(iter)
        }))
    }

    fn test_state(backend: Arc<dyn LlmBackend>) -> AppState {
        let settings = Arc::new(Settings::new());
        let generator = Arc::new(StreamingGenerator::new(backend, PromptBuilder::new(), true));
        let interactions: Arc<dyn InteractionStore> = Arc::new(InMemoryInteractionStore::new());
        AppState::new(settings, generator, interactions)
    }

    async fn collect_body(
        stream: impl Stream<Item = Result<Bytes, Infallible>> + Send,
    ) -> String {
        Box::pin(stream)
            .map(|item| {
                let bytes = item.unwrap();
                String::from_utf8_lossy(&bytes).to_string()
            })
            .collect::<Vec<_>>()
            .await
            .join("")
    }

    fn end_count(body: &str) -> usize {
        body.matches("event: end").count()
    }

    #[tokio::test]
    async fn test_direct_stream_token_order_and_single_end() {
        let state = test_state(token_backend(&["a", "b", "c"]));
        let session = state.sessions.get_or_create(Some("s1")).unwrap();

        let body = collect_body(direct_stream(state.clone(), session, "q".to_string())).await;

        let init = body.find("event: init").unwrap();
        let a = body.find("\"token\":\"a\"").unwrap();
        let b = body.find("\"token\":\"b\"").unwrap();
        let c = body.find("\"token\":\"c\"").unwrap();
        let end = body.find("event: end").unwrap();
        assert!(init < a && a < b && b < c && c < end);
        assert_eq!(end_count(&body), 1);
        assert!(body.trim_end().ends_with("data: {}"));
    }

    #[tokio::test]
    async fn test_direct_stream_persists_final_answer() {
        let state = test_state(token_backend(&["hello", " world"]));
        let session = state.sessions.get_or_create(Some("s1")).unwrap();

        let body = collect_body(direct_stream(state.clone(), session, "q".to_string())).await;

        let interaction_id: Uuid = {
            let init_data = body
                .lines()
                .find(|l| l.contains("interaction_id"))
                .unwrap();
            let value: serde_json::Value =
                serde_json::from_str(init_data.trim_start_matches("data: ")).unwrap();
            value["interaction_id"].as_str().unwrap().parse().unwrap()
        };

        let stored = state
            .interactions
            .get("s1", interaction_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.final_response_text.as_deref(), Some("hello world"));
        assert_eq!(stored.raw_model_output.as_deref(), Some("hello world"));
        assert!(stored.error_message.is_none());
        assert!(stored.total_latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_model_unavailable_single_error_then_end() {
        let state = test_state(Arc::new(UnavailableBackend));
        let session = state.sessions.get_or_create(Some("s1")).unwrap();

        let body = collect_body(direct_stream(state, session, "q".to_string())).await;

        assert!(body.contains("\"error\":\"model_unavailable\""));
        assert!(!body.contains("event: token"));
        assert_eq!(end_count(&body), 1);
        let error = body.find("event: error").unwrap();
        let end = body.find("event: end").unwrap();
        assert!(error < end);
    }

    #[tokio::test]
    async fn test_generation_failure_marks_interaction() {
        let state = test_state(Arc::new(FailingBackend));
        let session = state.sessions.get_or_create(Some("s1")).unwrap();

        let body = collect_body(direct_stream(state.clone(), session, "q".to_string())).await;

        assert!(body.contains("\"error\":\"upstream_stream_error\""));
        assert_eq!(end_count(&body), 1);
    }

    #[tokio::test]
    async fn test_failure_stream_error_then_end() {
        let body =
            collect_body(failure_stream(ErrorKind::Validation, "missing query")).await;
        assert!(body.contains("\"error\":\"validation_error\""));
        assert!(body.contains("\"detail\":\"missing query\""));
        assert_eq!(end_count(&body), 1);
        assert!(body.trim_end().ends_with("data: {}"));
    }

    #[tokio::test]
    async fn test_terminal_invariant_across_many_sessions() {
        for i in 0..100 {
            let (state, disconnect) = match i % 4 {
                0 => (test_state(token_backend(&["a", "b"])), false),
                1 => (test_state(Arc::new(FailingBackend)), false),
                2 => (test_state(Arc::new(UnavailableBackend)), false),
                _ => (test_state(token_backend(&["a", "b", "c", "d"])), true),
            };
            let session = state.sessions.get_or_create(None).unwrap();
            let stream = direct_stream(state, session, "q".to_string());

            if disconnect {
                // Client drops the connection after two events; whatever
                // was observed must not contain a premature end.
                let seen = collect_body(Box::pin(stream).take(2)).await;
                assert_eq!(end_count(&seen), 0, "session {}", i);
            } else {
                let body = collect_body(stream).await;
                assert_eq!(end_count(&body), 1, "session {}", i);
                assert!(body.trim_end().ends_with("data: {}"), "session {}", i);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_emitted_during_16s_gap() {
        let state = test_state(Arc::new(SlowBackend {
            tokens: vec!["a", "b"],
            pause: Duration::from_secs(16),
        }));
        let session = state.sessions.get_or_create(Some("s1")).unwrap();

        let body = collect_body(direct_stream(state, session, "q".to_string())).await;

        assert!(body.contains(": ping "));
        assert_eq!(end_count(&body), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_keepalive_during_10s_gap() {
        let state = test_state(Arc::new(SlowBackend {
            tokens: vec!["a", "b"],
            pause: Duration::from_secs(10),
        }));
        let session = state.sessions.get_or_create(Some("s1")).unwrap();

        let body = collect_body(direct_stream(state, session, "q".to_string())).await;

        assert!(!body.contains(": ping "));
        assert_eq!(end_count(&body), 1);
    }

    fn byte_stream(
        chunks: Vec<&'static str>,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    #[tokio::test]
    async fn test_forward_upstream_tokens_and_own_end() {
        let state = test_state(token_backend(&[]));
        let interaction = Interaction::new("s1", "q", true);
        let id = interaction.id;
        state.interactions.create(&interaction).await.unwrap();

        let upstream = byte_stream(vec![
            "event: init\ndata: {\"interaction_id\":\"remote\"}\n\n",
            "event: token\ndata: {\"token\":\"hi\"}\n\nevent: token\ndata: {\"token\":\"!\"}\n\n",
            "event: sources\ndata: {\"sources\":[\"who\"]}\n\n",
            "event: end\ndata: {}\n\n",
        ]);

        let body = collect_body(forward_upstream(state.clone(), "s1".to_string(), id, upstream)).await;

        // The remote init is consumed; the proxy already announced its own id.
        assert!(!body.contains("remote"));
        assert!(body.contains("\"token\":\"hi\""));
        assert!(body.contains("\"sources\":[\"who\"]"));
        assert_eq!(end_count(&body), 1);

        let stored = state.interactions.get("s1", id).await.unwrap().unwrap();
        assert_eq!(stored.raw_model_output.as_deref(), Some("hi!"));
        let final_text = stored.final_response_text.unwrap();
        assert!(final_text.starts_with("hi!"));
        assert!(final_text.contains("**Sources:**"));
    }

    #[tokio::test]
    async fn test_forward_upstream_malformed_frame_not_fatal() {
        let state = test_state(token_backend(&[]));
        let interaction = Interaction::new("s1", "q", true);
        let id = interaction.id;
        state.interactions.create(&interaction).await.unwrap();

        let upstream = byte_stream(vec![
            "event: token\ndata: {broken\n\n",
            "event: token\ndata: {\"token\":\"ok\"}\n\n",
            "event: end\ndata: {}\n\n",
        ]);

        let body = collect_body(forward_upstream(state, "s1".to_string(), id, upstream)).await;

        assert!(body.contains("\"token\":\"ok\""));
        assert_eq!(end_count(&body), 1);
    }

    #[tokio::test]
    async fn test_forward_upstream_error_frame_marks_interaction() {
        let state = test_state(token_backend(&[]));
        let interaction = Interaction::new("s1", "q", true);
        let id = interaction.id;
        state.interactions.create(&interaction).await.unwrap();

        let upstream = byte_stream(vec![
            "event: token\ndata: {\"token\":\"partial\"}\n\n",
            "event: error\ndata: {\"error\":\"upstream_stream_error\"}\n\n",
            "event: end\ndata: {}\n\n",
        ]);

        let body = collect_body(forward_upstream(state.clone(), "s1".to_string(), id, upstream)).await;

        assert!(body.contains("\"error\":\"upstream_stream_error\""));
        assert_eq!(end_count(&body), 1);

        let stored = state.interactions.get("s1", id).await.unwrap().unwrap();
        assert!(stored.error_message.is_some());
        // Errored sessions never persist partial answer text
        assert!(stored.final_response_text.is_none());
    }

    #[tokio::test]
    async fn test_forward_upstream_read_failure_ends_session() {
        let state = test_state(token_backend(&[]));
        let interaction = Interaction::new("s1", "q", true);
        let id = interaction.id;
        state.interactions.create(&interaction).await.unwrap();

        let upstream = futures::stream::iter(vec![
            Ok(Bytes::from("event: token\ndata: {\"token\":\"a\"}\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset")),
        ]);

        let body = collect_body(forward_upstream(state, "s1".to_string(), id, upstream)).await;

        assert!(body.contains("\"error\":\"upstream_stream_error\""));
        assert_eq!(end_count(&body), 1);
        assert!(body.trim_end().ends_with("data: {}"));
    }
}
