//! Streaming generation coordinator
//!
//! Drives one backend call per question and exposes it as an ordered
//! event stream: every token in emission order, one `Sources` event
//! after generation, and exactly one terminal `End` on every path,
//! including errors. History is committed only after the sources block
//! is appended to the accumulated answer.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use guideline_rag_core::{ConversationHistory, ConversationTurn, RetrievedDocument};
use guideline_rag_config::constants::generation::TOKEN_CHANNEL_CAPACITY;

use crate::backend::LlmBackend;
use crate::prompt::PromptBuilder;

/// Reply used when retrieval found nothing; the model is not called.
const NO_CONTEXT_REPLY: &str =
    "I could not find relevant information in the guideline documents for this question.";

/// Event emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// One model token, in emission order
    Token(String),
    /// Deduplicated source identifiers, after all tokens
    Sources(Vec<String>),
    /// Generation failed; `End` still follows
    Error(String),
    /// Terminal event, exactly once per stream
    End,
}

/// Coordinator phases, traced for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    PromptBuilding,
    Generating,
    SourcesAppended,
    HistoryCommitted,
    Done,
    Errored,
}

/// Streaming answer generator over one backend.
pub struct StreamingGenerator {
    backend: Arc<dyn LlmBackend>,
    prompt: PromptBuilder,
    apply_chat_template: bool,
}

impl StreamingGenerator {
    pub fn new(backend: Arc<dyn LlmBackend>, prompt: PromptBuilder, apply_chat_template: bool) -> Self {
        Self {
            backend,
            prompt,
            apply_chat_template,
        }
    }

    pub async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Generate an answer for `question` over the retrieved documents.
    ///
    /// The history snapshot is taken when the stream starts; the
    /// completed (question, answer-with-sources) turn is appended after
    /// generation finishes.
    pub fn generate_stream(
        &self,
        question: String,
        documents: Vec<RetrievedDocument>,
        history: Arc<Mutex<ConversationHistory>>,
    ) -> impl Stream<Item = GenerationEvent> + Send + 'static {
        let backend = Arc::clone(&self.backend);
        let prompt = self.prompt.clone();
        let apply_chat_template = self.apply_chat_template;

        async_stream::stream! {
            let start = Instant::now();
            let mut phase = Phase::PromptBuilding;
            tracing::debug!(?phase, "Generation started");

            let turns: Vec<ConversationTurn> = history.lock().iter().cloned().collect();
            let messages = if apply_chat_template {
                prompt.build_messages(&documents, &turns, &question)
            } else {
                prompt.build_flat(&documents, &turns, &question)
            };

            phase = Phase::Generating;
            tracing::debug!(?phase, messages = messages.len(), "Prompt built");

            let (tx, mut rx) = mpsc::channel::<String>(TOKEN_CHANNEL_CAPACITY);
            let generation = tokio::spawn(async move {
                backend.generate_stream(&messages, tx).await
            });

            let mut answer = String::new();
            while let Some(token) = rx.recv().await {
                answer.push_str(&token);
                yield GenerationEvent::Token(token);
            }

            match generation.await {
                Ok(Ok(result)) => {
                    tracing::debug!(
                        tokens = result.tokens,
                        finish_reason = ?result.finish_reason,
                        "Generation finished"
                    );
                }
                Ok(Err(e)) => {
                    phase = Phase::Errored;
                    tracing::warn!(?phase, error = %e, "Generation failed");
                    metrics::counter!("generation_errors_total").increment(1);
                    yield GenerationEvent::Error(e.to_string());
                    yield GenerationEvent::End;
                    return;
                }
                Err(e) => {
                    phase = Phase::Errored;
                    tracing::error!(?phase, error = %e, "Generation task panicked");
                    yield GenerationEvent::Error(format!("generation task failed: {}", e));
                    yield GenerationEvent::End;
                    return;
                }
            }

            let sources = collect_sources(&documents);
            if !sources.is_empty() {
                answer.push_str(&format_sources_block(&sources));
                phase = Phase::SourcesAppended;
                tracing::debug!(?phase, sources = sources.len(), "Sources appended");
                yield GenerationEvent::Sources(sources);
            }

            history.lock().push(question, answer);
            phase = Phase::HistoryCommitted;
            tracing::debug!(?phase, "History committed");

            phase = Phase::Done;
            tracing::debug!(?phase, elapsed_ms = start.elapsed().as_millis() as u64, "Generation done");
            metrics::histogram!("generation_latency_seconds").record(start.elapsed().as_secs_f64());
            yield GenerationEvent::End;
        }
    }

    /// Fixed reply for questions retrieval found no context for. The
    /// model is not invoked; the turn is still recorded.
    pub fn no_context_stream(
        &self,
        question: String,
        history: Arc<Mutex<ConversationHistory>>,
    ) -> impl Stream<Item = GenerationEvent> + Send + 'static {
        async_stream::stream! {
            tracing::debug!("No retrieval context, returning fixed reply");
            yield GenerationEvent::Token(NO_CONTEXT_REPLY.to_string());
            history.lock().push(question, NO_CONTEXT_REPLY.to_string());
            yield GenerationEvent::End;
        }
    }
}

/// Deduplicated source identifiers, file extension stripped, sorted.
fn collect_sources(documents: &[RetrievedDocument]) -> Vec<String> {
    documents
        .iter()
        .map(|d| strip_extension(&d.source_id).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Markdown sources block appended to the answer text.
pub fn format_sources_block(sources: &[String]) -> String {
    let mut block = String::from("\n\n---\n**Sources:**\n");
    for source in sources {
        block.push_str(&format!("- {}\n", source));
    }
    block
}

/// Strip the trailing file extension, keeping any directory part.
fn strip_extension(source: &str) -> &str {
    match source.rfind('.') {
        Some(i) if !source[i + 1..].contains('/') => &source[..i],
        _ => source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FinishReason, GenerationResult};
    use crate::prompt::Message;
    use crate::LlmError;
    use async_trait::async_trait;
    use futures::StreamExt;

    struct MockBackend {
        tokens: Vec<&'static str>,
    }

    #[async_trait]
    impl LlmBackend for MockBackend {
        async fn generate_stream(
            &self,
            _messages: &[Message],
            tx: mpsc::Sender<String>,
        ) -> Result<GenerationResult, LlmError> {
            let mut text = String::new();
            for token in &self.tokens {
                if tx.send(token.to_string()).await.is_err() {
                    break;
                }
                text.push_str(token);
            }
            Ok(GenerationResult {
                text,
                tokens: self.tokens.len(),
                time_to_first_token_ms: 1,
                total_time_ms: 5,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "mock-model"
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
            Err(LlmError::Api("model exploded".to_string()))
        }

        async fn is_available(&self) -> bool {
            false
        }

        fn model_name(&self) -> &str {
            "failing-model"
        }
    }

    fn doc(source: &str) -> RetrievedDocument {
        RetrievedDocument {
            chunk_index: 0,
            content: "content".to_string(),
            source_id: source.to_string(),
            score: 0.9,
        }
    }

    fn generator(backend: Arc<dyn LlmBackend>) -> StreamingGenerator {
        StreamingGenerator::new(backend, PromptBuilder::new(), true)
    }

    async fn collect(stream: impl Stream<Item = GenerationEvent> + Send) -> Vec<GenerationEvent> {
        Box::pin(stream).collect().await
    }

    #[tokio::test]
    async fn test_token_ordering_then_sources_then_end() {
        let gen = generator(Arc::new(MockBackend {
            tokens: vec!["a", "b", "c"],
        }));
        let history = Arc::new(Mutex::new(ConversationHistory::new(10)));

        let events = collect(gen.generate_stream(
            "q".to_string(),
            vec![doc("who.pdf")],
            Arc::clone(&history),
        ))
        .await;

        assert_eq!(
            events,
            vec![
                GenerationEvent::Token("a".to_string()),
                GenerationEvent::Token("b".to_string()),
                GenerationEvent::Token("c".to_string()),
                GenerationEvent::Sources(vec!["who".to_string()]),
                GenerationEvent::End,
            ]
        );

        let history = history.lock();
        assert_eq!(history.len(), 1);
        let turn = history.iter().next().unwrap();
        assert!(turn.answer.starts_with("abc"));
        assert!(turn.answer.contains("**Sources:**"));
        assert!(turn.answer.contains("- who"));
    }

    #[tokio::test]
    async fn test_sources_deduplicated_stripped_sorted() {
        let gen = generator(Arc::new(MockBackend { tokens: vec!["x"] }));
        let history = Arc::new(Mutex::new(ConversationHistory::new(10)));

        let events = collect(gen.generate_stream(
            "q".to_string(),
            vec![doc("b.pdf"), doc("a.txt"), doc("b.pdf")],
            history,
        ))
        .await;

        let sources = events
            .iter()
            .find_map(|e| match e {
                GenerationEvent::Sources(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(sources, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_error_still_ends_exactly_once() {
        let gen = generator(Arc::new(FailingBackend));
        let history = Arc::new(Mutex::new(ConversationHistory::new(10)));

        let events = collect(gen.generate_stream(
            "q".to_string(),
            vec![doc("who.pdf")],
            Arc::clone(&history),
        ))
        .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], GenerationEvent::Error(_)));
        assert_eq!(events[1], GenerationEvent::End);
        assert_eq!(events.iter().filter(|e| **e == GenerationEvent::End).count(), 1);
        // Failed generations are not recorded
        assert!(history.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_context_stream() {
        let gen = generator(Arc::new(MockBackend { tokens: vec![] }));
        let history = Arc::new(Mutex::new(ConversationHistory::new(10)));

        let events = collect(gen.no_context_stream("q".to_string(), Arc::clone(&history))).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], GenerationEvent::Token(_)));
        assert_eq!(events[1], GenerationEvent::End);
        assert_eq!(history.lock().len(), 1);
    }

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("who.pdf"), "who");
        assert_eq!(strip_extension("docs/who.pdf"), "docs/who");
        assert_eq!(strip_extension("no_extension"), "no_extension");
        assert_eq!(strip_extension("dir.v2/file"), "dir.v2/file");
    }

    #[tokio::test]
    async fn test_no_sources_event_without_documents() {
        let gen = generator(Arc::new(MockBackend { tokens: vec!["x"] }));
        let history = Arc::new(Mutex::new(ConversationHistory::new(10)));

        // Retrieval disabled: empty documents, generation still runs.
        let events = collect(gen.generate_stream("q".to_string(), Vec::new(), history)).await;

        assert_eq!(
            events,
            vec![
                GenerationEvent::Token("x".to_string()),
                GenerationEvent::End,
            ]
        );
    }
}
