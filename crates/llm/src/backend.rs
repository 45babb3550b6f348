//! Generation backends
//!
//! `OllamaBackend` streams NDJSON chunks from an Ollama server.
//! `LocalBackend` bridges a blocking token iterator running on a worker
//! thread into the async session task. Both observe cancellation the
//! same way: a failed send on the token channel means the consumer is
//! gone, and the producer stops instead of generating into the void.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::prompt::Message;
use crate::LlmError;

/// Backend configuration
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub model: String,
    pub endpoint: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout: Duration,
    /// How long the server keeps the model loaded between calls
    pub keep_alive: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "qwen3:4b-instruct-2507-q4_K_M".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            max_tokens: 1024,
            temperature: 0.3,
            top_p: 0.9,
            timeout: Duration::from_secs(120),
            keep_alive: "5m".to_string(),
        }
    }
}

impl From<&guideline_rag_config::GenerationSettings> for GenerationConfig {
    fn from(settings: &guideline_rag_config::GenerationSettings) -> Self {
        Self {
            model: settings.model.clone(),
            endpoint: settings.endpoint.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
            timeout: Duration::from_secs(settings.timeout_secs),
            keep_alive: "5m".to_string(),
        }
    }
}

/// Generation result
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Full generated text
    pub text: String,
    /// Tokens emitted
    pub tokens: usize,
    pub time_to_first_token_ms: u64,
    pub total_time_ms: u64,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Error,
    Cancelled,
}

/// Generation backend seam.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a streamed response, sending each token through `tx` in
    /// emission order. A closed channel cancels generation.
    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError>;

    /// Check if the model is reachable and loaded.
    async fn is_available(&self) -> bool;

    fn model_name(&self) -> &str;
}

/// Ollama HTTP backend.
pub struct OllamaBackend {
    client: Client,
    config: GenerationConfig,
}

impl OllamaBackend {
    pub fn new(config: GenerationConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint, path)
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        let start = std::time::Instant::now();
        let mut first_token_time = None;
        let mut total_tokens = 0;
        let mut full_response = String::new();

        let request = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(|m| m.into()).collect(),
            stream: true,
            options: Some(OllamaOptions {
                temperature: Some(self.config.temperature),
                top_p: Some(self.config.top_p),
                num_predict: Some(self.config.max_tokens as i32),
            }),
            keep_alive: Some(self.config.keep_alive.clone()),
        };

        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error)));
        }

        let mut stream = response.bytes_stream();
        use futures::StreamExt;

        let mut done = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let text = String::from_utf8_lossy(&chunk);

            // NDJSON, one object per line
            for line in text.lines() {
                if line.is_empty() {
                    continue;
                }

                let chunk_response: OllamaStreamChunk = match serde_json::from_str(line) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping unparseable stream line");
                        continue;
                    }
                };

                if first_token_time.is_none() {
                    first_token_time = Some(start.elapsed());
                }

                let token = &chunk_response.message.content;
                if !token.is_empty() {
                    full_response.push_str(token);
                    total_tokens += 1;

                    if tx.send(token.clone()).await.is_err() {
                        // Consumer gone, stop generating
                        return Ok(GenerationResult {
                            text: full_response,
                            tokens: total_tokens,
                            time_to_first_token_ms: first_token_time
                                .map(|t| t.as_millis() as u64)
                                .unwrap_or(0),
                            total_time_ms: start.elapsed().as_millis() as u64,
                            finish_reason: FinishReason::Cancelled,
                        });
                    }
                }

                if chunk_response.done {
                    done = true;
                    break;
                }
            }
            if done {
                break;
            }
        }

        Ok(GenerationResult {
            text: full_response,
            tokens: total_tokens,
            time_to_first_token_ms: first_token_time
                .map(|t| t.as_millis() as u64)
                .unwrap_or(0),
            total_time_ms: start.elapsed().as_millis() as u64,
            finish_reason: if done {
                FinishReason::Stop
            } else {
                FinishReason::Length
            },
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.config.endpoint))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// A blocking, finite, non-restartable token iterator.
pub type TokenIter = Box<dyn Iterator<Item = Result<String, LlmError>> + Send>;

/// Backend for models generating on a worker thread.
///
/// The factory builds one token iterator per request; it runs to
/// completion on a blocking thread and pushes tokens through the
/// channel with `blocking_send`. When the session task drops the
/// receiver the next send fails and the worker stops, so the worker's
/// lifetime is bounded by the session's.
pub struct LocalBackend {
    name: String,
    factory: Arc<dyn Fn(&[Message]) -> Result<TokenIter, LlmError> + Send + Sync>,
}

impl LocalBackend {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&[Message]) -> Result<TokenIter, LlmError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }
}

#[async_trait]
impl LlmBackend for LocalBackend {
    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        let start = std::time::Instant::now();
        let iter = (self.factory)(messages)?;

        let worker = tokio::task::spawn_blocking(move || {
            let mut text = String::new();
            let mut tokens = 0usize;

            for item in iter {
                let token = match item {
                    Ok(t) => t,
                    Err(e) => return Err(e),
                };
                if tx.blocking_send(token.clone()).is_err() {
                    return Ok((text, tokens, FinishReason::Cancelled));
                }
                text.push_str(&token);
                tokens += 1;
            }

            Ok((text, tokens, FinishReason::Stop))
        });

        let (text, tokens, finish_reason) = worker
            .await
            .map_err(|e| LlmError::Generation(format!("Worker thread failed: {}", e)))??;

        let total_time_ms = start.elapsed().as_millis() as u64;
        Ok(GenerationResult {
            text,
            tokens,
            time_to_first_token_ms: 0,
            total_time_ms,
            finish_reason,
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    message: OllamaMessage,
    done: bool,
}
