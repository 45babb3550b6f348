//! Prompt assembly
//!
//! Builds the model input from retrieved documents (each tagged
//! `Source N`), the bounded conversation history, and the question.
//! Chat-capable models get a structured turn list; others get one flat
//! prompt carrying the same content.

use std::fmt;

use serde::{Deserialize, Serialize};

use guideline_rag_core::{ConversationTurn, RetrievedDocument};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a clinical guidelines assistant. Answer questions \
using only the provided guideline excerpts. Cite the source number for every claim. If the \
excerpts do not cover the question, say so instead of guessing.";

/// Builds model input for one question.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Structured chat turns: system prompt, prior turns, then the
    /// question with its context block.
    pub fn build_messages(
        &self,
        documents: &[RetrievedDocument],
        history: &[ConversationTurn],
        question: &str,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() * 2 + 2);
        messages.push(Message::system(&self.system_prompt));

        for turn in history {
            messages.push(Message::user(&turn.question));
            messages.push(Message::assistant(&turn.answer));
        }

        messages.push(Message::user(self.question_with_context(documents, question)));
        messages
    }

    /// One flat prompt carrying the same content, for backends without
    /// chat templating.
    pub fn build_flat(
        &self,
        documents: &[RetrievedDocument],
        history: &[ConversationTurn],
        question: &str,
    ) -> Vec<Message> {
        let mut prompt = String::new();
        prompt.push_str(&self.system_prompt);
        prompt.push_str("\n\n");

        if !history.is_empty() {
            prompt.push_str("Previous conversation:\n");
            for turn in history {
                prompt.push_str(&format!("User: {}\nAssistant: {}\n", turn.question, turn.answer));
            }
            prompt.push('\n');
        }

        prompt.push_str(&self.question_with_context(documents, question));
        vec![Message::user(prompt)]
    }

    fn question_with_context(&self, documents: &[RetrievedDocument], question: &str) -> String {
        let context = Self::format_context(documents);
        if context.is_empty() {
            format!("Question: {}", question)
        } else {
            format!("Context:\n{}\n\nQuestion: {}", context, question)
        }
    }

    /// Each retrieved document tagged `Source N (<source>)`.
    fn format_context(documents: &[RetrievedDocument]) -> String {
        documents
            .iter()
            .enumerate()
            .map(|(i, doc)| format!("Source {} ({}):\n{}", i + 1, doc.source_id, doc.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}
