//! Bounded conversation history
//!
//! One history per chat session, appended to only after a generation
//! completes. Single writer per session; no cross-session sharing.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// One completed (question, answer) exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

/// FIFO log of prior turns, bounded at `max_len`.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    max_len: usize,
}

impl ConversationHistory {
    /// Create an empty history holding at most `max_len` turns.
    pub fn new(max_len: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_len.min(64)),
            max_len,
        }
    }

    /// Append a completed turn, evicting the oldest if over capacity.
    pub fn push(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push_back(ConversationTurn {
            question: question.into(),
            answer: answer.into(),
        });
        while self.turns.len() > self.max_len {
            self.turns.pop_front();
        }
    }

    /// Iterate turns oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
