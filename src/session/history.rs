//! Append-only record of completed turns.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::agent::SourceEntry;

/// One query/answer exchange.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub query: String,
    pub answer: String,
    pub sources: Vec<SourceEntry>,
}

impl Turn {
    pub fn new(query: impl Into<String>, answer: impl Into<String>, sources: Vec<SourceEntry>) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            query: query.into(),
            answer: answer.into(),
            sources,
        }
    }
}

/// Turns in the order they completed. There is no way to edit or remove
/// one; a fresh conversation starts from a fresh history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// The newest `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }
}
