//! Conversation state for one user.
//!
//! A [`Session`] pairs an [`Orchestrator`] with the session's
//! [`ConversationHistory`] and a log of the searches run on its behalf.
//!
//! # Example
//!
//! ```rust,ignore
//! use devsearch_agent::session::Session;
//!
//! let mut session = Session::new(orchestrator);
//! let outcome = session.ask("What's new in Rust 2024?").await?;
//! assert_eq!(session.history().len(), 1);
//! for search in session.search_history() {
//!     println!("{} {} ok={}", search.source, search.query, search.success);
//! }
//! ```

pub mod history;

pub use history::{ConversationHistory, Turn};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agent::{AgentError, Orchestrator, TurnOutcome};
use crate::dispatch::{FailureKind, ToolCallResult};

/// One search executed against one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRecord {
    pub source: String,
    pub query: String,
    pub at: DateTime<Utc>,
    pub success: bool,
}

#[derive(Debug)]
pub struct Session {
    orchestrator: Arc<Orchestrator>,
    history: ConversationHistory,
    searches: Vec<SearchRecord>,
}

impl Session {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            history: ConversationHistory::new(),
            searches: Vec::new(),
        }
    }

    /// Handle one query and log the searches it ran.
    ///
    /// Searches are logged even when the model then fails. Servers that were
    /// not ready were never searched and are left out.
    ///
    /// # Errors
    ///
    /// Propagates [`AgentError::ModelCallFailed`].
    pub async fn ask(&mut self, query: &str) -> Result<TurnOutcome, AgentError> {
        let outcome = self.orchestrator.handle_query(query, &mut self.history).await;
        match &outcome {
            Ok(turn) => self.record(query, &turn.results),
            Err(err) => self.record(query, err.results()),
        }
        outcome
    }

    fn record(&mut self, query: &str, results: &[ToolCallResult]) {
        let at = Utc::now();
        self.searches.extend(
            results
                .iter()
                .filter(|r| r.failure_kind() != Some(FailureKind::ServerUnavailable))
                .map(|r| SearchRecord {
                    source: r.server.clone(),
                    query: query.to_string(),
                    at,
                    success: r.is_success(),
                }),
        );
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn search_history(&self) -> &[SearchRecord] {
        &self.searches
    }

    /// Forget the search log. Conversation history is kept.
    pub fn clear_search_history(&mut self) {
        self.searches.clear();
    }
}
