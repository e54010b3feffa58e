//! End-to-end query handling.
//!
//! The [`Orchestrator`] plans one call per configured search server, fans
//! them out through the dispatcher, normalizes whatever came back and asks
//! the language model for an answer grounded in those items.

pub mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorSettings, TurnOutcome};

use serde::Serialize;

use crate::dispatch::{ToolCallResult, ToolFailure};
use crate::normalized::NormalizedItem;

/// One entry of a turn's source list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceEntry {
    /// A result item, tagged with its server.
    Item(NormalizedItem),
    /// A server that contributed nothing. `failure` is `None` when the call
    /// succeeded with zero results.
    Missing {
        server: String,
        failure: Option<ToolFailure>,
    },
}

impl SourceEntry {
    pub fn server(&self) -> &str {
        match self {
            Self::Item(item) => &item.source,
            Self::Missing { server, .. } => server,
        }
    }

    pub fn item(&self) -> Option<&NormalizedItem> {
        match self {
            Self::Item(item) => Some(item),
            Self::Missing { .. } => None,
        }
    }
}

impl std::fmt::Display for SourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Item(item) => write!(f, "[{}] {}", item.source, item.title),
            Self::Missing {
                server,
                failure: None,
            } => write!(f, "no results from {server}"),
            Self::Missing {
                server,
                failure: Some(failure),
            } => write!(f, "no results from {server} ({failure})"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The language model produced no answer; the turn was not recorded.
    /// `results` holds the tool calls made before the model was asked.
    #[error("model call failed: {message}")]
    ModelCallFailed {
        message: String,
        results: Vec<ToolCallResult>,
    },
}

impl AgentError {
    /// Tool calls the failed turn had already made.
    pub fn results(&self) -> &[ToolCallResult] {
        match self {
            Self::ModelCallFailed { results, .. } => results,
        }
    }
}
