//! One turn: plan, fan out, normalize, ask the model, record.
//!
//! # Example
//!
//! ```rust,ignore
//! use devsearch_agent::agent::{Orchestrator, OrchestratorSettings};
//! use devsearch_agent::session::ConversationHistory;
//!
//! let orchestrator = Orchestrator::new(registry, model, OrchestratorSettings::default());
//! let mut history = ConversationHistory::new();
//! let outcome = orchestrator.handle_query("How do I use tokio::select?", &mut history).await?;
//! for source in &outcome.sources {
//!     println!("{source}");
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use super::{AgentError, SourceEntry};
use crate::dispatch::{
    DispatchTimeouts, Dispatcher, FailureKind, FollowUpCall, ToolCallRequest, ToolCallResult,
    ToolFailure,
};
use crate::llm::{LanguageModel, ModelRequest};
use crate::mcp::registry::ConnectionRegistry;
use crate::normalized::{NormalizedItem, Normalizer};
use crate::session::history::{ConversationHistory, Turn};

/// Framing sent as the system message on every turn.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful developer assistant. \
You are given results from a web search (DuckDuckGo) and from library documentation (Context7). \
Use them to answer the user's question comprehensively. \
Cite sources by their bracketed number when you rely on them. \
If the results do not cover the question, say so and answer from general knowledge.";

/// Note added when no source produced anything.
pub const NO_EXTERNAL_RESULTS_NOTE: &str =
    "No external results were available for this question. Answer from general knowledge and say that no sources could be consulted.";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub timeouts: DispatchTimeouts,
    /// Number of earlier turns sent to the model.
    pub history_window: usize,
    pub system_prompt: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            timeouts: DispatchTimeouts::default(),
            history_window: 10,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Id of the turn appended to history.
    pub turn_id: Uuid,
    pub answer: String,
    /// Items in dispatch order, then one entry per server that returned nothing.
    pub sources: Vec<SourceEntry>,
    /// Raw per-call outcomes, aligned with the plan.
    pub results: Vec<ToolCallResult>,
    pub elapsed: Duration,
}

impl TurnOutcome {
    pub fn items(&self) -> impl Iterator<Item = &NormalizedItem> {
        self.sources.iter().filter_map(SourceEntry::item)
    }
}

pub struct Orchestrator {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Dispatcher,
    normalizer: Normalizer,
    model: Arc<dyn LanguageModel>,
    settings: OrchestratorSettings,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("model", &self.model)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        model: Arc<dyn LanguageModel>,
        settings: OrchestratorSettings,
    ) -> Self {
        let normalizer = Normalizer::new(registry.descriptors());
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            registry,
            normalizer,
            model,
            settings,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// One request per configured server that knows how to take a query,
    /// with its follow-up call attached when the template has one.
    ///
    /// Servers that are not `Ready` are planned too; the dispatcher reports
    /// them as unavailable so the answer can mention the gap.
    pub fn plan(&self, query: &str) -> Vec<ToolCallRequest> {
        self.registry
            .descriptors()
            .filter_map(|d| {
                let template = d.query.as_ref()?;
                let request = ToolCallRequest::new(
                    d.id.clone(),
                    template.tool.clone(),
                    template.arguments(query),
                );
                Some(match &template.then {
                    Some(next) => request.then(FollowUpCall {
                        tool: next.tool.clone(),
                        id_argument: next.id_argument.clone(),
                        arguments: next.arguments(query),
                    }),
                    None => request,
                })
            })
            .collect()
    }

    /// Answer `query` using every source and the recent `history`.
    ///
    /// Tool failures never fail the turn. On success the turn is appended
    /// to `history`.
    ///
    /// # Errors
    ///
    /// [`AgentError::ModelCallFailed`] when the model gives no answer;
    /// `history` is left unchanged and the error carries the tool results.
    pub async fn handle_query(
        &self,
        query: &str,
        history: &mut ConversationHistory,
    ) -> Result<TurnOutcome, AgentError> {
        let started = Instant::now();
        let requests = self.plan(query);
        tracing::info!(
            name: "agent.turn.start",
            requests = requests.len(),
            history = history.len(),
            "Handling query"
        );

        let timeouts = self.settings.timeouts;
        let results = self
            .dispatcher
            .dispatch(requests, timeouts.per_call, timeouts.overall)
            .await;

        let (items, missing) = self.collect_sources(&results);
        let notes = notes_for(&items, &missing);

        let request = ModelRequest {
            system: self.settings.system_prompt.clone(),
            history: history
                .recent(self.settings.history_window)
                .iter()
                .map(|t| (t.query.clone(), t.answer.clone()))
                .collect(),
            query: query.to_string(),
            context: items.clone(),
            notes,
        };

        let answer = match self.model.complete(&request).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(name: "agent.model.failed", error = %format!("{e:#}"), "Model call failed");
                return Err(AgentError::ModelCallFailed {
                    message: format!("{e:#}"),
                    results,
                });
            }
        };

        let sources: Vec<SourceEntry> = items
            .into_iter()
            .map(SourceEntry::Item)
            .chain(missing)
            .collect();

        let turn = Turn::new(query, answer.clone(), sources.clone());
        let turn_id = turn.id;
        history.push(turn);

        let elapsed = started.elapsed();
        tracing::info!(
            name: "agent.turn.finished",
            turn_id = %turn_id,
            sources = sources.len(),
            elapsed_ms = elapsed.as_millis(),
            "Turn finished"
        );

        Ok(TurnOutcome {
            turn_id,
            answer,
            sources,
            results,
            elapsed,
        })
    }

    /// Items from every result, plus a `Missing` entry for each result
    /// that yielded none.
    fn collect_sources(&self, results: &[ToolCallResult]) -> (Vec<NormalizedItem>, Vec<SourceEntry>) {
        let mut items = Vec::new();
        let mut missing = Vec::new();

        for result in results {
            match self.normalizer.try_normalize(result) {
                Ok(found) if !found.is_empty() => items.extend(found),
                Ok(_) => missing.push(SourceEntry::Missing {
                    server: result.server.clone(),
                    failure: result.failure().cloned(),
                }),
                Err(malformed) => missing.push(SourceEntry::Missing {
                    server: result.server.clone(),
                    failure: Some(ToolFailure::new(
                        FailureKind::MalformedResult,
                        malformed.reason,
                    )),
                }),
            }
        }
        (items, missing)
    }
}

fn notes_for(items: &[NormalizedItem], missing: &[SourceEntry]) -> Vec<String> {
    if items.is_empty() {
        return vec![NO_EXTERNAL_RESULTS_NOTE.to_string()];
    }
    missing
        .iter()
        .map(|entry| match entry {
            SourceEntry::Missing {
                server,
                failure: Some(failure),
            } => format!("No results from {server} ({}).", failure.kind),
            other => format!("No results from {}.", other.server()),
        })
        .collect()
}
