//! Language-model boundary.
//!
//! The orchestrator talks to the model only through [`LanguageModel`]. A
//! [`ModelRequest`] carries the framing, recent turns, the user query and the
//! normalized tool context; [`ModelRequest::messages`] lays them out as a
//! chat transcript.
//!
//! # Drivers
//!
//! - [`ChatCompletionsModel`]: `OpenAI`-compatible Chat Completions API (`/v1/chat/completions`)
//!
//! # Example
//!
//! ```rust
//! use devsearch_agent::llm::{MessageRole, ModelRequest};
//!
//! let request = ModelRequest {
//!     system: "You are a helpful developer assistant.".into(),
//!     history: vec![("What is tokio?".into(), "An async runtime.".into())],
//!     query: "How do I spawn a task?".into(),
//!     context: vec![],
//!     notes: vec![],
//! };
//! let messages = request.messages();
//! assert_eq!(messages.len(), 4);
//! assert_eq!(messages[0].role, MessageRole::System);
//! assert_eq!(messages[3].role, MessageRole::User);
//! ```

pub mod chat_completions;

pub use chat_completions::ChatCompletionsModel;

use std::fmt::Write as _;
use std::time::Duration;

use crate::normalized::NormalizedItem;

/// LLM connection and model settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gpt-4o-mini`).
    pub model: String,
    /// Bound on one completion request.
    pub timeout: Duration,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

/// Everything the model sees for one turn.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system: String,
    /// Earlier `(query, answer)` pairs, oldest first.
    pub history: Vec<(String, String)>,
    pub query: String,
    pub context: Vec<NormalizedItem>,
    /// Remarks about the context, e.g. sources that returned nothing.
    pub notes: Vec<String>,
}

impl ModelRequest {
    /// Chat transcript: system, prior turns, then the query with its context.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() * 2 + 2);
        messages.push(Message::new(MessageRole::System, self.system.clone()));
        for (query, answer) in &self.history {
            messages.push(Message::new(MessageRole::User, query.clone()));
            messages.push(Message::new(MessageRole::Assistant, answer.clone()));
        }
        messages.push(Message::new(MessageRole::User, self.user_prompt()));
        messages
    }

    fn user_prompt(&self) -> String {
        if self.context.is_empty() && self.notes.is_empty() {
            return self.query.clone();
        }

        let mut prompt = String::new();
        if !self.context.is_empty() {
            prompt.push_str("Search results:\n");
            for (i, item) in self.context.iter().enumerate() {
                let _ = writeln!(prompt, "[{}] ({}) {}", i + 1, item.source, item.title);
                if let Some(link) = item_link(item) {
                    let _ = writeln!(prompt, "    {link}");
                }
                if !item.summary.is_empty() {
                    let _ = writeln!(prompt, "    {}", item.summary);
                }
            }
            prompt.push('\n');
        }
        for note in &self.notes {
            let _ = writeln!(prompt, "Note: {note}");
        }
        if !self.notes.is_empty() {
            prompt.push('\n');
        }
        let _ = write!(prompt, "Question: {}", self.query);
        prompt
    }
}

fn item_link(item: &NormalizedItem) -> Option<&str> {
    ["url", "source"]
        .iter()
        .find_map(|k| item.raw.get(*k).and_then(serde_json::Value::as_str))
}

/// A model that turns a [`ModelRequest`] into an answer.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync + std::fmt::Debug {
    /// Produce the assistant's answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response has no answer.
    async fn complete(&self, request: &ModelRequest) -> anyhow::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_query_when_no_context() {
        let req = ModelRequest {
            system: "sys".into(),
            query: "hello".into(),
            ..ModelRequest::default()
        };
        let messages = req.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], Message::new(MessageRole::User, "hello"));
    }

    #[test]
    fn context_is_numbered_and_tagged() {
        let req = ModelRequest {
            system: "sys".into(),
            history: vec![],
            query: "how to select".into(),
            context: vec![
                NormalizedItem {
                    source: "web".into(),
                    title: "Select".into(),
                    summary: "Wait on branches".into(),
                    raw: json!({ "url": "https://tokio.rs/select" }),
                },
                NormalizedItem {
                    source: "docs".into(),
                    title: "tokio".into(),
                    summary: String::new(),
                    raw: json!({ "source": "/tokio-rs/tokio" }),
                },
            ],
            notes: vec!["No documentation results from docs.".into()],
        };
        let prompt = &req.messages()[1].content;
        assert!(prompt.starts_with("Search results:\n[1] (web) Select\n    https://tokio.rs/select\n    Wait on branches\n[2] (docs) tokio\n    /tokio-rs/tokio\n"));
        assert!(prompt.contains("Note: No documentation results from docs.\n"));
        assert!(prompt.ends_with("Question: how to select"));
    }

    #[test]
    fn roles_serialize_lowercase() {
        let v = serde_json::to_value(Message::new(MessageRole::Assistant, "hi")).unwrap();
        assert_eq!(v, json!({ "role": "assistant", "content": "hi" }));
    }
}
