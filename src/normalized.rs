//! Uniform result records built from heterogeneous tool output.
//!
//! Each [`ServerKind`] owns one fixed transform from a raw [`ToolPayload`]
//! to a list of [`NormalizedItem`]s. Adding a server kind means adding a
//! variant and its transform; callers never branch on server shape.
//!
//! # Example
//!
//! ```rust
//! use devsearch_agent::dispatch::ToolCallResult;
//! use devsearch_agent::mcp::{ServerDescriptor, ServerKind, ServerLaunch, ToolPayload};
//! use devsearch_agent::normalized::Normalizer;
//! use std::time::Duration;
//!
//! let web = ServerDescriptor::new(
//!     "duckduckgo",
//!     ServerKind::WebSearch,
//!     ServerLaunch::Stdio { command: "npx".into(), args: vec![], env: Default::default() },
//! );
//! let normalizer = Normalizer::new([&web]);
//!
//! let result = ToolCallResult {
//!     server: "duckduckgo".into(),
//!     tool: "search".into(),
//!     latency: Duration::from_millis(120),
//!     outcome: Ok(ToolPayload::from_text(
//!         "Found 1 search results:\n\n1. Tokio\n   URL: https://tokio.rs\n   Summary: An async runtime\n",
//!     )),
//! };
//! let items = normalizer.normalize(&result);
//! assert_eq!(items.len(), 1);
//! assert_eq!(items[0].title, "Tokio");
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::dispatch::ToolCallResult;
use crate::mcp::config::{ServerDescriptor, ServerKind};
use crate::mcp::types::ToolPayload;

/// Longest summary kept on an item, in characters.
const MAX_SUMMARY_CHARS: usize = 280;

/// A source-tagged result ready for the language model and for citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    /// Server the item came from.
    pub source: String,
    pub title: String,
    pub summary: String,
    /// Original fields, kept for display or citation.
    pub raw: Value,
}

/// A payload the transform for its server could not read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed result from '{server}': {reason}")]
pub struct MalformedResult {
    pub server: String,
    pub reason: String,
}

/// Intermediate record produced by a transform before source tagging.
#[derive(Debug, Clone, PartialEq)]
struct Entry {
    title: String,
    summary: String,
    raw: Value,
}

type Transform = fn(&ToolPayload) -> Result<Vec<Entry>, String>;

impl ServerKind {
    fn transform(self) -> Transform {
        match self {
            Self::WebSearch => web_search_entries,
            Self::DocsSearch => docs_search_entries,
        }
    }
}

/// Maps tool results to [`NormalizedItem`]s using the kind of their server.
#[derive(Debug, Default)]
pub struct Normalizer {
    kinds: HashMap<String, ServerKind>,
    anomalies: AtomicU64,
}

impl Normalizer {
    pub fn new<'a>(descriptors: impl IntoIterator<Item = &'a ServerDescriptor>) -> Self {
        Self {
            kinds: descriptors
                .into_iter()
                .map(|d| (d.id.clone(), d.kind))
                .collect(),
            anomalies: AtomicU64::new(0),
        }
    }

    /// Items for `result`; empty for failures and unreadable payloads.
    pub fn normalize(&self, result: &ToolCallResult) -> Vec<NormalizedItem> {
        self.try_normalize(result).unwrap_or_default()
    }

    /// Like [`normalize`](Self::normalize) but reports unreadable payloads.
    ///
    /// Failed calls normalize to an empty list. A successful call with zero
    /// results is also an empty list, not an error.
    pub fn try_normalize(
        &self,
        result: &ToolCallResult,
    ) -> Result<Vec<NormalizedItem>, MalformedResult> {
        let Ok(payload) = &result.outcome else {
            return Ok(Vec::new());
        };

        let entries = match self.kinds.get(&result.server) {
            Some(kind) => kind.transform()(payload),
            None => Err("no transform registered for this server".to_string()),
        };

        match entries {
            Ok(entries) => Ok(entries
                .into_iter()
                .map(|e| NormalizedItem {
                    source: result.server.clone(),
                    title: e.title,
                    summary: truncate_summary(&e.summary),
                    raw: e.raw,
                })
                .collect()),
            Err(reason) => {
                self.anomalies.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    name: "normalizer.anomaly",
                    server = %result.server,
                    tool = %result.tool,
                    reason = %reason,
                    "Unrecognized tool result shape"
                );
                Err(MalformedResult {
                    server: result.server.clone(),
                    reason,
                })
            }
        }
    }

    /// Number of unreadable payloads seen so far.
    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }
}

/// Source (or URL) of the first item `kind` reads from `payload`.
///
/// Used to chain a follow-up call, e.g. a Context7 library id.
pub fn first_source(kind: ServerKind, payload: &ToolPayload) -> Option<String> {
    kind.transform()(payload).ok()?.into_iter().find_map(|e| {
        e.raw
            .get("source")
            .or_else(|| e.raw.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

fn truncate_summary(summary: &str) -> String {
    let summary = summary.trim();
    if summary.chars().count() <= MAX_SUMMARY_CHARS {
        return summary.to_string();
    }
    let mut out: String = summary.chars().take(MAX_SUMMARY_CHARS - 1).collect();
    out.push('…');
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Structured JSON
// ─────────────────────────────────────────────────────────────────────────────

/// Structured rows from `structuredContent`, or from text that is itself JSON.
/// `None` when the payload carries no JSON at all.
fn structured_rows(payload: &ToolPayload) -> Option<Result<Vec<Value>, String>> {
    let value = match &payload.structured {
        Some(v) => v.clone(),
        None => {
            let text = payload.text();
            let trimmed = text.trim_start();
            if !(trimmed.starts_with('[') || trimmed.starts_with('{')) {
                return None;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(v) => v,
                Err(e) => return Some(Err(format!("invalid JSON payload: {e}"))),
            }
        }
    };

    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match ["results", "items", "libraries", "documents"]
            .iter()
            .find_map(|k| obj.remove(*k))
        {
            Some(Value::Array(rows)) => rows,
            _ => return Some(Err("JSON object without a result list".to_string())),
        },
        other => return Some(Err(format!("unexpected JSON value: {other}"))),
    };
    Some(Ok(rows))
}

fn field<'a>(row: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| row.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn rows_to_entries(
    rows: &[Value],
    build: impl Fn(&Value) -> Option<Entry>,
) -> Result<Vec<Entry>, String> {
    let entries: Vec<Entry> = rows.iter().filter_map(build).collect();
    if entries.is_empty() && !rows.is_empty() {
        return Err(format!("none of {} rows had a recognizable shape", rows.len()));
    }
    Ok(entries)
}

fn says_no_results(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    lower.starts_with("no results")
        || lower.starts_with("no libraries")
        || lower.starts_with("no documentation")
        || lower.starts_with("found 0 ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Web search: title / url / snippet
// ─────────────────────────────────────────────────────────────────────────────

fn web_entry(title: Option<&str>, url: Option<&str>, snippet: Option<&str>) -> Option<Entry> {
    let heading = title.or(url)?;
    Some(Entry {
        title: heading.to_string(),
        summary: snippet.unwrap_or_default().to_string(),
        raw: json!({
            "title": title,
            "url": url,
            "snippet": snippet,
        }),
    })
}

fn web_search_entries(payload: &ToolPayload) -> Result<Vec<Entry>, String> {
    if let Some(rows) = structured_rows(payload) {
        return rows_to_entries(&rows?, |row| {
            web_entry(
                field(row, &["title", "name"]),
                field(row, &["url", "link", "href"]),
                field(row, &["snippet", "summary", "body", "description"]),
            )
        });
    }

    let text = payload.text();
    if text.trim().is_empty() || says_no_results(&text) {
        return Ok(Vec::new());
    }

    let entries = parse_web_listing(&text);
    if entries.is_empty() {
        return Err("unrecognized web search listing".to_string());
    }
    Ok(entries)
}

/// Numbered listing: `1. Title`, then `URL:` and `Summary:` lines.
fn parse_web_listing(text: &str) -> Vec<Entry> {
    #[derive(Default)]
    struct Pending {
        title: String,
        url: Option<String>,
        snippet: Vec<String>,
    }

    fn flush(pending: Option<Pending>, out: &mut Vec<Entry>) {
        if let Some(p) = pending {
            let snippet = p.snippet.join(" ");
            let snippet = (!snippet.is_empty()).then_some(snippet.as_str());
            if let Some(entry) = web_entry(Some(&p.title), p.url.as_deref(), snippet) {
                out.push(entry);
            }
        }
    }

    let mut out = Vec::new();
    let mut current: Option<Pending> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(title) = numbered_heading(line) {
            flush(current.take(), &mut out);
            current = Some(Pending {
                title: title.to_string(),
                ..Pending::default()
            });
            continue;
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(url) = line.strip_prefix("URL:") {
            entry.url = Some(url.trim().to_string());
        } else if let Some(summary) = line.strip_prefix("Summary:") {
            entry.snippet.push(summary.trim().to_string());
        } else {
            entry.snippet.push(line.to_string());
        }
    }
    flush(current, &mut out);
    out
}

fn numbered_heading(line: &str) -> Option<&str> {
    let (number, rest) = line.split_once(". ")?;
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let title = rest.trim();
    (!title.is_empty()).then_some(title)
}

// ─────────────────────────────────────────────────────────────────────────────
// Documentation search: library / snippet / source
// ─────────────────────────────────────────────────────────────────────────────

fn docs_entry(library: &str, snippet: Option<&str>, source: &str) -> Entry {
    Entry {
        title: library.to_string(),
        summary: snippet.unwrap_or_default().to_string(),
        raw: json!({
            "library": library,
            "snippet": snippet,
            "source": source,
        }),
    }
}

fn docs_search_entries(payload: &ToolPayload) -> Result<Vec<Entry>, String> {
    if let Some(rows) = structured_rows(payload) {
        return rows_to_entries(&rows?, |row| {
            let library = field(row, &["library", "title", "name"])?;
            let source = field(row, &["source", "url", "libraryId", "id"])?;
            let snippet = field(row, &["snippet", "description", "content"]);
            Some(docs_entry(library, snippet, source))
        });
    }

    let text = payload.text();
    if text.trim().is_empty() || says_no_results(&text) {
        return Ok(Vec::new());
    }

    let lines: Vec<&str> = text.lines().collect();
    let entries: Vec<Entry> = lines
        .split(|line| is_rule(line))
        .filter_map(parse_docs_block)
        .collect();

    if entries.is_empty() {
        return Err("unrecognized documentation listing".to_string());
    }
    Ok(entries)
}

fn is_rule(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 3 && line.chars().all(|c| c == '-')
}

/// One block of `KEY: value` lines. Needs both a title and a source.
fn parse_docs_block(lines: &[&str]) -> Option<Entry> {
    let mut title = None;
    let mut description = None;
    let mut source = None;
    let mut body = Vec::new();

    for raw in lines {
        let line = raw.trim();
        let stripped = line.strip_prefix("- ").unwrap_or(line);
        let parsed = stripped
            .split_once(':')
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim()));

        match parsed {
            Some((key, value)) if key == "title" => title = Some(value),
            Some((key, value)) if key == "description" => description = Some(value),
            Some((key, value)) if key == "source" || key == "context7-compatible library id" => {
                source = Some(value);
            }
            _ if !line.is_empty() && !line.starts_with("```") => body.push(line),
            _ => {}
        }
    }

    let title = title.filter(|t| !t.is_empty())?;
    let source = source.filter(|s| !s.is_empty())?;
    let joined = body.join(" ");
    let snippet = description
        .filter(|d| !d.is_empty())
        .or((!joined.is_empty()).then_some(joined.as_str()));
    Some(docs_entry(title, snippet, source))
}
