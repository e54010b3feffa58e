//! Developer search agent
//!
//! Answers developer questions by querying a web search server and a
//! documentation search server in parallel over the Model Context Protocol,
//! then asking a language model to synthesize an answer from both.
//!
//! # Architecture
//!
//! - **Connections**: one supervised MCP session per configured server
//! - **Dispatch**: concurrent tool calls with per-call and overall deadlines
//! - **Normalization**: per-server-kind transforms into one result shape
//! - **Orchestration**: plan, fan out, normalize, ask the model, record the turn
//!
//! # Modules
//!
//! - [`mcp`]: server descriptors, connections and the connection registry
//! - [`dispatch`]: concurrent tool-call fan-out
//! - [`normalized`]: uniform result items
//! - [`llm`]: language-model boundary
//! - [`agent`]: the per-query orchestrator
//! - [`session`]: conversation history and search log

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod llm;
pub mod mcp;
pub mod normalized;
pub mod session;
pub mod telemetry;
