//! Concurrent tool-call fan-out with per-call and overall deadlines.
//!
//! [`Dispatcher::dispatch`] returns exactly one [`ToolCallResult`] per
//! request, in request order, whatever the completion order. Requests for
//! servers that are not `Ready` fail immediately with
//! [`FailureKind::ServerUnavailable`] and never touch a transport.
//!
//! A request may carry a [`FollowUpCall`]: a second call on the same server
//! that takes an id read from the first result. Both calls share the
//! per-call deadline and produce a single result.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::mcp::config::ServerKind;
use crate::mcp::connection::CallHandle;
use crate::mcp::error::CallError;
use crate::mcp::registry::ConnectionRegistry;
use crate::mcp::types::ToolPayload;
use crate::normalized::first_source;

type Arguments = serde_json::Map<String, serde_json::Value>;

/// One tool call aimed at one server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub server: String,
    pub tool: String,
    pub arguments: Arguments,
    pub then: Option<FollowUpCall>,
}

impl ToolCallRequest {
    pub fn new(server: impl Into<String>, tool: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            server: server.into(),
            tool: tool.into(),
            arguments,
            then: None,
        }
    }

    #[must_use]
    pub fn then(mut self, follow_up: FollowUpCall) -> Self {
        self.then = Some(follow_up);
        self
    }
}

/// Second call issued with the first source found in the first result.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpCall {
    pub tool: String,
    /// Argument key receiving the id.
    pub id_argument: String,
    pub arguments: Arguments,
}

impl FollowUpCall {
    fn arguments_for(&self, id: &str) -> Arguments {
        let mut args = self.arguments.clone();
        args.insert(
            self.id_argument.clone(),
            serde_json::Value::String(id.to_string()),
        );
        args
    }
}

/// Why a tool call produced no payload (or an unusable one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transport error while talking to the server.
    ConnectionFailed,
    /// The target server was not `Ready`.
    ServerUnavailable,
    /// Per-call or overall deadline exceeded.
    Timeout,
    /// The server answered with an error.
    ToolError,
    /// The payload shape was not recognized.
    MalformedResult,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConnectionFailed => "connection failed",
            Self::ServerUnavailable => "server unavailable",
            Self::Timeout => "timeout",
            Self::ToolError => "tool error",
            Self::MalformedResult => "malformed result",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ToolFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<CallError> for ToolFailure {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Tool(message) => Self::new(FailureKind::ToolError, message),
            CallError::Transport(message) => Self::new(FailureKind::ConnectionFailed, message),
        }
    }
}

/// Outcome of one request, tagged with its server and latency.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub server: String,
    pub tool: String,
    pub latency: Duration,
    pub outcome: Result<ToolPayload, ToolFailure>,
}

impl ToolCallResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn failure(&self) -> Option<&ToolFailure> {
        self.outcome.as_ref().err()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure().map(|f| f.kind)
    }
}

/// Deadlines for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTimeouts {
    pub per_call: Duration,
    pub overall: Duration,
}

impl Default for DispatchTimeouts {
    fn default() -> Self {
        Self {
            per_call: Duration::from_secs(20),
            overall: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Issue all requests concurrently and collect one result per request.
    ///
    /// Calls still outstanding when `overall` elapses are abandoned and
    /// reported as [`FailureKind::Timeout`]; completed results are kept.
    pub async fn dispatch(
        &self,
        requests: Vec<ToolCallRequest>,
        per_call: Duration,
        overall: Duration,
    ) -> Vec<ToolCallResult> {
        let started = Instant::now();
        let mut slots: Vec<Option<ToolCallResult>> = Vec::with_capacity(requests.len());
        let mut targets = Vec::with_capacity(requests.len());
        let mut in_flight = FuturesUnordered::new();

        for (index, request) in requests.into_iter().enumerate() {
            let ToolCallRequest {
                server,
                tool,
                arguments,
                then,
            } = request;
            targets.push((server.clone(), tool.clone()));

            let Some(handle) = self.registry.acquire(&server) else {
                debug!(server = %server, tool = %tool, "Server not ready, skipping call");
                slots.push(Some(ToolCallResult {
                    server,
                    tool,
                    latency: Duration::ZERO,
                    outcome: Err(ToolFailure::new(
                        FailureKind::ServerUnavailable,
                        "server is not ready",
                    )),
                }));
                continue;
            };
            slots.push(None);
            let chain = then.zip(self.registry.descriptor(&server).map(|d| d.kind));

            in_flight.push(async move {
                let call_started = Instant::now();
                let work = run_call(&handle, &tool, arguments, chain);
                let outcome = match tokio::time::timeout(per_call, work).await {
                    Ok(Ok(payload)) => Ok(payload),
                    Ok(Err(e)) => Err(ToolFailure::from(e)),
                    Err(_) => Err(ToolFailure::new(
                        FailureKind::Timeout,
                        format!("no response within {}ms", per_call.as_millis()),
                    )),
                };
                drop(handle);

                (
                    index,
                    ToolCallResult {
                        server,
                        tool,
                        latency: call_started.elapsed(),
                        outcome,
                    },
                )
            });
        }

        let issued = in_flight.len();
        let deadline = tokio::time::sleep(overall);
        tokio::pin!(deadline);

        while !in_flight.is_empty() {
            tokio::select! {
                biased;
                Some((index, result)) = in_flight.next() => {
                    debug!(
                        server = %result.server,
                        tool = %result.tool,
                        latency_ms = result.latency.as_millis(),
                        success = result.is_success(),
                        "Tool call finished"
                    );
                    slots[index] = Some(result);
                }
                () = &mut deadline => {
                    warn!(
                        outstanding = in_flight.len(),
                        overall_ms = overall.as_millis(),
                        "Dispatch deadline reached, abandoning outstanding calls"
                    );
                    break;
                }
            }
        }
        // Dropping the set cancels every abandoned wait at once.
        drop(in_flight);

        let results: Vec<ToolCallResult> = slots
            .into_iter()
            .zip(targets)
            .map(|(slot, (server, tool))| {
                slot.unwrap_or_else(|| ToolCallResult {
                    server,
                    tool,
                    latency: started.elapsed(),
                    outcome: Err(ToolFailure::new(
                        FailureKind::Timeout,
                        format!("dispatch deadline of {}ms reached", overall.as_millis()),
                    )),
                })
            })
            .collect();

        info!(
            name: "dispatch.finished",
            requests = results.len(),
            issued = issued,
            succeeded = results.iter().filter(|r| r.is_success()).count(),
            elapsed_ms = started.elapsed().as_millis(),
            "Dispatch finished"
        );

        results
    }
}

/// The request's call, then its follow-up when the first result names a
/// source. Without one the first payload stands.
async fn run_call(
    handle: &CallHandle,
    tool: &str,
    arguments: Arguments,
    chain: Option<(FollowUpCall, ServerKind)>,
) -> Result<ToolPayload, CallError> {
    let payload = handle.call(tool, arguments).await?;
    let Some((follow_up, kind)) = chain else {
        return Ok(payload);
    };
    let Some(id) = first_source(kind, &payload) else {
        debug!(tool = %tool, next = %follow_up.tool, "No id in first result, skipping follow-up");
        return Ok(payload);
    };
    debug!(tool = %tool, next = %follow_up.tool, id = %id, "Issuing follow-up call");
    handle
        .call(&follow_up.tool, follow_up.arguments_for(&id))
        .await
}
