//! One supervised session to one tool server.
//!
//! Lifecycle transitions (`connect`, `disconnect`) are serialized per
//! connection by an async lock. Readers only touch a snapshot behind a
//! short-held `RwLock`, so `status` never waits on a handshake in progress.

use std::sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::mcp::config::ServerDescriptor;
use crate::mcp::error::{CallError, RegistryError};
use crate::mcp::session::{Connector, ToolSession};
use crate::mcp::types::{ToolInfo, ToolPayload};

/// Observable state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    /// `Ready` with at least one call in flight.
    Calling,
    Disconnecting,
    Failed,
}

impl ConnectionState {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready | Self::Calling)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Calling => "calling",
            Self::Disconnecting => "disconnecting",
            Self::Failed => "failed",
        };
        f.pad(s)
    }
}

/// Point-in-time view of a connection, as reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub server: String,
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub tools: Vec<ToolInfo>,
    pub in_flight: usize,
}

#[derive(Debug)]
struct Snapshot {
    state: ConnectionState,
    last_error: Option<String>,
    tools: Vec<ToolInfo>,
    session: Option<Arc<dyn ToolSession>>,
}

#[derive(Debug)]
pub struct ToolServerConnection {
    descriptor: ServerDescriptor,
    lifecycle: Mutex<()>,
    snapshot: RwLock<Snapshot>,
    in_flight: Arc<AtomicUsize>,
}

impl ToolServerConnection {
    pub(crate) fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            descriptor,
            lifecycle: Mutex::new(()),
            snapshot: RwLock::new(Snapshot {
                state: ConnectionState::Disconnected,
                last_error: None,
                tools: Vec::new(),
                session: None,
            }),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn status(&self) -> ConnectionStatus {
        let in_flight = self.in_flight.load(Ordering::Acquire);
        let snap = self.read();
        let state = if snap.state == ConnectionState::Ready && in_flight > 0 {
            ConnectionState::Calling
        } else {
            snap.state
        };
        ConnectionStatus {
            server: self.descriptor.id.clone(),
            state,
            last_error: snap.last_error.clone(),
            tools: snap.tools.clone(),
            in_flight,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.read().state == ConnectionState::Ready
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Snapshot> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the session unless already `Ready`.
    pub(crate) async fn connect(
        &self,
        connector: &dyn Connector,
        handshake_timeout: Duration,
    ) -> Result<(), RegistryError> {
        let _guard = self.lifecycle.lock().await;
        let server = self.id();

        if self.is_ready() {
            debug!(name: "mcp.server.connect.skip", server = %server, "Server already ready");
            return Ok(());
        }

        self.write().state = ConnectionState::Connecting;
        info!(name: "mcp.server.connecting", server = %server, "Connecting to MCP server");

        // Session open and tool discovery share one handshake bound.
        let handshake = async {
            let session = connector.open(&self.descriptor).await?;
            let tools = match session.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(server = %server, error = %e, "Tool discovery failed, continuing without tool list");
                    Vec::new()
                }
            };
            anyhow::Ok((session, tools))
        };

        let (session, tools) = match tokio::time::timeout(handshake_timeout, handshake).await {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => return Err(self.fail(format!("{e:#}"))),
            Err(_) => {
                return Err(self.fail(format!(
                    "handshake timed out after {}ms",
                    handshake_timeout.as_millis()
                )));
            }
        };

        for declared in &self.descriptor.declared_tools {
            if !tools.iter().any(|t| &t.name == declared) {
                warn!(
                    server = %server,
                    tool = %declared,
                    "Declared tool not offered by server"
                );
            }
        }

        let tool_count = tools.len();
        {
            let mut snap = self.write();
            snap.state = ConnectionState::Ready;
            snap.last_error = None;
            snap.tools = tools;
            snap.session = Some(session);
        }

        info!(
            name: "mcp.server.ready",
            server = %server,
            tool_count = tool_count,
            "MCP server ready"
        );
        Ok(())
    }

    fn fail(&self, reason: String) -> RegistryError {
        error!(
            name: "mcp.server.failed",
            server = %self.id(),
            error = %reason,
            "MCP server connection failed"
        );
        {
            let mut snap = self.write();
            snap.state = ConnectionState::Failed;
            snap.last_error = Some(reason.clone());
            snap.session = None;
            snap.tools.clear();
        }
        RegistryError::ConnectionFailed {
            server: self.id().to_string(),
            reason,
        }
    }

    /// Release the session. Ends in `Disconnected`, or `Failed` when the
    /// teardown itself errors; never `Ready` or `Connecting`.
    pub(crate) async fn disconnect(&self, shutdown_timeout: Duration) -> Result<(), RegistryError> {
        let _guard = self.lifecycle.lock().await;
        let server = self.id();

        let session = {
            let mut snap = self.write();
            match snap.session.take() {
                Some(session) => {
                    snap.state = ConnectionState::Disconnecting;
                    session
                }
                None => {
                    if snap.state != ConnectionState::Failed {
                        snap.state = ConnectionState::Disconnected;
                    }
                    return Ok(());
                }
            }
        };

        debug!(name: "mcp.server.disconnecting", server = %server, "Disconnecting MCP server");

        let outcome = match tokio::time::timeout(shutdown_timeout, session.close()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => Err(format!(
                "shutdown timed out after {}ms",
                shutdown_timeout.as_millis()
            )),
        };

        let mut snap = self.write();
        snap.tools.clear();
        match outcome {
            Ok(()) => {
                snap.state = ConnectionState::Disconnected;
                info!(name: "mcp.server.disconnected", server = %server, "MCP server disconnected");
                Ok(())
            }
            Err(reason) => {
                snap.state = ConnectionState::Failed;
                snap.last_error = Some(reason.clone());
                warn!(server = %server, error = %reason, "MCP server teardown failed");
                Err(RegistryError::TeardownFailed {
                    server: server.to_string(),
                    reason,
                })
            }
        }
    }

    /// Borrow the live session for one call. `None` unless `Ready`.
    pub(crate) fn acquire(&self) -> Option<CallHandle> {
        let snap = self.read();
        if snap.state != ConnectionState::Ready {
            return None;
        }
        let session = Arc::clone(snap.session.as_ref()?);
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Some(CallHandle {
            session,
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

/// Permission to issue calls on a `Ready` session. Counts as in flight
/// until dropped.
#[derive(Debug)]
pub struct CallHandle {
    session: Arc<dyn ToolSession>,
    in_flight: Arc<AtomicUsize>,
}

impl CallHandle {
    pub async fn call(
        &self,
        tool: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ToolPayload, CallError> {
        self.session.call_tool(tool, arguments).await
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
