use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::mcp::config::ServerDescriptor;
use crate::mcp::connection::{CallHandle, ConnectionStatus, ToolServerConnection};
use crate::mcp::error::RegistryError;
use crate::mcp::session::Connector;
use crate::mcp::types::ToolInfo;

/// Handshake and teardown bounds applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimeouts {
    pub handshake: Duration,
    pub shutdown: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            shutdown: Duration::from_secs(5),
        }
    }
}

/// Outcome of [`ConnectionRegistry::connect_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectReport {
    pub connected: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl ConnectReport {
    pub fn all_connected(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns one [`ToolServerConnection`] per configured server.
///
/// The set of servers is fixed at construction, so lookups need no lock;
/// each connection guards its own transitions and connect/disconnect of
/// different servers run independently.
pub struct ConnectionRegistry {
    connections: HashMap<String, Arc<ToolServerConnection>>,
    order: Vec<String>,
    connector: Arc<dyn Connector>,
    timeouts: LifecycleTimeouts,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("servers", &self.order)
            .field("ready", &self.ready_servers())
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new(
        descriptors: impl IntoIterator<Item = ServerDescriptor>,
        connector: Arc<dyn Connector>,
        timeouts: LifecycleTimeouts,
    ) -> Result<Self, RegistryError> {
        let mut connections = HashMap::new();
        let mut order = Vec::new();

        for descriptor in descriptors {
            let id = descriptor.id.clone();
            if connections.contains_key(&id) {
                return Err(RegistryError::DuplicateServer(id));
            }
            connections.insert(id.clone(), Arc::new(ToolServerConnection::new(descriptor)));
            order.push(id);
        }

        Ok(Self {
            connections,
            order,
            connector,
            timeouts,
        })
    }

    fn connection(&self, server_id: &str) -> Result<&Arc<ToolServerConnection>, RegistryError> {
        self.connections
            .get(server_id)
            .ok_or_else(|| RegistryError::UnknownServer(server_id.to_string()))
    }

    /// Descriptors in the order given to [`new`](Self::new); for `mcp.json`
    /// that is server id order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ServerDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.connections.get(id))
            .map(|c| c.descriptor())
    }

    pub fn descriptor(&self, server_id: &str) -> Option<&ServerDescriptor> {
        self.connections.get(server_id).map(|c| c.descriptor())
    }

    /// Connect one server. A no-op when it is already `Ready`.
    pub async fn connect(&self, server_id: &str) -> Result<(), RegistryError> {
        let connection = self.connection(server_id)?;
        connection
            .connect(self.connector.as_ref(), self.timeouts.handshake)
            .await
    }

    /// Connect every server concurrently; failures are collected, not fatal.
    pub async fn connect_all(&self) -> ConnectReport {
        let outcomes = join_all(self.order.iter().map(|id| async move {
            (id.clone(), self.connect(id).await)
        }))
        .await;

        let mut report = ConnectReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.connected.push(id),
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }

        info!(
            name: "mcp.registry.connected",
            connected = report.connected.len(),
            failed = report.failed.len(),
            "Connect-all finished"
        );
        report
    }

    pub async fn disconnect(&self, server_id: &str) -> Result<(), RegistryError> {
        let connection = self.connection(server_id)?;
        connection.disconnect(self.timeouts.shutdown).await
    }

    /// Release every connection. All teardowns run even when some fail;
    /// the failures come back aggregated.
    pub async fn disconnect_all(&self) -> Result<(), RegistryError> {
        let shutdown = self.timeouts.shutdown;
        let outcomes = join_all(
            self.order
                .iter()
                .filter_map(|id| self.connections.get(id))
                .map(|c| async move { (c.id().to_string(), c.disconnect(shutdown).await) }),
        )
        .await;

        let failures: Vec<(String, String)> = outcomes
            .into_iter()
            .filter_map(|(server, outcome)| {
                outcome.err().map(|e| match e {
                    RegistryError::TeardownFailed { reason, .. } => (server, reason),
                    other => (server, other.to_string()),
                })
            })
            .collect();

        if failures.is_empty() {
            info!(name: "mcp.registry.shutdown", "All MCP servers disconnected");
            Ok(())
        } else {
            warn!(
                name: "mcp.registry.shutdown",
                failed = failures.len(),
                "MCP shutdown finished with errors"
            );
            Err(RegistryError::Teardown { failures })
        }
    }

    /// Disconnect then connect again.
    pub async fn reconnect(&self, server_id: &str) -> Result<(), RegistryError> {
        info!(server = %server_id, "Reconnecting MCP server");
        if let Err(e) = self.disconnect(server_id).await {
            warn!(server = %server_id, error = %e, "Teardown before reconnect failed");
        }
        self.connect(server_id).await
    }

    pub fn status(&self, server_id: &str) -> Option<ConnectionStatus> {
        self.connections.get(server_id).map(|c| c.status())
    }

    /// Status of every server, in the same order as [`descriptors`](Self::descriptors).
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.order
            .iter()
            .filter_map(|id| self.status(id))
            .collect()
    }

    /// Servers that can take calls right now.
    pub fn ready_servers(&self) -> BTreeSet<String> {
        self.connections
            .values()
            .filter(|c| c.is_ready())
            .map(|c| c.id().to_string())
            .collect()
    }

    /// Tools discovered on ready servers, tagged with their server.
    pub fn tools(&self) -> Vec<(String, ToolInfo)> {
        self.statuses()
            .into_iter()
            .filter(|s| s.state.is_ready())
            .flat_map(|s| {
                let server = s.server;
                s.tools.into_iter().map(move |t| (server.clone(), t))
            })
            .collect()
    }

    /// Last recorded error per server, for servers that have one.
    pub fn connection_errors(&self) -> BTreeMap<String, String> {
        self.statuses()
            .into_iter()
            .filter_map(|s| s.last_error.map(|e| (s.server, e)))
            .collect()
    }

    /// Call handle for a `Ready` server; `None` for unknown or not-ready ids.
    pub fn acquire(&self, server_id: &str) -> Option<CallHandle> {
        self.connections.get(server_id)?.acquire()
    }
}
