//! Transport-level sessions to tool servers.
//!
//! [`Connector`] opens a [`ToolSession`] for a [`ServerDescriptor`]; the
//! registry never talks to a transport directly. [`RmcpConnector`] is the
//! production implementation, backed by `rmcp` over a spawned child process
//! or streamable HTTP.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use rmcp::{
    model::CallToolRequestParam,
    service::ServiceExt,
    transport::{StreamableHttpClientTransport, TokioChildProcess},
};
use tokio::process::Command;
use url::Url;

use crate::mcp::config::{ServerDescriptor, ServerLaunch, has_unresolved_placeholder};
use crate::mcp::error::CallError;
use crate::mcp::types::{CallToolResult, ToolInfo, ToolPayload};

/// A live, initialized session with one tool server.
#[async_trait]
pub trait ToolSession: Send + Sync + std::fmt::Debug {
    /// Discover the tools the server offers.
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolInfo>>;

    /// Invoke one tool.
    async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ToolPayload, CallError>;

    /// Release the session. Calls issued afterwards fail with a transport error.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Opens sessions: spawn or attach, then run the capability handshake.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    async fn open(&self, descriptor: &ServerDescriptor) -> anyhow::Result<Arc<dyn ToolSession>>;
}

type DynClientService = rmcp::service::RunningService<
    rmcp::service::RoleClient,
    Box<dyn rmcp::service::DynService<rmcp::service::RoleClient>>,
>;

/// Connector backed by the `rmcp` client.
#[derive(Debug, Default, Clone, Copy)]
pub struct RmcpConnector;

#[async_trait]
impl Connector for RmcpConnector {
    async fn open(&self, descriptor: &ServerDescriptor) -> anyhow::Result<Arc<dyn ToolSession>> {
        let name = &descriptor.id;

        let service = match &descriptor.launch {
            ServerLaunch::Stdio { command, args, env } => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                for (k, v) in env {
                    cmd.env(k, v);
                }

                let transport = TokioChildProcess::new(cmd)
                    .with_context(|| format!("failed to spawn stdio MCP server '{name}'"))?;
                // store as dyn to keep a homogeneous collection
                ().into_dyn()
                    .serve(transport)
                    .await
                    .with_context(|| format!("failed to connect stdio MCP server '{name}'"))?
            }

            ServerLaunch::RemoteHttp { url, params } => {
                let mut u = Url::parse(url)
                    .with_context(|| format!("invalid url for remote MCP '{name}': {url}"))?;

                for (key, value) in params {
                    // Keep secrets out of logs: only the key is reported.
                    if has_unresolved_placeholder(value) {
                        return Err(anyhow!(
                            "remote MCP '{name}' parameter '{key}' references an unset variable"
                        ));
                    }
                    u.query_pairs_mut().append_pair(key, value);
                }

                let transport = StreamableHttpClientTransport::from_uri(u.to_string());
                ().into_dyn()
                    .serve(transport)
                    .await
                    .with_context(|| format!("failed to connect remote MCP server '{name}'"))?
            }
        };

        Ok(Arc::new(RmcpSession {
            server: name.clone(),
            service: Mutex::new(Some(Arc::new(service))),
        }))
    }
}

/// Session over an `rmcp` running service.
pub struct RmcpSession {
    server: String,
    service: Mutex<Option<Arc<DynClientService>>>,
}

impl std::fmt::Debug for RmcpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmcpSession")
            .field("server", &self.server)
            .field("open", &self.current().is_some())
            .finish()
    }
}

impl RmcpSession {
    fn current(&self) -> Option<Arc<DynClientService>> {
        self.service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn service(&self) -> Result<Arc<DynClientService>, CallError> {
        self.current()
            .ok_or_else(|| CallError::Transport(format!("session to '{}' is closed", self.server)))
    }
}

#[async_trait]
impl ToolSession for RmcpSession {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolInfo>> {
        let service = self.service()?;
        let result = service
            .list_tools(Default::default())
            .await
            .with_context(|| format!("tools/list failed for MCP server '{}'", self.server))?;

        Ok(result
            .tools
            .into_iter()
            .map(|t| ToolInfo {
                name: t.name.to_string(),
                description: t.description.as_deref().map(ToString::to_string),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ToolPayload, CallError> {
        let service = self.service()?;
        let res = service
            .call_tool(CallToolRequestParam {
                name: tool.to_string().into(),
                arguments: Some(arguments),
            })
            .await
            .map_err(|e| match e {
                rmcp::ServiceError::McpError(err) => CallError::Tool(err.message.to_string()),
                other => CallError::Transport(format!(
                    "tools/call failed for {}::{tool}: {other}",
                    self.server
                )),
            })?;

        let raw = serde_json::to_value(res)
            .map_err(|e| CallError::Transport(format!("unreadable tools/call result: {e}")))?;
        let result: CallToolResult = serde_json::from_value(raw)
            .map_err(|e| CallError::Transport(format!("unreadable tools/call result: {e}")))?;

        result.into_payload().map_err(CallError::Tool)
    }

    async fn close(&self) -> anyhow::Result<()> {
        let taken = self
            .service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(service) = taken else {
            return Ok(());
        };

        // Calls still in flight hold clones; the last one to finish drops the
        // service, which cancels it.
        if let Some(service) = Arc::into_inner(service) {
            service
                .cancel()
                .await
                .with_context(|| format!("failed to stop MCP service '{}'", self.server))?;
        }
        Ok(())
    }
}
