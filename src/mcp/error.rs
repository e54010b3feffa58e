//! MCP client error types.

use thiserror::Error;

/// Errors raised by registry lifecycle operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No descriptor with this identifier was configured.
    #[error("unknown server: '{0}'")]
    UnknownServer(String),

    /// Two descriptors share the same identifier.
    #[error("duplicate server identifier: '{0}'")]
    DuplicateServer(String),

    /// Spawn/attach or the initialize handshake failed.
    #[error("connection to '{server}' failed: {reason}")]
    ConnectionFailed { server: String, reason: String },

    /// One teardown failed; the connection was still released.
    #[error("teardown of '{server}' failed: {reason}")]
    TeardownFailed { server: String, reason: String },

    /// Aggregate of every teardown failure seen by `disconnect_all`.
    #[error("{} server(s) failed to shut down cleanly: {}", failures.len(), summarize(failures))]
    Teardown { failures: Vec<(String, String)> },
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(server, reason)| format!("{server}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure of a single `tools/call` on a live session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// The server answered, but with an error (JSON-RPC error or `isError`).
    #[error("tool error: {0}")]
    Tool(String),

    /// The session could not carry the request or its response.
    #[error("transport error: {0}")]
    Transport(String),
}
