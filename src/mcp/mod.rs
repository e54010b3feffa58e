//! Model Context Protocol (MCP) client side.
//!
//! Connects to stdio and HTTP-based MCP servers and keeps one supervised
//! session per server.
//!
//! # Configuration
//!
//! Servers are configured via `mcp.json`:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "duckduckgo": {
//!       "command": "npx",
//!       "args": ["-y", "duckduckgo-mcp-server"],
//!       "kind": "web_search",
//!       "tools": ["search", "fetch_content"],
//!       "query": { "tool": "search", "extra": { "max_results": 5 } }
//!     },
//!     "context7": {
//!       "url": "https://mcp.context7.com/mcp",
//!       "kind": "docs_search",
//!       "query": {
//!         "tool": "resolve-library-id",
//!         "argument": "libraryName",
//!         "then": {
//!           "tool": "get-library-docs",
//!           "id_argument": "context7CompatibleLibraryID",
//!           "query_argument": "topic"
//!         }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! # Layout
//!
//! - [`session`]: transport seam ([`Connector`], [`ToolSession`]) and the `rmcp` implementation
//! - [`connection`]: per-server state machine
//! - [`registry`]: the set of connections and their lifecycle

pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod session;
pub mod types;

pub use config::{FollowUp, McpConfig, QueryTemplate, ServerDescriptor, ServerKind, ServerLaunch};
pub use connection::{CallHandle, ConnectionState, ConnectionStatus};
pub use error::{CallError, RegistryError};
pub use registry::{ConnectReport, ConnectionRegistry, LifecycleTimeouts};
pub use session::{Connector, RmcpConnector, ToolSession};
pub use types::{ToolInfo, ToolPayload};
