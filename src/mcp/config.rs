//! Static tool-server configuration (`mcp.json`).

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::{fs, path::Path};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct McpConfig {
    /// Keyed and iterated by server id.
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, McpServerEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct McpServerEntry {
    #[serde(flatten)]
    pub launch: ServerLaunch,
    pub kind: ServerKind,
    /// Tool names the server is expected to offer.
    #[serde(default)]
    pub tools: Vec<String>,
    /// How a user query is turned into a call on this server.
    #[serde(default)]
    pub query: Option<QueryTemplate>,
}

/// How to reach a server: spawn it locally or attach to a remote endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ServerLaunch {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    RemoteHttp {
        url: String,
        /// Extra query parameters appended to `url` (e.g. API keys).
        #[serde(default)]
        params: BTreeMap<String, String>,
    },
}

/// Result shape family of a server; selects the normalizer transform.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    /// title / url / snippet results.
    WebSearch,
    /// library / snippet / source results.
    DocsSearch,
}

impl std::fmt::Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebSearch => f.write_str("web_search"),
            Self::DocsSearch => f.write_str("docs_search"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QueryTemplate {
    pub tool: String,
    /// Argument key receiving the user query.
    #[serde(default = "default_query_argument")]
    pub argument: String,
    /// Fixed arguments sent with every call.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    /// Second call on the same server, fed an id read from the first result.
    #[serde(default)]
    pub then: Option<FollowUp>,
}

/// A chained call such as Context7's `resolve-library-id` then
/// `get-library-docs`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FollowUp {
    pub tool: String,
    /// Argument key receiving the id taken from the first result.
    pub id_argument: String,
    /// Argument key that also receives the user query.
    #[serde(default)]
    pub query_argument: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FollowUp {
    /// Fixed arguments plus the query; the id is added at call time.
    pub fn arguments(&self, query: &str) -> serde_json::Map<String, serde_json::Value> {
        let mut args = self.extra.clone();
        if let Some(key) = &self.query_argument {
            args.insert(key.clone(), serde_json::Value::String(query.to_string()));
        }
        args
    }
}

fn default_query_argument() -> String {
    "query".to_string()
}

impl QueryTemplate {
    /// Argument map for `query`. The query key wins over a clashing fixed argument.
    pub fn arguments(&self, query: &str) -> serde_json::Map<String, serde_json::Value> {
        let mut args = self.extra.clone();
        args.insert(
            self.argument.clone(),
            serde_json::Value::String(query.to_string()),
        );
        args
    }
}

/// Immutable description of one tool server, resolved at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescriptor {
    pub id: String,
    pub launch: ServerLaunch,
    pub kind: ServerKind,
    pub declared_tools: BTreeSet<String>,
    pub query: Option<QueryTemplate>,
}

impl ServerDescriptor {
    /// Descriptor with no declared tools and no query template.
    pub fn new(id: impl Into<String>, kind: ServerKind, launch: ServerLaunch) -> Self {
        Self {
            id: id.into(),
            launch,
            kind,
            declared_tools: BTreeSet::new(),
            query: None,
        }
    }

    #[must_use]
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: QueryTemplate) -> Self {
        self.query = Some(query);
        self
    }
}

impl McpConfig {
    /// The two servers the agent ships with: DuckDuckGo over stdio and
    /// Context7 over streamable HTTP.
    pub fn builtin() -> Self {
        let mut mcp_servers = BTreeMap::new();

        let mut ddg_extra = serde_json::Map::new();
        ddg_extra.insert("max_results".to_string(), serde_json::json!(5));
        mcp_servers.insert(
            "duckduckgo".to_string(),
            McpServerEntry {
                launch: ServerLaunch::Stdio {
                    command: "npx".to_string(),
                    args: vec!["-y".to_string(), "duckduckgo-mcp-server".to_string()],
                    env: BTreeMap::new(),
                },
                kind: ServerKind::WebSearch,
                tools: vec!["search".to_string(), "fetch_content".to_string()],
                query: Some(QueryTemplate {
                    tool: "search".to_string(),
                    argument: "query".to_string(),
                    extra: ddg_extra,
                    then: None,
                }),
            },
        );

        let mut docs_extra = serde_json::Map::new();
        docs_extra.insert("tokens".to_string(), serde_json::json!(5000));
        mcp_servers.insert(
            "context7".to_string(),
            McpServerEntry {
                launch: ServerLaunch::RemoteHttp {
                    url: "https://mcp.context7.com/mcp".to_string(),
                    params: BTreeMap::new(),
                },
                kind: ServerKind::DocsSearch,
                tools: vec![
                    "resolve-library-id".to_string(),
                    "get-library-docs".to_string(),
                ],
                query: Some(QueryTemplate {
                    tool: "resolve-library-id".to_string(),
                    argument: "libraryName".to_string(),
                    extra: serde_json::Map::new(),
                    then: Some(FollowUp {
                        tool: "get-library-docs".to_string(),
                        id_argument: "context7CompatibleLibraryID".to_string(),
                        query_argument: Some("topic".to_string()),
                        extra: docs_extra,
                    }),
                }),
            },
        );

        Self { mcp_servers }
    }

    /// Resolve entries into descriptors, expanding `${VAR}` placeholders in
    /// env values and URL parameters.
    ///
    /// Ordered by server id, not by position in the file.
    pub fn descriptors(&self) -> Vec<ServerDescriptor> {
        self.mcp_servers
            .iter()
            .map(|(id, entry)| {
                let launch = match &entry.launch {
                    ServerLaunch::Stdio { command, args, env } => ServerLaunch::Stdio {
                        command: command.clone(),
                        args: args.clone(),
                        env: expand_env_map(env),
                    },
                    ServerLaunch::RemoteHttp { url, params } => ServerLaunch::RemoteHttp {
                        url: expand_env_placeholders(url),
                        params: expand_env_map(params),
                    },
                };
                ServerDescriptor {
                    id: id.clone(),
                    launch,
                    kind: entry.kind,
                    declared_tools: entry.tools.iter().cloned().collect(),
                    query: entry.query.clone(),
                }
            })
            .collect()
    }
}

pub fn load_mcp_config(path: impl AsRef<Path>) -> anyhow::Result<McpConfig> {
    let path = path.as_ref();
    let txt = fs::read_to_string(path)
        .with_context(|| format!("failed to read MCP config '{}'", path.display()))?;
    serde_json::from_str(&txt)
        .with_context(|| format!("invalid MCP config '{}'", path.display()))
}

/// Load `path` if it exists, otherwise fall back to [`McpConfig::builtin`].
pub fn load_or_builtin(path: impl AsRef<Path>) -> anyhow::Result<McpConfig> {
    let path = path.as_ref();
    if path.exists() {
        load_mcp_config(path)
    } else {
        tracing::info!(
            name: "mcp.config.builtin",
            path = %path.display(),
            "No MCP config file, using built-in servers"
        );
        Ok(McpConfig::builtin())
    }
}

/// Expand `${NAME}` placeholders from the process environment.
/// Unset variables leave the placeholder in place.
pub fn expand_env_placeholders(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

pub fn expand_env_map(map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}

/// True when a value still carries an unexpanded `${...}` placeholder.
pub fn has_unresolved_placeholder(value: &str) -> bool {
    value
        .find("${")
        .is_some_and(|start| value[start..].contains('}'))
}
