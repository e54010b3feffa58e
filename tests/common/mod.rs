//! In-process fakes for tool servers and the language model.
#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use devsearch_agent::llm::{LanguageModel, ModelRequest};
use devsearch_agent::mcp::{
    CallError, ConnectionRegistry, Connector, FollowUp, LifecycleTimeouts, QueryTemplate,
    ServerDescriptor, ServerKind, ServerLaunch, ToolInfo, ToolPayload, ToolSession,
};

pub const WEB: &str = "web";
pub const DOCS: &str = "docs";

pub const RESOLVE_TOOL: &str = "resolve-library-id";
pub const DOCS_TOOL: &str = "get-library-docs";

type Arguments = serde_json::Map<String, serde_json::Value>;

/// What a fake tool call answers.
#[derive(Debug, Clone)]
pub enum Reply {
    Payload(ToolPayload),
    ToolError(String),
    Transport(String),
}

/// Behaviour of one fake server, captured when a session is opened.
#[derive(Debug, Clone)]
pub struct FakeServer {
    pub handshake_delay: Duration,
    pub open_error: Option<String>,
    pub tools: Vec<String>,
    pub tools_delay: Duration,
    pub call_delay: Duration,
    pub reply: Reply,
    /// Replies for specific tools; others get `reply`.
    pub tool_replies: HashMap<String, Reply>,
    pub close_error: Option<String>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self {
            handshake_delay: Duration::ZERO,
            open_error: None,
            tools: vec!["search".to_string()],
            tools_delay: Duration::ZERO,
            call_delay: Duration::ZERO,
            reply: Reply::Payload(ToolPayload::default()),
            tool_replies: HashMap::new(),
            close_error: None,
        }
    }
}

impl FakeServer {
    pub fn replying(payload: ToolPayload) -> Self {
        Self {
            reply: Reply::Payload(payload),
            ..Self::default()
        }
    }

    pub fn unreachable(reason: &str) -> Self {
        Self {
            open_error: Some(reason.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    #[must_use]
    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }

    #[must_use]
    pub fn with_tools_delay(mut self, delay: Duration) -> Self {
        self.tools_delay = delay;
        self
    }

    #[must_use]
    pub fn with_tool_reply(mut self, tool: &str, reply: Reply) -> Self {
        self.tool_replies.insert(tool.to_string(), reply);
        self
    }

    #[must_use]
    pub fn with_close_error(mut self, reason: &str) -> Self {
        self.close_error = Some(reason.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct Counts {
    opens: HashMap<String, usize>,
    calls: HashMap<String, usize>,
    closes: HashMap<String, usize>,
    call_log: HashMap<String, Vec<(String, Arguments)>>,
}

fn bump(map: &mut HashMap<String, usize>, server: &str) {
    *map.entry(server.to_string()).or_default() += 1;
}

/// Connector whose sessions follow per-server [`FakeServer`] scripts.
#[derive(Debug, Default)]
pub struct FakeConnector {
    servers: Mutex<HashMap<String, FakeServer>>,
    counts: Arc<Mutex<Counts>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set or replace the script for `server`; affects sessions opened later.
    pub fn set(&self, server: &str, behaviour: FakeServer) {
        self.servers
            .lock()
            .unwrap()
            .insert(server.to_string(), behaviour);
    }

    pub fn opens(&self, server: &str) -> usize {
        self.counts.lock().unwrap().opens.get(server).copied().unwrap_or(0)
    }

    pub fn calls(&self, server: &str) -> usize {
        self.counts.lock().unwrap().calls.get(server).copied().unwrap_or(0)
    }

    /// Tool name and arguments of every call made on `server`, in order.
    pub fn calls_to(&self, server: &str) -> Vec<(String, Arguments)> {
        self.counts
            .lock()
            .unwrap()
            .call_log
            .get(server)
            .cloned()
            .unwrap_or_default()
    }

    pub fn closes(&self, server: &str) -> usize {
        self.counts.lock().unwrap().closes.get(server).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, descriptor: &ServerDescriptor) -> anyhow::Result<Arc<dyn ToolSession>> {
        let behaviour = self
            .servers
            .lock()
            .unwrap()
            .get(&descriptor.id)
            .cloned()
            .unwrap_or_default();
        bump(&mut self.counts.lock().unwrap().opens, &descriptor.id);

        tokio::time::sleep(behaviour.handshake_delay).await;
        if let Some(reason) = &behaviour.open_error {
            anyhow::bail!("{reason}");
        }

        Ok(Arc::new(FakeSession {
            server: descriptor.id.clone(),
            behaviour,
            counts: Arc::clone(&self.counts),
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug)]
struct FakeSession {
    server: String,
    behaviour: FakeServer,
    counts: Arc<Mutex<Counts>>,
    closed: AtomicBool,
}

#[async_trait]
impl ToolSession for FakeSession {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolInfo>> {
        tokio::time::sleep(self.behaviour.tools_delay).await;
        Ok(self
            .behaviour
            .tools
            .iter()
            .map(|name| ToolInfo {
                name: name.clone(),
                description: Some(format!("{name} on {}", self.server)),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Arguments,
    ) -> Result<ToolPayload, CallError> {
        {
            let mut counts = self.counts.lock().unwrap();
            bump(&mut counts.calls, &self.server);
            counts
                .call_log
                .entry(self.server.clone())
                .or_default()
                .push((tool.to_string(), arguments));
        }
        tokio::time::sleep(self.behaviour.call_delay).await;

        if self.closed.load(Ordering::SeqCst) {
            return Err(CallError::Transport("session closed".into()));
        }
        let reply = self
            .behaviour
            .tool_replies
            .get(tool)
            .unwrap_or(&self.behaviour.reply);
        match reply {
            Reply::Payload(payload) => Ok(payload.clone()),
            Reply::ToolError(message) => Err(CallError::Tool(message.clone())),
            Reply::Transport(message) => Err(CallError::Transport(message.clone())),
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        bump(&mut self.counts.lock().unwrap().closes, &self.server);
        self.closed.store(true, Ordering::SeqCst);
        match &self.behaviour.close_error {
            Some(reason) => anyhow::bail!("{reason}"),
            None => Ok(()),
        }
    }
}

pub fn web_descriptor(id: &str) -> ServerDescriptor {
    ServerDescriptor::new(
        id,
        ServerKind::WebSearch,
        ServerLaunch::Stdio {
            command: "fake-web".into(),
            args: vec![],
            env: Default::default(),
        },
    )
    .with_tools(["search"])
    .with_query(QueryTemplate {
        tool: "search".into(),
        argument: "query".into(),
        extra: Default::default(),
        then: None,
    })
}

pub fn docs_descriptor(id: &str) -> ServerDescriptor {
    ServerDescriptor::new(
        id,
        ServerKind::DocsSearch,
        ServerLaunch::RemoteHttp {
            url: "http://localhost/mcp".into(),
            params: Default::default(),
        },
    )
    .with_tools(["search"])
    .with_query(QueryTemplate {
        tool: "search".into(),
        argument: "libraryName".into(),
        extra: Default::default(),
        then: None,
    })
}

/// A Context7-style server: resolve a library id, then fetch its docs.
pub fn two_step_docs_descriptor(id: &str) -> ServerDescriptor {
    ServerDescriptor::new(
        id,
        ServerKind::DocsSearch,
        ServerLaunch::RemoteHttp {
            url: "http://localhost/mcp".into(),
            params: Default::default(),
        },
    )
    .with_tools([RESOLVE_TOOL, DOCS_TOOL])
    .with_query(QueryTemplate {
        tool: RESOLVE_TOOL.into(),
        argument: "libraryName".into(),
        extra: Default::default(),
        then: Some(FollowUp {
            tool: DOCS_TOOL.into(),
            id_argument: "context7CompatibleLibraryID".into(),
            query_argument: Some("topic".into()),
            extra: Default::default(),
        }),
    })
}

/// Server scripted for [`two_step_docs_descriptor`]: the resolve call names
/// `library_id`, the docs call answers `docs`.
pub fn two_step_docs_server(library_id: &str, docs: Reply) -> FakeServer {
    FakeServer {
        tools: vec![RESOLVE_TOOL.to_string(), DOCS_TOOL.to_string()],
        ..FakeServer::default()
    }
    .with_tool_reply(RESOLVE_TOOL, Reply::Payload(library_listing(library_id)))
    .with_tool_reply(DOCS_TOOL, docs)
}

pub fn registry_with(
    connector: &Arc<FakeConnector>,
    descriptors: Vec<ServerDescriptor>,
    timeouts: LifecycleTimeouts,
) -> Arc<ConnectionRegistry> {
    let connector: Arc<dyn Connector> = connector.clone();
    Arc::new(ConnectionRegistry::new(descriptors, connector, timeouts).unwrap())
}

/// The standard pair of servers: `web` and `docs`.
pub fn web_and_docs(connector: &Arc<FakeConnector>) -> Arc<ConnectionRegistry> {
    registry_with(
        connector,
        vec![web_descriptor(WEB), docs_descriptor(DOCS)],
        LifecycleTimeouts::default(),
    )
}

/// A DuckDuckGo-style text listing with `n` results.
pub fn web_listing(n: usize) -> ToolPayload {
    let mut text = format!("Found {n} search results:\n\n");
    for i in 1..=n {
        let _ = write!(
            text,
            "{i}. Web result {i}\n   URL: https://example.com/{i}\n   Summary: Snippet {i}\n\n"
        );
    }
    ToolPayload::from_text(text)
}

/// A Context7-style listing with `n` blocks.
pub fn docs_listing(n: usize) -> ToolPayload {
    let blocks: Vec<String> = (1..=n)
        .map(|i| {
            format!(
                "TITLE: Doc {i}\nDESCRIPTION: Doc snippet {i}\nSOURCE: https://docs.example.com/{i}\n"
            )
        })
        .collect();
    ToolPayload::from_text(blocks.join("\n----------------------------------------\n\n"))
}

/// A Context7-style library listing whose top match is `library_id`.
pub fn library_listing(library_id: &str) -> ToolPayload {
    ToolPayload::from_text(format!(
        "Available Libraries (top matches):\n\n\
         ----------\n\
         - Title: Top match\n\
         - Context7-compatible library ID: {library_id}\n\
         - Description: The best match\n\
         ----------\n\
         - Title: Runner-up\n\
         - Context7-compatible library ID: /other/lib\n"
    ))
}

/// Model that records every request and answers from a script.
#[derive(Debug)]
pub struct FakeModel {
    failure: Option<String>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl FakeModel {
    pub fn answering() -> Arc<Self> {
        Arc::new(Self {
            failure: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(reason.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> ModelRequest {
        self.requests().pop().expect("model was never called")
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn complete(&self, request: &ModelRequest) -> anyhow::Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.failure {
            Some(reason) => anyhow::bail!("{reason}"),
            None => Ok(format!(
                "Answer to '{}' from {} items",
                request.query,
                request.context.len()
            )),
        }
    }
}
