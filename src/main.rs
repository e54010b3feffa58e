//! Terminal front end for the developer search agent.
//!
//! Reads one question per line from stdin. Lines starting with `/` are
//! commands; see [`HELP`].

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::unused_async)]
#![allow(clippy::default_trait_access)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use devsearch_agent::agent::{Orchestrator, SourceEntry};
use devsearch_agent::config::{AppConfig, load_llm_settings};
use devsearch_agent::llm::ChatCompletionsModel;
use devsearch_agent::mcp::config::load_or_builtin;
use devsearch_agent::mcp::{ConnectionRegistry, RmcpConnector};
use devsearch_agent::session::Session;
use devsearch_agent::telemetry;

const HELP: &str = "\
Commands:
  /status          connection state of every server
  /tools           tools discovered on ready servers
  /history         searches run in this session
  /clear           forget the search log
  /reconnect <id>  reconnect one server
  /quit            exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    telemetry::init();

    let config = AppConfig::load().context("invalid configuration")?;
    let llm = match load_llm_settings() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("Configuration error: {msg}");
            std::process::exit(1);
        }
    };

    info!(
        name: "llm.config.loaded",
        base_url = %llm.base_url,
        model = %llm.model,
        "LLM configuration loaded"
    );

    let mcp = load_or_builtin(&config.mcp.config_path)?;
    let registry = Arc::new(ConnectionRegistry::new(
        mcp.descriptors(),
        Arc::new(RmcpConnector),
        config.lifecycle_timeouts(),
    )?);

    let report = registry.connect_all().await;
    for (server, reason) in &report.failed {
        eprintln!("warning: {server} unavailable: {reason}");
    }
    for (server, tool) in registry.tools() {
        info!(name: "mcp.tool.discovered", server = %server, tool = %tool.name, "MCP tool discovered");
    }

    let model = Arc::new(ChatCompletionsModel::new(llm)?);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&registry),
        model,
        config.orchestrator_settings(),
    ));
    let mut session = Session::new(orchestrator);

    println!("Developer search agent. Ask a question, or /help.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let Some(line) = interruptible(lines.next_line(), tokio::signal::ctrl_c()).await else {
            break;
        };
        let Some(line) = line? else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !run_command(command, &registry, &mut session).await {
                break;
            }
            continue;
        }

        match interruptible(session.ask(line), tokio::signal::ctrl_c()).await {
            Some(Ok(outcome)) => {
                println!("\n{}\n", outcome.answer);
                print_sources(&outcome.sources);
            }
            Some(Err(e)) => eprintln!("error: {e}"),
            None => {
                eprintln!("interrupted");
                break;
            }
        }
    }

    if let Err(e) = registry.disconnect_all().await {
        eprintln!("warning: {e}");
    }
    Ok(())
}

/// `None` when `interrupt` resolves before `work` finishes; `work` is dropped.
async fn interruptible<T>(work: impl Future<Output = T>, interrupt: impl Future) -> Option<T> {
    tokio::select! {
        out = work => Some(out),
        _ = interrupt => None,
    }
}

/// Returns `false` when the loop should end.
async fn run_command(command: &str, registry: &ConnectionRegistry, session: &mut Session) -> bool {
    let mut parts = command.split_whitespace();
    match parts.next().unwrap_or_default() {
        "quit" | "exit" => return false,
        "status" => {
            for status in registry.statuses() {
                match &status.last_error {
                    Some(err) => println!("{:<12} {:<13} {err}", status.server, status.state),
                    None => println!("{:<12} {}", status.server, status.state),
                }
            }
        }
        "tools" => {
            for (server, tool) in registry.tools() {
                println!(
                    "{server}/{}  {}",
                    tool.name,
                    tool.description.as_deref().unwrap_or_default()
                );
            }
        }
        "history" => {
            for record in session.search_history() {
                let mark = if record.success { "ok" } else { "failed" };
                println!(
                    "{} {:<12} {:<6} {}",
                    record.at.format("%H:%M:%S"),
                    record.source,
                    mark,
                    record.query
                );
            }
        }
        "clear" => {
            session.clear_search_history();
            println!("Search history cleared.");
        }
        "reconnect" => match parts.next() {
            Some(id) => match registry.reconnect(id).await {
                Ok(()) => println!("{id} ready."),
                Err(e) => eprintln!("error: {e}"),
            },
            None => eprintln!("usage: /reconnect <id>"),
        },
        _ => println!("{HELP}"),
    }
    true
}

fn print_sources(sources: &[SourceEntry]) {
    if sources.is_empty() {
        return;
    }
    println!("Sources:");
    for (i, source) in sources.iter().enumerate() {
        match source {
            SourceEntry::Item(item) => {
                let link = item
                    .raw
                    .get("url")
                    .or_else(|| item.raw.get("source"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                println!("  [{}] ({}) {} {link}", i + 1, item.source, item.title);
            }
            missing => println!("  - {missing}"),
        }
    }
    println!();
}
