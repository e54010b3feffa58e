//! Layered application configuration.
//!
//! Precedence, lowest first: built-in defaults, the config file
//! (`--config`/`CONFIG_FILE`, else an optional `devsearch.{yaml,toml,json}` in
//! the working directory), `DEVSEARCH_` environment variables
//! (`DEVSEARCH_DISPATCH__PER_CALL_TIMEOUT_MS=5000`), then command-line flags.

use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::agent::OrchestratorSettings;
use crate::agent::orchestrator::DEFAULT_SYSTEM_PROMPT;
use crate::dispatch::DispatchTimeouts;
use crate::llm::LlmSettings;
use crate::mcp::registry::LifecycleTimeouts;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// MCP server definitions (`mcp.json`)
    #[arg(long, env = "MCP_CONFIG")]
    pub mcp_config: Option<String>,

    /// Bound on a single tool call, in milliseconds
    #[arg(long)]
    pub per_call_timeout_ms: Option<u64>,

    /// Bound on a whole fan-out, in milliseconds
    #[arg(long)]
    pub overall_timeout_ms: Option<u64>,

    /// Earlier turns sent to the model
    #[arg(long)]
    pub history_window: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub mcp: McpSection,
    pub dispatch: DispatchConfig,
    pub lifecycle: LifecycleConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct McpSection {
    pub config_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    pub per_call_timeout_ms: u64,
    pub overall_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    pub handshake_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub history_window: usize,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("mcp.config_path", "mcp.json")?
            .set_default("dispatch.per_call_timeout_ms", 20_000)?
            .set_default("dispatch.overall_timeout_ms", 30_000)?
            .set_default("lifecycle.handshake_timeout_ms", 30_000)?
            .set_default("lifecycle.shutdown_timeout_ms", 5_000)?
            .set_default("agent.history_window", 10)?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("devsearch").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("DEVSEARCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(path) = cli.mcp_config {
            builder = builder.set_override("mcp.config_path", path)?;
        }
        if let Some(ms) = cli.per_call_timeout_ms {
            builder = builder.set_override("dispatch.per_call_timeout_ms", ms)?;
        }
        if let Some(ms) = cli.overall_timeout_ms {
            builder = builder.set_override("dispatch.overall_timeout_ms", ms)?;
        }
        if let Some(n) = cli.history_window {
            builder = builder.set_override("agent.history_window", n)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.dispatch.per_call_timeout_ms == 0 || self.dispatch.overall_timeout_ms == 0 {
            return Err(config::ConfigError::Message(
                "dispatch timeouts must be greater than zero".to_string(),
            ));
        }
        if self.dispatch.per_call_timeout_ms > self.dispatch.overall_timeout_ms {
            tracing::warn!(
                per_call_ms = self.dispatch.per_call_timeout_ms,
                overall_ms = self.dispatch.overall_timeout_ms,
                "Per-call timeout exceeds the overall deadline and will never fire"
            );
        }
        Ok(())
    }

    pub fn dispatch_timeouts(&self) -> DispatchTimeouts {
        DispatchTimeouts {
            per_call: Duration::from_millis(self.dispatch.per_call_timeout_ms),
            overall: Duration::from_millis(self.dispatch.overall_timeout_ms),
        }
    }

    pub fn lifecycle_timeouts(&self) -> LifecycleTimeouts {
        LifecycleTimeouts {
            handshake: Duration::from_millis(self.lifecycle.handshake_timeout_ms),
            shutdown: Duration::from_millis(self.lifecycle.shutdown_timeout_ms),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            timeouts: self.dispatch_timeouts(),
            history_window: self.agent.history_window,
            system_prompt: self
                .agent
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

/// Default bound on one model request.
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;

pub fn load_llm_settings() -> Result<LlmSettings, String> {
    let base_url = std::env::var("LLM_BASE_URL")
        .map_err(|_| "Missing required env var: LLM_BASE_URL".to_string())?;
    if base_url.trim().is_empty() {
        return Err("LLM_BASE_URL cannot be empty".to_string());
    }

    let model = std::env::var("LLM_MODEL")
        .map_err(|_| "Missing required env var: LLM_MODEL".to_string())?;
    if model.trim().is_empty() {
        return Err("LLM_MODEL cannot be empty".to_string());
    }

    let api_key = std::env::var("LLM_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let timeout_secs = match std::env::var("LLM_TIMEOUT_SECS") {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("LLM_TIMEOUT_SECS must be a number of seconds, got '{raw}'"))?,
        Err(_) => DEFAULT_LLM_TIMEOUT_SECS,
    };

    Ok(LlmSettings {
        base_url,
        api_key,
        model,
        timeout: Duration::from_secs(timeout_secs),
    })
}
