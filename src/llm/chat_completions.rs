//! OpenAI Chat Completions API driver.
//!
//! Implements [`LanguageModel`] against `/v1/chat/completions` with a single
//! non-streaming request per turn.

use anyhow::Context;

use super::{LanguageModel, LlmSettings, ModelRequest};

const TEMPERATURE: f64 = 0.7;

/// Driver for the OpenAI Chat Completions API.
#[derive(Clone)]
pub struct ChatCompletionsModel {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsModel")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.settings.model)
            .finish()
    }
}

impl ChatCompletionsModel {
    /// Create a driver whose requests are bounded by `settings.timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: LlmSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, settings })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn body(&self, request: &ModelRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.settings.model,
            "stream": false,
            "temperature": TEMPERATURE,
            "messages": request.messages(),
        })
    }
}

/// Pull the assistant text out of a completion response.
fn extract_answer(v: &serde_json::Value) -> anyhow::Result<String> {
    if let Some(err) = v.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        anyhow::bail!("model returned an error: {message}");
    }

    let content = v["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .context("completion response has no message content")?;
    Ok(content.to_string())
}

#[async_trait::async_trait]
impl LanguageModel for ChatCompletionsModel {
    async fn complete(&self, request: &ModelRequest) -> anyhow::Result<String> {
        let url = self.endpoint();

        let mut rb = self.http.post(&url).json(&self.body(request));
        if let Some(k) = &self.settings.api_key {
            rb = rb.bearer_auth(k);
        }

        let resp = rb
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()?;
        let v: serde_json::Value = resp
            .json()
            .await
            .context("completion response is not JSON")?;

        tracing::debug!(
            model = %self.settings.model,
            usage = %v.get("usage").cloned().unwrap_or_default(),
            "Chat completion finished"
        );
        extract_answer(&v)
    }
}
