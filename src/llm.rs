//! Chat model providers.
//!
//! Defines the [`ChatProvider`] trait and one implementation per backend:
//! - **[`OpenAiCompatible`]**: `POST {base_url}/chat/completions`; serves
//!   the `openai`, `openrouter` and `deepseek` kinds.
//! - **[`OllamaChat`]**: `POST {base_url}/api/chat` on a local Ollama.
//! - **[`DisabledChat`]**: always errors; the session answers with sources.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{LlmConfig, ProviderKind};

/// Speaker of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters for one completion.
#[derive(Debug, Clone, Copy)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl From<&LlmConfig> for CompletionParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Backend kind, e.g. `"openrouter"`.
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    async fn complete(&self, messages: &[ChatMessage], params: CompletionParams) -> Result<String>;
}

// ============ Disabled ============

pub struct DisabledChat;

#[async_trait]
impl ChatProvider for DisabledChat {
    fn name(&self) -> &str {
        "disabled"
    }

    fn model(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage], _params: CompletionParams) -> Result<String> {
        bail!("LLM provider is disabled")
    }
}

// ============ OpenAI-compatible ============

/// Any backend speaking the OpenAI chat completions protocol.
pub struct OpenAiCompatible {
    kind: ProviderKind,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiCompatible {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "{} not set (required for the {} provider)",
                config.key_env().unwrap_or("API key"),
                config.provider.as_str()
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build LLM HTTP client")?;
        Ok(Self {
            kind: config.provider,
            client,
            base_url: config.base_url().to_string(),
            model: config.model_name().to_string(),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: &'a [ChatMessage],
}

#[async_trait]
impl ChatProvider for OpenAiCompatible {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], params: CompletionParams) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            messages,
        };
        let url = format!("{}/chat/completions", self.base_url);
        let json = post_with_retry(
            &self.client,
            &url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            self.kind.as_str(),
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract the first choice's message content.
pub fn parse_openai_response(json: &Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))?;
    Ok(content.trim().to_string())
}

// ============ Ollama ============

/// Chat against a local Ollama instance.
pub struct OllamaChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build Ollama HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            model: config.model_name().to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[async_trait]
impl ChatProvider for OllamaChat {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], params: CompletionParams) -> Result<String> {
        let body = OllamaRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
        };
        let url = format!("{}/api/chat", self.base_url);
        let json = post_with_retry(&self.client, &url, None, &body, self.max_retries, "Ollama")
            .await
            .with_context(|| format!("is Ollama running at {}?", self.base_url))?;
        parse_ollama_response(&json)
    }
}

pub fn parse_ollama_response(json: &Value) -> Result<String> {
    let content = json
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))?;
    Ok(content.trim().to_string())
}

// ============ Shared ============

async fn post_with_retry<B: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &B,
    max_retries: u32,
    label: &str,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key.trim());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    debug!(label, attempt, "chat completion received");
                    return Ok(response.json().await?);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    warn!(label, %status, attempt, "chat request failed, retrying");
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        label,
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                warn!(label, error = %e, attempt, "chat request failed");
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", label)))
}

/// Create a chat provider from configuration.
///
/// | `provider` | Implementation |
/// |------------|----------------|
/// | `openai`, `openrouter`, `deepseek` | [`OpenAiCompatible`] |
/// | `ollama` | [`OllamaChat`] |
/// | `disabled` | [`DisabledChat`] |
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn ChatProvider>> {
    match config.provider {
        ProviderKind::OpenAi | ProviderKind::OpenRouter | ProviderKind::DeepSeek => {
            Ok(Box::new(OpenAiCompatible::new(config)?))
        }
        ProviderKind::Ollama => Ok(Box::new(OllamaChat::new(config)?)),
        ProviderKind::Disabled => Ok(Box::new(DisabledChat)),
    }
}
