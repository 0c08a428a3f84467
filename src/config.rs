//! TOML configuration parsing.
//!
//! Every section has defaults, so an empty file (or no file at all, see
//! [`Config::minimal`]) yields a usable configuration. API keys are resolved
//! from the environment once, inside [`load_config`], and carried on the
//! struct from then on.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/results.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// `brave` or `disabled`.
    #[serde(default = "default_search_provider")]
    pub provider: String,
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub search_lang: Option<String>,
    /// Overrides the Brave web search URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_search_retries")]
    pub max_retries: u32,
    /// Resolved from `api_key_env` by [`load_config`].
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            api_key_env: default_search_key_env(),
            max_results: default_max_results(),
            country: None,
            search_lang: None,
            endpoint: None,
            timeout_secs: default_search_timeout(),
            max_retries: default_search_retries(),
            api_key: None,
        }
    }
}

impl SearchConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled" && self.api_key.is_some()
    }
}

fn default_search_provider() -> String {
    "brave".to_string()
}
fn default_search_key_env() -> String {
    "BRAVE_API_KEY".to_string()
}
fn default_max_results() -> usize {
    5
}
fn default_search_timeout() -> u64 {
    20
}
fn default_search_retries() -> u32 {
    2
}

/// When enrichment runs for a search result.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnrichMode {
    /// Enrich every result.
    Always,
    /// Enrich only results the search service returned without a snippet.
    Missing,
    Disabled,
}

impl EnrichMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichMode::Always => "always",
            EnrichMode::Missing => "missing",
            EnrichMode::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichConfig {
    #[serde(default = "default_enrich_mode")]
    pub mode: EnrichMode,
    /// Upper bound on stored `enriched_text`, in characters.
    #[serde(default = "default_enrich_max_chars")]
    pub max_chars: usize,
    /// Upper bound on the snippet shown to the model, in characters.
    #[serde(default = "default_snippet_max_chars")]
    pub snippet_max_chars: usize,
    #[serde(default = "default_enrich_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Extracted text containing any of these (case-insensitive) is discarded.
    #[serde(default = "default_blocked_markers")]
    pub blocked_markers: Vec<String>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            mode: default_enrich_mode(),
            max_chars: default_enrich_max_chars(),
            snippet_max_chars: default_snippet_max_chars(),
            timeout_secs: default_enrich_timeout(),
            user_agent: default_user_agent(),
            blocked_markers: default_blocked_markers(),
        }
    }
}

fn default_enrich_mode() -> EnrichMode {
    EnrichMode::Always
}
fn default_enrich_max_chars() -> usize {
    1200
}
fn default_snippet_max_chars() -> usize {
    300
}
fn default_enrich_timeout() -> u64 {
    15
}
fn default_user_agent() -> String {
    format!("websearch-agent/{}", env!("CARGO_PKG_VERSION"))
}
fn default_blocked_markers() -> Vec<String> {
    vec![
        "captcha".to_string(),
        "verify you are human".to_string(),
        "unusual traffic".to_string(),
    ]
}

/// LLM backend selection.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    OpenRouter,
    DeepSeek,
    Ollama,
    Disabled,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Disabled => "disabled",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::OpenRouter => "moonshotai/kimi-k2:free",
            ProviderKind::DeepSeek => "deepseek-chat",
            ProviderKind::Ollama => "qwen2.5:0.5b",
            ProviderKind::Disabled => "disabled",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::DeepSeek => "https://api.deepseek.com/v1",
            ProviderKind::Ollama => "http://localhost:11434",
            ProviderKind::Disabled => "",
        }
    }

    /// Environment variable holding the API key, if the backend needs one.
    pub fn default_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::DeepSeek => Some("DEEPSEEK_API_KEY"),
            ProviderKind::Ollama | ProviderKind::Disabled => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: ProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    /// Resolved from the key variable by [`load_config`].
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            base_url: None,
            api_key_env: None,
            temperature: 0.0,
            max_tokens: default_llm_max_tokens(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
            api_key: None,
        }
    }
}

impl LlmConfig {
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }

    pub fn key_env(&self) -> Option<&str> {
        self.api_key_env
            .as_deref()
            .or_else(|| self.provider.default_key_env())
    }
}

fn default_llm_provider() -> ProviderKind {
    ProviderKind::OpenAi
}
fn default_llm_max_tokens() -> u32 {
    1024
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_llm_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_max_searches")]
    pub max_searches_per_message: usize,
    /// Number of past question/answer pairs replayed to the model.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Replace the agent-chosen query with the user's raw message.
    #[serde(default = "default_true")]
    pub raw_query: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_searches_per_message: default_max_searches(),
            history_turns: default_history_turns(),
            raw_query: true,
        }
    }
}

fn default_max_searches() -> usize {
    1
}
fn default_history_turns() -> usize {
    8
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7860".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Defaults for every section, with secrets resolved from the environment.
    ///
    /// Used when no config file exists, so `wsa results list` works out of
    /// the box.
    pub fn minimal() -> Self {
        let mut config = Config::default();
        resolve_secrets(&mut config);
        config
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    resolve_secrets(&mut config);
    Ok(config)
}

/// Parse and validate TOML without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.store.path.as_os_str().is_empty() {
        anyhow::bail!("store.path must not be empty");
    }

    match config.search.provider.as_str() {
        "brave" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown search provider: '{}'. Must be brave or disabled.",
            other
        ),
    }
    if config.search.max_results == 0 {
        anyhow::bail!("search.max_results must be >= 1");
    }

    if config.enrich.max_chars == 0 {
        anyhow::bail!("enrich.max_chars must be > 0");
    }
    if config.enrich.snippet_max_chars == 0 {
        anyhow::bail!("enrich.snippet_max_chars must be > 0");
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.max_tokens == 0 {
        anyhow::bail!("llm.max_tokens must be > 0");
    }

    if config.session.max_searches_per_message == 0 {
        anyhow::bail!("session.max_searches_per_message must be >= 1");
    }

    Ok(config)
}

fn resolve_secrets(config: &mut Config) {
    config.search.api_key = read_key(&config.search.api_key_env);

    config.llm.api_key = config.llm.key_env().and_then(read_key);
}

fn read_key(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
