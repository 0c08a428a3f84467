//! Web search collaborators.
//!
//! A [`SearchTool`] turns a query into raw [`CandidateRecord`]s. The only
//! network implementation is [`BraveSearch`], which calls the Brave Search
//! web API. [`parse_raw_records`] accepts result payloads in the shapes that
//! tool servers commonly return, so records handed to us by external agents
//! go through the same path.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::enrich::clean_fragment;
use crate::models::CandidateRecord;

const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
/// Brave rejects larger page sizes.
const BRAVE_MAX_COUNT: usize = 20;

/// A web search backend.
#[async_trait]
pub trait SearchTool: Send + Sync {
    fn name(&self) -> &str;

    /// Run `query` and return at most `count` raw records.
    async fn search(&self, query: &str, count: usize) -> Result<Vec<CandidateRecord>>;
}

/// Search tool used when no provider or API key is configured.
pub struct DisabledSearch;

#[async_trait]
impl SearchTool for DisabledSearch {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn search(&self, _query: &str, _count: usize) -> Result<Vec<CandidateRecord>> {
        bail!("web search is disabled")
    }
}

/// Brave Search web API client.
///
/// Retry strategy matches the LLM providers:
/// - HTTP 429 and 5xx → retry with exponential backoff
/// - other 4xx → fail immediately
/// - network errors → retry
pub struct BraveSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    country: Option<String>,
    search_lang: Option<String>,
    max_retries: u32,
}

impl BraveSearch {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("{} not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| BRAVE_ENDPOINT.to_string()),
            api_key,
            country: config.country.clone(),
            search_lang: config.search_lang.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl SearchTool for BraveSearch {
    fn name(&self) -> &str {
        "brave_web_search"
    }

    async fn search(&self, query: &str, count: usize) -> Result<Vec<CandidateRecord>> {
        let query = query.trim();
        if query.is_empty() {
            bail!("query must not be empty");
        }

        let count = count.clamp(1, BRAVE_MAX_COUNT).to_string();
        let mut params: Vec<(&str, &str)> = vec![("q", query), ("count", count.as_str())];
        if let Some(country) = &self.country {
            params.push(("country", country.as_str()));
        }
        if let Some(lang) = &self.search_lang {
            params.push(("search_lang", lang.as_str()));
        }

        info!(query, "web search");
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .get(&self.endpoint)
                .header("Accept", "application/json")
                .header("X-Subscription-Token", &self.api_key)
                .query(&params)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        let records: Vec<CandidateRecord> = parse_raw_records(&json)
                            .into_iter()
                            .map(|r| r.with_query(query))
                            .collect();
                        debug!(count = records.len(), "brave results");
                        return Ok(records);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(%status, attempt, "brave search failed, retrying");
                        last_err = Some(anyhow::anyhow!(
                            "Brave Search API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Brave Search API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "brave search request failed");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Web search failed after retries")))
    }
}

/// Build the search tool selected by configuration.
///
/// A missing API key yields [`DisabledSearch`] rather than an error, so the
/// agent still answers from the model alone.
pub fn create_search_tool(config: &SearchConfig) -> Result<Box<dyn SearchTool>> {
    if !config.is_enabled() {
        return Ok(Box::new(DisabledSearch));
    }
    match config.provider.as_str() {
        "brave" => Ok(Box::new(BraveSearch::new(config)?)),
        other => bail!("Unknown search provider: {}", other),
    }
}

/// Turn raw tool output into candidate records.
///
/// Accepted shapes:
/// - an array of result objects
/// - an array of strings, each holding a JSON-encoded result object
/// - an object with a `results` array, or `web.results` (Brave)
/// - an object with a `content` array of `{ "text": ... }` items whose
///   text is any of the above (tool-call results)
///
/// Elements that cannot be decoded are skipped with a warning. Objects
/// without a URL are kept; the result store rejects them individually.
pub fn parse_raw_records(value: &Value) -> Vec<CandidateRecord> {
    let mut out = Vec::new();
    collect_records(value, &mut out);
    out
}

fn collect_records(value: &Value, out: &mut Vec<CandidateRecord>) {
    match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Object(_) => collect_records(item, out),
                    Value::String(s) => match serde_json::from_str::<Value>(s) {
                        Ok(parsed) => collect_records(&parsed, out),
                        Err(e) => warn!(index = i, error = %e, "skipping unparseable result element"),
                    },
                    other => warn!(index = i, kind = %json_kind(other), "skipping result element"),
                }
            }
        }
        Value::Object(map) => {
            if !looks_like_container(value) {
                out.push(record_from_object(value));
            } else if let Some(results) = map.get("results") {
                collect_records(results, out);
            } else if let Some(results) = map.get("web").and_then(|w| w.get("results")) {
                collect_records(results, out);
            } else if let Some(Value::Array(content)) = map.get("content") {
                for part in content {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        match serde_json::from_str::<Value>(text) {
                            Ok(parsed) => collect_records(&parsed, out),
                            Err(e) => warn!(error = %e, "skipping non-JSON tool content"),
                        }
                    }
                }
            } else {
                out.push(record_from_object(value));
            }
        }
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) => collect_records(&parsed, out),
            Err(e) => warn!(error = %e, "tool output is not JSON"),
        },
        other => warn!(kind = %json_kind(other), "ignoring tool output"),
    }
}

fn looks_like_container(value: &Value) -> bool {
    value.get("url").is_none()
        && value.get("link").is_none()
        && (value.get("results").is_some()
            || value.get("web").is_some()
            || value.get("content").is_some())
}

fn record_from_object(value: &Value) -> CandidateRecord {
    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))
            .map(clean_fragment)
            .filter(|s| !s.is_empty())
    };
    CandidateRecord {
        url: keys_str(value, &["url", "link"]),
        title: text(&["title", "name"]),
        snippet: text(&["snippet", "description"]),
        enriched_text: text(&["enriched_text"]),
        query: keys_str(value, &["query"]),
    }
}

fn keys_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
