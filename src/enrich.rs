//! Best-effort content enrichment.
//!
//! An enricher turns a URL into a short plain-text excerpt of the page. It
//! never fails: any network, content-type or extraction problem yields
//! `None`, and the search result is stored without enrichment.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::config::{EnrichConfig, EnrichMode};
use crate::models::CandidateRecord;

/// Elements whose text never belongs in an excerpt.
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "template", "svg",
];

/// Produces extracted page text for a URL.
#[async_trait]
pub trait ContentEnricher: Send + Sync {
    fn name(&self) -> &str;

    /// Returns cleaned page text, or `None` when nothing usable was found.
    async fn enrich(&self, url: &str) -> Option<String>;
}

/// Enricher used when `enrich.mode = "disabled"`.
pub struct DisabledEnricher;

#[async_trait]
impl ContentEnricher for DisabledEnricher {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn enrich(&self, _url: &str) -> Option<String> {
        None
    }
}

/// Fetches pages over HTTP and extracts their main text.
pub struct HttpEnricher {
    client: reqwest::Client,
    max_chars: usize,
    blocked_markers: Vec<String>,
}

impl HttpEnricher {
    pub fn new(config: &EnrichConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            max_chars: config.max_chars,
            blocked_markers: config
                .blocked_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
        })
    }

    async fn fetch_html(&self, url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.is_empty() && !content_type.contains("html") {
            return Err(format!("unsupported content-type: {}", content_type));
        }

        response.text().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ContentEnricher for HttpEnricher {
    fn name(&self) -> &str {
        "http"
    }

    async fn enrich(&self, url: &str) -> Option<String> {
        debug!(url, "fetching page for enrichment");
        let html = match self.fetch_html(url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url, error = %e, "enrichment fetch failed");
                return None;
            }
        };

        let text = extract_main_text(&html, self.max_chars);
        if text.is_empty() {
            warn!(url, "no text extracted");
            return None;
        }
        if is_blocked(&text, &self.blocked_markers) {
            warn!(url, "page looks like a bot check; ignoring it");
            return None;
        }

        info!(url, chars = text.chars().count(), "enriched");
        Some(text)
    }
}

/// Build the enricher selected by configuration.
pub fn create_enricher(config: &EnrichConfig) -> anyhow::Result<Box<dyn ContentEnricher>> {
    match config.mode {
        EnrichMode::Disabled => Ok(Box::new(DisabledEnricher)),
        EnrichMode::Always | EnrichMode::Missing => Ok(Box::new(HttpEnricher::new(config)?)),
    }
}

/// Apply the enrichment policy to a batch, in place.
///
/// Returns how many records received enriched text.
pub async fn enrich_batch(
    enricher: &dyn ContentEnricher,
    mode: EnrichMode,
    records: &mut [CandidateRecord],
) -> usize {
    let mut enriched = 0;
    for record in records.iter_mut() {
        let wanted = match mode {
            EnrichMode::Always => true,
            EnrichMode::Missing => record.lacks_snippet(),
            EnrichMode::Disabled => false,
        };
        if !wanted || record.enriched_text.is_some() {
            continue;
        }
        let Some(url) = record.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
            continue;
        };
        if let Some(text) = enricher.enrich(url).await {
            record.enriched_text = Some(text);
            enriched += 1;
        }
    }
    enriched
}

/// Extract readable text from an HTML document.
///
/// Picks the first `article`, then `main`, then `body` as the root, skips
/// boilerplate elements, collapses whitespace and truncates to `max_chars`
/// characters.
pub fn extract_main_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);
    let root = pick_root(&document);

    let mut raw = String::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skipped = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if !skipped {
            raw.push_str(text);
            raw.push(' ');
        }
    }

    truncate_chars(&collapse_whitespace(&raw), max_chars)
}

fn pick_root(document: &Html) -> ElementRef<'_> {
    ["article", "main", "body"]
        .iter()
        .filter_map(|tag| Selector::parse(tag).ok())
        .find_map(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element())
}

/// Strip inline tags (search APIs wrap matches in `<strong>`), decode
/// entities and collapse whitespace.
pub fn clean_fragment(input: &str) -> String {
    let fragment = Html::parse_fragment(input);
    let text: String = fragment.root_element().text().collect();
    collapse_whitespace(&text)
}

pub fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}

/// Truncate on a character boundary.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => input[..idx].trim_end().to_string(),
        None => input.to_string(),
    }
}

fn is_blocked(text: &str, markers: &[String]) -> bool {
    let lower = text.to_lowercase();
    markers.iter().any(|m| !m.is_empty() && lower.contains(m.as_str()))
}
