//! Question answering over fresh web results.
//!
//! A [`ChatSession`] runs one question at a time: search, enrich, persist to
//! the [`ResultStore`], then ask the model with the sources attached. Every
//! collaborator failure degrades the answer instead of ending the session:
//! a failed search means no sources, a failed write becomes a notice, and a
//! failed model call returns the sources themselves.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, EnrichMode};
use crate::enrich::{collapse_whitespace, create_enricher, enrich_batch, truncate_chars, ContentEnricher};
use crate::guard::{GuardDecision, SearchGuard};
use crate::llm::{create_provider, ChatMessage, ChatProvider, CompletionParams, DisabledChat};
use crate::models::CandidateRecord;
use crate::search::{create_search_tool, SearchTool};
use crate::store::ResultStore;
use crate::url_key::canonical_key;

const NO_SOURCES: &str = "No web sources were found for this question.";

/// A source shown to the user and the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Result of one search-enrich-store pass.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub sources: Vec<Source>,
    pub enriched: usize,
    /// Records newly written to the store.
    pub added: usize,
    pub duplicates: usize,
    /// Set when the search or the store write failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

impl SearchOutcome {
    fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            sources: Vec::new(),
            enriched: 0,
            added: 0,
            duplicates: 0,
            notice: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Source>,
    /// User-visible warnings, e.g. a failed store write.
    pub notices: Vec<String>,
    /// True when the model could not be used and `text` lists the sources.
    pub fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub thread_id: String,
    pub provider: String,
    pub model: String,
    pub search_tool: String,
    pub max_results: usize,
    pub enrich_mode: String,
    pub enricher: String,
    pub store_path: String,
    pub stored_records: usize,
    pub history_messages: usize,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "thread:      {}", self.thread_id)?;
        writeln!(f, "provider:    {} ({})", self.provider, self.model)?;
        writeln!(f, "search:      {} (max {})", self.search_tool, self.max_results)?;
        writeln!(f, "enrichment:  {} via {}", self.enrich_mode, self.enricher)?;
        writeln!(f, "store:       {} ({} records)", self.store_path, self.stored_records)?;
        write!(f, "history:     {} messages", self.history_messages)
    }
}

pub struct ChatSession {
    config: Arc<Config>,
    store: ResultStore,
    search: Box<dyn SearchTool>,
    enricher: Box<dyn ContentEnricher>,
    provider: Box<dyn ChatProvider>,
    guard: SearchGuard,
    history: Vec<ChatMessage>,
    thread_id: Uuid,
}

impl ChatSession {
    /// Build a session with the collaborators named in `config`.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let search = create_search_tool(&config.search)?;
        let enricher = create_enricher(&config.enrich)?;
        let provider = create_provider(&config.llm)?;
        Ok(Self::new(config, search, enricher, provider))
    }

    /// Session without a model, for commands that only search and store.
    pub fn search_only(config: Arc<Config>) -> Result<Self> {
        let search = create_search_tool(&config.search)?;
        let enricher = create_enricher(&config.enrich)?;
        Ok(Self::new(config, search, enricher, Box::new(DisabledChat)))
    }

    pub fn new(
        config: Arc<Config>,
        search: Box<dyn SearchTool>,
        enricher: Box<dyn ContentEnricher>,
        provider: Box<dyn ChatProvider>,
    ) -> Self {
        let store = ResultStore::new(config.store.path.clone());
        let guard = SearchGuard::from_config(&config.session);
        Self {
            config,
            store,
            search,
            enricher,
            provider,
            guard,
            history: Vec::new(),
            thread_id: Uuid::new_v4(),
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn thread_id(&self) -> Uuid {
        self.thread_id
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Answer one question.
    ///
    /// Fails only for a blank question; every later failure is folded into
    /// the [`Answer`].
    pub async fn ask(&mut self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            bail!("question must not be empty");
        }
        info!(thread = %self.thread_id, question, "answering");

        let outcome = self.search_and_store(question, self.config.enrich.mode).await;
        let mut notices: Vec<String> = outcome.notice.iter().cloned().collect();
        let sources_md = sources_markdown(&outcome.sources);

        if self.provider.name() == "disabled" {
            return Ok(Answer {
                text: sources_md,
                sources: outcome.sources,
                notices,
                fallback: false,
            });
        }

        let user_turn = if outcome.sources.is_empty() {
            question.to_string()
        } else {
            format!("{}\n\n{}", question, sources_md)
        };

        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(system_prompt(&Local::now().format("%Y-%m-%d").to_string())));
        messages.extend(self.recent_history().iter().cloned());
        messages.push(ChatMessage::user(user_turn));

        let params = CompletionParams::from(&self.config.llm);
        match self.provider.complete(&messages, params).await {
            Ok(text) => {
                self.history.push(ChatMessage::user(question));
                self.history.push(ChatMessage::assistant(text.clone()));
                Ok(Answer {
                    text,
                    sources: outcome.sources,
                    notices,
                    fallback: false,
                })
            }
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "generation failed; answering with sources");
                notices.push(format!("The language model is unavailable: {}", e));
                Ok(Answer {
                    text: fallback_text(&sources_md, outcome.sources.is_empty()),
                    sources: outcome.sources,
                    notices,
                    fallback: true,
                })
            }
        }
    }

    /// Search, enrich per `mode`, and persist. Never fails; problems end up
    /// in [`SearchOutcome::notice`].
    pub async fn search_and_store(&self, query: &str, mode: EnrichMode) -> SearchOutcome {
        let mut outcome = SearchOutcome::empty(query);

        let mut records = match self
            .search
            .search(query, self.config.search.max_results)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(tool = self.search.name(), error = %e, "search failed; continuing without sources");
                outcome.notice = Some(format!("Web search failed: {}", e));
                return outcome;
            }
        };
        records.truncate(self.config.search.max_results);

        outcome.enriched = enrich_batch(self.enricher.as_ref(), mode, &mut records).await;
        outcome.sources = to_sources(&records, self.config.enrich.snippet_max_chars);

        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.append(records)).await {
            Ok(Ok(report)) => {
                outcome.added = report.added;
                outcome.duplicates = report.duplicates;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "could not save search results");
                outcome.notice = Some(format!("Search results were not saved: {}", e));
            }
            Err(e) => {
                warn!(error = %e, "store task failed");
                outcome.notice = Some(format!("Search results were not saved: {}", e));
            }
        }

        outcome
    }

    /// Search on behalf of a tool-calling agent, subject to the per-message
    /// guard. Returns the text handed back to the agent.
    ///
    /// Without a `message_id` the guard is bypassed: each call stands alone.
    pub async fn guarded_search(
        &mut self,
        message_id: Option<&str>,
        user_message: Option<&str>,
        query: &str,
    ) -> String {
        let query = match message_id {
            Some(id) => match self.guard.check(id, user_message.unwrap_or(""), query) {
                GuardDecision::Proceed(q) => q,
                refused => return refused.instruction().unwrap_or_default().to_string(),
            },
            None => query.trim().to_string(),
        };

        let outcome = self.search_and_store(&query, self.config.enrich.mode).await;
        let mut text = sources_markdown(&outcome.sources);
        if let Some(notice) = outcome.notice {
            text.push_str("\n\n");
            text.push_str(&notice);
        }
        text
    }

    /// Forget the conversation and start a new thread.
    pub fn clear(&mut self) {
        self.history.clear();
        self.guard.reset();
        self.thread_id = Uuid::new_v4();
        info!(thread = %self.thread_id, "session cleared");
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            thread_id: self.thread_id.to_string(),
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            search_tool: self.search.name().to_string(),
            max_results: self.config.search.max_results,
            enrich_mode: self.config.enrich.mode.as_str().to_string(),
            enricher: self.enricher.name().to_string(),
            store_path: self.store.path().display().to_string(),
            stored_records: self.store.list_all().len(),
            history_messages: self.history.len(),
        }
    }

    fn recent_history(&self) -> &[ChatMessage] {
        let keep = self.config.session.history_turns * 2;
        let start = self.history.len().saturating_sub(keep);
        &self.history[start..]
    }
}

pub fn system_prompt(today: &str) -> String {
    format!(
        "You are a research assistant that answers with the help of web search results.\n\
         Today's date is {today}.\n\
         Base the answer on the sources provided with the question and cite them as Markdown links.\n\
         If the sources do not answer the question, say so and answer from general knowledge."
    )
}

/// Records with a storable URL, as display sources. Equivalent URLs keep
/// the first record.
pub fn to_sources(records: &[CandidateRecord], snippet_max_chars: usize) -> Vec<Source> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .iter()
        .filter_map(|r| {
            let url = r.url.as_deref()?.trim();
            let key = canonical_key(url).ok()?;
            if !seen.insert(key) {
                return None;
            }
            let title = r
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(url);
            let text = r
                .enriched_text
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .or(r.snippet.as_deref())
                .unwrap_or_default();
            Some(Source {
                title: title.to_string(),
                url: url.to_string(),
                snippet: shorten(text, snippet_max_chars),
            })
        })
        .collect()
}

fn shorten(text: &str, max_chars: usize) -> String {
    let flat = collapse_whitespace(text);
    if flat.chars().count() > max_chars {
        format!("{}...", truncate_chars(&flat, max_chars))
    } else {
        flat
    }
}

/// Render sources as the Markdown context block given to the model.
pub fn sources_markdown(sources: &[Source]) -> String {
    if sources.is_empty() {
        return NO_SOURCES.to_string();
    }
    let mut lines = vec!["### Sources".to_string()];
    for source in sources {
        lines.push(format!("- [{}]({})", source.title, source.url));
        if !source.snippet.is_empty() {
            lines.push(format!("  {}", source.snippet));
        }
    }
    lines.join("\n")
}

fn fallback_text(sources_md: &str, no_sources: bool) -> String {
    if no_sources {
        "The answer could not be generated and no web sources were found.".to_string()
    } else {
        format!(
            "The answer could not be generated. These sources were found for your question:\n\n{}",
            sources_md
        )
    }
}
