//! Per-message search budget.
//!
//! Tool-calling models sometimes loop on the search tool. [`SearchGuard`]
//! allows at most `max_searches_per_message` searches per user message and
//! refuses a query it has already run for that message. State resets as soon
//! as a different message identifier is seen.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::config::SessionConfig;

pub const REPEATED_INSTRUCTION: &str =
    "A search for this query was already run; answer from the sources above.";
pub const LIMIT_INSTRUCTION: &str =
    "The search limit for this message is reached; answer from the sources already found.";

/// Outcome of [`SearchGuard::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Run the search with this (possibly substituted) query.
    Proceed(String),
    Repeated,
    LimitReached,
}

impl GuardDecision {
    /// Text handed back to the agent instead of search results.
    pub fn instruction(&self) -> Option<&'static str> {
        match self {
            GuardDecision::Proceed(_) => None,
            GuardDecision::Repeated => Some(REPEATED_INSTRUCTION),
            GuardDecision::LimitReached => Some(LIMIT_INSTRUCTION),
        }
    }
}

#[derive(Debug)]
pub struct SearchGuard {
    max_calls: usize,
    raw_query: bool,
    message_id: Option<String>,
    calls: usize,
    seen: HashSet<String>,
}

impl SearchGuard {
    pub fn new(max_calls: usize, raw_query: bool) -> Self {
        Self {
            max_calls: max_calls.max(1),
            raw_query,
            message_id: None,
            calls: 0,
            seen: HashSet::new(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.max_searches_per_message, config.raw_query)
    }

    /// Decide whether a search for `query` may run while answering the
    /// message identified by `message_id`.
    ///
    /// With raw-query substitution on, a non-blank `raw_message` replaces
    /// the agent's query before the repeat check.
    pub fn check(&mut self, message_id: &str, raw_message: &str, query: &str) -> GuardDecision {
        if self.message_id.as_deref() != Some(message_id) {
            debug!(message_id, "new message; search budget reset");
            self.reset();
            self.message_id = Some(message_id.to_string());
        }

        let effective = if self.raw_query && !raw_message.trim().is_empty() {
            raw_message.trim()
        } else {
            query.trim()
        };
        if effective != query.trim() {
            debug!(from = query, to = effective, "query replaced by user message");
        }

        let key = normalize(effective);
        if self.seen.contains(&key) {
            info!(query = effective, "refusing repeated search");
            return GuardDecision::Repeated;
        }
        if self.calls >= self.max_calls {
            info!(limit = self.max_calls, "search limit reached");
            return GuardDecision::LimitReached;
        }

        self.seen.insert(key);
        self.calls += 1;
        GuardDecision::Proceed(effective.to_string())
    }

    pub fn reset(&mut self) {
        self.message_id = None;
        self.calls = 0;
        self.seen.clear();
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}
