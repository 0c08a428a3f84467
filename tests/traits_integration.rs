//! Integration tests for the collaborator traits.
//!
//! Custom `SearchTool`, `ContentEnricher` and `ChatProvider` implementations
//! are plugged into a `ChatSession` through the public API and driven end to
//! end against a real result store file.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use websearch_agent::chat::ChatSession;
use websearch_agent::config::{Config, EnrichMode};
use websearch_agent::enrich::ContentEnricher;
use websearch_agent::llm::{ChatMessage, ChatProvider, CompletionParams};
use websearch_agent::models::CandidateRecord;
use websearch_agent::search::SearchTool;
use websearch_agent::store::ResultStore;

// ─── Test collaborators ─────────────────────────────────────────────

/// Returns one result per word of the query.
struct WordSearch {
    queries: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SearchTool for WordSearch {
    fn name(&self) -> &str {
        "words"
    }

    async fn search(&self, query: &str, count: usize) -> Result<Vec<CandidateRecord>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(query
            .split_whitespace()
            .take(count)
            .map(|word| {
                let record = CandidateRecord::new(format!("https://{}.example.org/", word), word)
                    .with_query(query);
                if word.len() > 3 {
                    record.with_snippet(format!("about {}", word))
                } else {
                    record
                }
            })
            .collect())
    }
}

/// Pretends to extract page text.
struct StaticEnricher {
    calls: Arc<Mutex<usize>>,
}

#[async_trait]
impl ContentEnricher for StaticEnricher {
    fn name(&self) -> &str {
        "static"
    }

    async fn enrich(&self, url: &str) -> Option<String> {
        *self.calls.lock().unwrap() += 1;
        Some(format!("page text of {}", url))
    }
}

/// Answers with the number of messages it was given.
struct CountingChat;

#[async_trait]
impl ChatProvider for CountingChat {
    fn name(&self) -> &str {
        "counting"
    }

    fn model(&self) -> &str {
        "count-1"
    }

    async fn complete(&self, messages: &[ChatMessage], params: CompletionParams) -> Result<String> {
        assert_eq!(params.max_tokens, 1024);
        Ok(format!("{} messages", messages.len()))
    }
}

fn config(dir: &TempDir, mode: EnrichMode) -> Arc<Config> {
    let mut config = Config::default();
    config.store.path = dir.path().join("nested/results.json");
    config.enrich.mode = mode;
    Arc::new(config)
}

fn build_session(config: Arc<Config>) -> (ChatSession, Arc<Mutex<Vec<String>>>, Arc<Mutex<usize>>) {
    let queries = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(Mutex::new(0));
    let session = ChatSession::new(
        config,
        Box::new(WordSearch {
            queries: queries.clone(),
        }),
        Box::new(StaticEnricher {
            calls: calls.clone(),
        }),
        Box::new(CountingChat),
    );
    (session, queries, calls)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ask_enriches_only_missing_snippets_and_persists() {
    let tmp = TempDir::new().unwrap();
    let (mut session, queries, calls) = build_session(config(&tmp, EnrichMode::Missing));

    let answer = session.ask("rust borrow checker").await.unwrap();

    assert_eq!(answer.text, "2 messages");
    assert_eq!(*queries.lock().unwrap(), vec!["rust borrow checker".to_string()]);
    assert_eq!(*calls.lock().unwrap(), 0, "every word is longer than 3");

    let (mut session, _, calls) = build_session(config(&tmp, EnrichMode::Missing));
    session.ask("go and rust").await.unwrap();
    // "go" and "and" have no snippet.
    assert_eq!(*calls.lock().unwrap(), 2);

    let stored = ResultStore::new(tmp.path().join("nested/results.json")).list_all();
    let urls: Vec<_> = stored.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://rust.example.org/",
            "https://borrow.example.org/",
            "https://checker.example.org/",
            "https://go.example.org/",
            "https://and.example.org/",
        ]
    );
    assert_eq!(
        stored[3].enriched_text.as_deref(),
        Some("page text of https://go.example.org/")
    );
}

#[tokio::test]
async fn test_history_grows_across_questions() {
    let tmp = TempDir::new().unwrap();
    let (mut session, _, _) = build_session(config(&tmp, EnrichMode::Disabled));

    let first = session.ask("alpha").await.unwrap();
    let second = session.ask("beta").await.unwrap();

    // system + question, then system + one turn + question
    assert_eq!(first.text, "2 messages");
    assert_eq!(second.text, "4 messages");

    session.clear();
    let third = session.ask("gamma").await.unwrap();
    assert_eq!(third.text, "2 messages");
}

#[tokio::test]
async fn test_parallel_sessions_share_one_store() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(&tmp, EnrichMode::Disabled);

    let mut handles = Vec::new();
    for i in 0..4 {
        let cfg = cfg.clone();
        handles.push(tokio::spawn(async move {
            let (session, _, _) = build_session(cfg);
            let query = format!("shared unique{} words{}", i, i);
            session.search_and_store(&query, EnrichMode::Disabled).await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(outcome.notice.is_none());
    }

    let stored = ResultStore::new(tmp.path().join("nested/results.json")).list_all();
    // "shared" once, plus two distinct words per session.
    assert_eq!(stored.len(), 1 + 4 * 2);
}
