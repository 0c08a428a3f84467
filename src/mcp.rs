//! MCP JSON-RPC protocol bridge.
//!
//! Serves the agent's tools over the MCP Streamable HTTP transport at
//! `/mcp`, so external agents (Cursor, Claude Desktop, LangGraph) can search
//! through the same guard, enrichment and result store as `wsa chat`.
//!
//! | Tool | Effect |
//! |------|--------|
//! | `web_search` | guarded search; stores results and returns a Markdown sources block |
//! | `list_results` | stored results as JSON |
//! | `save_results` | append raw search output to the store |

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;

use crate::chat::ChatSession;
use crate::search::parse_raw_records;
use crate::store::ResultStore;

/// Each MCP session receives a clone of this struct; all of them share the
/// one [`ChatSession`] and therefore its search guard. Store-only tools use
/// `store` directly and never wait on the session.
#[derive(Clone)]
pub struct McpBridge {
    session: Arc<Mutex<ChatSession>>,
    store: ResultStore,
}

impl McpBridge {
    pub fn new(session: Arc<Mutex<ChatSession>>, store: ResultStore) -> Self {
        Self { session, store }
    }

    fn tools() -> Vec<Tool> {
        vec![
            tool(
                "web_search",
                "Search the web. Results are saved and returned as a Markdown list of sources. \
                 Pass the same message_id for every call made while answering one user message; \
                 repeated or excess searches are refused.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Search query" },
                        "message_id": { "type": "string", "description": "Identifier of the user message being answered" },
                        "user_message": { "type": "string", "description": "Raw text of that user message" }
                    },
                    "required": ["query"]
                }),
                false,
            ),
            tool(
                "list_results",
                "List stored search results in insertion order.",
                json!({
                    "type": "object",
                    "properties": {
                        "limit": { "type": "integer", "minimum": 1, "description": "Return only the most recent N results" }
                    }
                }),
                true,
            ),
            tool(
                "save_results",
                "Save search results to the store, skipping URLs that are already stored.",
                json!({
                    "type": "object",
                    "properties": {
                        "results": {
                            "description": "Array of {url, title, snippet|description} objects, or raw search tool output"
                        }
                    },
                    "required": ["results"]
                }),
                false,
            ),
        ]
    }

    /// Run one tool call. Tool failures are reported as `Err(message)`.
    pub async fn dispatch(&self, name: &str, args: &Value) -> Result<String, String> {
        match name {
            "web_search" => {
                let query = args
                    .get("query")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .ok_or_else(|| "query must not be empty".to_string())?;
                let message_id = args.get("message_id").and_then(Value::as_str);
                let user_message = args.get("user_message").and_then(Value::as_str);
                let mut session = self.session.lock().await;
                Ok(session
                    .guarded_search(message_id, user_message, query)
                    .await)
            }
            "list_results" => {
                let limit = args.get("limit").and_then(Value::as_u64).map(|n| n as usize);
                let store = self.store.clone();
                let results = tokio::task::spawn_blocking(move || store.list_all())
                    .await
                    .map_err(|e| e.to_string())?;
                let start = limit.map_or(0, |n| results.len().saturating_sub(n));
                serde_json::to_string_pretty(&results[start..]).map_err(|e| e.to_string())
            }
            "save_results" => {
                let raw = args
                    .get("results")
                    .ok_or_else(|| "results is required".to_string())?;
                let records = parse_raw_records(raw);
                let store = self.store.clone();
                let report = tokio::task::spawn_blocking(move || store.append(records))
                    .await
                    .map_err(|e| e.to_string())?
                    .map_err(|e| e.to_string())?;
                info!(added = report.added, "results saved over MCP");
                serde_json::to_string_pretty(&report.to_json()).map_err(|e| e.to_string())
            }
            other => Err(format!("no tool registered with name: {}", other)),
        }
    }
}

fn tool(name: &'static str, description: &'static str, schema: Value, read_only: bool) -> Tool {
    let input_schema: Arc<serde_json::Map<String, Value>> = match schema {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    };

    Tool {
        name: Cow::Borrowed(name),
        title: None,
        description: Some(Cow::Borrowed(description)),
        input_schema,
        output_schema: None,
        annotations: Some(ToolAnnotations::new().read_only(read_only)),
        execution: None,
        icons: None,
        meta: None,
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "websearch-agent".to_string(),
                title: Some("Web Search Agent".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Use web_search once per user message to find sources, then answer from them. \
                 list_results shows what has been collected so far."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(Self::tools())))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        Self::tools().into_iter().find(|t| t.name == name)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if self.get_tool(&request.name).is_none() {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            ));
        }

        let args = request
            .arguments
            .map(Value::Object)
            .unwrap_or(Value::Object(serde_json::Map::new()));

        match self.dispatch(&request.name, &args).await {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e)])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EnrichMode};
    use crate::enrich::DisabledEnricher;
    use crate::llm::DisabledChat;
    use crate::models::CandidateRecord;
    use crate::search::SearchTool;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct OneResult;

    #[async_trait]
    impl SearchTool for OneResult {
        fn name(&self) -> &str {
            "one"
        }

        async fn search(&self, query: &str, _count: usize) -> anyhow::Result<Vec<CandidateRecord>> {
            Ok(vec![CandidateRecord::new(
                format!("https://example.com/{}", query.replace(' ', "-")),
                query,
            )])
        }
    }

    fn bridge(dir: &TempDir) -> McpBridge {
        let mut config = Config::default();
        config.store.path = dir.path().join("results.json");
        config.enrich.mode = EnrichMode::Disabled;
        let session = ChatSession::new(
            Arc::new(config),
            Box::new(OneResult),
            Box::new(DisabledEnricher),
            Box::new(DisabledChat),
        );
        let store = session.store().clone();
        McpBridge::new(Arc::new(Mutex::new(session)), store)
    }

    #[test]
    fn advertises_three_tools() {
        let names: Vec<_> = McpBridge::tools().into_iter().map(|t| t.name.to_string()).collect();
        assert_eq!(names, vec!["web_search", "list_results", "save_results"]);
    }

    #[tokio::test]
    async fn web_search_is_guarded_per_message() {
        let dir = TempDir::new().unwrap();
        let bridge = bridge(&dir);

        let first = bridge
            .dispatch("web_search", &json!({ "query": "rust", "message_id": "1" }))
            .await
            .unwrap();
        let again = bridge
            .dispatch("web_search", &json!({ "query": "rust", "message_id": "1" }))
            .await
            .unwrap();

        assert!(first.contains("- [rust](https://example.com/rust)"));
        assert_eq!(again, crate::guard::REPEATED_INSTRUCTION);
    }

    #[tokio::test]
    async fn save_then_list() {
        let dir = TempDir::new().unwrap();
        let bridge = bridge(&dir);

        let report = bridge
            .dispatch(
                "save_results",
                &json!({ "results": [
                    { "url": "https://a.com", "title": "A", "description": "first" },
                    { "url": "https://a.com/", "title": "A again" },
                    { "title": "no url" }
                ]}),
            )
            .await
            .unwrap();
        let report: Value = serde_json::from_str(&report).unwrap();
        assert_eq!(report["added"], 1);
        assert_eq!(report["duplicates"], 1);
        assert_eq!(report["rejected"].as_array().unwrap().len(), 1);

        bridge
            .dispatch("save_results", &json!({ "results": [{ "url": "https://b.com", "title": "B" }] }))
            .await
            .unwrap();

        let listed = bridge
            .dispatch("list_results", &json!({ "limit": 1 }))
            .await
            .unwrap();
        let listed: Value = serde_json::from_str(&listed).unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["url"], "https://b.com");
    }

    #[tokio::test]
    async fn store_tools_do_not_wait_for_a_busy_session() {
        let dir = TempDir::new().unwrap();
        let bridge = bridge(&dir);
        let _busy = bridge.session.lock().await;

        let saved = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            bridge.dispatch("save_results", &json!({ "results": [{ "url": "https://a.com" }] })),
        )
        .await
        .expect("save_results waited for the session");
        assert!(saved.is_ok());

        let listed = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            bridge.dispatch("list_results", &json!({})),
        )
        .await
        .expect("list_results waited for the session")
        .unwrap();
        assert!(listed.contains("https://a.com"));
    }

    #[tokio::test]
    async fn unknown_tool_and_missing_query_fail() {
        let dir = TempDir::new().unwrap();
        let bridge = bridge(&dir);
        assert!(bridge.dispatch("nope", &json!({})).await.is_err());
        assert!(bridge.dispatch("web_search", &json!({ "query": " " })).await.is_err());
    }
}
