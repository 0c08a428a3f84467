//! # Web Search Agent
//!
//! A chat agent that answers questions with fresh web search results and
//! keeps every result it has seen in a deduplicating JSON store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌───────────┐
//! │  Search  │──▶│  Enrich  │──▶│  Store   │──▶│    LLM    │
//! │  (Brave) │   │  (HTML)  │   │  (JSON)  │   │ providers │
//! └──────────┘   └──────────┘   └──────────┘   └─────┬─────┘
//!                                                    │
//!                             ┌──────────────────────┤
//!                             ▼                      ▼
//!                        ┌──────────┐          ┌──────────┐
//!                        │   CLI    │          │   HTTP   │
//!                        │  (wsa)   │          │  + MCP   │
//!                        └──────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export BRAVE_API_KEY=... OPENAI_API_KEY=...
//! wsa chat                      # interactive session
//! wsa ask "what changed in rust 1.80?"
//! wsa results list --limit 10
//! wsa serve                     # HTTP API + MCP endpoint
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Deduplicating JSON result store |
//! | [`url_key`] | Dedup key canonicalization |
//! | [`search`] | Web search tool |
//! | [`enrich`] | Page text extraction |
//! | [`guard`] | Per-message search budget |
//! | [`llm`] | Chat model providers |
//! | [`chat`] | Question answering session |
//! | [`chat_cmd`], [`results_cmd`] | CLI command handlers |
//! | [`server`] | HTTP server |
//! | [`mcp`] | MCP tool bridge |
//! | [`telemetry`] | Logging setup |

pub mod chat;
pub mod chat_cmd;
pub mod config;
pub mod enrich;
pub mod error;
pub mod guard;
pub mod llm;
pub mod mcp;
pub mod models;
pub mod results_cmd;
pub mod search;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod url_key;
