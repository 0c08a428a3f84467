//! # Web Search Agent CLI (`wsa`)
//!
//! The `wsa` binary is the primary interface for the web search agent. It
//! provides an interactive chat, one-shot questions, raw searches, access to
//! the stored results, and the HTTP/MCP server.
//!
//! ## Usage
//!
//! ```bash
//! wsa --config ./config/wsa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wsa chat` | Interactive session (`status`, `clear`, `quit`) |
//! | `wsa ask "<question>"` | Answer one question |
//! | `wsa search "<query>"` | Search and store results without the model |
//! | `wsa results list` | Print stored results |
//! | `wsa results import <file>` | Append results from a JSON file |
//! | `wsa status` | Show provider, search and store settings |
//! | `wsa serve` | Start the HTTP server with the MCP endpoint |
//! | `wsa completions <shell>` | Print a shell completion script |

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use websearch_agent::config::{self, Config};
use websearch_agent::{chat_cmd, results_cmd, server, telemetry};

/// Web Search Agent — answers questions with fresh web results and keeps a
/// deduplicated record of every result it has seen.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/wsa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "wsa",
    about = "Web Search Agent — chat with an LLM grounded in fresh web search results",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/wsa.toml`. When the file does not exist,
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/wsa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session.
    Chat,

    /// Answer a single question.
    Ask {
        question: String,

        /// Print the answer, sources and notices as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search the web and store the results without asking the model.
    Search {
        query: String,

        /// Skip page text extraction for this search.
        #[arg(long)]
        no_enrich: bool,

        #[arg(long)]
        json: bool,
    },

    /// Inspect or extend the result store.
    Results {
        #[command(subcommand)]
        action: ResultsAction,
    },

    /// Show the configured provider, search tool and store.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server (`/chat`, `/search`, `/results`, `/mcp`).
    Serve,

    /// Print a shell completion script to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ResultsAction {
    /// Print stored results in insertion order.
    List {
        #[arg(long)]
        json: bool,

        /// Show only the most recent N results.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Append results from a JSON file, skipping URLs already stored.
    ///
    /// Accepts an array of `{url, title, snippet|description}` objects or
    /// raw search tool output.
    Import {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "wsa", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        Config::minimal()
    };
    telemetry::init_logging(&cfg.logging);

    if !cli.config.exists() {
        tracing::debug!(path = %cli.config.display(), "config file not found; using defaults");
    }
    if cfg.search.provider != "disabled" && !cfg.search.is_enabled() {
        tracing::warn!("{} is not set; web search is disabled", cfg.search.api_key_env);
    }

    let cfg = Arc::new(cfg);

    match cli.command {
        Commands::Chat => {
            chat_cmd::run_chat(cfg).await?;
        }
        Commands::Ask { question, json } => {
            chat_cmd::run_ask(cfg, &question, json).await?;
        }
        Commands::Search {
            query,
            no_enrich,
            json,
        } => {
            chat_cmd::run_search(cfg, &query, no_enrich, json).await?;
        }
        Commands::Results { action } => match action {
            ResultsAction::List { json, limit } => {
                results_cmd::run_list(&cfg, json, limit)?;
            }
            ResultsAction::Import { file, json } => {
                results_cmd::run_import(&cfg, &file, json)?;
            }
        },
        Commands::Status { json } => {
            chat_cmd::run_status(cfg, json)?;
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
