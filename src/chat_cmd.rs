use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chat::{sources_markdown, Answer, ChatSession};
use crate::config::{Config, EnrichMode};

/// Interactive session on stdin/stdout.
///
/// `quit` or `exit` leaves, `status` prints the session status, `clear`
/// starts a new thread. End of input also leaves.
pub async fn run_chat(config: Arc<Config>) -> Result<()> {
    let mut session = ChatSession::from_config(config)?;
    let interactive = atty::is(atty::Stream::Stdin);

    if interactive {
        println!("Web search agent. Commands: status, clear, quit.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if interactive {
            print!("> ");
            std::io::stdout().flush()?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        match input.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" => break,
            "status" => {
                println!("{}", session.status());
                continue;
            }
            "clear" => {
                session.clear();
                println!("History cleared (thread {}).", session.thread_id());
                continue;
            }
            _ => {}
        }

        let answer = session.ask(input).await?;
        print_answer(&answer);
    }

    Ok(())
}

pub async fn run_ask(config: Arc<Config>, question: &str, json: bool) -> Result<()> {
    let mut session = ChatSession::from_config(config)?;
    let answer = session.ask(question).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        print_answer(&answer);
    }
    Ok(())
}

/// Search, enrich and store without asking the model.
pub async fn run_search(config: Arc<Config>, query: &str, no_enrich: bool, json: bool) -> Result<()> {
    let mode = if no_enrich {
        EnrichMode::Disabled
    } else {
        config.enrich.mode
    };
    let session = ChatSession::search_only(config)?;
    let outcome = session.search_and_store(query.trim(), mode).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!("{}", sources_markdown(&outcome.sources));
    println!();
    println!("search \"{}\"", outcome.query);
    println!("  results: {}", outcome.sources.len());
    println!("  enriched: {}", outcome.enriched);
    println!("  new: {}", outcome.added);
    println!("  already stored: {}", outcome.duplicates);
    if let Some(notice) = &outcome.notice {
        eprintln!("Warning: {}", notice);
    }
    Ok(())
}

pub fn run_status(config: Arc<Config>, json: bool) -> Result<()> {
    let session = match ChatSession::from_config(config.clone()) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Warning: LLM unavailable: {}", e);
            ChatSession::search_only(config)?
        }
    };
    let status = session.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{}", status);
    }
    Ok(())
}

fn print_answer(answer: &Answer) {
    for notice in &answer.notices {
        eprintln!("Warning: {}", notice);
    }
    println!("{}", answer.text);
    println!();
}
