use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::search::parse_raw_records;
use crate::store::ResultStore;

/// Print stored results in insertion order; `limit` keeps the most recent N.
pub fn run_list(config: &Config, json: bool, limit: Option<usize>) -> Result<()> {
    let store = ResultStore::new(&config.store.path);
    let mut results = store.list_all();
    let total = results.len();
    if let Some(limit) = limit {
        results.drain(..total.saturating_sub(limit));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No stored results in {}.", store.path().display());
        return Ok(());
    }

    let first = total - results.len() + 1;
    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. {} ({})",
            first + i,
            result.title,
            result.retrieved_at.format("%Y-%m-%d %H:%M")
        );
        println!("   {}", result.url);
        if let Some(summary) = result.summary() {
            println!("   {}", crate::enrich::truncate_chars(summary, 160));
        }
        if let Some(query) = &result.query {
            println!("   query: {}", query);
        }
        println!();
    }
    println!("{} of {} results shown.", results.len(), total);
    Ok(())
}

/// Append results from a JSON file of raw search output.
pub fn run_import(config: &Config, file: &Path, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let records = parse_raw_records(&value);
    let store = ResultStore::new(&config.store.path);
    let report = store.append(records)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
        return Ok(());
    }

    println!("results import");
    println!("  added: {}", report.added);
    println!("  duplicates: {}", report.duplicates);
    println!("  rejected: {}", report.rejected.len());
    for err in &report.rejected {
        println!("    {}", err);
    }
    println!("  total stored: {}", report.total);
    Ok(())
}
