//! Binary entry point for craftlore.
//!
//! Provides the administrative CLI: ask a question, ingest scraped
//! documents, inspect index/cache statistics, list popular queries, and
//! clear the cache. The webhook front end lives in a separate service and
//! talks to the same engine API.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow printing in the CLI binary
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use craftlore::config::CraftloreConfig;
use craftlore::llm::{GenerationClient, LlmHttpConfig, OllamaClient};
use chrono::DateTime;
use craftlore::AnswerEngine;
use craftlore::models::Document;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Craftlore - knowledge retrieval and response cache engine for game recipe Q&A.
#[derive(Parser)]
#[command(name = "craftlore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Answer a question.
    Ask {
        /// The question to answer.
        query: String,

        /// Render the answer as chat markdown with a sources footer.
        #[arg(short, long)]
        markdown: bool,
    },

    /// Ingest documents from a scraped JSON file.
    Ingest {
        /// Path to a JSON array of {title, url, text} documents.
        file: PathBuf,

        /// Reset the index before ingesting.
        #[arg(long)]
        rebuild: bool,
    },

    /// Show index and cache statistics.
    Status,

    /// List the most popular cached queries.
    Top {
        /// Number of entries to show.
        #[arg(short, long, default_value = "10")]
        n: usize,
    },

    /// Destroy all cached answers.
    ClearCache,
}

fn main() -> ExitCode {
    // .env is optional; ignore a missing file
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => CraftloreConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CraftloreConfig::load_default(),
    };

    let generator = build_generator(&config);
    let engine = AnswerEngine::open(config, generator).context("opening engine")?;

    match cli.command {
        Commands::Ask { query, markdown } => cmd_ask(&engine, &query, markdown),
        Commands::Ingest { file, rebuild } => cmd_ingest(&engine, &file, rebuild),
        Commands::Status => cmd_status(&engine),
        Commands::Top { n } => cmd_top(&engine, n),
        Commands::ClearCache => {
            engine.clear_cache().context("clearing cache")?;
            println!("Cache cleared.");
            Ok(())
        },
    }
}

/// Builds the generation client from configuration.
fn build_generator(config: &CraftloreConfig) -> Arc<dyn GenerationClient> {
    let mut client = OllamaClient::new();
    if let Some(endpoint) = &config.llm.endpoint {
        client = client.with_endpoint(endpoint);
    }
    if let Some(model) = &config.llm.model {
        client = client.with_model(model);
    }
    if let Some(timeout_ms) = config.llm.timeout_ms {
        client = client.with_http_config(LlmHttpConfig {
            timeout_ms,
            ..LlmHttpConfig::from_env()
        });
    }

    if !client.is_available() {
        tracing::warn!("generation backend is not reachable; answers will fail until it is");
    }

    Arc::new(client)
}

fn cmd_ask(engine: &AnswerEngine, query: &str, markdown: bool) -> Result<()> {
    let response = engine.answer(query).context("answering query")?;

    if markdown {
        println!("{}", response.to_chat_markdown());
    } else {
        println!("{}", response.answer_text);
        if !response.sources.is_empty() {
            println!();
            for source in &response.sources {
                println!("  source: {} <{}>", source.title, source.url);
            }
        }
    }
    if response.from_cache {
        tracing::info!("answer served from cache");
    }
    Ok(())
}

fn cmd_ingest(engine: &AnswerEngine, file: &std::path::Path, rebuild: bool) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let documents: Vec<Document> =
        serde_json::from_str(&contents).context("parsing document JSON")?;

    let report = if rebuild {
        engine.rebuild_index(&documents).context("rebuilding index")?
    } else {
        engine.ingest(&documents).context("ingesting documents")?
    };

    println!(
        "Ingested {} documents into {} chunks ({} skipped).",
        report.documents_seen - report.documents_skipped,
        report.chunks_built,
        report.documents_skipped
    );
    for error in &report.errors {
        println!("  skipped: {error}");
    }
    Ok(())
}

fn cmd_status(engine: &AnswerEngine) -> Result<()> {
    let index = engine.index_stats().context("reading index stats")?;
    let cache = engine.cache_stats().context("reading cache stats")?;

    println!("Index:");
    println!("  chunks:          {}", index.total_chunks);
    println!("  embedding model: {}", index.embedding_model_id);
    match DateTime::from_timestamp(index.built_at, 0) {
        Some(built) if index.built_at > 0 => {
            println!("  built:           {}", built.format("%Y-%m-%d %H:%M:%S UTC"));
        },
        _ => println!("  built:           never"),
    }
    println!("Cache:");
    println!("  entries:         {}", cache.entries);
    println!("  total hits:      {}", cache.total_hits);
    Ok(())
}

fn cmd_top(engine: &AnswerEngine, n: usize) -> Result<()> {
    let entries = engine.top_queries(n).context("reading top queries")?;

    if entries.is_empty() {
        println!("No cached queries yet.");
        return Ok(());
    }

    for (rank, entry) in entries.iter().enumerate() {
        println!(
            "{:>3}. {:>5} hits  {}",
            rank + 1,
            entry.hit_count,
            entry.normalized_key
        );
    }
    Ok(())
}
