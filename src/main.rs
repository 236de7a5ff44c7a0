//! # corpus-rag CLI (`crag`)
//!
//! ## Usage
//!
//! ```bash
//! crag --config ./crag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crag query "<text>"` | Answer a query from the corpus |
//! | `crag warm` | Index every corpus document now |
//! | `crag corpus` | List corpus documents and routing rules |
//! | `crag serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Let keyword routing pick the documents
//! crag query "how do I close a ticket?" --config ./crag.toml
//!
//! # Search specific files, print the full JSON response
//! crag query "tip policy" --scope files --file docs/orders.md --json
//!
//! # Start the HTTP server on [server].bind
//! crag serve --config ./crag.toml
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the level chosen by `--verbose`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use corpus_rag::config::load_config;
use corpus_rag::server::run_server;
use corpus_rag::service::{QueryRequest, QueryResponse, RetrievalService};

/// corpus-rag: local retrieval over Markdown, Word and PDF documents.
#[derive(Parser)]
#[command(
    name = "crag",
    about = "Local retrieval over a fixed corpus of Markdown, Word and PDF documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Without it, defaults and
    /// `CRAG_*` environment variables are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a query from the corpus.
    Query {
        /// The question to answer.
        query: String,

        /// `auto` (keyword routing) or `files` (only the given --file paths).
        #[arg(long, default_value = "auto")]
        scope: String,

        /// Document to search; repeatable. Only used with `--scope files`.
        #[arg(long = "file")]
        files: Vec<String>,

        /// Maximum number of passages to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the full JSON response.
        #[arg(long)]
        json: bool,
    },

    /// Index every corpus document and report chunk counts.
    Warm,

    /// List corpus documents, their kinds, and the routing table.
    Corpus,

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Query {
            query,
            scope,
            files,
            top_k,
            json,
        } => {
            let service = RetrievalService::from_config(config).await?;
            let request = QueryRequest {
                query,
                scope: Some(scope),
                files: Some(files),
                top_k: top_k.map(serde_json::Value::from),
            };
            let response = service.run(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }
        Commands::Warm => {
            let service = RetrievalService::from_config(config).await?;
            let report = service.warm().await;
            for (path, chunks) in &report.indexed {
                println!("indexed  {} ({} chunks)", path, chunks);
            }
            for skipped in &report.skipped {
                println!("skipped  {}", skipped);
            }
            let stats = service.store().stats();
            println!(
                "{} indexed, {} skipped ({} builds, {} cache hits, {} evictions)",
                report.indexed.len(),
                report.skipped.len(),
                stats.builds,
                stats.hits,
                stats.evictions
            );
        }
        Commands::Corpus => {
            let service = RetrievalService::from_config(config).await?;
            println!("Documents ({}):", service.corpus().len());
            for doc in service.corpus() {
                println!("  {:<8} {}", doc.kind.as_str(), doc.path.display());
            }
            println!("Routing rules:");
            for rule in service.router().rules() {
                println!("  {} <- {}", rule.file, rule.keywords.join(", "));
            }
        }
        Commands::Serve => {
            let service = Arc::new(RetrievalService::from_config(config).await?);
            run_server(service).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_response(response: &QueryResponse) {
    if response.low_confidence {
        println!("(low confidence)");
    }
    println!("{}", response.best_answer);

    if !response.results.is_empty() {
        println!();
        println!("Sources:");
        for (i, r) in response.results.iter().enumerate() {
            println!("{}. [{:.3}] {}", i + 1, r.score, r.source);
        }
    }
    for skipped in &response.debug.skipped {
        eprintln!("skipped: {}", skipped);
    }
}
