//! # Research Query Engine CLI (`rqe`)
//!
//! ## Usage
//!
//! ```bash
//! rqe --config ./config/rqe.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rqe init` | Create the SQLite database and run schema migrations |
//! | `rqe ingest <paths...>` | Chunk, embed and index files or directories |
//! | `rqe query "<question>"` | Answer a question with cited sources |
//! | `rqe evaluate --query .. --answer .. --context ..` | Score an answer |
//! | `rqe show-evaluation <id>` | Print a stored evaluation record |
//! | `rqe serve` | Start the HTTP API |
//!
//! Logging is controlled with `RUST_LOG` (default `info`) and written to
//! stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use research_core::models::Language;
use research_engine::{commands, config, migrate, server};

/// Research Query Engine: cited, fact-checked answers over your documents.
#[derive(Parser)]
#[command(name = "rqe", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rqe.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest files and directories.
    ///
    /// Directories are walked recursively; by default only `*.md` and
    /// `*.txt` files are read. Re-ingesting unchanged files skips every chunk.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Glob for files to include when walking directories (repeatable).
        #[arg(long = "include")]
        include: Vec<String>,
    },

    /// Answer a research question.
    Query {
        query: String,

        /// Number of passages to retrieve (1-20).
        #[arg(long)]
        top_k: Option<usize>,

        /// Answer language: en, de, fr, es.
        #[arg(long, default_value = "en")]
        language: Language,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Score an answer against a query and its context passages.
    Evaluate {
        #[arg(long)]
        query: String,

        #[arg(long)]
        answer: String,

        /// Context passage; repeat in citation order (`[1]` first).
        #[arg(long = "context")]
        context: Vec<String>,
    },

    /// Print a stored evaluation record.
    ShowEvaluation { record_id: String },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { paths, include } => {
            commands::run_ingest(&cfg, &paths, include).await?;
        }
        Commands::Query {
            query,
            top_k,
            language,
            json,
        } => {
            commands::run_query(&cfg, &query, top_k, language, json).await?;
        }
        Commands::Evaluate {
            query,
            answer,
            context,
        } => {
            commands::run_evaluate(&cfg, query, answer, context).await?;
        }
        Commands::ShowEvaluation { record_id } => {
            commands::run_show_evaluation(&cfg, &record_id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
