//! # docqa CLI
//!
//! Ingest documents and ask questions about them from the command line.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the storage directories |
//! | `docqa ingest <paths..>` | Ingest files or directories |
//! | `docqa docs` | List stored documents |
//! | `docqa search "<query>"` | Hybrid search without answer generation |
//! | `docqa ask "<question>"` | Answer a question from the documents |
//! | `docqa clear` | Remove all documents and the vector index |
//! | `docqa clear-cache` | Remove the persisted vector index only |
//! | `docqa history <action>` | Show, export, clear, or delete chat history |
//! | `docqa feedback up\|down` | Vote on the most recent answer |

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use docqa::commands;
use docqa::config::{self, Config};
use docqa::feedback::Vote;

const DEFAULT_CONFIG: &str = "./config/docqa.toml";

/// docqa: question answering over uploaded documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docqa.example.toml` for a full example. When the
/// default config file does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(name = "docqa", version, about = "Question answering over uploaded documents")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage directories under `storage.base_dir`.
    Init,

    /// Ingest files or directories (walked recursively).
    ///
    /// Supported types: PDF, plain text (`.txt`), and CSV. Files already
    /// stored (same content) are not reprocessed.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List stored documents.
    Docs,

    /// Search documents with hybrid keyword and vector retrieval.
    Search {
        query: String,

        /// Number of results (defaults to `retrieval.k`).
        #[arg(long)]
        k: Option<usize>,

        /// Restrict to a document by filename. Repeatable.
        #[arg(long = "doc")]
        docs: Vec<String>,
    },

    /// Ask a question about the documents.
    Ask {
        question: String,

        /// Restrict to a document by filename. Repeatable.
        #[arg(long = "doc")]
        docs: Vec<String>,
    },

    /// Remove all documents and the vector index.
    Clear,

    /// Remove the persisted vector index. It is rebuilt on next use.
    ClearCache,

    /// Manage chat history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Vote on the most recent answer.
    Feedback { vote: VoteArg },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Print all question/answer exchanges.
    Show,
    /// Write history to `chat_log_<timestamp>.json` under the base directory.
    Export,
    /// Delete all history.
    Clear,
    /// Delete one exchange by its number (as shown by `history show`).
    Delete { index: usize },
}

#[derive(Clone, Copy, ValueEnum)]
enum VoteArg {
    Up,
    Down,
}

impl From<VoteArg> for Vote {
    fn from(v: VoteArg) -> Self {
        match v {
            VoteArg::Up => Vote::Positive,
            VoteArg::Down => Vote::Negative,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn load(path: &std::path::Path) -> anyhow::Result<Config> {
    if !path.exists() && path.as_os_str() == DEFAULT_CONFIG {
        tracing::debug!("no config file at {}, using defaults", DEFAULT_CONFIG);
        return Ok(Config::default());
    }
    config::load_config(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg)?,
        Commands::Ingest { paths } => commands::run_ingest(&cfg, &paths).await?,
        Commands::Docs => commands::run_docs(&cfg)?,
        Commands::Search { query, k, docs } => {
            commands::run_search(&cfg, &query, k, &docs).await?
        }
        Commands::Ask { question, docs } => commands::run_ask(&cfg, &question, &docs).await?,
        Commands::Clear => commands::run_clear(&cfg).await?,
        Commands::ClearCache => commands::run_clear_cache(&cfg).await?,
        Commands::History { action } => match action {
            HistoryAction::Show => commands::run_history_show(&cfg)?,
            HistoryAction::Export => commands::run_history_export(&cfg)?,
            HistoryAction::Clear => commands::run_history_clear(&cfg)?,
            HistoryAction::Delete { index } => commands::run_history_delete(&cfg, index)?,
        },
        Commands::Feedback { vote } => commands::run_feedback(&cfg, vote.into())?,
    }

    Ok(())
}
