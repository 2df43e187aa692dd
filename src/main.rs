//! # Support chatbot CLI (`supportbot`)
//!
//! ## Usage
//!
//! ```bash
//! supportbot --config ./config/supportbot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `supportbot init` | Create the SQLite database and run schema migrations |
//! | `supportbot ingest` | Chunk and embed the corpus into the vector store |
//! | `supportbot chat` | Start an interactive support session |
//! | `supportbot ask "<question>"` | Answer a single question |
//! | `supportbot search "<query>"` | Show the chunks a query retrieves |
//! | `supportbot stats` | Show knowledge base statistics |
//! | `supportbot completions <shell>` | Print shell completions |

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use support_rag::chatbot::{Chatbot, TurnReply};
use support_rag::config::{self, Config};
use support_rag::{ingest, migrate, stats};
use support_rag_core::prompt::TurnClass;

/// A retrieval-augmented customer support chatbot restricted to one domain.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/supportbot.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "supportbot", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/supportbot.toml")]
    config: PathBuf,

    /// Log pipeline stages at debug level. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Chunk and embed every document under `[corpus].root`.
    ///
    /// Unchanged chunks already embedded with the configured model are
    /// skipped, so re-running on the same corpus makes no embedding calls.
    Ingest {
        /// Re-embed every chunk regardless of stored hashes.
        #[arg(long)]
        full: bool,
    },

    /// Start an interactive support session.
    ///
    /// Type `exit` or `quit` (or send EOF) to leave.
    Chat {
        /// Print the source documents each answer was grounded on.
        #[arg(long)]
        sources: bool,
    },

    /// Answer a single question and exit.
    Ask {
        question: String,

        /// Print the source documents the answer was grounded on.
        #[arg(long)]
        sources: bool,
    },

    /// Show the ranked chunks a query retrieves, without generating.
    Search {
        query: String,

        /// Maximum number of results (defaults to `[retrieval].max_results`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show knowledge base statistics.
    Stats,

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "supportbot", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest { full } => {
            let report = ingest::run_ingest(&cfg, full).await?;
            if !report.is_complete() {
                std::process::exit(2);
            }
        }
        Commands::Chat { sources } => run_chat(&cfg, sources).await?,
        Commands::Ask { question, sources } => {
            let bot = Chatbot::from_config(&cfg).await?;
            let mut session = bot.start_session();
            match bot.submit_turn(&mut session, &question).await {
                Ok(reply) => print_reply(&reply, sources),
                Err(err) => {
                    println!("{}", err.message);
                    eprintln!("error: {}", err.error);
                    std::process::exit(1);
                }
            }
        }
        Commands::Search { query, limit } => run_search(&cfg, &query, limit).await?,
        Commands::Stats => stats::run_stats(&cfg).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn run_chat(cfg: &Config, show_sources: bool) -> Result<()> {
    let bot = Chatbot::from_config(cfg).await?;
    let mut session = bot.start_session();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", cfg.domain.greeting_reply);
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            println!("{}", cfg.domain.farewell_reply);
            break;
        }

        match bot.submit_turn(&mut session, line).await {
            Ok(reply) => print_reply(&reply, show_sources),
            Err(err) => println!("{}", err.message),
        }
    }

    Ok(())
}

fn print_reply(reply: &TurnReply, show_sources: bool) {
    println!("{}", reply.text);
    if show_sources && reply.class == TurnClass::Domain && !reply.sources.is_empty() {
        println!("  sources: {}", reply.sources.join(", "));
    }
}

async fn run_search(cfg: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let bot = Chatbot::from_config(cfg).await?;
    let mut result = bot.search(query).await?;
    if let Some(limit) = limit {
        result.hits.truncate(limit);
    }

    if result.is_empty() {
        println!("No results. Run `supportbot ingest` to load the knowledge base.");
        return Ok(());
    }

    let min_similarity = bot.settings().min_similarity;
    for (i, hit) in result.hits.iter().enumerate() {
        let marker = if hit.score >= min_similarity { "" } else { "  (below threshold)" };
        println!(
            "{}. [{:.3}] {}#{}{}",
            i + 1,
            hit.score,
            hit.chunk.source_document,
            hit.chunk.chunk_index,
            marker
        );
        let snippet: String = hit.chunk.text.chars().take(160).collect();
        println!("    {}", snippet.replace('\n', " "));
    }

    Ok(())
}
