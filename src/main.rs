//! # sqlchat CLI
//!
//! The `sqlchat` binary builds the retrieval index, runs the HTTP server,
//! and exposes single chat turns and the SQL helpers from the terminal.
//!
//! ## Usage
//!
//! ```bash
//! sqlchat --config ./config/sqlchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sqlchat serve` | Start the HTTP server |
//! | `sqlchat index build` | Build and persist the retrieval index |
//! | `sqlchat index status` | Show index files and manifest |
//! | `sqlchat ask "<message>"` | Run one chat turn |
//! | `sqlchat format` | Vertically format SQL read from stdin |
//! | `sqlchat classify "<message>"` | Print the rule-based intent |
//!
//! Logs go to stderr and honour `RUST_LOG` (default `sqlchat=info`).

use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sqlchat::app::AppContext;
use sqlchat::chat::ChatService;
use sqlchat::config;
use sqlchat::format::vertical_format_sql;
use sqlchat::index_cmd;
use sqlchat::intent::{clarification_questions, classify_intent_rules};
use sqlchat::models::QueryRequest;
use sqlchat::progress::ProgressMode;
use sqlchat::rules::load_rules;
use sqlchat::server;

/// sqlchat: natural-language to SQL over a known schema.
///
/// Commands that touch the corpus, index or models read a TOML
/// configuration file given by `--config`.
#[derive(Parser)]
#[command(
    name = "sqlchat",
    about = "Retrieval-augmented natural-language to SQL chatbot",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sqlchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind`. With `[server].sealed = true` (the default)
    /// every `/query` answers ACCESS DENIED without calling a model.
    Serve,

    /// Manage the retrieval index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Run one chat turn and print the answer.
    ///
    /// Honours `[server].sealed`; set `SQLCHAT_SEALED=0` to run the pipeline.
    Ask {
        /// The natural-language request.
        message: String,

        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,
    },

    /// Vertically format SQL read from stdin.
    Format,

    /// Classify a message with the keyword rules and print any
    /// clarification questions. Makes no model calls.
    Classify {
        message: String,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Load the corpus, chunk, embed and persist the index.
    ///
    /// Replaces any existing index in `[corpus].index_dir`.
    Build {
        /// Progress output: `off`, `human` or `json`. Defaults to `human`
        /// on a terminal and `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show which index files exist and the build manifest.
    Status,
}

/// Initialize tracing subscriber with environment filter
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sqlchat=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Commands that don't require config
    match &cli.command {
        Commands::Format => {
            let mut sql = String::new();
            std::io::stdin().read_to_string(&mut sql)?;
            println!("{}", vertical_format_sql(sql.trim()));
            return Ok(());
        }
        Commands::Classify { message } => {
            let rules = config::load_config(&cli.config)
                .map(|c| load_rules(&c.rules.path))
                .unwrap_or_default();
            println!("{}", classify_intent_rules(message));
            if let Some(questions) = clarification_questions(message, &rules.clarifications) {
                println!("clarify: {}", questions);
            }
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let ctx = AppContext::initialize(cfg);
            server::run_server(Arc::new(ctx)).await?;
        }
        Commands::Index { action } => match action {
            IndexAction::Build { progress } => {
                let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
                let reporter = mode.reporter();
                index_cmd::run_index_build(&cfg, reporter.as_ref()).await?;
            }
            IndexAction::Status => {
                index_cmd::run_index_status(&cfg)?;
            }
        },
        Commands::Ask { message, session } => {
            let service = ChatService::new(Arc::new(AppContext::initialize(cfg)));
            let turn = service
                .handle(QueryRequest {
                    message,
                    session_id: session,
                })
                .await?;

            if let Some(intent) = turn.intent {
                println!("intent: {}", intent);
            }
            if let Some(questions) = &turn.clarification {
                println!("clarify: {}", questions);
            }
            if !turn.response.sql_query.is_empty() {
                println!("\n{}\n", turn.response.sql_query);
            }
            println!("{}", turn.response.explanation);
            if let Some(outcome) = &turn.outcome {
                let stages: Vec<String> = outcome
                    .stages
                    .iter()
                    .map(|s| format!("{:?}", s).to_lowercase())
                    .collect();
                println!(
                    "\nstages: {} ({} model calls{})",
                    stages.join(" → "),
                    outcome.external_calls,
                    if outcome.degraded { ", degraded" } else { "" }
                );
                for finding in &outcome.lint {
                    println!("lint: {}", finding);
                }
            }
            println!("session: {}", turn.response.session_id);
        }
        Commands::Format | Commands::Classify { .. } => unreachable!(),
    }

    Ok(())
}
