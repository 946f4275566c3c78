//! CLI entrypoint and subcommand orchestration.

mod backends;
mod config;
#[cfg(test)]
mod test_support;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent::{MessageIndex, SqliteConversationStore, ToolCallOrchestrator};
use anyhow::Context;
use clap::{Parser, Subcommand};
use proto::{ChatMessage, SessionId, ToolCall, ToolDescriptor};
use search::{SearchEngine, chunk_text};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::backends::Backends;
use crate::config::Config;

/// Top-level command-line arguments for toolmesh.
#[derive(Parser)]
#[command(name = "toolmesh")]
#[command(about = "Unified tool invocation and keyword search", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug logging to ~/.toolmesh/logs/debug.log
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the merged tool catalog
    Tools,

    /// Dispatch a single tool call and print the JSON-RPC response
    Call {
        /// Tool name
        name: String,

        /// Arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,
    },

    /// Index files into a store, then run a keyword query against it
    Search {
        #[arg(long)]
        store: String,

        #[arg(short, long)]
        query: String,

        #[arg(long)]
        top_n: Option<usize>,

        #[arg(long)]
        threshold: Option<f32>,

        /// Files to chunk and index before searching
        files: Vec<PathBuf>,
    },

    /// Keyword search over the stored messages of one session
    Messages {
        #[arg(short, long)]
        session: String,

        #[arg(short, long)]
        query: String,

        #[arg(long)]
        top_n: Option<usize>,

        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Load a transcript into a session and resolve its pending tool calls
    Resolve {
        #[arg(short, long)]
        session: String,

        /// JSON array of conversation messages
        #[arg(short, long)]
        transcript: PathBuf,
    },
}

impl Commands {
    fn label(&self) -> &'static str {
        match self {
            Commands::Tools => "tools",
            Commands::Call { .. } => "call",
            Commands::Search { .. } => "search",
            Commands::Messages { .. } => "messages",
            Commands::Resolve { .. } => "resolve",
        }
    }
}

#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // With --debug, debug-level logs also go to ~/.toolmesh/logs/debug.YYYY-MM-DD.log.
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>;

    let debug_writer = if cli.debug {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let log_dir = PathBuf::from(home).join(".toolmesh").join("logs");
        std::fs::create_dir_all(&log_dir).ok();
        let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        _file_guard = Some(guard);
        Some(writer)
    } else {
        _file_guard = None;
        None
    };

    match debug_writer {
        Some(writer) => {
            let console = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter);
            let file = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug,hyper_util=info,reqwest=info,sqlx=info"));
            tracing_subscriber::registry()
                .with(console)
                .with(file)
                .init();
        }
        None => {
            fmt()
                .with_env_filter(console_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }

    if cli.debug {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            command = cli.command.label(),
            log_level = %cli.log_level,
            "========== toolmesh session start =========="
        );
    }

    let config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Failed to load config ({e}), using defaults");
        Config::default()
    });

    let backends = Backends::build(&config).await?;
    let outcome = match cli.command {
        Commands::Tools => cmd_tools(&backends),
        Commands::Call { name, args } => cmd_call(&backends, name, args).await,
        Commands::Search {
            store,
            query,
            top_n,
            threshold,
            files,
        } => cmd_search(&backends, &config, &store, &query, top_n, threshold, &files).await,
        Commands::Messages {
            session,
            query,
            top_n,
            threshold,
        } => cmd_messages(&config, session, &query, top_n, threshold).await,
        Commands::Resolve {
            session,
            transcript,
        } => cmd_resolve(&backends, &config, session, &transcript).await,
    };
    backends.shutdown().await;
    outcome
}

/// Prints the merged catalog, one tool per line.
fn cmd_tools(backends: &Backends) -> anyhow::Result<()> {
    print!("{}", render_catalog(&backends.router.tools()));
    Ok(())
}

async fn cmd_call(backends: &Backends, name: String, args: Option<String>) -> anyhow::Result<()> {
    let call = ToolCall::new(
        uuid::Uuid::new_v4().to_string(),
        name,
        args.unwrap_or_default(),
    );
    let result = backends.router.dispatch(&call).await;
    println!("{}", serde_json::to_string_pretty(&result.to_response())?);
    Ok(())
}

async fn cmd_search(
    backends: &Backends,
    config: &Config,
    store: &str,
    query: &str,
    top_n: Option<usize>,
    threshold: Option<f32>,
    files: &[PathBuf],
) -> anyhow::Result<()> {
    for path in files {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let chunks = chunk_text(&path.display().to_string(), &text, config.search.lines_per_chunk);
        let total = backends.engine.add_to_index(store, chunks)?;
        info!(store, file = %path.display(), total, "Indexed file");
    }

    let results = backends
        .engine
        .search(store, query, config.search.search_options(top_n, threshold))?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

async fn cmd_messages(
    config: &Config,
    session: String,
    query: &str,
    top_n: Option<usize>,
    threshold: Option<f32>,
) -> anyhow::Result<()> {
    let session = SessionId::from(session);
    let store = Arc::new(SqliteConversationStore::open(&config.database.url).await?);
    let engine = Arc::new(SearchEngine::new(
        config.search.bm25_params(),
        config.search.max_chunks_per_store,
    ));
    let index = MessageIndex::new(store, engine);

    let hits = index
        .search(&session, query, config.search.search_options(top_n, threshold))
        .await?;
    info!(session_id = %session, hits = hits.len(), "Message search completed");
    println!("{}", serde_json::to_string_pretty(&hits)?);
    Ok(())
}

async fn cmd_resolve(
    backends: &Backends,
    config: &Config,
    session: String,
    transcript: &Path,
) -> anyhow::Result<()> {
    let session = SessionId::from(session);
    let messages = load_transcript(transcript, &session)?;

    let store = Arc::new(SqliteConversationStore::open(&config.database.url).await?);
    for message in &messages {
        store.save_message(message).await?;
    }

    let orchestrator = ToolCallOrchestrator::new(
        Arc::clone(&backends.router),
        store,
        config.orchestrator.options(),
    );
    let appended = orchestrator.process_session(&session).await?;
    if appended.is_empty() {
        info!(session_id = %session, "No pending tool calls");
    }
    println!("{}", serde_json::to_string_pretty(&appended)?);
    Ok(())
}

/// Reads a JSON array of messages and assigns them all to `session`.
fn load_transcript(path: &Path, session: &SessionId) -> anyhow::Result<Vec<ChatMessage>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading transcript {}", path.display()))?;
    let mut messages: Vec<ChatMessage> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing transcript {}", path.display()))?;
    for message in &mut messages {
        message.session_id = session.clone();
    }
    Ok(messages)
}

fn render_catalog(tools: &[ToolDescriptor]) -> String {
    let width = tools.iter().map(|t| t.name.len()).max().unwrap_or(0);
    tools
        .iter()
        .map(|t| {
            let backend = t.backend.map(|b| b.to_string()).unwrap_or_default();
            format!("{:<width$}  {:<6}  {}\n", t.name, backend, t.description)
        })
        .collect()
}
