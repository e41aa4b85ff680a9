use anyhow::{anyhow, Context, Result};
use clap::Parser;
use roster_agent::session::{ConversationStore, ConversationStoreRef, InMemoryConversationStore};
use roster_agent::{
    http_server, AgentExecutor, AgentSettings, PromptComposer, QueryService, ToolSet, ToolSettings,
    TOOL_CATALOG,
};
use roster_core::config::RosterConfig;
use roster_core::{create_completion_engine, wait_until_ready};
use roster_db::{bootstrap, Database, DatabaseRef, SqliteDatabase};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How often idle conversations are swept from memory
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

// Define command-line arguments using clap
#[derive(Parser, Debug)]
#[clap(
    name = "roster-daemon",
    about = "Answers natural-language questions about the employee roster",
    version
)]
struct Args {
    #[clap(short, long, env = "ROSTER_CONFIG")]
    /// Path to the configuration file
    config: Option<PathBuf>,

    #[clap(long, env = "ROSTER_HTTP_ADDR")]
    /// Address the HTTP server listens on
    http_addr: Option<SocketAddr>,

    #[clap(long, env = "ROSTER_DATABASE")]
    /// Path to the SQLite roster database
    database: Option<PathBuf>,

    #[clap(long, env = "ROSTER_MODEL")]
    /// Model name passed to the completion engine
    model: Option<String>,

    #[clap(long, env = "ROSTER_ENGINE_URL")]
    /// Base URL of the completion engine
    engine_url: Option<String>,

    #[clap(long, env = "ROSTER_PROVIDER")]
    /// Completion provider (ollama, openai)
    provider: Option<String>,

    #[clap(long, env = "ROSTER_LOG_LEVEL", default_value = "info")]
    /// Log level (trace, debug, info, warn, error)
    log_level: String,

    #[clap(long)]
    /// Skip creating and verifying the employees table at startup
    no_init_db: bool,
}

fn apply_overrides(config: &mut RosterConfig, args: &Args) {
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr.to_string();
    }
    if let Some(path) = &args.database {
        config.database.path = path.clone();
    }
    if let Some(model) = &args.model {
        config.completion.model = model.clone();
    }
    if let Some(url) = &args.engine_url {
        config.completion.base_url = url.clone();
    }
    if let Some(provider) = &args.provider {
        config.completion.provider = provider.clone();
    }
    if args.no_init_db {
        config.database.initialize = false;
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if config.completion.api_key.is_none() {
            config.completion.api_key = Some(key);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing (logging)
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .init();

    info!("Starting roster query daemon...");

    // Load config from file or use defaults
    let mut config = match &args.config {
        Some(path) => RosterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RosterConfig::load_from_default().context("Failed to load configuration")?,
    };
    apply_overrides(&mut config, &args);

    let http_addr: SocketAddr = config
        .server
        .http_addr
        .parse()
        .with_context(|| format!("Invalid HTTP address '{}'", config.server.http_addr))?;

    // Database
    if config.database.initialize {
        let columns = bootstrap::initialize(&config.database.path)
            .await
            .with_context(|| {
                format!(
                    "Failed to initialize database at {}",
                    config.database.path.display()
                )
            })?;
        info!(columns = columns.len(), "Employees table ready");
    }

    let database: DatabaseRef = Arc::new(SqliteDatabase::from_config(&config.database));
    let tables = database
        .list_tables()
        .await
        .with_context(|| format!("Error connecting to database {}", config.database.path.display()))?;
    if tables.is_empty() {
        warn!(path = %config.database.path.display(), "No tables found in database");
    } else {
        info!(tables = ?tables, "Connected to database");
    }

    // Completion engine
    let engine = create_completion_engine(&config.completion)
        .context("Failed to initialize completion engine")?;
    if let Err(e) = wait_until_ready(
        engine.as_ref(),
        config.completion.startup_probe_attempts,
        config.completion.startup_probe_interval(),
    )
    .await
    {
        error!(error = %e, base_url = %config.completion.base_url, "Completion engine unreachable");
        return Err(anyhow!(
            "Completion engine at {} is unreachable after {} attempts: {}",
            config.completion.base_url,
            config.completion.startup_probe_attempts,
            e
        ));
    }

    // Conversation memory
    let memory: ConversationStoreRef =
        Arc::new(InMemoryConversationStore::from_config(&config.memory));
    let cleanup_task = config.memory.idle_ttl().map(|ttl| {
        info!(ttl_secs = ttl.as_secs(), "Starting conversation cleanup task");
        let memory = memory.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = memory.cleanup_expired().await {
                    error!(error = %e, "Conversation cleanup failed");
                }
            }
        })
    });

    // Query service
    let tools = ToolSet::new(
        database,
        ToolSettings::new(&config.agent, &config.database),
    );
    let composer = PromptComposer::new(TOOL_CATALOG, config.agent.history_window);
    let executor = AgentExecutor::new(
        engine,
        tools,
        composer,
        AgentSettings::from_config(&config.agent),
    );
    let service = QueryService::new(executor, memory);

    tokio::select! {
        result = http_server::run_server(service, http_addr) => {
            if let Err(e) = &result {
                error!(error = %e, "HTTP server failed");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    if let Some(task) = cleanup_task {
        task.abort();
    }

    info!("Roster query daemon shutting down");
    Ok(())
}
