use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use meetrelay::adapters::{start_api_server, ScheduleClient, SqliteStore};
use meetrelay::agent::{
    create_agent_router, load_or_create_api_key, AgentRunner, AgentServerState, CommandExecutor,
    DryRunDriver, HostInfo, HostOs, InputDriver, SystemDriver,
};
use meetrelay::api::AppState;
use meetrelay::cli::output::{print_item, print_items, AgentRow, MeetingRow, OutputMode};
use meetrelay::cli::{Cli, Commands};
use meetrelay::config::{AgentConfig, AppConfig};
use meetrelay::dispatch::{AgentRegistry, CommandQueue};
use meetrelay::domain::{Action, MeetingStatus};
use meetrelay::sync::{ExpiryScanner, MeetingStore, Reconciler};

mod main_runtime;

use main_runtime::{init_logging, shutdown_signal};

/// Upper bound for background tasks to wind down after the server stops
const SHUTDOWN_GRACE_SECS: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let mut config = load_config(&cli.config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            let _guard = init_logging(&config.logging);
            run_server(config).await
        }
        Commands::Agent { dry_run } => {
            let mut config = AgentConfig::load_from(&cli.config)
                .context("failed to load agent configuration")?;
            config.dry_run |= dry_run;
            let _guard = init_logging(&config.logging);
            run_agent(config).await
        }
        Commands::Sync => {
            let config = load_config(&cli.config)?;
            let _guard = init_logging(&config.logging);
            let store = open_store(&config).await?;
            let client = ScheduleClient::new(&config.upstream)?;
            let reconciler = Reconciler::new(
                Arc::new(client),
                MeetingStore::new(store),
                config.sync.clone(),
            );
            let stats = reconciler.sync_now().await;
            print_item(&stats)?;
            if stats.errors > 0 {
                anyhow::bail!("reconciliation finished with {} error(s)", stats.errors);
            }
            Ok(())
        }
        Commands::Expire => {
            let config = load_config(&cli.config)?;
            init_logging_simple();
            let store = open_store(&config).await?;
            let expired = ExpiryScanner::new(MeetingStore::new(store))
                .expire(Utc::now())
                .await?;
            println!("expired {expired} meeting(s)");
            Ok(())
        }
        Commands::Agents { json } => {
            let config = load_config(&cli.config)?;
            init_logging_simple();
            let store = open_store(&config).await?;
            let agents = AgentRegistry::new(store).list().await?;
            let rows: Vec<AgentRow> = agents.iter().map(AgentRow::from).collect();
            print_items(&rows, OutputMode::from_json_flag(json))
        }
        Commands::Meetings { status, json } => {
            let config = load_config(&cli.config)?;
            init_logging_simple();
            let status = status
                .as_deref()
                .map(str::parse::<MeetingStatus>)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let store = open_store(&config).await?;
            let meetings = MeetingStore::new(store).list(status, 1000).await?;
            let rows: Vec<MeetingRow> = meetings.iter().map(MeetingRow::from).collect();
            print_items(&rows, OutputMode::from_json_flag(json))
        }
        Commands::Enqueue {
            agent_id,
            action,
            payload,
        } => {
            let config = load_config(&cli.config)?;
            init_logging_simple();
            let action: Action = action.parse().map_err(anyhow::Error::msg)?;
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("payload must be valid JSON")?;
            let store = open_store(&config).await?;
            let command_id = CommandQueue::new(store)
                .enqueue(agent_id, action, &payload, Utc::now())
                .await?;
            println!("queued command {command_id} ({action}) for agent {agent_id}");
            Ok(())
        }
    }
}

fn load_config(dir: &str) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load_from(dir).context("failed to load configuration")?;
    if let Err(errors) = config.validate() {
        anyhow::bail!("invalid configuration:\n  {}", errors.join("\n  "));
    }
    Ok(config)
}

fn init_logging_simple() {
    // Minimal logging for CLI commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn open_store(config: &AppConfig) -> anyhow::Result<SqliteStore> {
    let store = SqliteStore::new(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;
    store.migrate().await?;
    Ok(store)
}

/// Broadcast ctrl-c/SIGTERM to every receiver of the returned channel
fn spawn_shutdown_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}

async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting meetrelay server v{}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config).await?;
    let source = ScheduleClient::new(&config.upstream)?;
    let state = AppState::new(store, &config, Arc::new(source));

    let shutdown = spawn_shutdown_listener();

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(state.sweeper.clone().run(shutdown.clone())));
    if config.sync.enabled {
        tasks.push(tokio::spawn(state.reconciler.clone().run(shutdown.clone())));
    } else {
        warn!("Scheduled reconciliation disabled; use POST /admin/sync or `meetrelay sync`");
    }
    if config.server.admin_token.is_none() {
        warn!("No admin token configured, /admin routes are open");
    }

    let mut server_shutdown = shutdown.clone();
    start_api_server(state, &config.server.bind, config.server.port, async move {
        let _ = server_shutdown.changed().await;
    })
    .await?;

    let drain = futures::future::join_all(tasks);
    if tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), drain)
        .await
        .is_err()
    {
        warn!("Background tasks did not stop within {}s", SHUTDOWN_GRACE_SECS);
    }

    info!("Shutdown complete");
    Ok(())
}

async fn run_agent(mut config: AgentConfig) -> anyhow::Result<()> {
    info!("Starting meetrelay agent v{}", env!("CARGO_PKG_VERSION"));

    // the local surface and the server must agree on one key
    let api_key = match config.api_key.clone() {
        Some(key) => key,
        None => {
            let path = Path::new(&config.key_file);
            let (key, created) = load_or_create_api_key(path)?;
            if created {
                info!(path = %path.display(), "Generated agent api key");
            } else {
                info!(path = %path.display(), "Loaded agent api key");
            }
            config.api_key = Some(key.clone());
            key
        }
    };

    let os = HostOs::current();
    let driver: Arc<dyn InputDriver> = if config.dry_run {
        info!("Dry run: input is logged, not sent");
        Arc::new(DryRunDriver)
    } else {
        Arc::new(SystemDriver::new(os))
    };
    let executor = CommandExecutor::new(driver, os);
    let host = HostInfo::detect(os.as_str());

    let shutdown = spawn_shutdown_listener();

    let local_state = AgentServerState {
        executor: executor.clone(),
        api_key: Some(Arc::from(api_key)),
        info: Arc::new(host.clone()),
    };
    let listener = TcpListener::bind(("0.0.0.0", config.listen_port))
        .await
        .with_context(|| format!("failed to bind local port {}", config.listen_port))?;
    info!("Local command surface on http://0.0.0.0:{}", config.listen_port);

    let mut local_shutdown = shutdown.clone();
    let local = tokio::spawn(async move {
        axum::serve(listener, create_agent_router(local_state))
            .with_graceful_shutdown(async move {
                let _ = local_shutdown.changed().await;
            })
            .await
    });

    AgentRunner::new(config, executor, host)?.run(shutdown).await;

    local.await??;
    Ok(())
}
