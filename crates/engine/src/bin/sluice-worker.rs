//! sluice-worker — runs the trigger dispatcher against PostgreSQL.
//!
//! Subcommands:
//! - `run` — apply migrations and dispatch until Ctrl-C
//! - `apply --file triggers.yaml` — create triggers from a manifest
//! - `activate <id>` / `pause <id>`
//! - `executions <id>` — print recent executions as JSON

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use sluice_connector::{ImapMailClient, PgSqlExecutor};
use sluice_core::config::{load_dotenv, Config};
use sluice_engine::{
    Dispatcher, DispatcherConfig, HttpJobExecutor, JobDispatcher, PollerRegistry, TriggerManifest,
    TriggerService,
};
use sluice_storage::{PgCredentials, PgStore, TriggerStore};

// ── CLI ─────────────────────────────────────────────────────────────

/// Trigger scheduling and rule evaluation worker.
#[derive(Parser, Debug)]
#[command(name = "sluice-worker", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dispatcher until interrupted.
    Run {
        /// Seconds between dispatch ticks (overrides DISPATCH_TICK_SECS).
        #[arg(long)]
        tick_secs: Option<u64>,

        /// Concurrent poll cycles (overrides DISPATCH_MAX_WORKERS).
        #[arg(long)]
        max_workers: Option<usize>,

        /// Seconds to wait for in-flight cycles on shutdown.
        #[arg(long, env = "SLUICE_SHUTDOWN_TIMEOUT", default_value_t = 30)]
        shutdown_timeout: u64,
    },
    /// Create triggers, rules and job links from a YAML manifest.
    Apply {
        #[arg(long, short)]
        file: String,
    },
    /// Activate a trigger (baselines new database/email triggers).
    Activate { id: Uuid },
    /// Pause a trigger.
    Pause { id: Uuid },
    /// Print recent executions as JSON.
    Executions {
        id: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
}

// ── Wiring ──────────────────────────────────────────────────────────

struct App {
    config: Config,
    store: Arc<dyn TriggerStore>,
    pollers: Arc<PollerRegistry>,
}

impl App {
    async fn connect(config: Config) -> anyhow::Result<Self> {
        let pool = sluice_storage::db::connect(&config.postgres)
            .await
            .context("failed to connect to the trigger store")?;

        let store: Arc<dyn TriggerStore> = Arc::new(PgStore::new(pool.clone()));
        let credentials = Arc::new(PgCredentials::new(pool));
        let sql = Arc::new(PgSqlExecutor::new(config.dispatcher.source_timeout()));
        let pollers = PollerRegistry::standard(credentials, sql, Arc::new(ImapMailClient::new()));

        Ok(Self {
            config,
            store,
            pollers: Arc::new(pollers),
        })
    }

    fn service(&self) -> TriggerService {
        TriggerService::new(
            Arc::clone(&self.store),
            Arc::clone(&self.pollers),
            self.config.dispatcher.source_timeout(),
        )
    }
}

async fn run(
    app: App,
    tick_secs: Option<u64>,
    max_workers: Option<usize>,
    shutdown_timeout: u64,
) -> anyhow::Result<()> {
    let mut settings = app.config.dispatcher.clone();
    if let Some(tick) = tick_secs {
        settings.tick_secs = tick;
    }
    if let Some(workers) = max_workers {
        settings.max_workers = workers;
    }

    let executor = HttpJobExecutor::new(&app.config.jobs).context("failed to build job client")?;
    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherConfig::from(&settings),
        Arc::clone(&app.store),
        Arc::clone(&app.pollers),
        JobDispatcher::new(Arc::new(executor)),
    ));

    let loop_handle = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.run().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("interrupt received");

    dispatcher.shutdown();
    loop_handle.await.context("dispatcher loop failed")?;

    if !dispatcher.drain(Duration::from_secs(shutdown_timeout)).await {
        warn!(
            in_flight = dispatcher.in_flight().len(),
            "shutdown timeout reached with cycles still running"
        );
    }
    info!(stats = ?dispatcher.stats(), "sluice-worker stopped");
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let app = App::connect(config).await?;

    match cli.command {
        Command::Run {
            tick_secs,
            max_workers,
            shutdown_timeout,
        } => run(app, tick_secs, max_workers, shutdown_timeout).await?,
        Command::Apply { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read manifest {file}"))?;
            let manifest = TriggerManifest::from_yaml(&text)?;
            let applied = manifest.apply(&app.service()).await?;
            info!(count = applied.len(), file = %file, "manifest applied");
        }
        Command::Activate { id } => {
            let trigger = app.service().activate(id).await?;
            info!(trigger_id = %id, progress = ?trigger.progress(), "activated");
        }
        Command::Pause { id } => {
            app.service().pause(id).await?;
            info!(trigger_id = %id, "paused");
        }
        Command::Executions { id, limit, offset } => {
            let executions = app.service().recent_executions(id, limit, offset).await?;
            println!("{}", serde_json::to_string_pretty(&executions)?);
        }
    }

    Ok(())
}
