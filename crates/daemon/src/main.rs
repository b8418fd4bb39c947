//! tracksync daemon entry point.
//!
//! Loads configuration, initializes the mapping store and both remote
//! clients, runs the sync scheduler, and handles graceful shutdown.

mod scheduler;
mod signals;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use tracksync_core::config::AppConfig;
use tracksync_core::db::Database;
use tracksync_core::provision::RepositoryMappingCache;
use tracksync_core::remote::clients_from_config;
use tracksync_core::sync_engine::{CancelToken, SyncEngine};

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// tracksync synchronization daemon.
#[derive(Parser, Debug)]
#[command(
    name = "tracksync-daemon",
    version,
    about = "Mirror Gitea issues and pull requests into Kimai activities"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Run a single sync pass and exit; the exit code reflects failures.
    #[arg(long)]
    once: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load and resolve configuration
    let config =
        AppConfig::load_and_resolve(&args.config).context("failed to load configuration")?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());
    let _log_guard = init_tracing(&log_level, config.daemon.log_dir.as_deref())?;

    // Startup banner
    info!("========================================");
    info!("  tracksync daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Gitea         : {} ({})", config.gitea.url, config.gitea.organization);
    info!("Kimai         : {}", config.kimai.url);
    info!("Poll interval : {}s", config.daemon.poll_interval_secs);
    info!("Workers       : {}", config.sync.workers);
    info!("Policy        : {}", config.sync.conflict_policy);
    info!("Data dir      : {}", config.daemon.data_dir.display());
    info!("Log level     : {}", log_level);
    info!("========================================");

    // Initialize database
    let db_path = config.database_path();
    let db = Database::new(&db_path).context("failed to open database")?;
    db.initialize()
        .context("failed to initialize database schema")?;
    let db = Arc::new(db);
    info!("Database initialized at {}", db_path.display());

    // Initialize remote clients
    let (gitea, kimai) =
        clients_from_config(&config).context("failed to initialize remote clients")?;

    let cache = Arc::new(
        RepositoryMappingCache::load(&db).context("failed to load repository mappings")?,
    );
    if cache.is_empty() {
        info!("no repository mappings yet, projects are provisioned on the first run");
    } else {
        info!(mappings = cache.len(), "repository mapping cache loaded");
    }

    let engine = Arc::new(
        SyncEngine::new(db, Arc::new(gitea), Arc::new(kimai), cache)
            .with_page_size(config.gitea.page_size),
    );
    info!("Sync engine initialized");

    let cancel = CancelToken::new();
    let (trigger_tx, trigger_rx) = tokio::sync::mpsc::channel::<()>(1);
    let mut sched = scheduler::Scheduler::new(
        engine,
        config.sync.clone(),
        Duration::from_secs(config.daemon.poll_interval_secs),
        trigger_rx,
        cancel.clone(),
    );

    if args.once {
        let outcome = sched.run_once("once").await;
        return Ok(match outcome {
            Ok(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?);
                if report.has_failures() {
                    ExitCode::from(2)
                } else {
                    ExitCode::SUCCESS
                }
            }
            Err(e) => {
                eprintln!("sync failed: {}", e);
                ExitCode::FAILURE
            }
        });
    }

    signals::spawn_trigger_listener(trigger_tx);

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let scheduler_shutdown = shutdown.clone();
    let scheduler_handle = tokio::spawn(async move {
        sched.run(scheduler_shutdown).await;
    });

    // Wait for shutdown signal
    signals::wait_for_shutdown().await;

    info!("Shutdown signal received, stopping...");

    // Stop the active run between batches, then the scheduler loop.
    cancel.cancel();
    shutdown.notify_one();

    match tokio::time::timeout(Duration::from_secs(30), scheduler_handle).await {
        Ok(Ok(())) => info!("scheduler stopped gracefully"),
        Ok(Err(e)) => warn!("scheduler task error: {}", e),
        Err(_) => warn!("scheduler did not stop within 30s, forcing shutdown"),
    }

    info!("tracksync daemon stopped.");
    Ok(ExitCode::SUCCESS)
}

/// Install the global subscriber. With a log directory, output goes to a
/// daily-rolling file and the returned guard must be kept alive.
fn init_tracing(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "tracksync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .init();
            Ok(None)
        }
    }
}
