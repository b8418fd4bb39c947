//! tracksync command-line tool.
//!
//! Provides subcommands for running a sync pass (or a dry run), inspecting
//! status and mappings, reviewing conflicts queued under the `manual`
//! policy, viewing the audit log, and generating / validating configuration
//! files.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use tracksync_core::config::{AppConfig, ConflictPolicy};
use tracksync_core::conflict::{ConflictReview, SyncAction};
use tracksync_core::db::Database;
use tracksync_core::models::ActivityFields;
use tracksync_core::provision::RepositoryMappingCache;
use tracksync_core::remote::clients_from_config;
use tracksync_core::sync_engine::{CancelToken, SyncEngine, SyncReport, LAST_SYNC_KEY};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// tracksync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "tracksync",
    version,
    about = "Mirror Gitea issues and pull requests into Kimai activities"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/tracksync/config.toml"
    )]
    config: PathBuf,

    /// Log progress to stderr (repeat for debug output).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one sync pass.
    Sync {
        /// Compute and show the planned operations without applying them.
        #[arg(long)]
        dry_run: bool,

        /// Only sync these repositories (repeatable).
        #[arg(short, long = "repo")]
        repos: Vec<String>,

        /// Sync every repository of the organization.
        #[arg(long)]
        discover: bool,

        /// Mirror pull requests as well as issues.
        #[arg(long)]
        include_prs: bool,

        /// Conflict policy: source_wins, last_write_wins, sink_wins, manual.
        #[arg(long)]
        policy: Option<ConflictPolicy>,

        /// Repositories processed in parallel.
        #[arg(long)]
        workers: Option<usize>,

        /// Items per batch.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show current synchronization status.
    Status,

    /// List repository → project mappings and synchronized items.
    Mappings {
        /// Show the items of one repository.
        #[arg(short, long)]
        repo: Option<String>,

        /// Maximum number of items to show.
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Review conflicts queued under the manual policy.
    Conflicts {
        #[command(subcommand)]
        action: ConflictsAction,
    },

    /// Show recent audit log entries.
    Audit {
        /// Only show entries with this action (e.g. conflict_resolved).
        #[arg(short, long)]
        action: Option<String>,

        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path (defaults to the user config directory).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a configuration file.
    Validate {
        /// Also contact both servers with the configured credentials.
        #[arg(long)]
        check_remote: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConflictsAction {
    /// List conflicts.
    List {
        /// Filter by status: open, resolved (default: open).
        #[arg(short, long, default_value = "open")]
        status: String,

        /// Number of results.
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Show both values of a conflict.
    Show {
        /// Conflict ID.
        id: String,
    },
    /// Overwrite the sink with the source value on the next sync.
    AcceptSource {
        /// Conflict ID.
        id: String,
    },
    /// Keep the sink value and adopt it as the new baseline.
    AcceptSink {
        /// Conflict ID.
        id: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Init { output } => cmd_init(output).map(|_| ExitCode::SUCCESS),
        Commands::Validate { check_remote } => cmd_validate(&cli.config, check_remote)
            .await
            .map(|_| ExitCode::SUCCESS),
        command => {
            // All other commands need the config and the mapping store
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;

            match command {
                Commands::Sync {
                    dry_run,
                    repos,
                    discover,
                    include_prs,
                    policy,
                    workers,
                    batch_size,
                    json,
                } => {
                    let mut options = config.sync.clone();
                    options.dry_run |= dry_run;
                    options.discover_repositories |= discover;
                    options.include_pull_requests |= include_prs;
                    if !repos.is_empty() {
                        options.repositories = repos;
                        options.discover_repositories = false;
                    }
                    if let Some(p) = policy {
                        options.conflict_policy = p;
                    }
                    if let Some(w) = workers {
                        options.workers = w;
                    }
                    if let Some(b) = batch_size {
                        options.batch_size = b;
                    }
                    let mut config = config;
                    config.sync = options;
                    cmd_sync(db, &config, json).await
                }
                Commands::Status => cmd_status(&db).map(|_| ExitCode::SUCCESS),
                Commands::Mappings { repo, limit } => {
                    cmd_mappings(&db, repo.as_deref(), limit).map(|_| ExitCode::SUCCESS)
                }
                Commands::Conflicts { action } => {
                    cmd_conflicts(&db, action).map(|_| ExitCode::SUCCESS)
                }
                Commands::Audit { action, limit } => {
                    cmd_audit(&db, action.as_deref(), limit).map(|_| ExitCode::SUCCESS)
                }
                Commands::Init { .. } | Commands::Validate { .. } => Ok(ExitCode::SUCCESS),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config =
        AppConfig::load_from_file(expand_tilde(path)).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    Ok(config)
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let db_path = config.database_path();
    let db = Database::new(&db_path).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    Ok(db)
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_sync(db: Database, config: &AppConfig, json: bool) -> Result<ExitCode> {
    config.validate().context("configuration validation failed")?;
    let (gitea, kimai) =
        clients_from_config(config).context("failed to initialize remote clients")?;

    let db = Arc::new(db);
    let cache = Arc::new(RepositoryMappingCache::load(&db).context("failed to load mappings")?);
    let engine = SyncEngine::new(db, Arc::new(gitea), Arc::new(kimai), cache)
        .with_page_size(config.gitea.page_size);

    // Ctrl+C finishes the current batch, then stops.
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", style::warn("Interrupted, stopping after the current batch..."));
            on_interrupt.cancel();
        }
    });

    if !json {
        let mode = if config.sync.dry_run { " (dry run)" } else { "" };
        println!("{}", style::header(&format!("Syncing {}{}", config.gitea.organization, mode)));
        println!();
    }

    let report = engine
        .run_with_cancel(&config.sync, cancel)
        .await
        .context("sync run failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(if report.has_failures() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_report(report: &SyncReport) {
    if let Some(ref error) = report.error {
        println!("{}", style::error(error));
        println!();
    }

    if !report.repositories.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            "Repository", "Project", "Created", "Updated", "Skipped", "Conflicts", "Failed", "Status",
        ]);
        for repo in &report.repositories {
            let project = match (&repo.project_key, repo.project_planned) {
                (Some(key), _) => key.clone(),
                (None, true) => "(new)".to_string(),
                (None, false) => "—".to_string(),
            };
            let status = if let Some(ref e) = repo.error {
                Cell::new(truncate(e, 60)).fg(comfy_table::Color::Red)
            } else if repo.cancelled {
                Cell::new("cancelled").fg(comfy_table::Color::Yellow)
            } else {
                Cell::new("ok").fg(comfy_table::Color::Green)
            };
            table.add_row(vec![
                Cell::new(&repo.repository),
                Cell::new(project),
                Cell::new(repo.counts.created),
                Cell::new(repo.counts.updated),
                Cell::new(repo.counts.skipped),
                Cell::new(repo.counts.conflicted),
                Cell::new(repo.counts.failed),
                status,
            ]);
        }
        println!("{}", table);
    }

    if report.dry_run {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Repository", "Item", "Action", "Reason", "Activity"]);
        let mut planned = 0;
        for repo in &report.repositories {
            for op in repo.operations.iter().filter(|o| o.action != SyncAction::Skip) {
                planned += 1;
                table.add_row(vec![
                    Cell::new(&repo.repository),
                    Cell::new(format!("{} #{}", op.kind, op.number)),
                    Cell::new(op.action.to_string()).fg(style::action_color(op.action)),
                    Cell::new(op.reason.to_string()),
                    Cell::new(op.target_entity_id.map(|id| id.to_string()).unwrap_or_else(|| "—".into())),
                ]);
            }
        }
        println!();
        if planned == 0 {
            println!("{}", style::success("Nothing to do"));
        } else {
            println!("{}", style::header(&format!("Planned operations ({})", planned)));
            println!("{}", table);
        }
    }

    let failures: Vec<_> = report
        .repositories
        .iter()
        .flat_map(|r| r.failures.iter().map(move |f| (r.repository.as_str(), f)))
        .collect();
    if !failures.is_empty() {
        println!();
        println!("{}", style::header(&format!("Failed items ({})", failures.len())));
        for (repo, f) in failures {
            let retry = if f.transient { " (retries exhausted)" } else { "" };
            println!("  {}#{}{}: {}", repo, f.number, retry, f.error);
        }
    }

    println!();
    let line = report.summary();
    if report.has_failures() {
        println!("{}", style::warn(&line));
    } else {
        println!("{}", style::success(&line));
    }
}

fn cmd_init(output: Option<PathBuf>) -> Result<()> {
    let default_config = r#"# tracksync configuration
# Secrets are never stored here: *_env fields name environment variables.

[daemon]
poll_interval_secs = 300
log_level = "info"
data_dir = "/var/lib/tracksync"
# log_dir = "/var/log/tracksync"

[gitea]
url = "https://git.example.com"
organization = "acme"
token_env = "GITEA_TOKEN"
page_size = 50

[kimai]
url = "https://time.example.com"
token_env = "KIMAI_TOKEN"
# username = "tracksync"
# password_env = "KIMAI_PASSWORD"
# customer_id = 1

[sync]
repositories = ["backend"]
discover_repositories = false
include_pull_requests = false
batch_size = 50
workers = 4
# source_wins | last_write_wins | sink_wins | manual
conflict_policy = "source_wins"

[sync.retry]
max_retries = 3
initial_delay_ms = 500
max_delay_ms = 30000
factor = 2.0

# Pin repositories to existing Kimai projects by id.
[sync.projects]
# backend = "12"
"#;

    let output = match output {
        Some(path) => path,
        None => dirs::config_dir()
            .map(|d| d.join("tracksync").join("config.toml"))
            .ok_or_else(|| anyhow::anyhow!("no user config directory; pass --output"))?,
    };

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }

    std::fs::write(&output, default_config).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your Gitea and Kimai details");
    println!("  2. Set the referenced environment variables (GITEA_TOKEN, KIMAI_TOKEN)");
    println!(
        "  3. Preview with: tracksync --config {} sync --dry-run",
        output.display()
    );
    println!(
        "  4. Start the daemon: tracksync-daemon --config {}",
        output.display()
    );

    Ok(())
}

async fn cmd_validate(config_path: &Path, check_remote: bool) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config = AppConfig::load_from_file(expand_tilde(config_path))
        .context("failed to parse configuration")?;
    println!("  {}", style::success("TOML structure is valid"));

    // Resolve env vars (non-fatal warnings)
    let _ = config.resolve_env_vars();
    println!("  {}", style::success("Environment variable references processed"));

    if let Err(e) = config.validate() {
        println!("  {}", style::error(&format!("Validation error: {}", e)));
        anyhow::bail!("configuration validation failed");
    }
    println!("  {}", style::success("All required fields are valid"));

    let set = |present: bool| if present { "set" } else { "NOT SET" };
    println!();
    println!("Configuration summary:");
    println!("  Gitea URL      : {}", config.gitea.url);
    println!("  Organization   : {}", config.gitea.organization);
    println!("  Gitea token    : {}", set(config.gitea.token.is_some()));
    println!("  Kimai URL      : {}", config.kimai.url);
    if config.kimai.token_env.is_some() {
        println!("  Kimai token    : {}", set(config.kimai.token.is_some()));
    } else {
        println!(
            "  Kimai user     : {} (password {})",
            config.kimai.username.as_deref().unwrap_or("-"),
            set(config.kimai.password.is_some())
        );
    }
    if config.sync.discover_repositories {
        println!("  Repositories   : all (discovery)");
    } else {
        println!("  Repositories   : {}", config.sync.repositories.join(", "));
    }
    println!("  Conflict policy: {}", config.sync.conflict_policy);
    println!("  Workers        : {}", config.sync.workers);
    println!("  Poll interval  : {}s", config.daemon.poll_interval_secs);
    println!("  Database       : {}", config.database_path().display());

    if check_remote {
        println!();
        let (gitea, kimai) =
            clients_from_config(&config).context("credentials are incomplete")?;
        match gitea.version().await {
            Ok(v) => println!("  {}", style::success(&format!("Gitea reachable (version {})", v))),
            Err(e) => {
                println!("  {}", style::error(&format!("Gitea: {}", e)));
                anyhow::bail!("Gitea check failed");
            }
        }
        match kimai.version().await {
            Ok(v) => println!("  {}", style::success(&format!("Kimai reachable (version {})", v))),
            Err(e) => {
                println!("  {}", style::error(&format!("Kimai: {}", e)));
                anyhow::bail!("Kimai check failed");
            }
        }
    }

    println!();
    println!("Configuration is valid.");
    Ok(())
}

fn cmd_status(db: &Database) -> Result<()> {
    let last_sync = db
        .get_state(LAST_SYNC_KEY)
        .context("failed to read last sync time")?;
    let stats = db
        .sync_statistics()
        .context("failed to read sync statistics")?;
    let mappings = db
        .list_repository_mappings()
        .context("failed to list repository mappings")?;
    let open_conflicts = db
        .count_conflicts_by_status("open")
        .context("failed to count conflicts")?;

    println!("{}", style::header("tracksync status"));
    println!();
    println!(
        "  Last sync at     : {}",
        last_sync.as_deref().unwrap_or("never")
    );
    println!("  Repositories     : {}", mappings.len());
    println!("  Synced items     : {}", stats.total_synced);
    for (state, count) in &stats.by_state {
        println!("    {:<14} : {}", state, count);
    }
    if open_conflicts > 0 {
        println!(
            "  Open conflicts   : {}",
            style::warn(&format!("{} (see `tracksync conflicts list`)", open_conflicts))
        );
    } else {
        println!("  Open conflicts   : 0");
    }

    let runs = db.list_sync_runs(5).context("failed to list sync runs")?;
    if !runs.is_empty() {
        println!();
        println!("{}", style::header("Recent runs"));
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Started", "Created", "Updated", "Skipped", "Conflicts", "Failed", "State"]);
        for run in &runs {
            let state = match (&run.completed_at, run.cancelled) {
                (None, _) => Cell::new("incomplete").fg(comfy_table::Color::Red),
                (Some(_), true) => Cell::new("cancelled").fg(comfy_table::Color::Yellow),
                (Some(_), false) if run.counts.failed > 0 => {
                    Cell::new("failures").fg(comfy_table::Color::Yellow)
                }
                (Some(_), false) => Cell::new("ok").fg(comfy_table::Color::Green),
            };
            table.add_row(vec![
                Cell::new(&run.started_at[..19.min(run.started_at.len())]),
                Cell::new(run.counts.created),
                Cell::new(run.counts.updated),
                Cell::new(run.counts.skipped),
                Cell::new(run.counts.conflicted),
                Cell::new(run.counts.failed),
                state,
            ]);
        }
        println!("{}", table);
    }

    Ok(())
}

fn cmd_mappings(db: &Database, repo: Option<&str>, limit: u32) -> Result<()> {
    if repo.is_none() {
        let mappings = db
            .list_repository_mappings()
            .context("failed to list repository mappings")?;
        let stats = db.sync_statistics().context("failed to read sync statistics")?;

        if mappings.is_empty() {
            println!("No repositories mapped yet.");
            return Ok(());
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Repository", "Project", "Items", "Last sync"]);
        for m in &mappings {
            let repo_stats = stats.by_repository.iter().find(|s| s.repository == m.source_repo);
            table.add_row(vec![
                Cell::new(&m.source_repo),
                Cell::new(&m.target_project_key),
                Cell::new(repo_stats.map(|s| s.count).unwrap_or(0)),
                Cell::new(
                    repo_stats
                        .and_then(|s| s.last_sync.as_deref())
                        .map(|t| t[..19.min(t.len())].to_string())
                        .unwrap_or_else(|| "—".into()),
                ),
            ]);
        }
        println!("{}", table);
        return Ok(());
    }

    let records = db
        .list_sync_records(repo, limit)
        .context("failed to list sync records")?;
    if records.is_empty() {
        println!("No synchronized items found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Item", "Title", "State", "Activity", "Recreated", "Updated"]);
    for r in &records {
        table.add_row(vec![
            Cell::new(format!("{} #{}", r.item_kind, r.item_number)),
            Cell::new(truncate(&r.title, 50)),
            Cell::new(r.state.to_string()),
            Cell::new(r.target_entity_id),
            Cell::new(r.recreate_count),
            Cell::new(r.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }
    println!("{}", table);
    println!();
    println!("{}", style::dim(&format!("{} item(s) shown", records.len())));
    Ok(())
}

fn cmd_conflicts(db: &Database, action: ConflictsAction) -> Result<()> {
    match action {
        ConflictsAction::List { status, limit } => {
            let conflicts = db
                .list_conflicts(Some(&status), limit)
                .context("failed to list conflicts")?;

            if conflicts.is_empty() {
                println!("{}", style::success(&format!("No {} conflicts", status)));
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["ID", "Repository", "Item", "Activity", "Status", "Created"]);
            for c in &conflicts {
                let item = value_name(&c.source_value).unwrap_or_else(|| c.source_id.to_string());
                table.add_row(vec![
                    Cell::new(&c.id),
                    Cell::new(&c.repository),
                    Cell::new(truncate(&item, 50)),
                    Cell::new(c.target_entity_id),
                    Cell::new(&c.status),
                    Cell::new(&c.created_at[..19.min(c.created_at.len())]),
                ]);
            }
            println!("{}", table);
            Ok(())
        }

        ConflictsAction::Show { id } => {
            let conflict = db
                .get_conflict(&id)
                .context("database error")?
                .ok_or_else(|| anyhow::anyhow!("conflict '{}' not found", id))?;

            println!("{}", style::header(&format!("Conflict {}", conflict.id)));
            println!();
            println!("  Repository : {}", conflict.repository);
            println!("  Source id  : {}", conflict.source_id);
            println!("  Project    : {}", conflict.target_project_key);
            println!("  Activity   : {}", conflict.target_entity_id);
            println!("  Status     : {}", conflict.status);
            println!("  Created at : {}", conflict.created_at);
            if let Some(ref resolution) = conflict.resolution {
                println!("  Resolution : {}", resolution);
                println!(
                    "  Resolved at: {}",
                    conflict.resolved_at.as_deref().unwrap_or("-")
                );
            }
            print_value("Source value", &conflict.source_value);
            print_value("Sink value", &conflict.target_value);
            Ok(())
        }

        ConflictsAction::AcceptSource { id } => {
            ConflictReview::accept_source(&id, db).context("failed to resolve conflict")?;
            println!(
                "{}",
                style::success(&format!("Conflict {} resolved: the next sync writes the source value", id))
            );
            Ok(())
        }

        ConflictsAction::AcceptSink { id } => {
            ConflictReview::accept_sink(&id, db).context("failed to resolve conflict")?;
            println!(
                "{}",
                style::success(&format!("Conflict {} resolved: the sink value is kept", id))
            );
            Ok(())
        }
    }
}

fn value_name(json: &str) -> Option<String> {
    serde_json::from_str::<ActivityFields>(json).ok().map(|f| f.name)
}

fn print_value(label: &str, json: &str) {
    println!();
    println!("{}", style::header(label));
    println!("{}", "-".repeat(40));
    match serde_json::from_str::<ActivityFields>(json) {
        Ok(fields) => {
            println!("Name   : {}", fields.name);
            println!("Visible: {}", fields.visible);
            println!("{}", fields.comment);
        }
        Err(_) => println!("{}", json),
    }
}

fn cmd_audit(db: &Database, action: Option<&str>, limit: u32) -> Result<()> {
    let entries = db
        .list_audit_log(action, limit)
        .context("failed to list audit entries")?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    for entry in &entries {
        let timestamp = &entry.created_at[..19.min(entry.created_at.len())];
        let action = if entry.success {
            entry.action.clone()
        } else {
            style::error(&entry.action)
        };
        let scope = match (&entry.repository, entry.source_id) {
            (Some(repo), Some(id)) => format!("{} [{}] ", repo, id),
            (Some(repo), None) => format!("{} ", repo),
            _ => String::new(),
        };
        println!(
            "  {}  {:<18} {}{}",
            style::dim(timestamp),
            action,
            scope,
            truncate(entry.details.as_deref().unwrap_or(""), 100),
        );
    }

    println!();
    println!("{}", style::dim(&format!("{} entries shown", entries.len())));
    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
