//! TOML-based configuration system for tracksync.
//!
//! All sensitive values (tokens, passwords) are stored as `_env` fields that
//! reference environment variable names. The actual secrets are resolved at
//! runtime via [`AppConfig::resolve_env_vars`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon / polling settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Gitea (source) connection settings.
    pub gitea: GiteaConfig,

    /// Kimai (sink) connection settings.
    pub kimai: KimaiConfig,

    /// Sync behaviour settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Daemon / polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between sync runs (default 300).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (the mapping database).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Optional directory for daily-rolling log files.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_poll_interval() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/tracksync")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            log_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Gitea
// ---------------------------------------------------------------------------

/// Gitea server and organization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiteaConfig {
    /// Server base URL (e.g. `https://git.example.com`).
    pub url: String,

    /// Organization (or user) owning the repositories.
    pub organization: String,

    /// Environment variable holding the API token.
    pub token_env: String,

    /// Items requested per page (default 50).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_page_size() -> u32 {
    50
}

// ---------------------------------------------------------------------------
// Kimai
// ---------------------------------------------------------------------------

/// Kimai server settings. A token is preferred; basic auth is the fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KimaiConfig {
    /// Server base URL (e.g. `https://time.example.com`).
    pub url: String,

    /// Environment variable holding the API token.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Username for HTTP basic authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Environment variable holding the basic-auth password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Customer new projects are attached to (required by most Kimai setups).
    #[serde(default)]
    pub customer_id: Option<i64>,

    /// Resolved token.
    #[serde(skip)]
    pub token: Option<String>,

    /// Resolved password.
    #[serde(skip)]
    pub password: Option<String>,
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// What to do when both the source item and the sink entity changed since
/// the last sync.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The source value overwrites the sink; the old sink value is audited.
    #[default]
    SourceWins,
    /// The newer side wins; equal timestamps go to the source.
    LastWriteWins,
    /// The sink value is kept and adopted as the new baseline.
    SinkWins,
    /// Nothing is written; the conflict is queued for review.
    Manual,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceWins => write!(f, "source_wins"),
            Self::LastWriteWins => write!(f, "last_write_wins"),
            Self::SinkWins => write!(f, "sink_wins"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "source_wins" => Ok(Self::SourceWins),
            "last_write_wins" => Ok(Self::LastWriteWins),
            "sink_wins" => Ok(Self::SinkWins),
            "manual" => Ok(Self::Manual),
            other => Err(ConfigError::InvalidValue {
                field: "sync.conflict_policy".into(),
                detail: format!(
                    "unknown policy '{}' (expected source_wins, last_write_wins, sink_wins or manual)",
                    other
                ),
            }),
        }
    }
}

/// Backoff settings for transient remote failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_factor")]
    pub factor: f64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_factor() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
        }
    }
}

/// Sync behaviour configuration. This is also the per-run input of
/// [`SyncEngine::run`](crate::sync_engine::SyncEngine::run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Repositories to synchronize (names within the organization).
    #[serde(default)]
    pub repositories: Vec<String>,

    /// Ignore `repositories` and sync every repository of the organization.
    #[serde(default)]
    pub discover_repositories: bool,

    /// Mirror pull requests as well as issues.
    #[serde(default)]
    pub include_pull_requests: bool,

    /// Compute and report operations without applying any of them.
    #[serde(default)]
    pub dry_run: bool,

    /// Items committed per batch (default 50).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Repositories processed in parallel (default 4).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Policy for items changed on both sides.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// Retry / backoff settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Manual repository → sink project key overrides.
    #[serde(default)]
    pub projects: BTreeMap<String, String>,
}

fn default_batch_size() -> usize {
    50
}
fn default_workers() -> usize {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            discover_repositories: false,
            include_pull_requests: false,
            dry_run: false,
            batch_size: default_batch_size(),
            workers: default_workers(),
            conflict_policy: ConflictPolicy::default(),
            retry: RetryConfig::default(),
            projects: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Validate the run parameters. Called by the engine before any network
    /// call is made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.discover_repositories && self.repositories.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.repositories".into(),
                detail: "no repositories configured and discovery is disabled".into(),
            });
        }
        for repo in &self.repositories {
            if !is_valid_repo_name(repo) {
                return Err(ConfigError::InvalidValue {
                    field: "sync.repositories".into(),
                    detail: format!("invalid repository name '{}'", repo),
                });
            }
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.batch_size".into(),
                detail: "batch size must be > 0".into(),
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.workers".into(),
                detail: "worker count must be > 0".into(),
            });
        }
        if self.retry.factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.retry.factor".into(),
                detail: "backoff factor must be >= 1.0".into(),
            });
        }
        for (repo, key) in &self.projects {
            if !is_valid_repo_name(repo) {
                return Err(ConfigError::InvalidValue {
                    field: format!("sync.projects.{}", repo),
                    detail: "invalid repository name".into(),
                });
            }
            if key.trim().is_empty() || key.parse::<i64>().is_err() {
                return Err(ConfigError::InvalidValue {
                    field: format!("sync.projects.{}", repo),
                    detail: format!("project key '{}' is not a numeric project id", key),
                });
            }
        }
        Ok(())
    }
}

/// Repository names may contain alphanumerics, dots, dashes and underscores.
pub fn is_valid_repo_name(name: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9._-]+$")
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

fn is_valid_url(url: &str) -> bool {
    Regex::new(r"^https?://[A-Za-z0-9]([A-Za-z0-9.-]*[A-Za-z0-9])?(:[0-9]+)?(/.*)?$")
        .map(|re| re.is_match(url))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// Missing variables are logged and left as `None`; use
    /// [`require_credentials`](Self::require_credentials) to enforce them.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        self.gitea.token = resolve_optional_env(&self.gitea.token_env, "gitea.token_env");

        if let Some(ref env_name) = self.kimai.token_env {
            self.kimai.token = resolve_optional_env(env_name, "kimai.token_env");
        }
        if let Some(ref env_name) = self.kimai.password_env {
            self.kimai.password = resolve_optional_env(env_name, "kimai.password_env");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_url(&self.gitea.url) {
            return Err(ConfigError::InvalidValue {
                field: "gitea.url".into(),
                detail: format!("'{}' is not an http(s) URL", self.gitea.url),
            });
        }
        if self.gitea.organization.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "gitea.organization".into(),
                detail: "organization must not be empty".into(),
            });
        }
        if self.gitea.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "gitea.page_size".into(),
                detail: "page size must be > 0".into(),
            });
        }
        if !is_valid_url(&self.kimai.url) {
            return Err(ConfigError::InvalidValue {
                field: "kimai.url".into(),
                detail: format!("'{}' is not an http(s) URL", self.kimai.url),
            });
        }
        if self.kimai.token_env.is_none()
            && (self.kimai.username.is_none() || self.kimai.password_env.is_none())
        {
            return Err(ConfigError::InvalidValue {
                field: "kimai".into(),
                detail: "either token_env or both username and password_env are required".into(),
            });
        }
        if self.daemon.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "daemon.poll_interval_secs".into(),
                detail: "poll interval must be > 0".into(),
            });
        }

        self.sync.validate()
    }

    /// Ensure the secrets needed to talk to both servers were resolved.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.gitea.token.is_none() {
            return Err(ConfigError::EnvVarMissing {
                var: self.gitea.token_env.clone(),
                field: "gitea.token_env".into(),
            });
        }
        let has_basic = self.kimai.username.is_some() && self.kimai.password.is_some();
        if self.kimai.token.is_none() && !has_basic {
            let var = self
                .kimai
                .token_env
                .clone()
                .or_else(|| self.kimai.password_env.clone())
                .unwrap_or_default();
            return Err(ConfigError::EnvVarMissing {
                var,
                field: "kimai.token_env".into(),
            });
        }
        Ok(())
    }

    /// Path of the SQLite mapping store.
    pub fn database_path(&self) -> PathBuf {
        self.daemon.data_dir.join("tracksync.db")
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
