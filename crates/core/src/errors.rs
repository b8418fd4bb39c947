//! Error types for the tracksync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Remote (source / sink) errors
// ---------------------------------------------------------------------------

/// Whether a failed remote call is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network timeouts, 5xx responses and rate limiting.
    Transient,
    /// Everything else: 4xx responses, validation failures, bad payloads.
    Permanent,
}

/// Errors returned by the source and sink collaborators.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure (DNS, TLS, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a 5xx status.
    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    /// HTTP 429.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Token missing, expired or lacking permissions (401 / 403).
    #[error("authentication failed (HTTP {status}): {detail}")]
    Unauthorized { status: u16, detail: String },

    /// Any other 4xx status.
    #[error("request rejected (HTTP {status}): {body}")]
    Client { status: u16, body: String },

    /// The remote refused the payload (e.g. Kimai form validation).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The response body could not be decoded.
    #[error("response parse error: {0}")]
    Parse(String),
}

impl RemoteError {
    /// Map an HTTP status and body to the matching variant.
    pub fn from_status(status: u16, body: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let body = body.into();
        match status {
            429 => Self::RateLimited { retry_after },
            401 | 403 => Self::Unauthorized {
                status,
                detail: body,
            },
            400 | 422 => Self::Validation(body),
            500..=599 => Self::Server { status, body },
            _ => Self::Client { status, body },
        }
    }

    /// Classify the error for the retry policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::Server { .. } | Self::RateLimited { .. } => {
                ErrorClass::Transient
            }
            Self::Unauthorized { .. } | Self::Client { .. } | Self::Validation(_) | Self::Parse(_) => {
                ErrorClass::Permanent
            }
        }
    }

    /// Delay requested by the server, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string(), None)
        } else {
            Self::Network(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Provisioning errors
// ---------------------------------------------------------------------------

/// Errors from ensuring a sink project exists for a repository.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Looking up or creating the sink project failed.
    #[error("failed to provision project for repository '{repo}': {source}")]
    Remote {
        repo: String,
        #[source]
        source: RemoteError,
    },

    /// The repository mapping could not be persisted.
    #[error("failed to persist repository mapping for '{repo}': {source}")]
    Database {
        repo: String,
        #[source]
        source: DatabaseError,
    },
}

// ---------------------------------------------------------------------------
// Sync engine errors
// ---------------------------------------------------------------------------

/// Errors from the synchronization engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another sync run is already in progress on this engine.
    #[error("sync already in progress (started at {started_at})")]
    AlreadyRunning { started_at: String },

    /// Listing repositories or items from the source failed.
    #[error("source listing failed for '{repo}': {source}")]
    SourceListing {
        repo: String,
        #[source]
        source: RemoteError,
    },

    /// The run configuration is unusable.
    #[error("sync configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Provisioning failure for a repository.
    #[error("sync provisioning error: {0}")]
    ProvisionError(#[from] ProvisionError),

    /// Database error during sync.
    #[error("sync database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite mapping store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stored value could not be (de)serialized.
    #[error("database serialization error: {0}")]
    Serialization(String),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
