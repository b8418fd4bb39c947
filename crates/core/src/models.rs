//! Domain model types used throughout tracksync.
//!
//! These types bridge the remote collaborators, the sync engine and the
//! mapping store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Source items
// ---------------------------------------------------------------------------

/// Whether a source item is an issue or a pull request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Issue,
    PullRequest,
}

impl ItemKind {
    /// Short label used in activity names.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Issue => "Issue",
            Self::PullRequest => "PR",
        }
    }

    /// Parse a stored kind string.
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "pull_request" => Self::PullRequest,
            _ => Self::Issue,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Issue => write!(f, "issue"),
            Self::PullRequest => write!(f, "pull_request"),
        }
    }
}

/// Open/closed state of a source item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Open,
    Closed,
}

impl ItemState {
    /// Parse a state string as returned by the source API.
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "closed" => Self::Closed,
            _ => Self::Open,
        }
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// An issue or pull request as seen by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceItem {
    /// Stable, server-wide id of the item.
    pub id: i64,
    /// Per-repository number (`#12`).
    pub number: i64,
    pub kind: ItemKind,
    pub title: String,
    pub body: String,
    pub state: ItemState,
    pub labels: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sink entities
// ---------------------------------------------------------------------------

/// The fields the engine writes to a sink activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityFields {
    pub name: String,
    pub comment: String,
    pub visible: bool,
}

/// Current state of an activity on the sink side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SinkEntity {
    pub id: i64,
    pub project_key: String,
    pub name: String,
    pub comment: String,
    pub visible: bool,
    /// Last modification time, when the sink exposes one.
    pub updated_at: Option<DateTime<Utc>>,
}

impl SinkEntity {
    /// The writable subset of this entity.
    pub fn fields(&self) -> ActivityFields {
        ActivityFields {
            name: self.name.clone(),
            comment: self.comment.clone(),
            visible: self.visible,
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted mapping rows
// ---------------------------------------------------------------------------

/// One synchronized `(source item, sink project)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRecord {
    pub source_id: i64,
    pub target_project_key: String,
    pub target_entity_id: i64,
    pub source_fingerprint: String,
    /// Fingerprint of the sink fields as last written or adopted.
    pub target_fingerprint: String,
    pub recreate_count: u32,
    pub repository: String,
    pub item_kind: ItemKind,
    pub item_number: i64,
    pub title: String,
    pub state: ItemState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Source repository → sink project association.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryMapping {
    pub source_repo: String,
    pub target_project_key: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Audit Entry
// ---------------------------------------------------------------------------

/// An audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub repository: Option<String>,
    pub source_id: Option<i64>,
    pub target_entity_id: Option<i64>,
    pub details: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a success audit entry.
    pub fn success(action: &str, details: &str) -> Self {
        Self {
            action: action.to_string(),
            repository: None,
            source_id: None,
            target_entity_id: None,
            details: details.to_string(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Create a failure audit entry.
    pub fn failure(action: &str, details: &str) -> Self {
        Self {
            success: false,
            ..Self::success(action, details)
        }
    }

    /// Attach the repository this entry concerns.
    pub fn repository(mut self, repo: &str) -> Self {
        self.repository = Some(repo.to_string());
        self
    }

    /// Attach the source item and (optionally) the sink entity.
    pub fn item(mut self, source_id: i64, target_entity_id: Option<i64>) -> Self {
        self.source_id = Some(source_id);
        self.target_entity_id = target_entity_id;
        self
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Outcome counters for a repository or a whole run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncCounts {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub conflicted: u64,
    pub failed: u64,
}

impl SyncCounts {
    /// Accumulate another set of counters into this one.
    pub fn add(&mut self, other: &SyncCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.conflicted += other.conflicted;
        self.failed += other.failed;
    }

    /// Number of items that reached a terminal outcome.
    pub fn total(&self) -> u64 {
        self.created + self.updated + self.skipped + self.conflicted + self.failed
    }
}

/// Per-repository sync totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryStats {
    pub repository: String,
    pub count: i64,
    pub last_sync: Option<String>,
}

/// Aggregate statistics over all sync records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub total_synced: i64,
    pub by_repository: Vec<RepositoryStats>,
    pub by_state: Vec<(String, i64)>,
}
