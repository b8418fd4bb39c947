//! Decides what the engine should do for one source item.
//!
//! [`ConflictResolver::resolve`] is a pure function of the source item, the
//! stored [`SyncRecord`] and a snapshot of the sink entity. It never touches
//! the network or the database.

use serde::Serialize;
use tracing::debug;

use super::detector::ChangeDetector;
use crate::config::ConflictPolicy;
use crate::models::{SinkEntity, SourceItem, SyncRecord};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The operation the engine applies for an item.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Skip,
    Conflict,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Skip => write!(f, "skip"),
            Self::Conflict => write!(f, "conflict"),
        }
    }
}

/// Why the resolver chose an action.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// No record exists for the item in this project.
    New,
    /// Neither side changed.
    Unchanged,
    /// The source changed and the sink still holds what we wrote.
    SourceChanged,
    /// Only the sink changed; nothing is written back.
    SinkDrift,
    /// The mapped sink entity no longer exists.
    SinkMissing,
    /// Both changed; the source overwrites the sink.
    SourceWins,
    /// Both changed; the sink is strictly newer and is kept.
    SinkNewer,
    /// Both changed; the sink is kept by policy.
    SinkWins,
    /// Both changed; queued for manual review.
    ManualReview,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Unchanged => "unchanged",
            Self::SourceChanged => "source_changed",
            Self::SinkDrift => "sink_drift",
            Self::SinkMissing => "sink_missing",
            Self::SourceWins => "source_wins",
            Self::SinkNewer => "sink_newer",
            Self::SinkWins => "sink_wins",
            Self::ManualReview => "manual_review",
        };
        write!(f, "{}", s)
    }
}

/// An action plus the reason it was chosen.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SyncOperation {
    pub action: SyncAction,
    pub reason: Reason,
}

impl SyncOperation {
    fn new(action: SyncAction, reason: Reason) -> Self {
        Self { action, reason }
    }

    /// Whether the rendered source fields must be written to the sink.
    pub fn writes_source(&self) -> bool {
        match self.action {
            SyncAction::Create | SyncAction::Update => true,
            SyncAction::Conflict => self.reason == Reason::SourceWins,
            SyncAction::Skip => false,
        }
    }

    /// A previously mapped entity vanished and is created again.
    pub fn is_recreate(&self) -> bool {
        self.action == SyncAction::Create && self.reason == Reason::SinkMissing
    }

    /// The sink value is kept and becomes the new baseline.
    pub fn adopts_sink(&self) -> bool {
        self.action == SyncAction::Conflict
            && matches!(self.reason, Reason::SinkNewer | Reason::SinkWins)
    }

    /// The conflict is stored for review and nothing is written.
    pub fn needs_review(&self) -> bool {
        self.action == SyncAction::Conflict && self.reason == Reason::ManualReview
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Applies a [`ConflictPolicy`] to the state of one item.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Decide the operation for `item`.
    ///
    /// `sink` is the current sink entity for `record.target_entity_id`, or
    /// `None` when it no longer exists. It is ignored when there is no record.
    pub fn resolve(
        &self,
        item: &SourceItem,
        record: Option<&SyncRecord>,
        sink: Option<&SinkEntity>,
    ) -> SyncOperation {
        let record = match record {
            None => return SyncOperation::new(SyncAction::Create, Reason::New),
            Some(r) => r,
        };
        let entity = match sink {
            None => return SyncOperation::new(SyncAction::Create, Reason::SinkMissing),
            Some(e) => e,
        };

        let source_changed = ChangeDetector::needs_update(item, Some(record));
        // An empty baseline means the sink side was never fingerprinted.
        let sink_changed = !record.target_fingerprint.is_empty()
            && ChangeDetector::sink_fingerprint(&entity.fields()) != record.target_fingerprint;

        let op = match (source_changed, sink_changed) {
            (false, false) => SyncOperation::new(SyncAction::Skip, Reason::Unchanged),
            (false, true) => SyncOperation::new(SyncAction::Skip, Reason::SinkDrift),
            (true, false) => SyncOperation::new(SyncAction::Update, Reason::SourceChanged),
            (true, true) => self.resolve_conflict(item, entity),
        };
        debug!(
            source_id = item.id,
            action = %op.action,
            reason = %op.reason,
            "resolved operation"
        );
        op
    }

    fn resolve_conflict(&self, item: &SourceItem, entity: &SinkEntity) -> SyncOperation {
        let reason = match self.policy {
            ConflictPolicy::SourceWins => Reason::SourceWins,
            ConflictPolicy::SinkWins => Reason::SinkWins,
            ConflictPolicy::Manual => Reason::ManualReview,
            ConflictPolicy::LastWriteWins => match entity.updated_at {
                Some(sink_at) if sink_at > item.updated_at => Reason::SinkNewer,
                // Ties and unknown sink times go to the source.
                _ => Reason::SourceWins,
            },
        };
        SyncOperation::new(SyncAction::Conflict, reason)
    }
}
