//! Resolution of conflicts queued under the `manual` policy.
//!
//! Both resolutions only rewrite the stored baseline; the next sync run then
//! does the actual work. Accepting the source makes the item look "source
//! changed, sink untouched" so the run issues an update. Accepting the sink
//! makes the current sink value the expected one so the run skips the item.

use tracing::info;

use super::detector::ChangeDetector;
use crate::db::queries::ConflictEntry;
use crate::db::Database;
use crate::errors::DatabaseError;
use crate::models::{ActivityFields, AuditEntry};

/// Stateless review operations over the `conflicts` table.
pub struct ConflictReview;

impl ConflictReview {
    /// Let the source value overwrite the sink on the next run.
    pub fn accept_source(conflict_id: &str, db: &Database) -> Result<(), DatabaseError> {
        info!(conflict_id, "resolving conflict: accept source");
        let conflict = Self::open_conflict(conflict_id, db)?;
        let sink_fp = Self::sink_value_fingerprint(&conflict)?;
        Self::apply(&conflict, db, String::new(), sink_fp, "accept_source")
    }

    /// Keep the sink value and treat it as the new baseline.
    pub fn accept_sink(conflict_id: &str, db: &Database) -> Result<(), DatabaseError> {
        info!(conflict_id, "resolving conflict: accept sink");
        let conflict = Self::open_conflict(conflict_id, db)?;
        let sink_fp = Self::sink_value_fingerprint(&conflict)?;
        let source_fp = conflict.source_fingerprint.clone();
        Self::apply(&conflict, db, source_fp, sink_fp, "accept_sink")
    }

    fn open_conflict(conflict_id: &str, db: &Database) -> Result<ConflictEntry, DatabaseError> {
        match db.get_conflict(conflict_id)? {
            Some(c) if c.status == "open" => Ok(c),
            _ => Err(DatabaseError::NotFound {
                entity: "open conflict".into(),
                id: conflict_id.to_string(),
            }),
        }
    }

    fn sink_value_fingerprint(conflict: &ConflictEntry) -> Result<String, DatabaseError> {
        let fields: ActivityFields = serde_json::from_str(&conflict.target_value)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        Ok(ChangeDetector::sink_fingerprint(&fields))
    }

    /// Rewrite the baseline, close the conflict and audit it in one
    /// transaction. Nothing is kept if any step fails.
    fn apply(
        conflict: &ConflictEntry,
        db: &Database,
        source_fingerprint: String,
        target_fingerprint: String,
        resolution: &str,
    ) -> Result<(), DatabaseError> {
        let mut record = db
            .get_sync_record(conflict.source_id, &conflict.target_project_key)?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "sync_record".into(),
                id: format!("{}/{}", conflict.source_id, conflict.target_project_key),
            })?;
        record.source_fingerprint = source_fingerprint;
        record.target_fingerprint = target_fingerprint;
        record.target_entity_id = conflict.target_entity_id;
        record.updated_at = chrono::Utc::now();

        let audit = AuditEntry::success(
            "conflict_resolved",
            &format!("conflict {} resolved with {}", conflict.id, resolution),
        )
        .repository(&conflict.repository)
        .item(conflict.source_id, Some(conflict.target_entity_id));

        db.transaction(|conn| {
            // NotFound here if another review closed it meanwhile.
            Database::resolve_conflict_on(conn, &conflict.id, resolution)?;
            Database::upsert_sync_record_on(conn, &record)?;
            Database::insert_audit_entry_on(conn, &audit)?;
            Ok(())
        })
    }
}
