//! Typed query helpers for every table in the tracksync database.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{
    AuditEntry, ItemKind, ItemState, RepositoryMapping, RepositoryStats, SyncCounts, SyncRecord,
    SyncStatistics,
};

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `conflicts` table.
#[derive(Debug, Clone)]
pub struct ConflictEntry {
    pub id: String,
    pub source_id: i64,
    pub target_project_key: String,
    pub target_entity_id: i64,
    pub repository: String,
    /// JSON-encoded activity fields rendered from the source item.
    pub source_value: String,
    /// JSON-encoded activity fields found on the sink.
    pub target_value: String,
    pub source_fingerprint: String,
    pub status: String,
    pub resolution: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

/// Values needed to queue a conflict for manual review.
#[derive(Debug, Clone)]
pub struct NewConflict<'a> {
    pub source_id: i64,
    pub target_project_key: &'a str,
    pub target_entity_id: i64,
    pub repository: &'a str,
    pub source_value: &'a str,
    pub target_value: &'a str,
    pub source_fingerprint: &'a str,
}

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub repository: Option<String>,
    pub source_id: Option<i64>,
    pub target_entity_id: Option<i64>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}

/// A row from the `sync_runs` table.
#[derive(Debug, Clone)]
pub struct SyncRunEntry {
    pub id: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub dry_run: bool,
    pub counts: SyncCounts,
    pub cancelled: bool,
    pub details: Option<String>,
}

const SYNC_RECORD_COLUMNS: &str = "source_id, target_project_key, target_entity_id, \
     source_fingerprint, target_fingerprint, recreate_count, repository, item_kind, \
     item_number, title, state, created_at, updated_at";

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn sync_record_from_row(row: &Row<'_>) -> rusqlite::Result<SyncRecord> {
    let kind: String = row.get(7)?;
    let state: String = row.get(10)?;
    Ok(SyncRecord {
        source_id: row.get(0)?,
        target_project_key: row.get(1)?,
        target_entity_id: row.get(2)?,
        source_fingerprint: row.get(3)?,
        target_fingerprint: row.get(4)?,
        recreate_count: row.get(5)?,
        repository: row.get(6)?,
        item_kind: ItemKind::from_str_val(&kind),
        item_number: row.get(8)?,
        title: row.get(9)?,
        state: ItemState::from_str_val(&state),
        created_at: parse_timestamp(11, row.get(11)?)?,
        updated_at: parse_timestamp(12, row.get(12)?)?,
    })
}

fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<ConflictEntry> {
    Ok(ConflictEntry {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_project_key: row.get(2)?,
        target_entity_id: row.get(3)?,
        repository: row.get(4)?,
        source_value: row.get(5)?,
        target_value: row.get(6)?,
        source_fingerprint: row.get(7)?,
        status: row.get(8)?,
        resolution: row.get(9)?,
        created_at: row.get(10)?,
        resolved_at: row.get(11)?,
    })
}

fn sync_run_from_row(row: &Row<'_>) -> rusqlite::Result<SyncRunEntry> {
    Ok(SyncRunEntry {
        id: row.get(0)?,
        started_at: row.get(1)?,
        completed_at: row.get(2)?,
        dry_run: row.get(3)?,
        counts: SyncCounts {
            created: row.get::<_, i64>(4)? as u64,
            updated: row.get::<_, i64>(5)? as u64,
            skipped: row.get::<_, i64>(6)? as u64,
            conflicted: row.get::<_, i64>(7)? as u64,
            failed: row.get::<_, i64>(8)? as u64,
        },
        cancelled: row.get(9)?,
        details: row.get(10)?,
    })
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- sync_records -------------------------------------------------------

    /// Look up the record for a source item in a given sink project.
    pub fn get_sync_record(
        &self,
        source_id: i64,
        project_key: &str,
    ) -> Result<Option<SyncRecord>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM sync_records WHERE source_id = ?1 AND target_project_key = ?2",
            SYNC_RECORD_COLUMNS
        );
        let record = conn
            .query_row(&sql, params![source_id, project_key], sync_record_from_row)
            .optional()?;
        Ok(record)
    }

    /// Insert or update the record keyed by `(source_id, target_project_key)`.
    ///
    /// `created_at` is preserved on update.
    pub fn upsert_sync_record(&self, record: &SyncRecord) -> Result<(), DatabaseError> {
        Self::upsert_sync_record_on(&self.conn(), record)
    }

    /// [`upsert_sync_record`](Self::upsert_sync_record) on a connection the
    /// caller already holds, typically inside [`Database::transaction`].
    pub fn upsert_sync_record_on(conn: &Connection, record: &SyncRecord) -> Result<(), DatabaseError> {
        conn.execute(
            "INSERT INTO sync_records (source_id, target_project_key, target_entity_id,
                 source_fingerprint, target_fingerprint, recreate_count, repository, item_kind,
                 item_number, title, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(source_id, target_project_key) DO UPDATE SET
                 target_entity_id = excluded.target_entity_id,
                 source_fingerprint = excluded.source_fingerprint,
                 target_fingerprint = excluded.target_fingerprint,
                 recreate_count = excluded.recreate_count,
                 repository = excluded.repository,
                 item_kind = excluded.item_kind,
                 item_number = excluded.item_number,
                 title = excluded.title,
                 state = excluded.state,
                 updated_at = excluded.updated_at",
            params![
                record.source_id,
                record.target_project_key,
                record.target_entity_id,
                record.source_fingerprint,
                record.target_fingerprint,
                record.recreate_count,
                record.repository,
                record.item_kind.to_string(),
                record.item_number,
                record.title,
                record.state.to_string(),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        debug!(
            source_id = record.source_id,
            project = %record.target_project_key,
            entity_id = record.target_entity_id,
            "upserted sync_record"
        );
        Ok(())
    }

    /// List records, most recently updated first, optionally for one repository.
    pub fn list_sync_records(
        &self,
        repository: Option<&str>,
        limit: u32,
    ) -> Result<Vec<SyncRecord>, DatabaseError> {
        let conn = self.conn();
        let records = match repository {
            Some(repo) => {
                let sql = format!(
                    "SELECT {} FROM sync_records WHERE repository = ?1
                     ORDER BY updated_at DESC, source_id LIMIT ?2",
                    SYNC_RECORD_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![repo, limit], sync_record_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM sync_records ORDER BY updated_at DESC, source_id LIMIT ?1",
                    SYNC_RECORD_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit], sync_record_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(records)
    }

    /// Count total sync records.
    pub fn count_sync_records(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_records", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Aggregate totals per repository and per item state.
    pub fn sync_statistics(&self) -> Result<SyncStatistics, DatabaseError> {
        let conn = self.conn();
        let total_synced: i64 =
            conn.query_row("SELECT COUNT(*) FROM sync_records", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(
            "SELECT repository, COUNT(*), MAX(updated_at) FROM sync_records
             GROUP BY repository ORDER BY repository",
        )?;
        let by_repository = stmt
            .query_map([], |row| {
                Ok(RepositoryStats {
                    repository: row.get(0)?,
                    count: row.get(1)?,
                    last_sync: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT state, COUNT(*) FROM sync_records GROUP BY state ORDER BY state",
        )?;
        let by_state = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SyncStatistics {
            total_synced,
            by_repository,
            by_state,
        })
    }

    // -- repository_mappings ------------------------------------------------

    /// Look up the sink project key for a source repository.
    pub fn get_repository_mapping(&self, repo: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let key = conn
            .query_row(
                "SELECT target_project_key FROM repository_mappings WHERE source_repo = ?1",
                params![repo],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key)
    }

    /// Insert or replace the project key for a repository.
    pub fn upsert_repository_mapping(&self, repo: &str, project_key: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO repository_mappings (source_repo, target_project_key, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(source_repo) DO UPDATE SET target_project_key = excluded.target_project_key",
            params![repo, project_key, now],
        )?;
        debug!(repo, project_key, "upserted repository mapping");
        Ok(())
    }

    /// All repository mappings, ordered by repository name.
    pub fn list_repository_mappings(&self) -> Result<Vec<RepositoryMapping>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT source_repo, target_project_key, created_at FROM repository_mappings
             ORDER BY source_repo",
        )?;
        let mappings = stmt
            .query_map([], |row| {
                Ok(RepositoryMapping {
                    source_repo: row.get(0)?,
                    target_project_key: row.get(1)?,
                    created_at: parse_timestamp(2, row.get(2)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    // -- conflicts ----------------------------------------------------------

    /// Queue a conflict for review. If an open conflict already exists for
    /// the same item and project, its values are refreshed and its id reused.
    pub fn upsert_open_conflict(&self, conflict: &NewConflict<'_>) -> Result<String, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM conflicts
                 WHERE source_id = ?1 AND target_project_key = ?2 AND status = 'open'",
                params![conflict.source_id, conflict.target_project_key],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            conn.execute(
                "UPDATE conflicts SET target_entity_id = ?1, source_value = ?2, target_value = ?3,
                     source_fingerprint = ?4
                 WHERE id = ?5",
                params![
                    conflict.target_entity_id,
                    conflict.source_value,
                    conflict.target_value,
                    conflict.source_fingerprint,
                    id
                ],
            )?;
            debug!(id, source_id = conflict.source_id, "refreshed open conflict");
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO conflicts (id, source_id, target_project_key, target_entity_id, repository,
                 source_value, target_value, source_fingerprint, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'open', ?9)",
            params![
                id,
                conflict.source_id,
                conflict.target_project_key,
                conflict.target_entity_id,
                conflict.repository,
                conflict.source_value,
                conflict.target_value,
                conflict.source_fingerprint,
                now
            ],
        )?;
        debug!(id, source_id = conflict.source_id, "inserted conflict");
        Ok(id)
    }

    /// Get a single conflict by id.
    pub fn get_conflict(&self, id: &str) -> Result<Option<ConflictEntry>, DatabaseError> {
        let conn = self.conn();
        let conflict = conn
            .query_row(
                "SELECT id, source_id, target_project_key, target_entity_id, repository,
                        source_value, target_value, source_fingerprint, status, resolution,
                        created_at, resolved_at
                 FROM conflicts WHERE id = ?1",
                params![id],
                conflict_from_row,
            )
            .optional()?;
        Ok(conflict)
    }

    /// List conflicts, newest first, optionally filtered by status.
    pub fn list_conflicts(
        &self,
        status: Option<&str>,
        limit: u32,
    ) -> Result<Vec<ConflictEntry>, DatabaseError> {
        let conn = self.conn();
        let base = "SELECT id, source_id, target_project_key, target_entity_id, repository,
                           source_value, target_value, source_fingerprint, status, resolution,
                           created_at, resolved_at
                    FROM conflicts";
        let conflicts = match status {
            Some(s) => {
                let sql = format!("{} WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2", base);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![s, limit], conflict_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!("{} ORDER BY created_at DESC LIMIT ?1", base);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit], conflict_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(conflicts)
    }

    /// Mark an open conflict as resolved with the given resolution label.
    pub fn resolve_conflict(&self, id: &str, resolution: &str) -> Result<(), DatabaseError> {
        Self::resolve_conflict_on(&self.conn(), id, resolution)
    }

    pub fn resolve_conflict_on(conn: &Connection, id: &str, resolution: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE conflicts SET status = 'resolved', resolution = ?1, resolved_at = ?2
             WHERE id = ?3 AND status = 'open'",
            params![resolution, now, id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "open conflict".into(),
                id: id.to_string(),
            });
        }
        debug!(id, resolution, "resolved conflict");
        Ok(())
    }

    /// Count conflicts by status.
    pub fn count_conflicts_by_status(&self, status: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conflicts WHERE status = ?1",
            params![status],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit entry.
    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<i64, DatabaseError> {
        Self::insert_audit_entry_on(&self.conn(), entry)
    }

    pub fn insert_audit_entry_on(conn: &Connection, entry: &AuditEntry) -> Result<i64, DatabaseError> {
        conn.execute(
            "INSERT INTO audit_log (action, repository, source_id, target_entity_id, details,
                 success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.action,
                entry.repository,
                entry.source_id,
                entry.target_entity_id,
                entry.details,
                entry.success,
                entry.timestamp.to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action = %entry.action, "inserted audit_log entry");
        Ok(id)
    }

    /// List recent audit-log entries, optionally filtered by action.
    pub fn list_audit_log(
        &self,
        action: Option<&str>,
        limit: u32,
    ) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let map = |row: &Row<'_>| {
            Ok(AuditLogEntry {
                id: row.get(0)?,
                action: row.get(1)?,
                repository: row.get(2)?,
                source_id: row.get(3)?,
                target_entity_id: row.get(4)?,
                details: row.get(5)?,
                success: row.get(6)?,
                created_at: row.get(7)?,
            })
        };
        let base = "SELECT id, action, repository, source_id, target_entity_id, details, success,
                           created_at
                    FROM audit_log";
        let entries = match action {
            Some(act) => {
                let sql = format!("{} WHERE action = ?1 ORDER BY id DESC LIMIT ?2", base);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![act, limit], map)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!("{} ORDER BY id DESC LIMIT ?1", base);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit], map)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(entries)
    }

    /// Count all audit log entries.
    pub fn count_audit_log(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count)
    }

    // -- sync_runs ----------------------------------------------------------

    /// Record the start of a run and return its id.
    pub fn start_sync_run(&self, dry_run: bool) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sync_runs (id, started_at, dry_run) VALUES (?1, ?2, ?3)",
            params![id, now, dry_run],
        )?;
        debug!(id, dry_run, "started sync run");
        Ok(id)
    }

    /// Store the final counters of a run.
    pub fn complete_sync_run(
        &self,
        id: &str,
        counts: &SyncCounts,
        cancelled: bool,
        details: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, created = ?2, updated = ?3, skipped = ?4,
                 conflicted = ?5, failed = ?6, cancelled = ?7, details = ?8
             WHERE id = ?9",
            params![
                now,
                counts.created as i64,
                counts.updated as i64,
                counts.skipped as i64,
                counts.conflicted as i64,
                counts.failed as i64,
                cancelled,
                details,
                id
            ],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "sync_run".into(),
                id: id.to_string(),
            });
        }
        debug!(id, "completed sync run");
        Ok(())
    }

    /// Most recent runs, newest first.
    pub fn list_sync_runs(&self, limit: u32) -> Result<Vec<SyncRunEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, started_at, completed_at, dry_run, created, updated, skipped, conflicted,
                    failed, cancelled, details
             FROM sync_runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let runs = stmt
            .query_map(params![limit], sync_run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    // -- kv_state -----------------------------------------------------------

    /// Get a key-value state entry.
    pub fn get_state(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set a key-value state entry (upsert).
    pub fn set_state(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        debug!(key, value, "set kv_state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn sample_record(source_id: i64, project: &str) -> SyncRecord {
        let now = Utc::now();
        SyncRecord {
            source_id,
            target_project_key: project.into(),
            target_entity_id: 100,
            source_fingerprint: "aaa".into(),
            target_fingerprint: "bbb".into(),
            recreate_count: 0,
            repository: "backend".into(),
            item_kind: ItemKind::Issue,
            item_number: 3,
            title: "Fix login".into(),
            state: ItemState::Open,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_sync_record_upsert_preserves_created_at() {
        let db = setup_db();
        let mut record = sample_record(42, "7");
        db.upsert_sync_record(&record).unwrap();
        let stored = db.get_sync_record(42, "7").unwrap().unwrap();
        assert_eq!(stored.target_entity_id, 100);

        let original_created = stored.created_at;
        record.created_at = Utc::now() + chrono::Duration::days(1);
        record.source_fingerprint = "ccc".into();
        record.recreate_count = 1;
        db.upsert_sync_record(&record).unwrap();

        let stored = db.get_sync_record(42, "7").unwrap().unwrap();
        assert_eq!(stored.source_fingerprint, "ccc");
        assert_eq!(stored.recreate_count, 1);
        assert_eq!(stored.created_at.timestamp(), original_created.timestamp());
        assert_eq!(db.count_sync_records().unwrap(), 1);
    }

    #[test]
    fn test_sync_record_is_scoped_by_project() {
        let db = setup_db();
        db.upsert_sync_record(&sample_record(42, "7")).unwrap();
        db.upsert_sync_record(&sample_record(42, "8")).unwrap();
        assert_eq!(db.count_sync_records().unwrap(), 2);
        assert!(db.get_sync_record(42, "9").unwrap().is_none());
    }

    #[test]
    fn test_list_sync_records_by_repository() {
        let db = setup_db();
        db.upsert_sync_record(&sample_record(1, "7")).unwrap();
        let mut other = sample_record(2, "8");
        other.repository = "web-app".into();
        db.upsert_sync_record(&other).unwrap();

        assert_eq!(db.list_sync_records(None, 10).unwrap().len(), 2);
        let backend = db.list_sync_records(Some("backend"), 10).unwrap();
        assert_eq!(backend.len(), 1);
        assert_eq!(backend[0].source_id, 1);
    }

    #[test]
    fn test_sync_statistics() {
        let db = setup_db();
        db.upsert_sync_record(&sample_record(1, "7")).unwrap();
        let mut closed = sample_record(2, "7");
        closed.state = ItemState::Closed;
        db.upsert_sync_record(&closed).unwrap();

        let stats = db.sync_statistics().unwrap();
        assert_eq!(stats.total_synced, 2);
        assert_eq!(stats.by_repository.len(), 1);
        assert_eq!(stats.by_repository[0].count, 2);
        assert!(stats.by_state.contains(&("closed".to_string(), 1)));
        assert!(stats.by_state.contains(&("open".to_string(), 1)));
    }

    #[test]
    fn test_repository_mapping_crud() {
        let db = setup_db();
        assert!(db.get_repository_mapping("backend").unwrap().is_none());
        db.upsert_repository_mapping("backend", "7").unwrap();
        db.upsert_repository_mapping("backend", "9").unwrap();
        assert_eq!(db.get_repository_mapping("backend").unwrap().as_deref(), Some("9"));
        assert_eq!(db.list_repository_mappings().unwrap().len(), 1);
    }

    #[test]
    fn test_open_conflict_is_deduplicated() {
        let db = setup_db();
        let conflict = NewConflict {
            source_id: 42,
            target_project_key: "7",
            target_entity_id: 100,
            repository: "backend",
            source_value: "{}",
            target_value: "{}",
            source_fingerprint: "fp1",
        };
        let first = db.upsert_open_conflict(&conflict).unwrap();
        let second = db
            .upsert_open_conflict(&NewConflict {
                source_fingerprint: "fp2",
                ..conflict.clone()
            })
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(db.count_conflicts_by_status("open").unwrap(), 1);
        assert_eq!(db.get_conflict(&first).unwrap().unwrap().source_fingerprint, "fp2");

        db.resolve_conflict(&first, "accept_source").unwrap();
        assert_eq!(db.count_conflicts_by_status("open").unwrap(), 0);
        assert!(matches!(
            db.resolve_conflict(&first, "accept_sink"),
            Err(DatabaseError::NotFound { .. })
        ));
        let third = db.upsert_open_conflict(&conflict).unwrap();
        assert_ne!(first, third);
        assert_eq!(db.list_conflicts(None, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_resolve_unknown_conflict_is_not_found() {
        let db = setup_db();
        assert!(matches!(
            db.resolve_conflict("nope", "accept_source"),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn test_audit_log() {
        let db = setup_db();
        db.insert_audit_entry(&AuditEntry::success("project_created", "created project 7").repository("backend"))
            .unwrap();
        db.insert_audit_entry(&AuditEntry::failure("item_failed", "boom").item(42, None))
            .unwrap();

        assert_eq!(db.count_audit_log().unwrap(), 2);
        let failures = db.list_audit_log(Some("item_failed"), 10).unwrap();
        assert_eq!(failures.len(), 1);
        assert!(!failures[0].success);
        assert_eq!(failures[0].source_id, Some(42));
    }

    #[test]
    fn test_sync_run_lifecycle() {
        let db = setup_db();
        let id = db.start_sync_run(false).unwrap();
        let counts = SyncCounts {
            created: 3,
            failed: 1,
            ..Default::default()
        };
        db.complete_sync_run(&id, &counts, false, Some("ok")).unwrap();

        let runs = db.list_sync_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].counts, counts);
        assert!(runs[0].completed_at.is_some());
    }

    #[test]
    fn test_kv_state() {
        let db = setup_db();
        assert!(db.get_state("last_sync_at").unwrap().is_none());
        db.set_state("last_sync_at", "a").unwrap();
        db.set_state("last_sync_at", "b").unwrap();
        assert_eq!(db.get_state("last_sync_at").unwrap().as_deref(), Some("b"));
    }
}
