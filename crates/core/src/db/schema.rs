//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `user_version`
//! pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS sync_records (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id           INTEGER NOT NULL,
            target_project_key  TEXT    NOT NULL,
            target_entity_id    INTEGER NOT NULL,
            source_fingerprint  TEXT    NOT NULL,
            target_fingerprint  TEXT    NOT NULL DEFAULT '',
            recreate_count      INTEGER NOT NULL DEFAULT 0,
            repository          TEXT    NOT NULL,
            item_kind           TEXT    NOT NULL CHECK (item_kind IN ('issue', 'pull_request')),
            item_number         INTEGER NOT NULL,
            title               TEXT    NOT NULL DEFAULT '',
            state               TEXT    NOT NULL DEFAULT 'open',
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL,
            UNIQUE (source_id, target_project_key)
        );

        CREATE INDEX IF NOT EXISTS idx_sync_records_repository ON sync_records (repository);
        CREATE INDEX IF NOT EXISTS idx_sync_records_updated_at ON sync_records (updated_at);

        CREATE TABLE IF NOT EXISTS repository_mappings (
            source_repo         TEXT PRIMARY KEY,
            target_project_key  TEXT NOT NULL,
            created_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            action            TEXT    NOT NULL,
            repository        TEXT,
            source_id         INTEGER,
            target_entity_id  INTEGER,
            details           TEXT,
            success           INTEGER NOT NULL DEFAULT 1,
            created_at        TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);

        CREATE TABLE IF NOT EXISTS kv_state (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        "#,
    ),
    (
        2,
        "sync run history",
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id            TEXT PRIMARY KEY,
            started_at    TEXT    NOT NULL,
            completed_at  TEXT,
            dry_run       INTEGER NOT NULL DEFAULT 0,
            created       INTEGER NOT NULL DEFAULT 0,
            updated       INTEGER NOT NULL DEFAULT 0,
            skipped       INTEGER NOT NULL DEFAULT 0,
            conflicted    INTEGER NOT NULL DEFAULT 0,
            failed        INTEGER NOT NULL DEFAULT 0,
            cancelled     INTEGER NOT NULL DEFAULT 0,
            details       TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_runs_started_at ON sync_runs (started_at);
        "#,
    ),
    (
        3,
        "manual conflict queue",
        r#"
        CREATE TABLE IF NOT EXISTS conflicts (
            id                  TEXT PRIMARY KEY,
            source_id           INTEGER NOT NULL,
            target_project_key  TEXT    NOT NULL,
            target_entity_id    INTEGER NOT NULL,
            repository          TEXT    NOT NULL,
            source_value        TEXT    NOT NULL,
            target_value        TEXT    NOT NULL,
            source_fingerprint  TEXT    NOT NULL,
            status              TEXT    NOT NULL DEFAULT 'open',
            resolution          TEXT,
            created_at          TEXT    NOT NULL,
            resolved_at         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_conflicts_status ON conflicts (status);
        CREATE INDEX IF NOT EXISTS idx_conflicts_source ON conflicts (source_id, target_project_key);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 3);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        for table in [
            "sync_records",
            "repository_mappings",
            "audit_log",
            "kv_state",
            "sync_runs",
            "conflicts",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_sync_records_unique_per_project() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let insert = "INSERT INTO sync_records (source_id, target_project_key, target_entity_id, \
                      source_fingerprint, repository, item_kind, item_number, created_at, updated_at) \
                      VALUES (42, '7', 1, 'fp', 'backend', 'issue', 1, 'now', 'now')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
