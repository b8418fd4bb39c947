//! SQLite mapping store.
//!
//! One [`Database`] holds the sync records, repository mappings, the conflict
//! queue, the audit log and run history. Query helpers live in [`queries`],
//! the versioned schema in [`schema`].

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// Pragmas applied to every connection.
const CONNECTION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
";

/// Handle to the mapping store, shared between repository workers via `Arc`.
///
/// All access goes through one connection behind a `Mutex`. A guard from
/// [`conn`](Self::conn) must be dropped before the next `.await`, so no
/// store lock is ever held across a network call.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the store at `path`, creating the file and its parent
    /// directories on first use.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        info!(path = %path.display(), "opening mapping store");
        Self::configured(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::configured(Connection::open_in_memory()?)
    }

    fn configured(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch(CONNECTION_PRAGMAS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Bring the schema up to date.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        schema::run_migrations(&self.conn())?;
        debug!("mapping store schema ready");
        Ok(())
    }

    /// Lock the connection, recovering a poisoned lock.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("mapping store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in an immediate (write-locking) transaction. It commits when
    /// `f` returns `Ok` and rolls back otherwise.
    ///
    /// Inside `f` use the `*_on` query variants, which take the connection
    /// instead of locking it again.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
