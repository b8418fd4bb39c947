//! Sink project provisioning and the repository → project mapping cache.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::db::Database;
use crate::errors::{DatabaseError, ProvisionError, RemoteError};
use crate::models::{AuditEntry, SyncRecord};
use crate::remote::SinkClient;
use crate::retry::{retry, RetryPolicy};

// ---------------------------------------------------------------------------
// Mapping cache
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, String>,
    pending: HashSet<String>,
}

/// In-memory view of the `repository_mappings` table.
///
/// Loaded once at the start of a run and shared by all repository workers.
/// New mappings are marked pending until [`flush`](Self::flush) has written
/// them to the database.
#[derive(Default)]
pub struct RepositoryMappingCache {
    state: Mutex<CacheState>,
}

impl RepositoryMappingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every stored mapping.
    pub fn load(db: &Database) -> Result<Self, DatabaseError> {
        let mappings = db.list_repository_mappings()?;
        let entries = mappings
            .into_iter()
            .map(|m| (m.source_repo, m.target_project_key))
            .collect::<HashMap<_, _>>();
        debug!(count = entries.len(), "loaded repository mappings");
        Ok(Self {
            state: Mutex::new(CacheState {
                entries,
                pending: HashSet::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("mapping cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, repo: &str) -> Option<String> {
        self.lock().entries.get(repo).cloned()
    }

    /// Add or replace a mapping and mark it for the next flush.
    pub fn record(&self, repo: &str, project_key: &str) {
        let mut state = self.lock();
        state.entries.insert(repo.to_string(), project_key.to_string());
        state.pending.insert(repo.to_string());
    }

    /// Add a mapping that is already persisted.
    fn remember(&self, repo: &str, project_key: &str) {
        self.lock()
            .entries
            .insert(repo.to_string(), project_key.to_string());
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Persist all pending mappings. Entries that fail to persist stay
    /// pending. Returns the number written.
    pub fn flush(&self, db: &Database) -> Result<usize, DatabaseError> {
        let pending: Vec<(String, String)> = {
            let state = self.lock();
            state
                .pending
                .iter()
                .filter_map(|repo| state.entries.get(repo).map(|key| (repo.clone(), key.clone())))
                .collect()
        };

        let mut written = 0;
        for (repo, key) in pending {
            db.upsert_repository_mapping(&repo, &key)?;
            self.lock().pending.remove(&repo);
            written += 1;
        }
        if written > 0 {
            debug!(written, "flushed repository mappings");
        }
        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

/// Ensures every repository has a sink project before items are written.
pub struct Provisioner {
    sink: Arc<dyn SinkClient>,
    db: Arc<Database>,
    cache: Arc<RepositoryMappingCache>,
    overrides: BTreeMap<String, String>,
    retry: RetryPolicy,
}

impl Provisioner {
    pub fn new(
        sink: Arc<dyn SinkClient>,
        db: Arc<Database>,
        cache: Arc<RepositoryMappingCache>,
        overrides: BTreeMap<String, String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sink,
            db,
            cache,
            overrides,
            retry,
        }
    }

    /// Return the project key for `repo`, creating the sink project on first
    /// encounter.
    ///
    /// Order: known mapping, manual override (verified on the sink),
    /// case-insensitive name lookup, creation.
    pub async fn ensure_project(&self, repo: &str) -> Result<String, ProvisionError> {
        if let Some(key) = self.known_mapping(repo)? {
            match self.overrides.get(repo) {
                Some(wanted) if *wanted != key => {
                    if self.override_exists(repo, wanted).await? {
                        info!(repo, old = %key, new = %wanted, "manual mapping replaces stored mapping");
                        self.persist(repo, wanted)?;
                        return Ok(wanted.clone());
                    }
                    warn!(repo, project_key = %wanted, "mapped project not found on sink, keeping stored mapping");
                }
                _ => debug!(repo, project_key = %key, "using known project mapping"),
            }
            return Ok(key);
        }

        if let Some(key) = self.resolve_existing(repo).await? {
            self.persist(repo, &key)?;
            return Ok(key);
        }

        let sink = self.sink.clone();
        let key = retry("create_project", &self.retry, || {
            let sink = sink.clone();
            let name = repo.to_string();
            async move { sink.create_project(&name).await }
        })
        .await
        .map_err(|source| remote_err(repo, source))?;

        info!(repo, project_key = %key, "created sink project");
        self.persist(repo, &key)?;
        self.db
            .insert_audit_entry(
                &AuditEntry::success("project_created", &format!("created project {} for {}", key, repo))
                    .repository(repo),
            )
            .map_err(|source| db_err(repo, source))?;
        Ok(key)
    }

    /// Like [`ensure_project`](Self::ensure_project) but never creates or
    /// persists anything. `None` means a project would be created.
    pub async fn plan_project(&self, repo: &str) -> Result<Option<String>, ProvisionError> {
        if let Some(key) = self.known_mapping(repo)? {
            if let Some(wanted) = self.overrides.get(repo) {
                if *wanted != key && self.override_exists(repo, wanted).await? {
                    return Ok(Some(wanted.clone()));
                }
            }
            return Ok(Some(key));
        }
        self.resolve_existing(repo).await
    }

    /// The stored mapping of a source item in `project_key`. Its
    /// `target_entity_id` is the sink entity the item was last written to;
    /// `None` means the item has never been synced into that project.
    pub fn ensure_mapping(
        &self,
        source_id: i64,
        project_key: &str,
    ) -> Result<Option<SyncRecord>, DatabaseError> {
        self.db.get_sync_record(source_id, project_key)
    }

    fn known_mapping(&self, repo: &str) -> Result<Option<String>, ProvisionError> {
        if let Some(key) = self.cache.get(repo) {
            return Ok(Some(key));
        }
        let stored = self
            .db
            .get_repository_mapping(repo)
            .map_err(|source| db_err(repo, source))?;
        if let Some(key) = &stored {
            self.cache.remember(repo, key);
        }
        Ok(stored)
    }

    async fn override_exists(&self, repo: &str, key: &str) -> Result<bool, ProvisionError> {
        let sink = self.sink.clone();
        retry("project_exists", &self.retry, || {
            let sink = sink.clone();
            let key = key.to_string();
            async move { sink.project_exists(&key).await }
        })
        .await
        .map_err(|source| remote_err(repo, source))
    }

    /// Manual override first, then a project with a matching name.
    async fn resolve_existing(&self, repo: &str) -> Result<Option<String>, ProvisionError> {
        if let Some(key) = self.overrides.get(repo) {
            if self.override_exists(repo, key).await? {
                info!(repo, project_key = %key, "using manually mapped project");
                return Ok(Some(key.clone()));
            }
            warn!(repo, project_key = %key, "mapped project not found on sink, falling back to name lookup");
        }

        let sink = self.sink.clone();
        let found = retry("find_project", &self.retry, || {
            let sink = sink.clone();
            let name = repo.to_string();
            async move { sink.find_project(&name).await }
        })
        .await
        .map_err(|source| remote_err(repo, source))?;
        if let Some(key) = &found {
            info!(repo, project_key = %key, "found existing sink project");
        }
        Ok(found)
    }

    fn persist(&self, repo: &str, key: &str) -> Result<(), ProvisionError> {
        self.cache.record(repo, key);
        self.cache
            .flush(&self.db)
            .map_err(|source| db_err(repo, source))?;
        Ok(())
    }
}

fn remote_err(repo: &str, source: RemoteError) -> ProvisionError {
    ProvisionError::Remote {
        repo: repo.to_string(),
        source,
    }
}

fn db_err(repo: &str, source: DatabaseError) -> ProvisionError {
    ProvisionError::Database {
        repo: repo.to_string(),
        source,
    }
}
