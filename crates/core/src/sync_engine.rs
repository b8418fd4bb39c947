//! One-way issue → activity synchronization engine.
//!
//! The [`SyncEngine`] runs one pass over the configured repositories:
//!
//! 1. Ensure a sink project exists for the repository.
//! 2. Page through the source items and order them by ascending id.
//! 3. For each item: fingerprint, load the stored record, snapshot the sink
//!    entity, resolve the operation, apply it, then persist the record.
//! 4. Commit in batches of `batch_size`; cancellation is honoured between
//!    batches only.
//!
//! Repositories are processed in parallel up to `workers`. Item failures are
//! reported and skipped, repository failures abort only that repository, and
//! the run always returns a [`SyncReport`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::activity;
use crate::config::SyncConfig;
use crate::conflict::{ChangeDetector, ConflictResolver, Reason, SyncAction, SyncOperation};
use crate::db::queries::NewConflict;
use crate::db::Database;
use crate::errors::{DatabaseError, ErrorClass, RemoteError, SyncError};
use crate::models::{
    ActivityFields, AuditEntry, ItemKind, SinkEntity, SourceItem, SyncCounts, SyncRecord,
};
use crate::provision::{Provisioner, RepositoryMappingCache};
use crate::remote::{SinkClient, SourceClient};
use crate::retry::{retry, RetryPolicy};

/// `kv_state` key holding the completion time of the last applied run.
pub const LAST_SYNC_KEY: &str = "last_sync_at";

const DEFAULT_PAGE_SIZE: u32 = 50;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// One item that could not be synchronized.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub source_id: i64,
    pub number: i64,
    pub kind: ItemKind,
    pub error: String,
    /// The error was transient but the retry budget ran out.
    pub transient: bool,
}

/// An operation computed for one item (applied unless the run is a dry run).
#[derive(Debug, Clone, Serialize)]
pub struct PlannedOperation {
    pub source_id: i64,
    pub number: i64,
    pub kind: ItemKind,
    pub action: SyncAction,
    pub reason: Reason,
    pub target_entity_id: Option<i64>,
}

/// Outcome for one repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryReport {
    pub repository: String,
    pub project_key: Option<String>,
    /// Dry run only: the project does not exist yet and would be created.
    pub project_planned: bool,
    pub counts: SyncCounts,
    pub failures: Vec<ItemFailure>,
    pub operations: Vec<PlannedOperation>,
    /// Repository-level failure (provisioning, listing, persistence).
    pub error: Option<String>,
    pub cancelled: bool,
}

impl RepositoryReport {
    fn new(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            project_key: None,
            project_planned: false,
            counts: SyncCounts::default(),
            failures: Vec::new(),
            operations: Vec::new(),
            error: None,
            cancelled: false,
        }
    }
}

/// Structured result of a sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Option<String>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub repositories: Vec<RepositoryReport>,
    pub totals: SyncCounts,
    /// Run-level failure, e.g. repository discovery.
    pub error: Option<String>,
    pub cancelled: bool,
}

impl SyncReport {
    /// True when any item or repository failed.
    pub fn has_failures(&self) -> bool {
        self.error.is_some()
            || self.totals.failed > 0
            || self.repositories.iter().any(|r| r.error.is_some())
    }

    /// One-line human summary used for logs and the audit trail.
    pub fn summary(&self) -> String {
        format!(
            "{} repositories: {} created, {} updated, {} skipped, {} conflicted, {} failed{}{}",
            self.repositories.len(),
            self.totals.created,
            self.totals.updated,
            self.totals.skipped,
            self.totals.conflicted,
            self.totals.failed,
            if self.dry_run { " (dry run)" } else { "" },
            if self.cancelled { " (cancelled)" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The synchronization engine.
pub struct SyncEngine {
    db: Arc<Database>,
    source: Arc<dyn SourceClient>,
    sink: Arc<dyn SinkClient>,
    cache: Arc<RepositoryMappingCache>,
    page_size: u32,
    /// Start time of the active run; `Some` also prevents concurrent runs.
    active_run: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl SyncEngine {
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn SourceClient>,
        sink: Arc<dyn SinkClient>,
        cache: Arc<RepositoryMappingCache>,
    ) -> Self {
        info!("initializing sync engine");
        Self {
            db,
            source,
            sink,
            cache,
            page_size: DEFAULT_PAGE_SIZE,
            active_run: Arc::new(Mutex::new(None)),
        }
    }

    /// Items requested per source page.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Check if a run is currently in progress.
    pub fn is_running(&self) -> bool {
        lock_active_run(&self.active_run).is_some()
    }

    /// Execute one run without external cancellation.
    pub async fn run(&self, options: &SyncConfig) -> Result<SyncReport, SyncError> {
        self.run_with_cancel(options, CancelToken::new()).await
    }

    /// Execute one run.
    ///
    /// Only invalid options or an already running engine produce `Err`; every
    /// other failure is folded into the returned report.
    pub async fn run_with_cancel(
        &self,
        options: &SyncConfig,
        cancel: CancelToken,
    ) -> Result<SyncReport, SyncError> {
        options.validate()?;

        let started_at = Utc::now();
        {
            let mut active = lock_active_run(&self.active_run);
            if let Some(since) = *active {
                return Err(SyncError::AlreadyRunning {
                    started_at: since.to_rfc3339(),
                });
            }
            *active = Some(started_at);
        }
        let _guard = SyncLockGuard(self.active_run.clone());

        info!(
            dry_run = options.dry_run,
            workers = options.workers,
            policy = %options.conflict_policy,
            "starting sync run"
        );

        let run_id = if options.dry_run {
            None
        } else {
            match self.db.start_sync_run(false) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "could not record sync run start");
                    None
                }
            }
        };

        let policy = RetryPolicy::from_config(&options.retry);
        let mut report = SyncReport {
            run_id,
            dry_run: options.dry_run,
            started_at,
            completed_at: started_at,
            repositories: Vec::new(),
            totals: SyncCounts::default(),
            error: None,
            cancelled: false,
        };

        match self.target_repositories(options, &policy).await {
            Ok(repos) => {
                report.repositories = self.sync_repositories(repos, options, policy, &cancel).await;
            }
            Err(e) => {
                error!(error = %e, "repository discovery failed");
                report.error = Some(e.to_string());
            }
        }

        for repo in &report.repositories {
            report.totals.add(&repo.counts);
        }
        report.cancelled = cancel.is_cancelled() || report.repositories.iter().any(|r| r.cancelled);
        report.completed_at = Utc::now();

        if !options.dry_run {
            self.finish_run(&report);
        }

        info!(summary = %report.summary(), "sync run finished");
        Ok(report)
    }

    /// Configured repositories, or every repository when discovery is on.
    async fn target_repositories(
        &self,
        options: &SyncConfig,
        policy: &RetryPolicy,
    ) -> Result<Vec<String>, SyncError> {
        let repos = if options.discover_repositories {
            let source = self.source.clone();
            retry("list_repositories", policy, || {
                let source = source.clone();
                async move { source.list_repositories().await }
            })
            .await
            .map_err(|source| SyncError::SourceListing {
                repo: self.source.namespace().to_string(),
                source,
            })?
        } else {
            options.repositories.clone()
        };

        let mut unique = Vec::with_capacity(repos.len());
        for repo in repos {
            if !unique.contains(&repo) {
                unique.push(repo);
            }
        }
        debug!(count = unique.len(), "target repositories resolved");
        Ok(unique)
    }

    async fn sync_repositories(
        &self,
        repos: Vec<String>,
        options: &SyncConfig,
        policy: RetryPolicy,
        cancel: &CancelToken,
    ) -> Vec<RepositoryReport> {
        let provisioner = Arc::new(Provisioner::new(
            self.sink.clone(),
            self.db.clone(),
            self.cache.clone(),
            options.projects.clone(),
            policy.clone(),
        ));
        let worker = RepoWorker {
            db: self.db.clone(),
            source: self.source.clone(),
            sink: self.sink.clone(),
            provisioner,
            resolver: ConflictResolver::new(options.conflict_policy),
            retry: policy,
            options: Arc::new(options.clone()),
            page_size: self.page_size,
            cancel: cancel.clone(),
        };
        let permits = Arc::new(Semaphore::new(options.workers));

        let handles: Vec<(String, tokio::task::JoinHandle<RepositoryReport>)> = repos
            .into_iter()
            .map(|repo| {
                let worker = worker.clone();
                let permits = permits.clone();
                let name = repo.clone();
                let handle = tokio::spawn(async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => {
                            let mut report = RepositoryReport::new(&repo);
                            report.error = Some("worker pool closed".into());
                            return report;
                        }
                    };
                    worker.sync_repository(&repo).await
                });
                (name, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (repo, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(repo = %repo, error = %e, "repository worker panicked");
                    let mut report = RepositoryReport::new(&repo);
                    report.error = Some(format!("worker failed: {}", e));
                    reports.push(report);
                }
            }
        }
        reports
    }

    /// Persist run bookkeeping. Failures here are logged, never raised.
    fn finish_run(&self, report: &SyncReport) {
        if let Err(e) = self.cache.flush(&self.db) {
            warn!(error = %e, "failed to flush repository mappings");
        }

        if let Some(id) = &report.run_id {
            let details = serde_json::to_string(report).ok();
            if let Err(e) =
                self.db
                    .complete_sync_run(id, &report.totals, report.cancelled, details.as_deref())
            {
                warn!(error = %e, "failed to record sync run completion");
            }
        }

        if let Err(e) = self
            .db
            .set_state(LAST_SYNC_KEY, &report.completed_at.to_rfc3339())
        {
            warn!(error = %e, "failed to store last sync time");
        }

        let entry = if report.has_failures() {
            AuditEntry::failure("sync_run", &report.summary())
        } else {
            AuditEntry::success("sync_run", &report.summary())
        };
        if let Err(e) = self.db.insert_audit_entry(&entry) {
            warn!(error = %e, "failed to write run audit entry");
        }
    }
}

// ---------------------------------------------------------------------------
// Per-repository worker
// ---------------------------------------------------------------------------

enum ItemError {
    Remote(RemoteError),
    Persistence(DatabaseError),
}

impl From<RemoteError> for ItemError {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}

impl From<DatabaseError> for ItemError {
    fn from(e: DatabaseError) -> Self {
        Self::Persistence(e)
    }
}

/// Everything one repository task needs, shared by `Arc`.
#[derive(Clone)]
struct RepoWorker {
    db: Arc<Database>,
    source: Arc<dyn SourceClient>,
    sink: Arc<dyn SinkClient>,
    provisioner: Arc<Provisioner>,
    resolver: ConflictResolver,
    retry: RetryPolicy,
    options: Arc<SyncConfig>,
    page_size: u32,
    cancel: CancelToken,
}

impl RepoWorker {
    async fn sync_repository(&self, repo: &str) -> RepositoryReport {
        let mut report = RepositoryReport::new(repo);
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return report;
        }
        info!(repo, "syncing repository");

        let project_key = match self.project_for(repo, &mut report).await {
            Some(key) => key,
            None => return report,
        };

        let items = match self.fetch_items(repo).await {
            Ok(items) => items,
            Err(e) => {
                error!(repo, error = %e, "failed to list items");
                report.error = Some(e.to_string());
                return report;
            }
        };
        info!(repo, count = items.len(), "fetched items");

        for (index, batch) in items.chunks(self.options.batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                info!(repo, batch = index, "cancellation requested, stopping before batch");
                report.cancelled = true;
                break;
            }
            debug!(repo, batch = index, size = batch.len(), "processing batch");

            for item in batch {
                match self.process_item(repo, &project_key, report.project_planned, item).await {
                    Ok((op, entity_id)) => {
                        match op.action {
                            SyncAction::Create => report.counts.created += 1,
                            SyncAction::Update => report.counts.updated += 1,
                            SyncAction::Skip => report.counts.skipped += 1,
                            SyncAction::Conflict => report.counts.conflicted += 1,
                        }
                        report.operations.push(PlannedOperation {
                            source_id: item.id,
                            number: item.number,
                            kind: item.kind,
                            action: op.action,
                            reason: op.reason,
                            target_entity_id: entity_id,
                        });
                    }
                    Err(ItemError::Remote(e)) => {
                        let transient = e.class() == ErrorClass::Transient;
                        warn!(repo, source_id = item.id, error = %e, transient, "item failed");
                        self.record_failure(repo, &mut report, item, e.to_string(), transient);
                    }
                    Err(ItemError::Persistence(e)) => {
                        error!(repo, source_id = item.id, error = %e, "mapping store failure, aborting repository");
                        self.record_failure(repo, &mut report, item, e.to_string(), false);
                        report.error = Some(format!("persistence failure: {}", e));
                        return report;
                    }
                }
            }
        }

        info!(
            repo,
            created = report.counts.created,
            updated = report.counts.updated,
            skipped = report.counts.skipped,
            conflicted = report.counts.conflicted,
            failed = report.counts.failed,
            "repository done"
        );
        report
    }

    /// Resolve the project key, or record a repository-level failure.
    async fn project_for(&self, repo: &str, report: &mut RepositoryReport) -> Option<String> {
        if self.options.dry_run {
            return match self.provisioner.plan_project(repo).await {
                Ok(Some(key)) => {
                    report.project_key = Some(key.clone());
                    Some(key)
                }
                Ok(None) => {
                    report.project_planned = true;
                    Some(format!("(planned:{})", repo))
                }
                Err(e) => {
                    error!(repo, error = %e, "project lookup failed");
                    report.error = Some(e.to_string());
                    None
                }
            };
        }

        match self.provisioner.ensure_project(repo).await {
            Ok(key) => {
                report.project_key = Some(key.clone());
                Some(key)
            }
            Err(e) => {
                error!(repo, error = %e, "provisioning failed, skipping repository");
                report.error = Some(e.to_string());
                self.audit(AuditEntry::failure("provision_failed", &e.to_string()).repository(repo));
                None
            }
        }
    }

    /// All items of the repository, de-duplicated and in ascending id order.
    async fn fetch_items(&self, repo: &str) -> Result<Vec<SourceItem>, SyncError> {
        let mut by_id: BTreeMap<i64, SourceItem> = BTreeMap::new();
        let mut page = 1u32;
        loop {
            let source = self.source.clone();
            let page_size = self.page_size;
            let include_prs = self.options.include_pull_requests;
            let (items, has_more) = retry("list_items", &self.retry, || {
                let source = source.clone();
                let repo = repo.to_string();
                async move { source.list_items(&repo, page, page_size, include_prs).await }
            })
            .await
            .map_err(|source| SyncError::SourceListing {
                repo: repo.to_string(),
                source,
            })?;

            let fetched = items.len();
            for item in items {
                by_id.insert(item.id, item);
            }
            if !has_more || fetched == 0 {
                break;
            }
            page += 1;
        }
        Ok(by_id.into_values().collect())
    }

    /// Resolve and apply one item. Returns the operation and the sink entity
    /// it now maps to.
    async fn process_item(
        &self,
        repo: &str,
        project_key: &str,
        project_planned: bool,
        item: &SourceItem,
    ) -> Result<(SyncOperation, Option<i64>), ItemError> {
        let fields = activity::render(item, self.source.namespace(), repo);

        let record = if project_planned {
            None
        } else {
            self.provisioner.ensure_mapping(item.id, project_key)?
        };

        let snapshot = match &record {
            Some(r) => {
                let sink = self.sink.clone();
                let id = r.target_entity_id;
                retry("get_entity", &self.retry, || {
                    let sink = sink.clone();
                    async move { sink.get_entity(id).await }
                })
                .await?
            }
            None => None,
        };

        let op = self.resolver.resolve(item, record.as_ref(), snapshot.as_ref());
        let current_id = match (&record, &snapshot) {
            (Some(r), Some(_)) => Some(r.target_entity_id),
            _ => None,
        };

        if self.options.dry_run {
            debug!(repo, source_id = item.id, action = %op.action, reason = %op.reason, "dry run");
            return Ok((op, current_id));
        }

        let entity_id = self
            .apply(repo, project_key, item, &fields, &op, record, snapshot)
            .await?;
        Ok((op, entity_id))
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        repo: &str,
        project_key: &str,
        item: &SourceItem,
        fields: &ActivityFields,
        op: &SyncOperation,
        record: Option<SyncRecord>,
        snapshot: Option<SinkEntity>,
    ) -> Result<Option<i64>, ItemError> {
        let source_fp = ChangeDetector::fingerprint(item);

        if op.writes_source() {
            let entity_id = match (op.action, &record) {
                (SyncAction::Update, Some(r)) | (SyncAction::Conflict, Some(r)) => {
                    self.update_entity(r.target_entity_id, fields).await?;
                    r.target_entity_id
                }
                _ => self.create_or_adopt(repo, project_key, item, fields).await?,
            };

            let recreate_count = match &record {
                Some(r) if op.is_recreate() => r.recreate_count + 1,
                Some(r) => r.recreate_count,
                None => 0,
            };
            self.db.upsert_sync_record(&build_record(
                repo,
                project_key,
                item,
                entity_id,
                source_fp,
                ChangeDetector::sink_fingerprint(fields),
                recreate_count,
                record.as_ref(),
            ))?;

            if op.action == SyncAction::Conflict {
                let previous = snapshot
                    .as_ref()
                    .and_then(|s| serde_json::to_string(&s.fields()).ok())
                    .unwrap_or_default();
                info!(repo, source_id = item.id, entity_id, "conflict resolved, source value written");
                self.audit(
                    AuditEntry::success(
                        "conflict_resolved",
                        &format!("policy {}: source overwrote sink; previous sink value {}", op.reason, previous),
                    )
                    .repository(repo)
                    .item(item.id, Some(entity_id)),
                );
            }
            if op.is_recreate() {
                info!(repo, source_id = item.id, entity_id, recreate_count, "recreated missing activity");
            }
            return Ok(Some(entity_id));
        }

        let (record, entity) = match (record, snapshot) {
            (Some(r), Some(e)) => (r, e),
            // Skip without a live entity cannot happen; nothing to persist.
            (r, _) => return Ok(r.map(|r| r.target_entity_id)),
        };

        if op.adopts_sink() {
            let sink_fp = ChangeDetector::sink_fingerprint(&entity.fields());
            self.db.upsert_sync_record(&build_record(
                repo,
                project_key,
                item,
                entity.id,
                source_fp,
                sink_fp,
                record.recreate_count,
                Some(&record),
            ))?;
            info!(repo, source_id = item.id, entity_id = entity.id, "conflict resolved, sink value kept");
            self.audit(
                AuditEntry::success(
                    "conflict_resolved",
                    &format!("policy {}: sink value kept", op.reason),
                )
                .repository(repo)
                .item(item.id, Some(entity.id)),
            );
        } else if op.needs_review() {
            let source_value = serde_json::to_string(fields)
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            let target_value = serde_json::to_string(&entity.fields())
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            let conflict_id = self.db.upsert_open_conflict(&NewConflict {
                source_id: item.id,
                target_project_key: project_key,
                target_entity_id: entity.id,
                repository: repo,
                source_value: &source_value,
                target_value: &target_value,
                source_fingerprint: &source_fp,
            })?;
            warn!(repo, source_id = item.id, conflict_id = %conflict_id, "conflict queued for review");
            self.audit(
                AuditEntry::success("conflict_queued", &format!("conflict {} awaiting review", conflict_id))
                    .repository(repo)
                    .item(item.id, Some(entity.id)),
            );
        } else if op.reason == Reason::SinkDrift {
            debug!(repo, source_id = item.id, entity_id = entity.id, "sink edited independently, leaving it");
        }

        Ok(Some(entity.id))
    }

    /// Create the activity unless one carrying the item's marker already
    /// exists (e.g. the mapping was lost after a crash); that one is adopted.
    async fn create_or_adopt(
        &self,
        repo: &str,
        project_key: &str,
        item: &SourceItem,
        fields: &ActivityFields,
    ) -> Result<i64, RemoteError> {
        let marker = activity::external_ref(self.source.namespace(), repo, item.number);
        let sink = self.sink.clone();
        let existing = retry("find_entity", &self.retry, || {
            let sink = sink.clone();
            let project = project_key.to_string();
            let marker = marker.clone();
            async move { sink.find_entity(&project, &marker).await }
        })
        .await?;

        if let Some(entity) = existing {
            info!(repo, source_id = item.id, entity_id = entity.id, "adopting existing activity");
            if entity.fields() != *fields {
                self.update_entity(entity.id, fields).await?;
            }
            return Ok(entity.id);
        }

        retry("create_entity", &self.retry, || {
            let sink = sink.clone();
            let project = project_key.to_string();
            let fields = fields.clone();
            async move { sink.create_entity(&project, &fields).await }
        })
        .await
    }

    async fn update_entity(&self, entity_id: i64, fields: &ActivityFields) -> Result<(), RemoteError> {
        let sink = self.sink.clone();
        retry("update_entity", &self.retry, || {
            let sink = sink.clone();
            let fields = fields.clone();
            async move { sink.update_entity(entity_id, &fields).await }
        })
        .await
    }

    fn record_failure(
        &self,
        repo: &str,
        report: &mut RepositoryReport,
        item: &SourceItem,
        error: String,
        transient: bool,
    ) {
        report.counts.failed += 1;
        self.audit(
            AuditEntry::failure("item_failed", &format!("#{}: {}", item.number, error))
                .repository(repo)
                .item(item.id, None),
        );
        report.failures.push(ItemFailure {
            source_id: item.id,
            number: item.number,
            kind: item.kind,
            error,
            transient,
        });
    }

    fn audit(&self, entry: AuditEntry) {
        if self.options.dry_run {
            return;
        }
        if let Err(e) = self.db.insert_audit_entry(&entry) {
            warn!(action = %entry.action, error = %e, "failed to write audit entry");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_record(
    repo: &str,
    project_key: &str,
    item: &SourceItem,
    entity_id: i64,
    source_fingerprint: String,
    target_fingerprint: String,
    recreate_count: u32,
    previous: Option<&SyncRecord>,
) -> SyncRecord {
    let now = Utc::now();
    SyncRecord {
        source_id: item.id,
        target_project_key: project_key.to_string(),
        target_entity_id: entity_id,
        source_fingerprint,
        target_fingerprint,
        recreate_count,
        repository: repo.to_string(),
        item_kind: item.kind,
        item_number: item.number,
        title: item.title.clone(),
        state: item.state,
        created_at: previous.map(|r| r.created_at).unwrap_or(now),
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// Sync lock RAII guard
// ---------------------------------------------------------------------------

/// Drop guard that clears the active run.
struct SyncLockGuard(Arc<Mutex<Option<DateTime<Utc>>>>);

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        *lock_active_run(&self.0) = None;
    }
}

fn lock_active_run(
    active: &Mutex<Option<DateTime<Utc>>>,
) -> MutexGuard<'_, Option<DateTime<Utc>>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_report_summary_and_failures() {
        let now = Utc::now();
        let mut repo = RepositoryReport::new("backend");
        repo.counts.created = 2;
        let mut report = SyncReport {
            run_id: None,
            dry_run: true,
            started_at: now,
            completed_at: now,
            repositories: vec![repo],
            totals: SyncCounts {
                created: 2,
                ..Default::default()
            },
            error: None,
            cancelled: false,
        };
        assert!(!report.has_failures());
        assert_eq!(
            report.summary(),
            "1 repositories: 2 created, 0 updated, 0 skipped, 0 conflicted, 0 failed (dry run)"
        );

        report.repositories[0].error = Some("provisioning failed".into());
        assert!(report.has_failures());
    }

    #[test]
    fn test_build_record_keeps_created_at() {
        let item = SourceItem {
            id: 42,
            number: 1,
            kind: ItemKind::Issue,
            title: "Fix bug".into(),
            body: String::new(),
            state: crate::models::ItemState::Open,
            labels: vec![],
            updated_at: Utc::now(),
        };
        let first = build_record("backend", "3", &item, 9, "a".into(), "b".into(), 0, None);
        let earlier = first.created_at - chrono::Duration::days(3);
        let previous = SyncRecord {
            created_at: earlier,
            ..first.clone()
        };
        let second = build_record("backend", "3", &item, 10, "c".into(), "d".into(), 1, Some(&previous));
        assert_eq!(second.created_at, earlier);
        assert_eq!(second.target_entity_id, 10);
        assert_eq!(second.recreate_count, 1);
    }
}
