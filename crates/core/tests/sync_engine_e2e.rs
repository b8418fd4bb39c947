//! End-to-end tests for the issue → activity sync engine.
//!
//! These tests exercise the real `SyncEngine` with:
//! - An in-process fake source serving paged items
//! - An in-process fake sink with failure injection
//! - Real SQLite databases (in-memory)
//!
//! No network I/O.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use tracksync_core::activity;
use tracksync_core::config::{ConflictPolicy, RetryConfig, SyncConfig};
use tracksync_core::conflict::{ConflictReview, Reason, SyncAction};
use tracksync_core::db::Database;
use tracksync_core::errors::{RemoteError, SyncError};
use tracksync_core::models::{ActivityFields, ItemKind, ItemState, SinkEntity, SourceItem};
use tracksync_core::provision::RepositoryMappingCache;
use tracksync_core::remote::{SinkClient, SourceClient};
use tracksync_core::sync_engine::{CancelToken, SyncEngine, LAST_SYNC_KEY};

const ORG: &str = "acme";

// ===========================================================================
// Fake source
// ===========================================================================

#[derive(Default)]
struct FakeSource {
    repos: Mutex<BTreeMap<String, Vec<SourceItem>>>,
    fail_discovery: Mutex<bool>,
    list_delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeSource {
    fn with_items(repo: &str, items: Vec<SourceItem>) -> Self {
        let source = Self::default();
        source.set_items(repo, items);
        source
    }

    fn set_items(&self, repo: &str, items: Vec<SourceItem>) {
        self.repos.lock().unwrap().insert(repo.to_string(), items);
    }

    fn edit(&self, repo: &str, id: i64, f: impl FnOnce(&mut SourceItem)) {
        let mut repos = self.repos.lock().unwrap();
        let item = repos
            .get_mut(repo)
            .and_then(|items| items.iter_mut().find(|i| i.id == id))
            .expect("item exists");
        f(item);
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    fn namespace(&self) -> &str {
        ORG
    }

    async fn list_repositories(&self) -> Result<Vec<String>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_discovery.lock().unwrap() {
            return Err(RemoteError::Unauthorized {
                status: 401,
                detail: "bad token".into(),
            });
        }
        Ok(self.repos.lock().unwrap().keys().cloned().collect())
    }

    async fn list_items(
        &self,
        repo: &str,
        page: u32,
        page_size: u32,
        include_pull_requests: bool,
    ) -> Result<(Vec<SourceItem>, bool), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        let repos = self.repos.lock().unwrap();
        let all: Vec<SourceItem> = repos
            .get(repo)
            .cloned()
            .ok_or_else(|| RemoteError::Client {
                status: 404,
                body: format!("repository {} not found", repo),
            })?
            .into_iter()
            .filter(|i| include_pull_requests || i.kind == ItemKind::Issue)
            .collect();
        let start = ((page - 1) * page_size) as usize;
        let end = (start + page_size as usize).min(all.len());
        let slice = if start < all.len() {
            all[start..end].to_vec()
        } else {
            Vec::new()
        };
        Ok((slice, end < all.len()))
    }
}

// ===========================================================================
// Fake sink
// ===========================================================================

#[derive(Default)]
struct SinkState {
    projects: BTreeMap<i64, String>,
    activities: BTreeMap<i64, SinkEntity>,
    next_id: i64,
    /// Number of upcoming writes that fail with a 503.
    transient_failures: u32,
    /// Creates whose comment carries this marker are rejected with a 422.
    reject_ref: Option<String>,
    /// Project names whose creation is refused.
    broken_projects: HashSet<String>,
    creates: u32,
    updates: u32,
    cancel_after_create: Option<CancelToken>,
}

#[derive(Default)]
struct FakeSink {
    state: Mutex<SinkState>,
}

impl FakeSink {
    fn activities(&self) -> Vec<SinkEntity> {
        self.state.lock().unwrap().activities.values().cloned().collect()
    }

    fn activity(&self, id: i64) -> Option<SinkEntity> {
        self.state.lock().unwrap().activities.get(&id).cloned()
    }

    fn project_count(&self) -> usize {
        self.state.lock().unwrap().projects.len()
    }

    fn writes(&self) -> (u32, u32) {
        let state = self.state.lock().unwrap();
        (state.creates, state.updates)
    }

    /// Simulate a user editing the activity in the sink UI.
    fn edit_comment(&self, id: i64, comment: &str) {
        let mut state = self.state.lock().unwrap();
        let entity = state.activities.get_mut(&id).expect("activity exists");
        entity.comment = comment.to_string();
        entity.updated_at = Some(Utc::now());
    }

    fn delete(&self, id: i64) {
        self.state.lock().unwrap().activities.remove(&id);
    }

    fn next_id(state: &mut SinkState) -> i64 {
        state.next_id += 1;
        state.next_id
    }

    fn take_transient(state: &mut SinkState) -> Result<(), RemoteError> {
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(RemoteError::Server {
                status: 503,
                body: "maintenance".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SinkClient for FakeSink {
    async fn find_project(&self, name: &str) -> Result<Option<String>, RemoteError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .projects
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(id, _)| id.to_string()))
    }

    async fn project_exists(&self, key: &str) -> Result<bool, RemoteError> {
        let id: i64 = key.parse().map_err(|_| RemoteError::Validation(key.into()))?;
        Ok(self.state.lock().unwrap().projects.contains_key(&id))
    }

    async fn create_project(&self, name: &str) -> Result<String, RemoteError> {
        let mut state = self.state.lock().unwrap();
        if state.broken_projects.contains(name) {
            return Err(RemoteError::Unauthorized {
                status: 403,
                detail: "not allowed to create projects".into(),
            });
        }
        let id = Self::next_id(&mut state);
        state.projects.insert(id, name.to_string());
        Ok(id.to_string())
    }

    async fn find_entity(
        &self,
        project_key: &str,
        external_ref: &str,
    ) -> Result<Option<SinkEntity>, RemoteError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .activities
            .values()
            .find(|a| a.project_key == project_key && activity::has_external_ref(&a.comment, external_ref))
            .cloned())
    }

    async fn get_entity(&self, entity_id: i64) -> Result<Option<SinkEntity>, RemoteError> {
        Ok(self.state.lock().unwrap().activities.get(&entity_id).cloned())
    }

    async fn create_entity(&self, project_key: &str, fields: &ActivityFields) -> Result<i64, RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::take_transient(&mut state)?;
        if let Some(marker) = &state.reject_ref {
            if activity::has_external_ref(&fields.comment, marker) {
                return Err(RemoteError::Validation("name: this value is not valid".into()));
            }
        }
        let id = Self::next_id(&mut state);
        state.activities.insert(
            id,
            SinkEntity {
                id,
                project_key: project_key.to_string(),
                name: fields.name.clone(),
                comment: fields.comment.clone(),
                visible: fields.visible,
                updated_at: None,
            },
        );
        state.creates += 1;
        if let Some(token) = &state.cancel_after_create {
            token.cancel();
        }
        Ok(id)
    }

    async fn update_entity(&self, entity_id: i64, fields: &ActivityFields) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::take_transient(&mut state)?;
        let entity = state
            .activities
            .get_mut(&entity_id)
            .ok_or_else(|| RemoteError::Client {
                status: 404,
                body: "activity not found".into(),
            })?;
        entity.name = fields.name.clone();
        entity.comment = fields.comment.clone();
        entity.visible = fields.visible;
        entity.updated_at = None;
        state.updates += 1;
        Ok(())
    }
}

// ===========================================================================
// Helpers
// ===========================================================================

fn ts(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap()
}

fn issue(id: i64, number: i64, title: &str) -> SourceItem {
    SourceItem {
        id,
        number,
        kind: ItemKind::Issue,
        title: title.to_string(),
        body: "Steps to reproduce".to_string(),
        state: ItemState::Open,
        labels: vec!["bug".to_string()],
        updated_at: ts(0),
    }
}

fn options(repos: &[&str]) -> SyncConfig {
    SyncConfig {
        repositories: repos.iter().map(|r| r.to_string()).collect(),
        retry: RetryConfig {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            factor: 1.0,
        },
        ..SyncConfig::default()
    }
}

fn setup_db() -> Arc<Database> {
    let db = Database::in_memory().unwrap();
    db.initialize().unwrap();
    Arc::new(db)
}

fn engine(db: &Arc<Database>, source: &Arc<FakeSource>, sink: &Arc<FakeSink>) -> SyncEngine {
    let cache = Arc::new(RepositoryMappingCache::load(db).unwrap());
    SyncEngine::new(db.clone(), source.clone(), sink.clone(), cache).with_page_size(2)
}

fn only_project_key(db: &Database, repo: &str) -> String {
    db.get_repository_mapping(repo).unwrap().expect("repository mapped")
}

// ===========================================================================
// Lifecycle of a single item
// ===========================================================================

#[tokio::test]
async fn test_item_lifecycle_create_skip_update_recreate() {
    let db = setup_db();
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(42, 7, "Login fails")]));
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);
    let opts = options(&["backend"]);

    // First run: create.
    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.totals.created, 1);
    assert!(!report.has_failures());
    let project = only_project_key(&db, "backend");
    let record = db.get_sync_record(42, &project).unwrap().expect("record stored");
    let entity = sink.activity(record.target_entity_id).expect("activity exists");
    assert_eq!(entity.name, "[Issue] #7: Login fails");
    assert!(activity::has_external_ref(&entity.comment, "[tracksync] acme/backend#7"));
    assert_eq!(record.recreate_count, 0);

    // Second run, nothing changed: skip without writes.
    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.totals.skipped, 1);
    assert_eq!(report.totals.total(), 1);
    assert_eq!(sink.writes(), (1, 0));

    // Source edit: update in place.
    source.edit("backend", 42, |i| {
        i.title = "Login fails on Safari".into();
        i.updated_at = ts(5);
    });
    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.totals.updated, 1);
    let op = &report.repositories[0].operations[0];
    assert_eq!((op.action, op.reason), (SyncAction::Update, Reason::SourceChanged));
    assert_eq!(
        sink.activity(record.target_entity_id).unwrap().name,
        "[Issue] #7: Login fails on Safari"
    );

    // Sink entity deleted out of band: recreated, counter bumped.
    sink.delete(record.target_entity_id);
    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.totals.created, 1);
    assert_eq!(report.repositories[0].operations[0].reason, Reason::SinkMissing);
    let recreated = db.get_sync_record(42, &project).unwrap().unwrap();
    assert_eq!(recreated.recreate_count, 1);
    assert_ne!(recreated.target_entity_id, record.target_entity_id);
    assert_eq!(recreated.created_at, record.created_at);
    assert_eq!(sink.activities().len(), 1);

    assert!(db.get_state(LAST_SYNC_KEY).unwrap().is_some());
    let runs = db.list_sync_runs(10).unwrap();
    assert_eq!(runs.len(), 4);
    assert!(runs.iter().all(|r| r.completed_at.is_some()));
}

#[tokio::test]
async fn test_sink_only_change_is_left_alone() {
    let db = setup_db();
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(42, 7, "Login fails")]));
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);
    let opts = options(&["backend"]);

    engine.run(&opts).await.unwrap();
    let entity_id = sink.activities()[0].id;
    sink.edit_comment(entity_id, "tracked in the Q3 budget");

    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.totals.skipped, 1);
    assert_eq!(report.repositories[0].operations[0].reason, Reason::SinkDrift);
    assert_eq!(sink.activity(entity_id).unwrap().comment, "tracked in the Q3 budget");
}

// ===========================================================================
// Conflict policies
// ===========================================================================

async fn run_conflict(policy: ConflictPolicy) -> (Arc<Database>, Arc<FakeSource>, Arc<FakeSink>, SyncEngine, i64) {
    let db = setup_db();
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(42, 7, "Login fails")]));
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);
    let mut opts = options(&["backend"]);
    opts.conflict_policy = policy;

    engine.run(&opts).await.unwrap();
    let entity_id = sink.activities()[0].id;

    sink.edit_comment(entity_id, "edited in Kimai");
    source.edit("backend", 42, |i| {
        i.title = "Login fails everywhere".into();
        i.updated_at = ts(10);
    });

    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.totals.conflicted, 1);
    assert_eq!(report.repositories[0].operations[0].action, SyncAction::Conflict);
    (db, source, sink, engine, entity_id)
}

#[tokio::test]
async fn test_conflict_source_wins_overwrites_and_audits() {
    let (db, _source, sink, _engine, entity_id) = run_conflict(ConflictPolicy::SourceWins).await;

    let entity = sink.activity(entity_id).unwrap();
    assert_eq!(entity.name, "[Issue] #7: Login fails everywhere");
    assert_ne!(entity.comment, "edited in Kimai");

    let audits = db.list_audit_log(Some("conflict_resolved"), 10).unwrap();
    assert_eq!(audits.len(), 1);
    let details = audits[0].details.clone().unwrap_or_default();
    assert!(details.contains("edited in Kimai"), "previous sink value kept in audit: {details}");
    assert_eq!(audits[0].source_id, Some(42));
}

#[tokio::test]
async fn test_conflict_sink_wins_keeps_sink_and_settles() {
    let (db, _source, sink, engine, entity_id) = run_conflict(ConflictPolicy::SinkWins).await;
    assert_eq!(sink.activity(entity_id).unwrap().comment, "edited in Kimai");

    let mut opts = options(&["backend"]);
    opts.conflict_policy = ConflictPolicy::SinkWins;
    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.totals.skipped, 1);
    assert_eq!(report.repositories[0].operations[0].reason, Reason::Unchanged);
    assert_eq!(db.list_audit_log(Some("conflict_resolved"), 10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_last_write_wins_keeps_newer_sink() {
    let (_db, _source, sink, _engine, entity_id) = run_conflict(ConflictPolicy::LastWriteWins).await;
    // The sink edit is stamped "now", the source edit is in 2025.
    assert_eq!(sink.activity(entity_id).unwrap().comment, "edited in Kimai");
}

#[tokio::test]
async fn test_manual_policy_queues_then_accept_source_applies() {
    let (db, _source, sink, engine, entity_id) = run_conflict(ConflictPolicy::Manual).await;
    assert_eq!(sink.activity(entity_id).unwrap().comment, "edited in Kimai");

    let mut opts = options(&["backend"]);
    opts.conflict_policy = ConflictPolicy::Manual;

    // A second run does not queue the same conflict twice.
    engine.run(&opts).await.unwrap();
    let open = db.list_conflicts(Some("open"), 10).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].source_id, 42);
    assert_eq!(open[0].target_entity_id, entity_id);

    ConflictReview::accept_source(&open[0].id, &db).unwrap();
    assert!(db.list_conflicts(Some("open"), 10).unwrap().is_empty());

    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.totals.updated, 1);
    assert_eq!(sink.activity(entity_id).unwrap().name, "[Issue] #7: Login fails everywhere");
}

#[tokio::test]
async fn test_manual_policy_accept_sink_settles() {
    let (db, _source, sink, engine, entity_id) = run_conflict(ConflictPolicy::Manual).await;
    let open = db.list_conflicts(Some("open"), 10).unwrap();
    ConflictReview::accept_sink(&open[0].id, &db).unwrap();

    let mut opts = options(&["backend"]);
    opts.conflict_policy = ConflictPolicy::Manual;
    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.totals.skipped, 1);
    assert_eq!(sink.activity(entity_id).unwrap().comment, "edited in Kimai");
}

// ===========================================================================
// Idempotence, ordering, uniqueness
// ===========================================================================

#[tokio::test]
async fn test_repeated_runs_are_idempotent() {
    let db = setup_db();
    let items = (1..=5).map(|n| issue(100 + n, n, &format!("Task {n}"))).collect();
    let source = Arc::new(FakeSource::with_items("backend", items));
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);
    let opts = options(&["backend"]);

    let first = engine.run(&opts).await.unwrap();
    assert_eq!(first.totals.created, 5);
    let ids: Vec<i64> = first.repositories[0].operations.iter().map(|o| o.source_id).collect();
    assert_eq!(ids, vec![101, 102, 103, 104, 105]);

    for _ in 0..2 {
        let report = engine.run(&opts).await.unwrap();
        assert_eq!(report.totals.skipped, 5);
        assert_eq!(report.totals.created + report.totals.updated, 0);
    }
    assert_eq!(sink.activities().len(), 5);
    assert_eq!(db.count_sync_records().unwrap(), 5);
    assert_eq!(sink.project_count(), 1);
}

#[tokio::test]
async fn test_duplicate_items_across_pages_map_once() {
    let db = setup_db();
    // Page size is 2: the duplicate lands on a later page.
    let items = vec![issue(3, 3, "c"), issue(1, 1, "a"), issue(2, 2, "b"), issue(1, 1, "a")];
    let source = Arc::new(FakeSource::with_items("backend", items));
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);

    let report = engine.run(&options(&["backend"])).await.unwrap();
    assert_eq!(report.totals.created, 3);
    let ids: Vec<i64> = report.repositories[0].operations.iter().map(|o| o.source_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(db.count_sync_records().unwrap(), 3);
    assert_eq!(sink.activities().len(), 3);
}

#[tokio::test]
async fn test_pull_requests_only_when_enabled() {
    let db = setup_db();
    let mut pr = issue(9, 4, "Add cache");
    pr.kind = ItemKind::PullRequest;
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(8, 3, "Bug"), pr]));
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);

    let mut opts = options(&["backend"]);
    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.totals.created, 1);

    opts.include_pull_requests = true;
    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.totals.created, 1);
    assert_eq!(report.totals.skipped, 1);
    assert!(sink.activities().iter().any(|a| a.name == "[PR] #4: Add cache"));
}

#[tokio::test]
async fn test_existing_activity_is_adopted_instead_of_duplicated() {
    let db = setup_db();
    let item = issue(42, 7, "Login fails");
    let source = Arc::new(FakeSource::with_items("backend", vec![item.clone()]));
    let sink = Arc::new(FakeSink::default());

    // A previous run created project and activity but its mapping was lost.
    let project = sink.create_project("backend").await.unwrap();
    let fields = activity::render(&item, ORG, "backend");
    let existing = sink.create_entity(&project, &fields).await.unwrap();

    let engine = engine(&db, &source, &sink);
    let report = engine.run(&options(&["backend"])).await.unwrap();
    assert_eq!(report.totals.created, 1);
    assert_eq!(sink.activities().len(), 1);
    assert_eq!(sink.writes(), (1, 0));
    let record = db.get_sync_record(42, &project).unwrap().unwrap();
    assert_eq!(record.target_entity_id, existing);
}

// ===========================================================================
// Dry run
// ===========================================================================

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let db = setup_db();
    let items = vec![issue(1, 1, "a"), issue(2, 2, "b")];
    let source = Arc::new(FakeSource::with_items("backend", items));
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);

    let mut opts = options(&["backend"]);
    opts.dry_run = true;
    let report = engine.run(&opts).await.unwrap();

    assert!(report.dry_run);
    assert!(report.run_id.is_none());
    let repo = &report.repositories[0];
    assert!(repo.project_planned);
    assert_eq!(repo.operations.len(), 2);
    assert!(repo.operations.iter().all(|o| o.action == SyncAction::Create));

    assert_eq!(sink.project_count(), 0);
    assert!(sink.activities().is_empty());
    assert_eq!(db.count_sync_records().unwrap(), 0);
    assert!(db.list_repository_mappings().unwrap().is_empty());
    assert_eq!(db.count_audit_log().unwrap(), 0);
    assert!(db.list_sync_runs(10).unwrap().is_empty());
    assert!(db.get_state(LAST_SYNC_KEY).unwrap().is_none());
}

#[tokio::test]
async fn test_dry_run_after_sync_reports_pending_update() {
    let db = setup_db();
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(42, 7, "Login fails")]));
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);

    engine.run(&options(&["backend"])).await.unwrap();
    source.edit("backend", 42, |i| {
        i.state = ItemState::Closed;
        i.updated_at = ts(30);
    });

    let mut opts = options(&["backend"]);
    opts.dry_run = true;
    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.totals.updated, 1);
    assert!(!report.repositories[0].project_planned);
    assert_eq!(sink.writes(), (1, 0));

    let project = only_project_key(&db, "backend");
    let record = db.get_sync_record(42, &project).unwrap().unwrap();
    assert_eq!(record.state, ItemState::Open);
}

// ===========================================================================
// Failure handling
// ===========================================================================

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let db = setup_db();
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(1, 1, "a")]));
    let sink = Arc::new(FakeSink::default());
    sink.state.lock().unwrap().transient_failures = 2;
    let engine = engine(&db, &source, &sink);

    let report = engine.run(&options(&["backend"])).await.unwrap();
    assert_eq!(report.totals.created, 1);
    assert_eq!(report.totals.failed, 0);
    assert_eq!(sink.activities().len(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_item() {
    let db = setup_db();
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(1, 1, "a")]));
    let sink = Arc::new(FakeSink::default());
    sink.state.lock().unwrap().transient_failures = 10;
    let engine = engine(&db, &source, &sink);

    let report = engine.run(&options(&["backend"])).await.unwrap();
    assert_eq!(report.totals.failed, 1);
    let failure = &report.repositories[0].failures[0];
    assert!(failure.transient);
    assert_eq!(db.count_sync_records().unwrap(), 0);
}

#[tokio::test]
async fn test_permanent_item_failure_does_not_stop_the_repository() {
    let db = setup_db();
    let items = vec![issue(1, 1, "a"), issue(2, 2, "b"), issue(3, 3, "c")];
    let source = Arc::new(FakeSource::with_items("backend", items));
    let sink = Arc::new(FakeSink::default());
    sink.state.lock().unwrap().reject_ref = Some(activity::external_ref(ORG, "backend", 2));
    let engine = engine(&db, &source, &sink);

    let report = engine.run(&options(&["backend"])).await.unwrap();
    assert_eq!(report.totals.created, 2);
    assert_eq!(report.totals.failed, 1);
    let repo = &report.repositories[0];
    assert!(repo.error.is_none());
    assert_eq!(repo.failures[0].number, 2);
    assert!(!repo.failures[0].transient);
    assert!(report.has_failures());

    let project = only_project_key(&db, "backend");
    assert!(db.get_sync_record(2, &project).unwrap().is_none());
    assert_eq!(db.list_audit_log(Some("item_failed"), 10).unwrap().len(), 1);

    // The failed item is picked up again once the sink accepts it.
    sink.state.lock().unwrap().reject_ref = None;
    let report = engine.run(&options(&["backend"])).await.unwrap();
    assert_eq!(report.totals.created, 1);
    assert_eq!(report.totals.skipped, 2);
}

#[tokio::test]
async fn test_provisioning_failure_skips_only_that_repository() {
    let db = setup_db();
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(1, 1, "a")]));
    source.set_items("locked", vec![issue(2, 1, "b")]);
    let sink = Arc::new(FakeSink::default());
    sink.state.lock().unwrap().broken_projects.insert("locked".into());
    let engine = engine(&db, &source, &sink);

    let report = engine.run(&options(&["backend", "locked"])).await.unwrap();
    let backend = &report.repositories[0];
    let locked = &report.repositories[1];
    assert_eq!(backend.repository, "backend");
    assert_eq!(backend.counts.created, 1);
    assert!(locked.error.is_some());
    assert!(locked.project_key.is_none());
    assert_eq!(locked.counts.total(), 0);
    assert_eq!(sink.activities().len(), 1);
    assert_eq!(db.list_audit_log(Some("provision_failed"), 10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_persistence_outage_aborts_repository_but_run_completes() {
    let db = setup_db();
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(1, 1, "a"), issue(2, 2, "b")]));
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);

    db.conn().execute_batch("DROP TABLE sync_records;").unwrap();

    let report = engine.run(&options(&["backend"])).await.unwrap();
    let repo = &report.repositories[0];
    assert!(repo.error.as_deref().unwrap_or_default().contains("persistence"));
    assert_eq!(repo.counts.failed, 1);
    assert!(sink.activities().is_empty());
}

#[tokio::test]
async fn test_missing_repository_is_reported() {
    let db = setup_db();
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(1, 1, "a")]));
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);

    let report = engine.run(&options(&["backend", "ghost"])).await.unwrap();
    assert_eq!(report.totals.created, 1);
    assert!(report.repositories[1].error.as_deref().unwrap_or_default().contains("ghost"));
}

// ===========================================================================
// Run control
// ===========================================================================

#[tokio::test]
async fn test_cancellation_stops_between_batches() {
    let db = setup_db();
    let items = (1..=5).map(|n| issue(n, n, &format!("Task {n}"))).collect();
    let source = Arc::new(FakeSource::with_items("backend", items));
    let sink = Arc::new(FakeSink::default());
    let cancel = CancelToken::new();
    sink.state.lock().unwrap().cancel_after_create = Some(cancel.clone());
    let engine = engine(&db, &source, &sink);

    let mut opts = options(&["backend"]);
    opts.batch_size = 2;
    let report = engine.run_with_cancel(&opts, cancel).await.unwrap();

    // The batch in flight completes; the next one never starts.
    assert!(report.cancelled);
    assert_eq!(report.totals.created, 2);
    assert_eq!(db.count_sync_records().unwrap(), 2);
    assert_eq!(sink.activities().len(), 2);
}

#[tokio::test]
async fn test_invalid_options_fail_before_network() {
    let db = setup_db();
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(1, 1, "a")]));
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);

    let mut opts = options(&["backend"]);
    opts.batch_size = 0;
    let err = engine.run(&opts).await.unwrap_err();
    assert!(matches!(err, SyncError::ConfigError(_)));
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert_eq!(sink.project_count(), 0);
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let db = setup_db();
    let source = Arc::new(FakeSource {
        list_delay: Some(Duration::from_millis(50)),
        ..FakeSource::default()
    });
    source.set_items("backend", vec![issue(1, 1, "a")]);
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);
    let opts = options(&["backend"]);

    let (first, second) = tokio::join!(engine.run(&opts), engine.run(&opts));
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let winner = results.iter().find_map(|r| r.as_ref().ok()).unwrap();
    let active_since = results
        .iter()
        .find_map(|r| match r {
            Err(SyncError::AlreadyRunning { started_at }) => Some(started_at.clone()),
            _ => None,
        })
        .expect("second run should be rejected");
    // The rejection names the start of the run that holds the lock.
    assert_eq!(active_since, winner.started_at.to_rfc3339());
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_discovery_syncs_every_repository() {
    let db = setup_db();
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(1, 1, "a")]));
    source.set_items("frontend", vec![issue(2, 1, "b"), issue(3, 2, "c")]);
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);

    let opts = SyncConfig {
        discover_repositories: true,
        workers: 2,
        ..options(&[])
    };
    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.repositories.len(), 2);
    assert_eq!(report.totals.created, 3);
    assert_eq!(sink.project_count(), 2);
    assert_eq!(db.list_repository_mappings().unwrap().len(), 2);
}

#[tokio::test]
async fn test_discovery_failure_is_a_run_level_error() {
    let db = setup_db();
    let source = Arc::new(FakeSource::default());
    *source.fail_discovery.lock().unwrap() = true;
    let sink = Arc::new(FakeSink::default());
    let engine = engine(&db, &source, &sink);

    let opts = SyncConfig {
        discover_repositories: true,
        ..options(&[])
    };
    let report = engine.run(&opts).await.unwrap();
    assert!(report.error.is_some());
    assert!(report.repositories.is_empty());
    assert!(report.has_failures());
    let runs = db.list_sync_runs(1).unwrap();
    assert!(runs[0].completed_at.is_some());
}

#[tokio::test]
async fn test_manual_project_override_is_used() {
    let db = setup_db();
    let source = Arc::new(FakeSource::with_items("backend", vec![issue(1, 1, "a")]));
    let sink = Arc::new(FakeSink::default());
    let existing = sink.create_project("Platform team").await.unwrap();
    let engine = engine(&db, &source, &sink);

    let mut opts = options(&["backend"]);
    opts.projects.insert("backend".into(), existing.clone());
    let report = engine.run(&opts).await.unwrap();
    assert_eq!(report.repositories[0].project_key.as_deref(), Some(existing.as_str()));
    assert_eq!(sink.project_count(), 1);
    assert_eq!(sink.activities()[0].project_key, existing);
}
