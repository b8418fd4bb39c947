//! Sync scheduler that runs sync passes on a configurable interval and
//! supports signal-triggered immediate runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time;
use tracing::{error, info, warn};

use tracksync_core::config::SyncConfig;
use tracksync_core::errors::SyncError;
use tracksync_core::sync_engine::{CancelToken, SyncEngine, SyncReport};

/// Tracks aggregate statistics across sync runs.
#[derive(Default)]
pub struct SchedulerStats {
    pub total_runs: AtomicU64,
    pub total_conflicts: AtomicU64,
    pub total_failures: AtomicU64,
    pub consecutive_failures: AtomicU64,
}

impl SchedulerStats {
    /// Fold one run outcome into the counters. Returns the number of
    /// consecutive failed runs.
    fn record(&self, outcome: &Result<SyncReport, SyncError>) -> u64 {
        self.total_runs.fetch_add(1, Ordering::SeqCst);
        match outcome {
            Ok(report) => {
                self.total_conflicts
                    .fetch_add(report.totals.conflicted, Ordering::SeqCst);
                if report.has_failures() {
                    self.total_failures.fetch_add(1, Ordering::SeqCst);
                    self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
                } else {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    0
                }
            }
            // A concurrent run is not a failure of this one.
            Err(SyncError::AlreadyRunning { .. }) => {
                self.consecutive_failures.load(Ordering::SeqCst)
            }
            Err(_) => {
                self.total_failures.fetch_add(1, Ordering::SeqCst);
                self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
            }
        }
    }
}

/// The sync scheduler.
///
/// Runs sync passes on a timer and on demand. Runs never overlap: a trigger
/// that arrives during a run is handled once the run has finished.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    options: SyncConfig,
    poll_interval: Duration,
    trigger_rx: mpsc::Receiver<()>,
    cancel: CancelToken,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<SyncEngine>,
        options: SyncConfig,
        poll_interval: Duration,
        trigger_rx: mpsc::Receiver<()>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            engine,
            options,
            poll_interval,
            trigger_rx,
            cancel,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    /// Main scheduler loop. Returns once `shutdown` is notified.
    pub async fn run(&mut self, shutdown: Arc<Notify>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "scheduler started"
        );

        // The first tick fires immediately: sync once at startup.
        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = shutdown.notified() => {
                    break;
                }
                _ = interval.tick() => {
                    let _ = self.run_once("scheduled").await;
                }
                Some(()) = self.trigger_rx.recv() => {
                    info!("immediate sync requested");
                    let _ = self.run_once("signal").await;
                    interval.reset();
                }
            }
        }

        info!(
            runs = self.stats.total_runs.load(Ordering::SeqCst),
            "scheduler stopped"
        );
    }

    /// Run one sync pass and log its outcome.
    pub async fn run_once(&self, trigger: &str) -> Result<SyncReport, SyncError> {
        let run = self.stats.total_runs.load(Ordering::SeqCst) + 1;
        info!(run, trigger, "starting sync run");

        let outcome = self
            .engine
            .run_with_cancel(&self.options, self.cancel.clone())
            .await;
        let consecutive = self.stats.record(&outcome);

        match &outcome {
            Ok(report) if !report.has_failures() => {
                info!(run, summary = %report.summary(), "sync run completed");
            }
            Ok(report) => {
                warn!(
                    run,
                    summary = %report.summary(),
                    error = report.error.as_deref().unwrap_or(""),
                    consecutive_failures = consecutive,
                    "sync run completed with failures"
                );
                for repo in report.repositories.iter().filter(|r| r.error.is_some()) {
                    warn!(
                        repo = %repo.repository,
                        error = repo.error.as_deref().unwrap_or(""),
                        "repository failed"
                    );
                }
            }
            Err(SyncError::AlreadyRunning { .. }) => {
                warn!(run, trigger, "skipping sync run: previous run still active");
            }
            Err(e) => {
                error!(
                    run,
                    error = %e,
                    consecutive_failures = consecutive,
                    "sync run failed"
                );
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracksync_core::models::SyncCounts;

    fn report(failed: u64) -> SyncReport {
        let now = chrono::Utc::now();
        SyncReport {
            run_id: None,
            dry_run: false,
            started_at: now,
            completed_at: now,
            repositories: Vec::new(),
            totals: SyncCounts {
                failed,
                conflicted: 2,
                ..Default::default()
            },
            error: None,
            cancelled: false,
        }
    }

    #[test]
    fn test_stats_track_consecutive_failures() {
        let stats = SchedulerStats::default();
        assert_eq!(stats.record(&Ok(report(1))), 1);
        assert_eq!(stats.record(&Ok(report(3))), 2);
        assert_eq!(
            stats.record(&Err(SyncError::AlreadyRunning {
                started_at: "now".into()
            })),
            2
        );
        assert_eq!(stats.record(&Ok(report(0))), 0);

        assert_eq!(stats.total_runs.load(Ordering::SeqCst), 4);
        assert_eq!(stats.total_failures.load(Ordering::SeqCst), 2);
        assert_eq!(stats.total_conflicts.load(Ordering::SeqCst), 6);
    }
}
