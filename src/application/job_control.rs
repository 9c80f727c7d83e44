//! Kill switch and job tracking.
//!
//! [`KillSwitch`] is a cloneable handle over a `watch` channel: `/kill` sets it,
//! `/unkill` clears it, and runners poll it before every page and every
//! submission. [`JobTracker`] owns the state of the current (or last) job and
//! mirrors it to `job_status.json`.

use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use crate::domain::job_state::{JobKind, JobState, JobStatus, RunMode, RunSummary};
use crate::infrastructure::snapshot_store::SnapshotStore;
use crate::infrastructure::sync_error::{SyncError, SyncResult};

#[derive(Debug, Clone)]
pub struct KillSwitch {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl KillSwitch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn kill(&self) {
        if !self.tx.send_replace(true) {
            warn!("🛑 Kill switch engaged");
        }
    }

    pub fn reset(&self) {
        if self.tx.send_replace(false) {
            info!("▶️ Kill switch cleared");
        }
    }

    pub fn is_killed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the switch is engaged (immediately if it already is).
    pub async fn killed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` can only fail if it is dropped.
        let _ = rx.wait_for(|killed| *killed).await;
    }

    /// Sleep for `duration` unless the switch is engaged first.
    /// Returns `true` when the sleep was cut short by a kill.
    pub async fn sleep(&self, duration: std::time::Duration) -> bool {
        if duration.is_zero() {
            return self.is_killed();
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => self.is_killed(),
            () = self.killed() => true,
        }
    }
}

/// Holds the current job; at most one job runs at a time.
#[derive(Debug)]
pub struct JobTracker {
    current: RwLock<Option<JobState>>,
    store: SnapshotStore,
}

impl JobTracker {
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            current: RwLock::new(None),
            store,
        }
    }

    /// Reload the last persisted job. A job that was still `running` when the
    /// process died is marked as `error`.
    pub async fn restore(&self) -> SyncResult<Option<JobState>> {
        let Some(mut state) = self.store.load_job_state().await? else {
            return Ok(None);
        };
        if state.is_running() {
            warn!("⚠️ Job {} was interrupted by a restart", state.job_id);
            let mut summary = state.summary.clone();
            summary.status = JobStatus::Error;
            summary.last_error = Some("interrupted by restart".to_string());
            state.finish(summary);
            self.store.save_job_state(&state).await?;
        }
        *self.current.write().await = Some(state.clone());
        Ok(Some(state))
    }

    /// Register a new running job, or fail if one is already running.
    pub async fn begin(
        &self,
        kind: JobKind,
        form_id: Option<String>,
        mode: RunMode,
        dry_run_forced: bool,
    ) -> SyncResult<JobState> {
        let mut current = self.current.write().await;
        if let Some(running) = current.as_ref().filter(|s| s.is_running()) {
            return Err(SyncError::JobAlreadyRunning(running.job_id.clone()));
        }
        let state = JobState::start(kind, form_id, mode, dry_run_forced);
        self.store.save_job_state(&state).await?;
        info!("🚀 Job {} started: {:?} mode={}", state.job_id, state.kind, mode);
        *current = Some(state.clone());
        Ok(state)
    }

    /// Checkpoint progress of the running job.
    pub async fn progress(&self, job_id: &str, summary: &RunSummary) -> SyncResult<()> {
        let mut current = self.current.write().await;
        if let Some(state) = current.as_mut().filter(|s| s.job_id == job_id) {
            state.record_progress(summary);
            self.store.save_job_state(state).await?;
        }
        Ok(())
    }

    pub async fn finish(&self, job_id: &str, summary: RunSummary) -> SyncResult<Option<JobState>> {
        let mut current = self.current.write().await;
        let Some(state) = current.as_mut().filter(|s| s.job_id == job_id) else {
            return Ok(None);
        };
        let status = summary.status;
        state.finish(summary);
        self.store.save_job_state(state).await?;
        info!(
            "🏁 Job {} finished: {:?} (processed={}, updated={}, planned={}, skipped={}, errors={})",
            state.job_id,
            status,
            state.summary.counters.processed,
            state.summary.counters.updated,
            state.summary.counters.planned,
            state.summary.counters.skipped,
            state.summary.counters.errors
        );
        Ok(Some(state.clone()))
    }

    pub async fn current(&self) -> Option<JobState> {
        self.current.read().await.clone()
    }

    pub async fn is_busy(&self) -> bool {
        self.current.read().await.as_ref().is_some_and(JobState::is_running)
    }
}
