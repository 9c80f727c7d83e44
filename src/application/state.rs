//! Application state shared by the control API handlers
//!
//! Built once at startup from the immutable [`AppConfig`]; handlers receive a
//! cheap clone through axum's `State` extractor.

use std::sync::Arc;
use tracing::info;

use crate::application::job_control::{JobTracker, KillSwitch};
use crate::application::recovery_runner::RecoveryRunner;
use crate::domain::repositories::{ContactStore, SubmissionSource};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::HubSpotClient;
use crate::infrastructure::snapshot_store::SnapshotStore;
use crate::infrastructure::sync_error::SyncResult;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub runner: Arc<RecoveryRunner>,
    pub kill: KillSwitch,
    pub jobs: Arc<JobTracker>,
}

impl AppState {
    /// Wire the state around explicit upstream implementations.
    pub fn new(
        config: AppConfig,
        source: Arc<dyn SubmissionSource>,
        contacts: Arc<dyn ContactStore>,
    ) -> Self {
        let store = SnapshotStore::new(config.data_dir.clone());
        let kill = KillSwitch::new();
        let jobs = Arc::new(JobTracker::new(store.clone()));
        let runner = Arc::new(RecoveryRunner::new(
            &config,
            source,
            contacts,
            store,
            kill.clone(),
            Arc::clone(&jobs),
        ));

        Self {
            config: Arc::new(config),
            runner,
            kill,
            jobs,
        }
    }

    /// Production wiring: one HubSpot client serves both upstream interfaces.
    pub async fn from_config(config: AppConfig) -> SyncResult<Self> {
        let client = Arc::new(HubSpotClient::from_app_config(&config)?);
        let state = Self::new(config, client.clone(), client);
        if let Some(last) = state.jobs.restore().await? {
            info!("📂 Last job {} ({:?}) restored from disk", last.job_id, last.status());
        }
        Ok(state)
    }
}
