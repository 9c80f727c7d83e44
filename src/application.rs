//! Application layer module
//!
//! This module contains the use cases (runner, snapshot preparation),
//! job control and the data transfer objects that orchestrate the domain logic.

pub mod dto;
pub mod job_control;
pub mod recovery_runner;
pub mod snapshot_use_cases;
pub mod state;
pub mod submission_feed;

pub use job_control::{JobTracker, KillSwitch};
pub use recovery_runner::{RecordOutcome, RecoveryRunner, RunnerSettings};
pub use state::AppState;
pub use submission_feed::{fetch_all, FetchedPages, SubmissionPager};
