//! Data Transfer Objects for the recovery service
//!
//! Contains DTOs for data exchange between use cases and the control API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::entities::UpdatePlan;
use crate::domain::job_state::{JobState, JobStatus, RunSummary};
use crate::domain::services::DedupedEntry;

// ============================================================================
// Run requests
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RunAllRequestDto {
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunFormRequestDto {
    pub form_id: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub max_records: Option<usize>,
    #[serde(default)]
    pub resume: bool,
}

#[derive(Debug, Deserialize)]
pub struct RunFormByEmailRequestDto {
    pub form_id: String,
    pub email: String,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRunRequestDto {
    pub form_id: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PrepareRequestDto {
    pub form_id: String,
    #[serde(default)]
    pub max_pages: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequestDto {
    pub form_id: String,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FormQueryDto {
    pub form_id: String,
}

// ============================================================================
// Run results
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct JobAcceptedDto {
    pub job_id: String,
    pub status: JobStatus,
}

impl From<&JobState> for JobAcceptedDto {
    fn from(state: &JobState) -> Self {
        Self {
            job_id: state.job_id.clone(),
            status: state.status(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRunResultDto {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub offset: usize,
    pub next_offset: usize,
    pub total: usize,
}

/// Outcome of a single-email run.
#[derive(Debug, Clone, Serialize)]
pub struct EmailRunResultDto {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub email: String,
    /// Where the submission came from: `snapshot`, `live` or `none`.
    pub source: &'static str,
    pub contact_id: Option<String>,
    pub fields: BTreeMap<String, String>,
    pub plan: UpdatePlan,
}

// ============================================================================
// Snapshot results
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PrepareResultDto {
    pub form_id: String,
    pub pages: usize,
    pub total_submissions: usize,
    pub without_email: usize,
    pub unique_emails: usize,
    pub killed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewEntryDto {
    pub index: usize,
    #[serde(flatten)]
    pub entry: DedupedEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewDto {
    pub form_id: String,
    pub total: usize,
    pub offset: usize,
    pub entries: Vec<PreviewEntryDto>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDto {
    pub records_total: usize,
    pub records_processed: usize,
    pub records_remaining: usize,
}

impl ReportDto {
    pub fn new(total: usize, processed: usize) -> Self {
        Self {
            records_total: total,
            records_processed: processed,
            records_remaining: total.saturating_sub(processed),
        }
    }
}

// ============================================================================
// Control responses
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StatusDto {
    pub killed: bool,
    pub dry_run: bool,
    pub job: Option<JobState>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct KillStateDto {
    pub killed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthDto {
    pub status: &'static str,
    pub forms: usize,
    pub dry_run: bool,
    pub version: &'static str,
}
