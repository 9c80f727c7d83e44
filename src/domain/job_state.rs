//! Job state, run modes and resumable cursors.
//!
//! A job moves `idle → running → {complete | error | killed}`. The state is
//! kept in memory by the job tracker and mirrored to `job_status.json` so the
//! report endpoints can read it back after a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `smoke` computes plans without writing; `write` also patches contacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Smoke,
    Write,
}

impl RunMode {
    /// The mode that actually runs once the global dry-run override is applied.
    pub fn effective(self, dry_run: bool) -> Self {
        if dry_run { Self::Smoke } else { self }
    }

    pub fn writes(self) -> bool {
        matches!(self, Self::Write)
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smoke" => Ok(Self::Smoke),
            "write" => Ok(Self::Write),
            other => Err(format!("mode must be 'smoke' or 'write', got '{other}'")),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Smoke => write!(f, "smoke"),
            Self::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Complete,
    Error,
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    RunAll,
    RunForm,
    BatchRun,
    Prepare,
}

/// Persisted progress marker: an index into a deduped snapshot, or an
/// upstream continuation token for live pagination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cursor {
    Offset(usize),
    Token(String),
}

impl Cursor {
    /// Reads either the JSON form or a bare integer written by older runs.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(offset) = trimmed.parse::<usize>() {
            return Some(Self::Offset(offset));
        }
        serde_json::from_str(trimmed).ok()
    }

    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Offset(o) => Some(*o),
            Self::Token(_) => None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Token(t) => Some(t.as_str()),
            Self::Offset(_) => None,
        }
    }
}

/// Counters reported by every run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub processed: u64,
    pub updated: u64,
    /// Non-empty plans computed but not written (smoke / dry-run).
    pub planned: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Result of one run, returned by the control API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: JobStatus,
    pub mode: RunMode,
    pub dry_run_forced: bool,
    #[serde(flatten)]
    pub counters: RunCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RunSummary {
    pub fn new(mode: RunMode, dry_run_forced: bool) -> Self {
        Self {
            status: JobStatus::Running,
            mode,
            dry_run_forced,
            counters: RunCounters::default(),
            next_cursor: None,
            last_error: None,
        }
    }
}

/// What gets written to `job_status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub kind: JobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    #[serde(flatten)]
    pub summary: RunSummary,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobState {
    pub fn start(kind: JobKind, form_id: Option<String>, mode: RunMode, dry_run_forced: bool) -> Self {
        let now = Utc::now();
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            kind,
            form_id,
            summary: RunSummary::new(mode, dry_run_forced),
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.summary.status
    }

    pub fn is_running(&self) -> bool {
        self.summary.status == JobStatus::Running
    }

    pub fn record_progress(&mut self, summary: &RunSummary) {
        self.summary = summary.clone();
        self.updated_at = Utc::now();
    }

    pub fn finish(&mut self, summary: RunSummary) {
        let now = Utc::now();
        self.summary = summary;
        self.updated_at = now;
        self.finished_at = Some(now);
    }
}
