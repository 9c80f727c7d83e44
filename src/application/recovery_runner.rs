//! Recovery runner: drives submissions through parse → resolve → plan → write.
//!
//! Every run registers with the [`JobTracker`], honours the global dry-run
//! override, and polls the [`KillSwitch`] before each page fetch and before each
//! record. A stopped run still reports its partial counters.
//!
//! Counter rules per record: `processed` always; `skipped` when there is no
//! email, no matching contact or nothing to fill; `planned` for a non-empty
//! plan that was not written; `updated` for a successful write; `errors` for a
//! failed lookup or write. Per-record failures never abort a run, page-level
//! failures do.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::application::dto::{BatchRunResultDto, EmailRunResultDto};
use crate::application::job_control::{JobTracker, KillSwitch};
use crate::application::submission_feed::{fetch_all, SubmissionPager};
use crate::domain::entities::UpdatePlan;
use crate::domain::job_state::{Cursor, JobKind, JobState, JobStatus, RunCounters, RunMode, RunSummary};
use crate::domain::repositories::{ContactStore, SubmissionSource};
use crate::domain::services::{dedupe_submissions, find_entry, DedupedEntry, SubmissionParser, UpdatePlanner};
use crate::infrastructure::config::{defaults, AppConfig};
use crate::infrastructure::snapshot_store::SnapshotStore;
use crate::infrastructure::sync_error::{SyncError, SyncResult};

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub dry_run: bool,
    pub checkpoint_interval: usize,
    pub record_delay: Duration,
}

impl RunnerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            checkpoint_interval: config.runner.checkpoint_interval.max(1),
            record_delay: config.runner.record_delay(),
        }
    }
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    NoEmail,
    NoContact,
    NothingToFill { contact_id: String },
    Planned { contact_id: String, plan: UpdatePlan },
    Updated { contact_id: String, plan: UpdatePlan },
    Failed { reason: String },
}

impl RecordOutcome {
    pub fn tally(&self, counters: &mut RunCounters) {
        counters.processed += 1;
        match self {
            Self::NoEmail | Self::NoContact | Self::NothingToFill { .. } => counters.skipped += 1,
            Self::Planned { .. } => counters.planned += 1,
            Self::Updated { .. } => counters.updated += 1,
            Self::Failed { .. } => counters.errors += 1,
        }
    }

    pub fn contact_id(&self) -> Option<&str> {
        match self {
            Self::NothingToFill { contact_id }
            | Self::Planned { contact_id, .. }
            | Self::Updated { contact_id, .. } => Some(contact_id),
            Self::NoEmail | Self::NoContact | Self::Failed { .. } => None,
        }
    }

    pub fn plan(&self) -> Option<&UpdatePlan> {
        match self {
            Self::Planned { plan, .. } | Self::Updated { plan, .. } => Some(plan),
            _ => None,
        }
    }
}

/// Why a run loop returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stop {
    Exhausted,
    LimitReached,
    Killed,
}

/// Where a per-email run found its submission. `killed` means the live scan
/// was cut short and nothing may be processed.
struct EmailLookup {
    source: &'static str,
    entry: Option<DedupedEntry>,
    killed: bool,
}

impl EmailLookup {
    fn found(source: &'static str, entry: DedupedEntry) -> Self {
        Self {
            source,
            entry: Some(entry),
            killed: false,
        }
    }
}

pub struct RecoveryRunner {
    pub(crate) source: Arc<dyn SubmissionSource>,
    contacts: Arc<dyn ContactStore>,
    pub(crate) parser: SubmissionParser,
    planner: UpdatePlanner,
    pub(crate) store: SnapshotStore,
    pub(crate) kill: KillSwitch,
    pub(crate) jobs: Arc<JobTracker>,
    settings: RunnerSettings,
}

impl RecoveryRunner {
    pub fn new(
        config: &AppConfig,
        source: Arc<dyn SubmissionSource>,
        contacts: Arc<dyn ContactStore>,
        store: SnapshotStore,
        kill: KillSwitch,
        jobs: Arc<JobTracker>,
    ) -> Self {
        Self {
            source,
            contacts,
            parser: SubmissionParser::new(config.checkbox_properties.iter().cloned()),
            planner: UpdatePlanner::new(config.forms.clone()),
            store,
            kill,
            jobs,
            settings: RunnerSettings::from_config(config),
        }
    }

    pub fn form_ids(&self) -> Vec<String> {
        self.planner.forms().form_ids().map(String::from).collect()
    }

    /// Effective mode and whether dry-run had to downgrade a write request.
    pub fn resolve_mode(&self, requested: RunMode) -> (RunMode, bool) {
        let mode = requested.effective(self.settings.dry_run);
        (mode, mode != requested)
    }

    fn ensure_form(&self, form_id: &str) -> SyncResult<()> {
        if self.planner.forms().contains(form_id) {
            Ok(())
        } else {
            Err(SyncError::UnknownForm(form_id.to_string()))
        }
    }

    // ------------------------------------------------------------------
    // Single record
    // ------------------------------------------------------------------

    /// Resolve, plan and (in write mode) apply one record.
    pub async fn process_record(
        &self,
        form_id: &str,
        email: Option<&str>,
        fields: &BTreeMap<String, String>,
        mode: RunMode,
    ) -> RecordOutcome {
        let Some(email) = email else {
            debug!("⏭️ Record without email skipped");
            return RecordOutcome::NoEmail;
        };

        let properties = self.planner.forms().crm_properties(form_id);
        let contact = match self.contacts.find_by_email(email, &properties).await {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                info!("⏭️ {} has no CRM contact", email);
                return RecordOutcome::NoContact;
            }
            Err(e) => {
                error!("❌ Contact lookup failed for {}: {}", email, e);
                return RecordOutcome::Failed { reason: e.to_string() };
            }
        };

        let consent = self.parser.consent_fields(fields);

        let plan = self.planner.plan_updates(form_id, fields, &contact);
        if plan.is_empty() {
            info!("⏭️ {} (contact {}) nothing to fill, form values: {:?}", email, contact.id, consent);
            return RecordOutcome::NothingToFill { contact_id: contact.id };
        }

        if !mode.writes() {
            info!(
                "🧪 [smoke] {} (contact {}) would set {:?}, form values: {:?}",
                email,
                contact.id,
                plan.properties(),
                consent
            );
            return RecordOutcome::Planned {
                contact_id: contact.id,
                plan,
            };
        }

        match self.contacts.update_contact(&contact.id, &plan).await {
            Ok(()) => {
                info!(
                    "✅ {} (contact {}) updated {:?}, form values: {:?}",
                    email,
                    contact.id,
                    plan.properties(),
                    consent
                );
                RecordOutcome::Updated {
                    contact_id: contact.id,
                    plan,
                }
            }
            Err(e) => {
                error!("❌ Update failed for {} (contact {}): {}", email, contact.id, e);
                RecordOutcome::Failed { reason: e.to_string() }
            }
        }
    }

    // ------------------------------------------------------------------
    // Live runs
    // ------------------------------------------------------------------

    /// Run one form against live pagination.
    ///
    /// With `resume`, continues from the token persisted by the last write run.
    /// `max_records` bounds the number of records processed in this call.
    pub async fn run_form(
        &self,
        form_id: &str,
        requested: RunMode,
        max_records: Option<usize>,
        resume: bool,
    ) -> SyncResult<RunSummary> {
        self.ensure_form(form_id)?;
        let (mode, forced) = self.resolve_mode(requested);
        let job = self
            .jobs
            .begin(JobKind::RunForm, Some(form_id.to_string()), mode, forced)
            .await?;

        let mut summary = RunSummary::new(mode, forced);
        let result = self
            .drive_live(&job.job_id, form_id, mode, resume, max_records, &mut summary)
            .await;
        Ok(self.conclude(&job.job_id, summary, &result).await)
    }

    /// Run every configured form in the foreground.
    pub async fn run_all(&self, requested: RunMode) -> SyncResult<RunSummary> {
        let (mode, forced) = self.resolve_mode(requested);
        let job = self.jobs.begin(JobKind::RunAll, None, mode, forced).await?;
        Ok(self.finish_run_all(&job, mode, forced).await)
    }

    /// Register a run-all job and continue it on a background task.
    pub async fn spawn_run_all(self: &Arc<Self>, requested: RunMode) -> SyncResult<JobState> {
        let (mode, forced) = self.resolve_mode(requested);
        let job = self.jobs.begin(JobKind::RunAll, None, mode, forced).await?;

        let runner = Arc::clone(self);
        let background = job.clone();
        tokio::spawn(async move {
            runner.finish_run_all(&background, mode, forced).await;
        });
        Ok(job)
    }

    async fn finish_run_all(&self, job: &JobState, mode: RunMode, forced: bool) -> RunSummary {
        let mut summary = RunSummary::new(mode, forced);
        let mut result = Ok(Stop::Exhausted);

        for form_id in self.form_ids() {
            info!("📋 Form {} ({} mode)", form_id, mode);
            result = self
                .drive_live(&job.job_id, &form_id, mode, false, None, &mut summary)
                .await;
            if !matches!(result, Ok(Stop::Exhausted)) {
                break;
            }
        }
        summary.next_cursor = None;
        self.conclude(&job.job_id, summary, &result).await
    }

    async fn drive_live(
        &self,
        job_id: &str,
        form_id: &str,
        mode: RunMode,
        resume: bool,
        max_records: Option<usize>,
        summary: &mut RunSummary,
    ) -> SyncResult<Stop> {
        let start = if resume {
            self.store
                .load_live_cursor(form_id)
                .await?
                .and_then(|c| c.token().map(String::from))
        } else {
            None
        };
        if let Some(token) = &start {
            info!("⏩ Resuming form {} from token {}", form_id, token);
        }

        let limit_reached =
            |counters: &RunCounters| max_records.is_some_and(|max| counters.processed >= max as u64);
        let mut pager = SubmissionPager::new(self.source.as_ref(), form_id, start);
        let mut since_checkpoint = 0;

        loop {
            let page_start = pager.position().map(|t| Cursor::Token(t.to_string()));
            if self.kill.is_killed() {
                summary.next_cursor = page_start;
                return Ok(Stop::Killed);
            }
            if limit_reached(&summary.counters) {
                summary.next_cursor = page_start;
                return Ok(Stop::LimitReached);
            }

            let Some(page) = pager.next_page().await? else {
                break;
            };

            for submission in &page {
                if self.kill.is_killed() {
                    summary.next_cursor = page_start;
                    return Ok(Stop::Killed);
                }
                if limit_reached(&summary.counters) {
                    summary.next_cursor = page_start;
                    return Ok(Stop::LimitReached);
                }

                let parsed = self.parser.parse(submission);
                self.process_record(form_id, parsed.email.as_deref(), &parsed.fields, mode)
                    .await
                    .tally(&mut summary.counters);

                since_checkpoint += 1;
                if since_checkpoint >= self.settings.checkpoint_interval {
                    since_checkpoint = 0;
                    self.jobs.progress(job_id, summary).await?;
                    info!("💾 Checkpoint: {} processed", summary.counters.processed);
                }
                self.kill.sleep(self.settings.record_delay).await;
            }

            summary.next_cursor = pager.position().map(|t| Cursor::Token(t.to_string()));
            if mode.writes() {
                self.store
                    .save_live_cursor(form_id, summary.next_cursor.as_ref())
                    .await?;
            }
        }

        summary.next_cursor = None;
        if mode.writes() {
            self.store.save_live_cursor(form_id, None).await?;
        }
        Ok(Stop::Exhausted)
    }

    /// Find one email's most recent submission and run it.
    ///
    /// The prepared snapshot is searched first; without a snapshot (or without
    /// a match in it) the form is paged live.
    pub async fn run_form_by_email(
        &self,
        form_id: &str,
        email: &str,
        requested: RunMode,
    ) -> SyncResult<EmailRunResultDto> {
        self.ensure_form(form_id)?;
        let (mode, forced) = self.resolve_mode(requested);
        let mut summary = RunSummary::new(mode, forced);

        let mut result = EmailRunResultDto {
            summary: summary.clone(),
            email: email.trim().to_string(),
            source: "none",
            contact_id: None,
            fields: BTreeMap::new(),
            plan: UpdatePlan::new(),
        };

        if self.kill.is_killed() {
            summary.status = JobStatus::Killed;
            result.summary = summary;
            return Ok(result);
        }

        let located = self.locate_email(form_id, email).await?;
        if located.killed || self.kill.is_killed() {
            warn!("🛑 Email run for {} on form {} stopped by kill switch", email, form_id);
            summary.status = JobStatus::Killed;
            result.summary = summary;
            return Ok(result);
        }
        summary.status = JobStatus::Complete;
        let Some(entry) = located.entry else {
            info!("🔍 No submission for {} on form {}", email, form_id);
            result.summary = summary;
            return Ok(result);
        };

        let outcome = self
            .process_record(form_id, Some(&entry.email), &entry.fields, mode)
            .await;
        outcome.tally(&mut summary.counters);
        if let RecordOutcome::Failed { reason } = &outcome {
            summary.status = JobStatus::Error;
            summary.last_error = Some(reason.clone());
        }

        result.summary = summary;
        result.source = located.source;
        result.email = entry.email;
        result.contact_id = outcome.contact_id().map(String::from);
        result.plan = outcome.plan().cloned().unwrap_or_default();
        result.fields = entry.fields;
        Ok(result)
    }

    async fn locate_email(&self, form_id: &str, email: &str) -> SyncResult<EmailLookup> {
        match self.load_entries(form_id).await {
            Ok(entries) => {
                if let Some(entry) = find_entry(&entries, email) {
                    return Ok(EmailLookup::found("snapshot", entry.clone()));
                }
                debug!("🔍 {} not in snapshot for {}, paging live", email, form_id);
            }
            Err(SyncError::SnapshotMissing(_)) => {
                debug!("🔍 No snapshot for {}, paging live", form_id);
            }
            Err(e) => return Err(e),
        }

        let fetched = fetch_all(self.source.as_ref(), form_id, defaults::PREPARE_MAX_PAGES, &self.kill).await?;
        debug!("🔍 Scanned {} live submission(s) of {} for {}", fetched.total(), form_id, email);
        if fetched.killed {
            return Ok(EmailLookup {
                source: "live",
                entry: None,
                killed: true,
            });
        }
        let outcome = dedupe_submissions(&self.parser, fetched.submissions());
        Ok(match find_entry(&outcome.entries, email) {
            Some(entry) => EmailLookup::found("live", entry.clone()),
            None => EmailLookup {
                source: "none",
                entry: None,
                killed: false,
            },
        })
    }

    // ------------------------------------------------------------------
    // Snapshot batch runs
    // ------------------------------------------------------------------

    /// Process `[offset, offset + limit)` of the deduped snapshot.
    ///
    /// `offset` defaults to the persisted cursor. Only write runs move the
    /// cursor, so a smoke pass never makes a later write pass skip records.
    pub async fn batch_run(
        &self,
        form_id: &str,
        requested: RunMode,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> SyncResult<BatchRunResultDto> {
        self.ensure_form(form_id)?;
        let (mode, forced) = self.resolve_mode(requested);
        let entries = self.load_entries(form_id).await?;
        let total = entries.len();

        let start = match offset {
            Some(offset) => offset,
            None => self
                .store
                .load_cursor(form_id)
                .await?
                .and_then(|c| c.offset())
                .unwrap_or(0),
        }
        .min(total);
        let end = limit.map_or(total, |limit| start.saturating_add(limit).min(total));

        let job = self
            .jobs
            .begin(JobKind::BatchRun, Some(form_id.to_string()), mode, forced)
            .await?;
        info!("📦 Batch {}: records {}..{} of {} ({} mode)", form_id, start, end, total, mode);

        let mut summary = RunSummary::new(mode, forced);
        let mut position = start;
        let mut result = self
            .drive_batch(&job.job_id, form_id, mode, &entries[start..end], start, &mut position, &mut summary)
            .await;
        if mode.writes() && result.is_ok() {
            if let Err(e) = self.store.save_cursor(form_id, &Cursor::Offset(position)).await {
                result = Err(e);
            }
        }
        summary.next_cursor = Some(Cursor::Offset(position));
        let summary = self.conclude(&job.job_id, summary, &result).await;

        Ok(BatchRunResultDto {
            summary,
            offset: start,
            next_offset: position,
            total,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_batch(
        &self,
        job_id: &str,
        form_id: &str,
        mode: RunMode,
        slice: &[DedupedEntry],
        first_index: usize,
        position: &mut usize,
        summary: &mut RunSummary,
    ) -> SyncResult<Stop> {
        for (offset, entry) in slice.iter().enumerate() {
            if self.kill.is_killed() {
                return Ok(Stop::Killed);
            }
            let index = first_index + offset;
            self.process_record(form_id, Some(&entry.email), &entry.fields, mode)
                .await
                .tally(&mut summary.counters);
            *position = index + 1;

            if *position % self.settings.checkpoint_interval == 0 {
                if mode.writes() {
                    self.store.save_cursor(form_id, &Cursor::Offset(*position)).await?;
                }
                summary.next_cursor = Some(Cursor::Offset(*position));
                self.jobs.progress(job_id, summary).await?;
                info!("💾 Progress saved ({} processed)", *position);
            }
            if offset + 1 < slice.len() && self.kill.sleep(self.settings.record_delay).await {
                return Ok(Stop::Killed);
            }
        }
        Ok(Stop::Exhausted)
    }

    pub(crate) async fn load_entries(&self, form_id: &str) -> SyncResult<Vec<DedupedEntry>> {
        let submissions = self.store.read_deduped(form_id).await?;
        Ok(dedupe_submissions(&self.parser, &submissions).entries)
    }

    /// Set the final status, persist the job and return the summary.
    pub(crate) async fn conclude(
        &self,
        job_id: &str,
        mut summary: RunSummary,
        result: &SyncResult<Stop>,
    ) -> RunSummary {
        summary.status = match result {
            Ok(Stop::Killed) => JobStatus::Killed,
            Ok(Stop::Exhausted | Stop::LimitReached) => JobStatus::Complete,
            Err(_) => JobStatus::Error,
        };
        match result {
            Ok(Stop::Killed) => warn!("🛑 Job {} stopped by kill switch", job_id),
            Err(e) => {
                error!("❌ Job {} failed: {}", job_id, e);
                summary.last_error = Some(e.to_string());
            }
            Ok(_) => {}
        }
        if let Err(e) = self.jobs.finish(job_id, summary.clone()).await {
            error!("Failed to persist status of job {}: {}", job_id, e);
        }
        summary
    }
}
