//! Snapshot preparation, preview, CSV export and progress report.
//!
//! Prepare pages through a form, saves every page as JSONL, then dedupes the
//! whole set to one submission per email. The deduped snapshot is what batch
//! runs, previews, CSV export and the report work from.

use tracing::info;

use crate::application::dto::{PrepareResultDto, PreviewDto, PreviewEntryDto, ReportDto};
use crate::application::recovery_runner::{RecoveryRunner, Stop};
use crate::application::submission_feed::SubmissionPager;
use crate::domain::job_state::{JobKind, RunMode, RunSummary};
use crate::domain::services::dedupe_submissions;
use crate::infrastructure::config::defaults;
use crate::infrastructure::csv_export::render_csv;
use crate::infrastructure::sync_error::SyncResult;

impl RecoveryRunner {
    /// Fetch → JSONL pages → deduped snapshot.
    ///
    /// A killed prepare keeps the pages it wrote but leaves the previous
    /// deduped snapshot untouched. A completed prepare resets the batch cursor,
    /// since offsets into the old snapshot no longer mean anything.
    pub async fn prepare(&self, form_id: &str, max_pages: Option<usize>) -> SyncResult<PrepareResultDto> {
        let max_pages = max_pages.unwrap_or(defaults::PREPARE_MAX_PAGES);
        let job = self
            .jobs
            .begin(JobKind::Prepare, Some(form_id.to_string()), RunMode::Smoke, false)
            .await?;
        info!("🚀 Preparing snapshot for form {} (max {} pages)", form_id, max_pages);

        let mut summary = RunSummary::new(RunMode::Smoke, false);
        let mut report = PrepareResultDto {
            form_id: form_id.to_string(),
            pages: 0,
            total_submissions: 0,
            without_email: 0,
            unique_emails: 0,
            killed: false,
        };

        let result = self.build_snapshot(form_id, max_pages, &mut report).await;
        summary.counters.processed = report.total_submissions as u64;
        summary.counters.skipped = report.without_email as u64;
        let summary = self.conclude(&job.job_id, summary, &result).await;
        result?;

        info!(
            "✅ Snapshot {}: {} submissions across {} pages → {} unique emails ({:?})",
            form_id, report.total_submissions, report.pages, report.unique_emails, summary.status
        );
        Ok(report)
    }

    async fn build_snapshot(&self, form_id: &str, max_pages: usize, report: &mut PrepareResultDto) -> SyncResult<Stop> {
        self.store.reset_pages(form_id).await?;

        let mut pager = SubmissionPager::new(self.source.as_ref(), form_id, None).with_max_pages(max_pages);
        loop {
            if self.kill.is_killed() {
                report.killed = true;
                return Ok(Stop::Killed);
            }
            let Some(page) = pager.next_page().await? else {
                break;
            };
            report.pages += 1;
            report.total_submissions += page.len();
            self.store.write_page(form_id, report.pages, &page).await?;
        }

        let all = if report.pages == 0 {
            info!("📭 Form {} has no submissions", form_id);
            Vec::new()
        } else {
            self.store.read_pages(form_id).await?
        };
        let outcome = dedupe_submissions(&self.parser, &all);
        report.without_email = outcome.without_email;
        report.unique_emails = outcome.unique_emails();
        self.store.write_deduped(form_id, &outcome.entries).await?;
        self.store.clear_cursor(form_id).await?;

        Ok(if pager.is_exhausted() {
            Stop::Exhausted
        } else {
            Stop::LimitReached
        })
    }

    /// A slice of the deduped snapshot.
    pub async fn preview(&self, form_id: &str, offset: Option<usize>, limit: Option<usize>) -> SyncResult<PreviewDto> {
        let entries = self.load_entries(form_id).await?;
        let total = entries.len();
        let offset = offset.unwrap_or(0).min(total);
        let limit = limit.unwrap_or(defaults::PREVIEW_LIMIT);

        let entries = entries
            .into_iter()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(index, entry)| PreviewEntryDto { index, entry })
            .collect();

        Ok(PreviewDto {
            form_id: form_id.to_string(),
            total,
            offset,
            entries,
        })
    }

    /// Deduped snapshot as CSV text.
    pub async fn export_csv(&self, form_id: &str) -> SyncResult<String> {
        let entries = self.load_entries(form_id).await?;
        render_csv(&entries)
    }

    /// Progress of batch runs over the current snapshot. A form without a
    /// snapshot reports zero records.
    pub async fn report(&self, form_id: &str) -> SyncResult<ReportDto> {
        let total = if self.store.has_deduped(form_id).await {
            self.store.read_deduped(form_id).await?.len()
        } else {
            0
        };
        let processed = self
            .store
            .load_cursor(form_id)
            .await?
            .and_then(|c| c.offset())
            .unwrap_or(0);
        Ok(ReportDto::new(total, processed))
    }
}
