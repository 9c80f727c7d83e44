//! Runner behaviour against in-memory upstream fakes: mode gating, the
//! fill-only-blanks rule end to end, the kill switch, snapshot batches and
//! per-email runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use consent_recovery_lib::application::{JobTracker, KillSwitch, RecoveryRunner};
use consent_recovery_lib::domain::{
    normalize_email, Contact, ContactStore, Cursor, FieldMapping, FormFieldMap, JobKind, JobStatus, PageToken, RunMode,
    Submission, SubmissionPage, SubmissionSource, UpdatePlan,
};
use consent_recovery_lib::infrastructure::{AppConfig, SnapshotStore, SyncError, SyncResult};

const FORM: &str = "form-1";
const OPT_IN: &str = "opt_in";
const CRM_OPT_IN: &str = "marketing_opt_in";

// ============================================================================
// Fakes
// ============================================================================

/// Pages keyed by the incoming `after` token.
#[derive(Default)]
struct FakeSource {
    pages: HashMap<Option<String>, SubmissionPage>,
    calls: AtomicUsize,
    /// Answer this `after` token with an upstream 500.
    failing_token: Option<String>,
    /// Engage this switch while serving the first page.
    kill_on_first_fetch: Option<KillSwitch>,
}

impl FakeSource {
    fn with_page(mut self, after: Option<&str>, results: Vec<Submission>, next: Option<&str>) -> Self {
        self.pages.insert(
            after.map(String::from),
            SubmissionPage {
                results,
                next: PageToken::from(next.map(String::from)),
            },
        );
        self
    }
}

#[async_trait]
impl SubmissionSource for FakeSource {
    async fn fetch_page(&self, _form_id: &str, after: Option<&str>) -> SyncResult<SubmissionPage> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(kill) = self.kill_on_first_fetch.as_ref().filter(|_| n == 1) {
            kill.kill();
        }
        if after.is_some() && after == self.failing_token.as_deref() {
            return Err(SyncError::upstream(500, "https://api.example.com/submissions", "boom"));
        }
        Ok(self
            .pages
            .get(&after.map(String::from))
            .cloned()
            .unwrap_or_default())
    }
}

/// Contacts by normalized email; records every PATCH.
#[derive(Default)]
struct FakeContacts {
    contacts: HashMap<String, Contact>,
    patches: Mutex<Vec<(String, UpdatePlan)>>,
    lookups: AtomicUsize,
    /// Engage this switch on the n-th lookup (1-based).
    kill_on_lookup: Option<(usize, KillSwitch)>,
    /// Lookups for this email fail.
    failing_email: Option<String>,
}

impl FakeContacts {
    fn with_contact(mut self, email: &str, contact: Contact) -> Self {
        self.contacts.insert(normalize_email(email), contact);
        self
    }

    fn patches(&self) -> Vec<(String, UpdatePlan)> {
        self.patches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContactStore for FakeContacts {
    async fn find_by_email(&self, email: &str, _properties: &[String]) -> SyncResult<Option<Contact>> {
        let n = self.lookups.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, kill)) = &self.kill_on_lookup {
            if n == *at {
                kill.kill();
            }
        }
        if self.failing_email.as_deref() == Some(normalize_email(email).as_str()) {
            return Err(SyncError::upstream(503, "https://api.example.com/search", "unavailable"));
        }
        Ok(self.contacts.get(&normalize_email(email)).cloned())
    }

    async fn update_contact(&self, contact_id: &str, plan: &UpdatePlan) -> SyncResult<()> {
        self.patches
            .lock()
            .unwrap()
            .push((contact_id.to_string(), plan.clone()));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    runner: Arc<RecoveryRunner>,
    contacts: Arc<FakeContacts>,
    source: Arc<FakeSource>,
    jobs: Arc<JobTracker>,
    store: SnapshotStore,
    _dir: TempDir,
}

fn config(dir: &TempDir, dry_run: bool) -> AppConfig {
    let mut mapping = FieldMapping::new();
    mapping.insert(OPT_IN.to_string(), CRM_OPT_IN.to_string());
    let mut forms = BTreeMap::new();
    forms.insert(FORM.to_string(), mapping);

    let mut config = AppConfig::with_defaults("pat", FormFieldMap::new(forms), "control");
    config.checkbox_properties = vec![OPT_IN.to_string()];
    config.data_dir = dir.path().to_path_buf();
    config.dry_run = dry_run;
    config.runner.record_delay_ms = 0;
    config.runner.checkpoint_interval = 2;
    config
}

fn harness_with(source: FakeSource, contacts: FakeContacts, kill: KillSwitch, dry_run: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, dry_run);
    let store = SnapshotStore::new(dir.path());
    let jobs = Arc::new(JobTracker::new(store.clone()));
    let source = Arc::new(source);
    let contacts = Arc::new(contacts);
    let runner = Arc::new(RecoveryRunner::new(
        &config,
        source.clone(),
        contacts.clone(),
        store.clone(),
        kill,
        jobs.clone(),
    ));
    Harness {
        runner,
        contacts,
        source,
        jobs,
        store,
        _dir: dir,
    }
}

fn harness(source: FakeSource, contacts: FakeContacts) -> Harness {
    harness_with(source, contacts, KillSwitch::new(), false)
}

fn sub(email: &str, ts: i64, opt_in: &str) -> Submission {
    Submission::from_pairs(Some(ts), &[("email", email), (OPT_IN, opt_in)])
}

fn blank_contact(id: &str) -> Contact {
    Contact::new(id).with_property(CRM_OPT_IN, Some(""))
}

/// Two pages: a (blank contact), b (already set), one without email, c (no contact).
fn two_page_source() -> FakeSource {
    FakeSource::default()
        .with_page(
            None,
            vec![
                sub("a@x.com", 3, "Checked"),
                sub("b@x.com", 2, "Checked"),
                Submission::from_pairs(Some(1), &[(OPT_IN, "Checked")]),
            ],
            Some("t1"),
        )
        .with_page(Some("t1"), vec![sub("c@x.com", 1, "Checked")], None)
}

fn standard_contacts() -> FakeContacts {
    FakeContacts::default()
        .with_contact("a@x.com", blank_contact("101"))
        .with_contact("b@x.com", Contact::new("102").with_property(CRM_OPT_IN, Some("Checked")))
}

// ============================================================================
// Live runs
// ============================================================================

#[tokio::test]
async fn smoke_run_plans_but_never_patches() {
    let h = harness(two_page_source(), standard_contacts());

    let summary = h.runner.run_form(FORM, RunMode::Smoke, None, false).await.unwrap();

    assert_eq!(summary.status, JobStatus::Complete);
    assert_eq!(summary.mode, RunMode::Smoke);
    assert_eq!(summary.counters.processed, 4);
    assert_eq!(summary.counters.planned, 1);
    assert_eq!(summary.counters.skipped, 3);
    assert_eq!(summary.counters.updated, 0);
    assert!(h.contacts.patches().is_empty());
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dry_run_downgrades_write_requests() {
    let h = harness_with(two_page_source(), standard_contacts(), KillSwitch::new(), true);

    let summary = h.runner.run_form(FORM, RunMode::Write, None, false).await.unwrap();

    assert_eq!(summary.mode, RunMode::Smoke);
    assert!(summary.dry_run_forced);
    assert_eq!(summary.counters.updated, 0);
    assert!(h.contacts.patches().is_empty());
}

#[tokio::test]
async fn write_run_fills_only_blank_properties() {
    let h = harness(two_page_source(), standard_contacts());

    let summary = h.runner.run_form(FORM, RunMode::Write, None, false).await.unwrap();

    assert_eq!(summary.status, JobStatus::Complete);
    assert_eq!(summary.counters.updated, 1);
    assert_eq!(summary.counters.errors, 0);
    assert_eq!(summary.next_cursor, None);

    let patches = h.contacts.patches();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].0, "101");
    assert_eq!(patches[0].1.get(CRM_OPT_IN), Some("Checked"));
    assert_eq!(patches[0].1.len(), 1);

    // Completed write runs clear the live cursor
    assert_eq!(h.store.load_live_cursor(FORM).await.unwrap(), None);
}

#[tokio::test]
async fn max_records_stops_at_a_page_boundary_and_resumes() {
    let h = harness(two_page_source(), standard_contacts());

    let first = h.runner.run_form(FORM, RunMode::Write, Some(3), false).await.unwrap();
    assert_eq!(first.status, JobStatus::Complete);
    assert_eq!(first.counters.processed, 3);
    let token = first.next_cursor.as_ref().and_then(|c| c.token().map(String::from));
    assert_eq!(token.as_deref(), Some("t1"));

    let resumed = h.runner.run_form(FORM, RunMode::Write, None, true).await.unwrap();
    assert_eq!(resumed.counters.processed, 1);
    assert_eq!(resumed.next_cursor, None);
}

#[tokio::test]
async fn kill_switch_stops_with_partial_counts() {
    let kill = KillSwitch::new();
    let contacts = FakeContacts {
        kill_on_lookup: Some((2, kill.clone())),
        ..standard_contacts()
    };
    let h = harness_with(two_page_source(), contacts, kill.clone(), false);

    let summary = h.runner.run_form(FORM, RunMode::Write, None, false).await.unwrap();

    assert_eq!(summary.status, JobStatus::Killed);
    assert_eq!(summary.counters.processed, 2);
    assert_eq!(h.contacts.patches().len(), 1);
    assert!(!h.jobs.is_busy().await);

    // Nothing starts while the switch is engaged
    let again = h.runner.run_form(FORM, RunMode::Write, None, false).await.unwrap();
    assert_eq!(again.status, JobStatus::Killed);
    assert_eq!(again.counters.processed, 0);

    kill.reset();
    let after_reset = h.runner.run_form(FORM, RunMode::Smoke, None, false).await.unwrap();
    assert_eq!(after_reset.status, JobStatus::Complete);
}

#[tokio::test]
async fn failed_lookup_is_counted_and_the_run_continues() {
    let contacts = FakeContacts {
        failing_email: Some("a@x.com".to_string()),
        ..standard_contacts()
    };
    let h = harness(two_page_source(), contacts);

    let summary = h.runner.run_form(FORM, RunMode::Write, None, false).await.unwrap();

    assert_eq!(summary.status, JobStatus::Complete);
    assert_eq!(summary.counters.processed, 4);
    assert_eq!(summary.counters.errors, 1);
    assert_eq!(summary.counters.skipped, 3);
    assert_eq!(summary.last_error, None);
    assert!(h.contacts.patches().is_empty());
}

#[tokio::test]
async fn page_failure_aborts_the_run_with_error() {
    let source = FakeSource {
        failing_token: Some("t1".to_string()),
        ..two_page_source()
    };
    let h = harness(source, standard_contacts());

    let summary = h.runner.run_form(FORM, RunMode::Write, None, false).await.unwrap();

    assert_eq!(summary.status, JobStatus::Error);
    assert_eq!(summary.counters.processed, 3);
    assert!(summary.last_error.as_deref().is_some_and(|e| e.contains("500")));
    assert!(!h.jobs.is_busy().await);
    let job = h.jobs.current().await.unwrap();
    assert_eq!(job.status(), JobStatus::Error);
    assert!(job.finished_at.is_some());
}

#[tokio::test]
async fn run_all_covers_every_configured_form() {
    let h = harness(two_page_source(), standard_contacts());

    let summary = h.runner.run_all(RunMode::Smoke).await.unwrap();

    assert_eq!(summary.status, JobStatus::Complete);
    assert_eq!(summary.counters.processed, 4);
    let job = h.jobs.current().await.unwrap();
    assert_eq!(job.kind, JobKind::RunAll);
    assert_eq!(job.status(), JobStatus::Complete);
}

#[tokio::test]
async fn unknown_form_is_rejected() {
    let h = harness(FakeSource::default(), FakeContacts::default());
    let err = h.runner.run_form("nope", RunMode::Smoke, None, false).await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownForm(id) if id == "nope"));
}

#[tokio::test]
async fn concurrent_job_is_refused() {
    let h = harness(two_page_source(), standard_contacts());
    let held = h.jobs.begin(JobKind::RunAll, None, RunMode::Smoke, false).await.unwrap();

    let err = h.runner.run_form(FORM, RunMode::Smoke, None, false).await.unwrap_err();
    assert!(matches!(err, SyncError::JobAlreadyRunning(id) if id == held.job_id));
}

// ============================================================================
// Snapshot workflow
// ============================================================================

/// a appears twice (newest wins), b once, plus one submission without email.
fn duplicate_source() -> FakeSource {
    FakeSource::default()
        .with_page(
            None,
            vec![sub("a@x.com", 1, "Not Checked"), sub("b@x.com", 1, "Checked")],
            Some("p2"),
        )
        .with_page(
            Some("p2"),
            vec![
                sub("A@X.com", 2, "Checked"),
                Submission::from_pairs(Some(3), &[(OPT_IN, "Checked")]),
            ],
            None,
        )
}

fn duplicate_contacts() -> FakeContacts {
    FakeContacts::default()
        .with_contact("a@x.com", blank_contact("201"))
        .with_contact("b@x.com", blank_contact("202"))
}

#[tokio::test]
async fn prepare_dedupes_to_newest_submission_per_email() {
    let h = harness(duplicate_source(), duplicate_contacts());

    let prepared = h.runner.prepare(FORM, None).await.unwrap();
    assert_eq!(prepared.pages, 2);
    assert_eq!(prepared.total_submissions, 4);
    assert_eq!(prepared.without_email, 1);
    assert_eq!(prepared.unique_emails, 2);
    assert!(!prepared.killed);

    let preview = h.runner.preview(FORM, None, None).await.unwrap();
    assert_eq!(preview.total, 2);
    let a = &preview.entries[0].entry;
    assert_eq!(a.submitted_at, Some(2));
    assert_eq!(a.fields.get(OPT_IN).map(String::as_str), Some("Checked"));
    assert_eq!(preview.entries[1].entry.email, "b@x.com");

    let csv = h.runner.export_csv(FORM).await.unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("email,opt_in"));
    assert_eq!(lines.count(), 2);
}

#[tokio::test]
async fn batch_runs_advance_the_cursor_only_in_write_mode() {
    let h = harness(duplicate_source(), duplicate_contacts());
    h.runner.prepare(FORM, None).await.unwrap();

    let report = h.runner.report(FORM).await.unwrap();
    assert_eq!((report.records_total, report.records_processed), (2, 0));

    let smoke = h.runner.batch_run(FORM, RunMode::Smoke, None, Some(1)).await.unwrap();
    assert_eq!(smoke.summary.counters.planned, 1);
    assert_eq!(smoke.next_offset, 1);
    assert_eq!(h.runner.report(FORM).await.unwrap().records_processed, 0);

    let first = h.runner.batch_run(FORM, RunMode::Write, None, Some(1)).await.unwrap();
    assert_eq!((first.offset, first.next_offset, first.total), (0, 1, 2));
    assert_eq!(first.summary.counters.updated, 1);
    assert_eq!(h.runner.report(FORM).await.unwrap().records_remaining, 1);

    let second = h.runner.batch_run(FORM, RunMode::Write, None, None).await.unwrap();
    assert_eq!((second.offset, second.next_offset), (1, 2));

    let report = h.runner.report(FORM).await.unwrap();
    assert_eq!(report.records_processed, 2);
    assert_eq!(report.records_remaining, 0);

    let ids: Vec<String> = h.contacts.patches().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["201", "202"]);
}

#[tokio::test]
async fn killed_batch_resumes_from_the_checkpoint() {
    let source = FakeSource::default().with_page(
        None,
        vec![
            sub("a@x.com", 3, "Checked"),
            sub("b@x.com", 2, "Checked"),
            sub("c@x.com", 1, "Checked"),
        ],
        None,
    );
    let kill = KillSwitch::new();
    let contacts = FakeContacts {
        kill_on_lookup: Some((2, kill.clone())),
        ..FakeContacts::default()
            .with_contact("a@x.com", blank_contact("301"))
            .with_contact("b@x.com", blank_contact("302"))
            .with_contact("c@x.com", blank_contact("303"))
    };
    let h = harness_with(source, contacts, kill.clone(), false);
    h.runner.prepare(FORM, None).await.unwrap();

    let first = h.runner.batch_run(FORM, RunMode::Write, None, None).await.unwrap();
    assert_eq!(first.summary.status, JobStatus::Killed);
    assert_eq!(first.next_offset, 2);
    assert_eq!(h.store.load_cursor(FORM).await.unwrap(), Some(Cursor::Offset(2)));

    kill.reset();
    let resumed = h.runner.batch_run(FORM, RunMode::Write, None, None).await.unwrap();
    assert_eq!(resumed.summary.status, JobStatus::Complete);
    assert_eq!((resumed.offset, resumed.next_offset), (2, 3));
    assert_eq!(resumed.summary.counters.processed, 1);

    let ids: Vec<String> = h.contacts.patches().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["301", "302", "303"]);
}

#[tokio::test]
async fn explicit_offset_past_the_end_is_clamped() {
    let h = harness(duplicate_source(), duplicate_contacts());
    h.runner.prepare(FORM, None).await.unwrap();

    let result = h.runner.batch_run(FORM, RunMode::Smoke, Some(10), Some(5)).await.unwrap();
    assert_eq!((result.offset, result.next_offset), (2, 2));
    assert_eq!(result.summary.counters.processed, 0);
}

#[tokio::test]
async fn batch_run_without_snapshot_is_missing() {
    let h = harness(duplicate_source(), duplicate_contacts());
    let err = h.runner.batch_run(FORM, RunMode::Smoke, None, None).await.unwrap_err();
    assert!(matches!(err, SyncError::SnapshotMissing(_)));

    let report = h.runner.report(FORM).await.unwrap();
    assert_eq!(report.records_total, 0);
}

// ============================================================================
// Per-email runs
// ============================================================================

#[tokio::test]
async fn email_run_prefers_snapshot_and_matches_case_insensitively() {
    let h = harness(duplicate_source(), duplicate_contacts());
    h.runner.prepare(FORM, None).await.unwrap();
    let calls_after_prepare = h.source.calls.load(Ordering::SeqCst);

    let result = h
        .runner
        .run_form_by_email(FORM, " A@x.COM ", RunMode::Smoke)
        .await
        .unwrap();

    assert_eq!(result.source, "snapshot");
    assert_eq!(result.contact_id.as_deref(), Some("201"));
    assert_eq!(result.plan.get(CRM_OPT_IN), Some("Checked"));
    assert_eq!(result.summary.counters.planned, 1);
    assert_eq!(h.source.calls.load(Ordering::SeqCst), calls_after_prepare);
    assert!(h.contacts.patches().is_empty());
}

#[tokio::test]
async fn email_run_falls_back_to_live_pages() {
    let h = harness(duplicate_source(), duplicate_contacts());

    let result = h
        .runner
        .run_form_by_email(FORM, "b@x.com", RunMode::Write)
        .await
        .unwrap();

    assert_eq!(result.source, "live");
    assert_eq!(result.summary.status, JobStatus::Complete);
    assert_eq!(result.summary.counters.updated, 1);
    assert_eq!(h.contacts.patches().len(), 1);
}

#[tokio::test]
async fn kill_during_live_scan_stops_the_email_run() {
    let kill = KillSwitch::new();
    let source = FakeSource {
        kill_on_first_fetch: Some(kill.clone()),
        ..duplicate_source()
    };
    let h = harness_with(source, duplicate_contacts(), kill.clone(), false);

    let result = h
        .runner
        .run_form_by_email(FORM, "b@x.com", RunMode::Write)
        .await
        .unwrap();

    assert_eq!(result.summary.status, JobStatus::Killed);
    assert_eq!(result.summary.counters.processed, 0);
    assert!(result.contact_id.is_none());
    assert!(h.contacts.patches().is_empty());
    assert_eq!(h.contacts.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn email_without_submission_reports_none() {
    let h = harness(duplicate_source(), duplicate_contacts());

    let result = h
        .runner
        .run_form_by_email(FORM, "ghost@x.com", RunMode::Smoke)
        .await
        .unwrap();

    assert_eq!(result.source, "none");
    assert_eq!(result.summary.counters.processed, 0);
    assert!(result.plan.is_empty());
}
