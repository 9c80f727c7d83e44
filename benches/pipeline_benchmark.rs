//! Pipeline hot paths: dedupe over a large snapshot and per-record planning.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;

use consent_recovery_lib::domain::services::{dedupe_submissions, SubmissionParser, UpdatePlanner};
use consent_recovery_lib::domain::{Contact, FieldMapping, FormFieldMap, Submission};

const CONSENT_FIELDS: [&str; 2] = ["terms_consent", "events_consent"];

fn submissions(count: usize, distinct_emails: usize) -> Vec<Submission> {
    (0..count)
        .map(|i| {
            let email = format!("user{}@example.com", i % distinct_emails);
            let consent = if i % 3 == 0 { "Checked" } else { "Not Checked" };
            Submission::from_pairs(
                Some(i64::try_from(i).unwrap_or(i64::MAX)),
                &[
                    ("email", email.as_str()),
                    ("firstname", "Ada"),
                    (CONSENT_FIELDS[0], consent),
                    (CONSENT_FIELDS[1], "Checked"),
                ],
            )
        })
        .collect()
}

fn planner() -> UpdatePlanner {
    let mut mapping = FieldMapping::new();
    for field in CONSENT_FIELDS {
        mapping.insert(field.to_string(), format!("crm_{field}"));
    }
    let mut forms = BTreeMap::new();
    forms.insert("form".to_string(), mapping);
    UpdatePlanner::new(FormFieldMap::new(forms))
}

fn dedupe_benchmark(c: &mut Criterion) {
    let parser = SubmissionParser::new(CONSENT_FIELDS);
    let mut group = c.benchmark_group("dedupe");

    for size in [1_000usize, 10_000, 50_000] {
        let data = submissions(size, size / 4);
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(dedupe_submissions(&parser, data)));
        });
    }
    group.finish();
}

fn planner_benchmark(c: &mut Criterion) {
    let planner = planner();
    let parser = SubmissionParser::new(CONSENT_FIELDS);
    let parsed = parser.parse(&submissions(1, 1)[0]);
    let blank = Contact::new("1")
        .with_property("crm_terms_consent", Some(""))
        .with_property("crm_events_consent", None);
    let filled = Contact::new("2")
        .with_property("crm_terms_consent", Some("Checked"))
        .with_property("crm_events_consent", Some("Checked"));

    c.bench_function("plan_updates - blank contact", |b| {
        b.iter(|| black_box(planner.plan_updates("form", &parsed.fields, &blank)));
    });
    c.bench_function("plan_updates - nothing to fill", |b| {
        b.iter(|| black_box(planner.plan_updates("form", &parsed.fields, &filled)));
    });
}

criterion_group!(benches, dedupe_benchmark, planner_benchmark);
criterion_main!(benches);
