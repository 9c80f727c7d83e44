//! Keeps the most recent submission per email.
//!
//! Emails are compared case-insensitively. When both candidates carry a
//! `submittedAt` timestamp the later one wins; otherwise the first one seen
//! wins, which is the newest when pages are read newest-first.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::entities::{normalize_email, Submission};
use crate::domain::services::submission_parser::SubmissionParser;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupedEntry {
    pub email: String,
    pub fields: BTreeMap<String, String>,
    pub submitted_at: Option<i64>,
    #[serde(skip)]
    pub submission: Submission,
}

impl DedupedEntry {
    pub fn key(&self) -> String {
        normalize_email(&self.email)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupeOutcome {
    pub entries: Vec<DedupedEntry>,
    /// Submissions that carried an email.
    pub input_with_email: usize,
    /// Submissions dropped because no email could be parsed.
    pub without_email: usize,
}

impl DedupeOutcome {
    pub fn unique_emails(&self) -> usize {
        self.entries.len()
    }
}

/// Every field name seen across the entries, sorted.
pub fn observed_field_names(entries: &[DedupedEntry]) -> BTreeSet<String> {
    entries
        .iter()
        .flat_map(|e| e.fields.keys().cloned())
        .collect()
}

/// Dedupe in arrival order. Output keeps the order in which each email was
/// first seen.
pub fn dedupe_submissions<'a, I>(parser: &SubmissionParser, submissions: I) -> DedupeOutcome
where
    I: IntoIterator<Item = &'a Submission>,
{
    let mut outcome = DedupeOutcome::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for submission in submissions {
        let parsed = parser.parse(submission);
        let Some(email) = parsed.email else {
            outcome.without_email += 1;
            continue;
        };
        outcome.input_with_email += 1;

        let candidate = DedupedEntry {
            email,
            fields: parsed.fields,
            submitted_at: submission.submitted_at,
            submission: submission.clone(),
        };

        match index.get(&candidate.key()) {
            Some(&slot) => {
                let current = &outcome.entries[slot];
                if is_newer(candidate.submitted_at, current.submitted_at) {
                    outcome.entries[slot] = candidate;
                }
            }
            None => {
                index.insert(candidate.key(), outcome.entries.len());
                outcome.entries.push(candidate);
            }
        }
    }

    outcome
}

fn is_newer(candidate: Option<i64>, current: Option<i64>) -> bool {
    match (candidate, current) {
        (Some(c), Some(k)) => c > k,
        _ => false,
    }
}

/// Case-insensitive lookup of one email among deduped entries.
pub fn find_entry<'a>(entries: &'a [DedupedEntry], email: &str) -> Option<&'a DedupedEntry> {
    let wanted = normalize_email(email);
    entries.iter().find(|e| e.key() == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> SubmissionParser {
        SubmissionParser::new(["opt_in"])
    }

    #[test]
    fn keeps_latest_timestamp_per_email() {
        let subs = vec![
            Submission::from_pairs(Some(1), &[("email", "a@x.com"), ("opt_in", "Not Checked")]),
            Submission::from_pairs(Some(2), &[("email", "a@x.com"), ("opt_in", "Checked")]),
            Submission::from_pairs(Some(1), &[("email", "b@x.com")]),
        ];
        let out = dedupe_submissions(&parser(), &subs);
        assert_eq!(out.unique_emails(), 2);
        assert_eq!(out.input_with_email, 3);

        let a = find_entry(&out.entries, "a@x.com").unwrap();
        assert_eq!(a.submitted_at, Some(2));
        assert_eq!(a.fields.get("opt_in").map(String::as_str), Some("Checked"));
        let b = find_entry(&out.entries, "b@x.com").unwrap();
        assert_eq!(b.submitted_at, Some(1));
    }

    #[test]
    fn emails_match_case_insensitively() {
        let subs = vec![
            Submission::from_pairs(Some(5), &[("email", "Jane@X.com")]),
            Submission::from_pairs(Some(3), &[("email", "jane@x.com ")]),
        ];
        let out = dedupe_submissions(&parser(), &subs);
        assert_eq!(out.unique_emails(), 1);
        assert_eq!(out.entries[0].email, "Jane@X.com");
        assert!(find_entry(&out.entries, "JANE@x.COM").is_some());
    }

    #[test]
    fn first_seen_wins_without_timestamps() {
        let subs = vec![
            Submission::from_pairs(None, &[("email", "a@x.com"), ("city", "newest")]),
            Submission::from_pairs(None, &[("email", "a@x.com"), ("city", "older")]),
        ];
        let out = dedupe_submissions(&parser(), &subs);
        assert_eq!(out.entries[0].fields["city"], "newest");
    }

    #[test]
    fn submissions_without_email_are_counted_and_dropped() {
        let subs = vec![
            Submission::from_pairs(None, &[("city", "x")]),
            Submission::from_pairs(None, &[("email", "a@x.com"), ("zip", "1")]),
        ];
        let out = dedupe_submissions(&parser(), &subs);
        assert_eq!(out.without_email, 1);
        assert_eq!(out.unique_emails(), 1);
        assert_eq!(observed_field_names(&out.entries).into_iter().collect::<Vec<_>>(), vec!["zip".to_string()]);
    }
}
