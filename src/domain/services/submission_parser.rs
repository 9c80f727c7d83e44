//! Flattens a submission's `values` list into a name → value map.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::domain::entities::Submission;

/// Vocabulary accepted for checkbox/consent properties.
pub const CHECKBOX_VOCABULARY: [&str; 2] = ["Checked", "Not Checked"];

const EMAIL_FIELD: &str = "email";

/// Result of parsing one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedSubmission {
    pub email: Option<String>,
    pub fields: BTreeMap<String, String>,
}

impl ParsedSubmission {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Extracts the email and the usable fields from a submission.
///
/// Checkbox properties are only kept when their trimmed value is part of
/// [`CHECKBOX_VOCABULARY`]; every other string field is kept verbatim.
/// Fields with a missing or non-string name/value are skipped.
#[derive(Debug, Clone, Default)]
pub struct SubmissionParser {
    checkbox_properties: HashSet<String>,
}

impl SubmissionParser {
    pub fn new<I, S>(checkbox_properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            checkbox_properties: checkbox_properties.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_checkbox(&self, name: &str) -> bool {
        self.checkbox_properties.contains(name)
    }

    pub fn parse(&self, submission: &Submission) -> ParsedSubmission {
        let mut parsed = ParsedSubmission::default();

        for item in &submission.values {
            let Some((name, value)) = item.as_strings() else {
                continue;
            };

            if name.eq_ignore_ascii_case(EMAIL_FIELD) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    parsed.email = Some(trimmed.to_string());
                }
            } else if self.is_checkbox(name) {
                let trimmed = value.trim();
                if CHECKBOX_VOCABULARY.contains(&trimmed) {
                    parsed.fields.insert(name.to_string(), trimmed.to_string());
                }
            } else {
                parsed.fields.insert(name.to_string(), value.to_string());
            }
        }

        parsed
    }

    /// Only the checkbox/consent fields, for logging.
    pub fn consent_fields<'a>(&self, fields: &'a BTreeMap<String, String>) -> BTreeMap<&'a str, &'a str> {
        fields
            .iter()
            .filter(|(name, _)| self.is_checkbox(name))
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect()
    }
}
