//! Pagination token normalization.
//!
//! The submissions endpoint has returned its continuation token in several
//! shapes over time. Everything downstream only ever sees [`PageToken`]; the
//! shape handling lives in [`PageToken::from_response`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entities::Submission;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PageToken {
    #[default]
    Absent,
    Token(String),
}

impl PageToken {
    /// Recognized shapes:
    /// - `{"paging": {"next": {"after": "t"}}}`
    /// - `{"paging": {"next": "t"}}` or a top-level `{"after": "t"}`
    /// - anything else → `Absent`
    pub fn from_response(body: &Value) -> Self {
        let next = body.get("paging").and_then(|p| p.get("next"));
        let candidate = match next {
            Some(Value::Object(obj)) => obj.get("after"),
            Some(other) => Some(other),
            None => body.get("after"),
        };
        candidate.map_or(Self::Absent, Self::from_scalar)
    }

    fn from_scalar(value: &Value) -> Self {
        match value {
            Value::String(s) if !s.trim().is_empty() => Self::Token(s.trim().to_string()),
            Value::Number(n) => Self::Token(n.to_string()),
            _ => Self::Absent,
        }
    }

    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Self::Absent => None,
            Self::Token(t) => Some(t.as_str()),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl From<Option<String>> for PageToken {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(t) if !t.is_empty() => Self::Token(t),
            _ => Self::Absent,
        }
    }
}

/// One page of submissions plus where to continue from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionPage {
    pub results: Vec<Submission>,
    pub next: PageToken,
}

impl SubmissionPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!({"paging": {"next": {"after": "abc"}}}), PageToken::Token("abc".into()))]
    #[case(json!({"paging": {"next": "abc"}}), PageToken::Token("abc".into()))]
    #[case(json!({"after": "abc"}), PageToken::Token("abc".into()))]
    #[case(json!({"paging": {"next": {"after": 150}}}), PageToken::Token("150".into()))]
    #[case(json!({"paging": {"next": {"after": ""}}}), PageToken::Absent)]
    #[case(json!({"paging": {"next": null}}), PageToken::Absent)]
    #[case(json!({"paging": {}}), PageToken::Absent)]
    #[case(json!({"results": []}), PageToken::Absent)]
    fn token_shapes(#[case] body: Value, #[case] expected: PageToken) {
        assert_eq!(PageToken::from_response(&body), expected);
    }

    #[test]
    fn cursor_serializes_with_kind_tag() {
        let v = serde_json::to_value(PageToken::Token("x".into())).unwrap();
        assert_eq!(v, json!({"kind": "token", "value": "x"}));
    }
}
