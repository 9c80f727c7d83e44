//! Error types for the recovery pipeline
//!
//! Every fallible pipeline step returns [`SyncError`]. The variants map onto the
//! error kinds the runner treats differently: configuration problems are fatal
//! at startup, transport and upstream failures abort a page (or are counted per
//! submission), and rate limiting is retried inside the HTTP client before it
//! ever surfaces here.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Upstream returned HTTP {status} for {url}: {body}")]
    Upstream {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Rate limited after {attempts} attempts: {url}")]
    RateLimited { attempts: u32, url: String },

    #[error("Failed to decode upstream response: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Snapshot not found: {}", .0.display())]
    SnapshotMissing(PathBuf),

    #[error("Unknown form id: {0}")]
    UnknownForm(String),

    #[error("A background job is already running: {0}")]
    JobAlreadyRunning(String),
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn upstream(status: u16, url: &str, body: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            url: url.to_string(),
            body: body.into(),
        }
    }

    /// True when a submissions lookup should be treated as an empty page
    /// rather than a failed run (deleted form, malformed id).
    pub fn is_missing_resource(&self) -> bool {
        matches!(self, Self::Upstream { status: 400 | 404, .. })
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_resource_covers_400_and_404_only() {
        assert!(SyncError::upstream(404, "u", "").is_missing_resource());
        assert!(SyncError::upstream(400, "u", "").is_missing_resource());
        assert!(!SyncError::upstream(500, "u", "").is_missing_resource());
        assert!(!SyncError::config("x").is_missing_resource());
    }

    #[test]
    fn rate_limit_message_names_attempts() {
        let err = SyncError::RateLimited {
            attempts: 5,
            url: "https://api.example.com".into(),
        };
        assert!(err.to_string().contains("5 attempts"));
    }
}
