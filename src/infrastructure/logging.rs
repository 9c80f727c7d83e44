//! Logging system configuration and initialization
//!
//! This module provides the logging setup used by the service binary:
//! - Console output plus a file output through a non-blocking writer
//! - Startup rotation: the previous log file is renamed with its timestamp
//! - Cleanup of rotations beyond `max_files`
//! - Optional JSON formatted file logs
//! - `RUST_LOG` overrides the configured level

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

pub use crate::infrastructure::config::LoggingConfig;

// Global guard to keep the log file writer alive
static LOG_GUARDS: Lazy<Mutex<Vec<WorkerGuard>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Dependencies that are too chatty below TRACE.
const QUIET_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "h2=warn", "reqwest=info", "tower_http=info"];

struct UtcTimeFormatter;

impl FormatTime for UtcTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

/// Initialize logging with custom configuration
///
/// Below TRACE the HTTP stack (hyper, h2, reqwest) is held at warn/info so the
/// per-record pipeline logs stay readable. `RUST_LOG` replaces the whole filter:
/// ```bash
/// RUST_LOG="debug,reqwest=debug" consent-recovery
/// ```
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(&config.level)?;

    let file_layer = if config.file_output {
        std::fs::create_dir_all(&config.directory)
            .with_context(|| format!("Failed to create log directory {:?}", config.directory))?;

        let rotated = rotate_existing_log_file(&config.directory, &config.file_name)?;
        let removed = cleanup_old_logs(&config.directory, &config.file_name, config.max_files)?;

        let appender = rolling::never(&config.directory, &config.file_name);
        let (writer, guard) = non_blocking(appender);
        // Store the guard globally to prevent it from being dropped
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("log guard registry poisoned"))?
            .push(guard);

        let layer = if config.json_format {
            fmt::Layer::new()
                .json()
                .with_writer(writer)
                .with_timer(UtcTimeFormatter)
                .with_target(true)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::Layer::new()
                .with_writer(writer)
                .with_timer(UtcTimeFormatter)
                .with_target(false)
                .with_ansi(false)
                .boxed()
        };
        Some((layer, rotated, removed))
    } else {
        None
    };

    let console_layer = config.console_output.then(|| {
        fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_timer(UtcTimeFormatter)
            .with_target(false)
            .boxed()
    });

    if file_layer.is_none() && console_layer.is_none() {
        return Err(anyhow!("No logging output configured"));
    }

    let (file_layer, rotated, removed) = match file_layer {
        Some((layer, rotated, removed)) => (Some(layer), rotated, removed),
        None => (None, None, 0),
    };

    Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    info!("📝 Logging system initialized");
    info!("Log level: {} (json file format: {})", config.level, config.json_format);
    if config.file_output {
        info!("Log file: {:?}", config.directory.join(&config.file_name));
    }
    if let Some(name) = rotated {
        info!("Rotated previous log file to: {}", name);
    }
    if removed > 0 {
        info!("Removed {} old log file(s) (keeping {})", removed, config.max_files);
    }
    Ok(())
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{level}'"))?;
    if !level.to_lowercase().contains("trace") {
        for directive in QUIET_TARGETS {
            filter = filter.add_directive(
                directive
                    .parse()
                    .with_context(|| format!("Invalid filter directive '{directive}'"))?,
            );
        }
    }
    Ok(filter)
}

/// Rename an existing log file to `<stem>.<timestamp>.log`.
/// Returns the new file name when a rotation happened.
fn rotate_existing_log_file(log_dir: &Path, log_file_name: &str) -> Result<Option<String>> {
    let log_file_path = log_dir.join(log_file_name);
    if !log_file_path.exists() {
        return Ok(None);
    }

    let metadata = std::fs::metadata(&log_file_path).context("Failed to get log file metadata")?;
    let file_time = metadata
        .modified()
        .or_else(|_| metadata.created())
        .unwrap_or_else(|_| std::time::SystemTime::now());
    let datetime: chrono::DateTime<Utc> = file_time.into();

    let file_stem = log_file_name.trim_end_matches(".log");
    let timestamped_name = format!("{}.{}.log", file_stem, datetime.format("%Y%m%dT%H%M%S%3f"));
    let timestamped_path = log_dir.join(&timestamped_name);

    std::fs::rename(&log_file_path, &timestamped_path).with_context(|| {
        format!(
            "Failed to rotate log file {} to {}",
            log_file_path.display(),
            timestamped_path.display()
        )
    })?;
    Ok(Some(timestamped_name))
}

/// Delete rotated copies of `log_file_name` beyond the newest `max_files`.
fn cleanup_old_logs(log_dir: &Path, log_file_name: &str, max_files: usize) -> Result<usize> {
    let rotated = rotated_log_files(log_dir, log_file_name)?;
    if rotated.len() <= max_files {
        return Ok(0);
    }

    let mut removed = 0;
    for path in rotated.iter().skip(max_files) {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

/// Rotations of `log_file_name`, newest first.
fn rotated_log_files(log_dir: &Path, log_file_name: &str) -> Result<Vec<PathBuf>> {
    let prefix = format!("{}.", log_file_name.trim_end_matches(".log"));
    let mut files = Vec::new();

    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == log_file_name || !name.starts_with(&prefix) || !name.ends_with(".log") {
            continue;
        }
        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            files.push((path, modified));
        }
    }

    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    Ok(files.into_iter().map(|(path, _)| path).collect())
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== consent-recovery ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.console_output);
        assert!(config.file_output);
        assert_eq!(config.file_name, "recovery.log");
    }

    #[test]
    fn rotation_renames_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("recovery.log"), "old").unwrap();

        let rotated = rotate_existing_log_file(dir.path(), "recovery.log").unwrap().unwrap();
        assert!(rotated.starts_with("recovery."));
        assert!(!dir.path().join("recovery.log").exists());
        assert!(dir.path().join(&rotated).exists());

        assert_eq!(rotate_existing_log_file(dir.path(), "recovery.log").unwrap(), None);
    }

    #[test]
    fn cleanup_keeps_newest_rotations() {
        let dir = TempDir::new().unwrap();
        for stamp in ["20240101T000000000", "20240102T000000000", "20240103T000000000"] {
            std::fs::write(dir.path().join(format!("recovery.{stamp}.log")), stamp).unwrap();
        }
        std::fs::write(dir.path().join("recovery.log"), "active").unwrap();
        std::fs::write(dir.path().join("other.log"), "keep").unwrap();

        let removed = cleanup_old_logs(dir.path(), "recovery.log", 2).unwrap();
        assert_eq!(removed, 1);
        assert!(dir.path().join("recovery.log").exists());
        assert!(dir.path().join("other.log").exists());
        assert_eq!(rotated_log_files(dir.path(), "recovery.log").unwrap().len(), 2);
    }

    #[test]
    fn invalid_level_is_rejected() {
        // Only meaningful when RUST_LOG is unset, which is the case under `cargo test`.
        if std::env::var("RUST_LOG").is_err() {
            assert!(build_filter("info").is_ok());
            assert!(build_filter("consent_recovery_lib=verbose").is_err());
        }
    }
}
