//! Configuration infrastructure
//!
//! Settings are loaded once at startup into an immutable [`AppConfig`] that the
//! rest of the service shares behind an `Arc`.
//!
//! Sources, later wins:
//! 1. Built-in defaults (see [`defaults`])
//! 2. Optional `consent-recovery.toml` (or the file named by `CONSENT_RECOVERY_CONFIG`)
//! 3. Environment variables (`HUBSPOT_PRIVATE_APP_TOKEN`, `DATA_DIR`, ...)
//!
//! File keys are the lowercase form of the environment variable names.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::entities::{FieldMapping, FormFieldMap};
use crate::infrastructure::rate_limit::RateLimitPolicy;
use crate::infrastructure::sync_error::{SyncError, SyncResult};

/// Environment variable that points at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "CONSENT_RECOVERY_CONFIG";

/// Complete application configuration
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    /// Upstream HubSpot connection settings
    pub hubspot: HubSpotConfig,

    /// Form id → (submission field → CRM property)
    pub forms: FormFieldMap,

    /// Submission fields treated as consent checkboxes
    pub checkbox_properties: Vec<String>,

    /// Bearer token required by the control API
    #[serde(skip_serializing)]
    pub control_api_token: String,

    /// Force smoke mode for every run
    pub dry_run: bool,

    /// Root directory for snapshots, cursors and job status
    pub data_dir: PathBuf,

    /// Listen address of the control API
    pub bind_addr: SocketAddr,

    /// Runner pacing and checkpointing
    pub runner: RunnerConfig,

    /// Header-driven sleep heuristics
    pub rate_limit: RateLimitPolicy,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubSpotConfig {
    #[serde(skip_serializing)]
    pub private_app_token: String,
    pub base_url: String,
    /// Requested submissions page size; the client caps it at the endpoint maximum.
    pub page_size: usize,
    pub request_timeout_seconds: u64,
    pub max_requests_per_second: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunnerConfig {
    /// Submissions between cursor/job-state checkpoints
    pub checkpoint_interval: usize,
    /// Pause between records in milliseconds
    pub record_delay_ms: u64,
}

impl RunnerConfig {
    pub fn record_delay(&self) -> Duration {
        Duration::from_millis(self.record_delay_ms)
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Directory that holds the log file and its rotations
    pub directory: PathBuf,

    /// Name of the active log file
    pub file_name: String,

    /// Number of log files to keep (older rotations are deleted)
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            directory: PathBuf::from(defaults::LOG_DIR),
            file_name: defaults::LOG_FILE.to_string(),
            max_files: defaults::LOG_MAX_FILES,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: defaults::CHECKPOINT_INTERVAL,
            record_delay_ms: defaults::RECORD_DELAY_MS,
        }
    }
}

/// Flat view of every recognized key, as read by the `config` crate.
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    hubspot_private_app_token: Option<String>,
    hubspot_base_url: Option<String>,
    hubspot_form_property_map: Option<Value>,
    hubspot_checkbox_properties: Option<Value>,
    control_api_token: Option<String>,
    dry_run: Option<bool>,
    data_dir: Option<PathBuf>,
    port: Option<u16>,
    bind_addr: Option<String>,
    page_size: Option<usize>,
    checkpoint_interval: Option<usize>,
    record_delay_ms: Option<u64>,
    max_requests_per_second: Option<u32>,
    request_timeout_seconds: Option<u64>,
    log_level: Option<String>,
    log_dir: Option<PathBuf>,
    log_file: Option<String>,
    log_json: Option<bool>,
    log_max_files: Option<usize>,
    rate_limit_low_threshold: Option<u64>,
    rate_limit_low_sleep_ms: Option<u64>,
    rate_limit_mid_threshold: Option<u64>,
    rate_limit_mid_sleep_ms: Option<u64>,
    rate_limit_jitter_ms: Option<u64>,
    rate_limit_default_retry_after_secs: Option<u64>,
    rate_limit_max_retries: Option<u32>,
}

impl AppConfig {
    /// Configuration with every optional key at its default.
    pub fn with_defaults(
        private_app_token: impl Into<String>,
        forms: FormFieldMap,
        control_api_token: impl Into<String>,
    ) -> Self {
        Self {
            hubspot: HubSpotConfig {
                private_app_token: private_app_token.into(),
                base_url: defaults::HUBSPOT_BASE_URL.to_string(),
                page_size: defaults::PAGE_SIZE,
                request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
                max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            },
            forms,
            checkbox_properties: defaults::CHECKBOX_PROPERTIES
                .iter()
                .map(ToString::to_string)
                .collect(),
            control_api_token: control_api_token.into(),
            dry_run: false,
            data_dir: PathBuf::from(defaults::DATA_DIR),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], defaults::PORT)),
            runner: RunnerConfig::default(),
            rate_limit: RateLimitPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load from the optional config file plus the process environment.
    pub fn load() -> SyncResult<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| defaults::CONFIG_FILE.to_string());
        let builder = config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .add_source(config::Environment::default().try_parsing(true));

        let settings = builder
            .build()
            .map_err(|e| SyncError::config(format!("failed to read settings: {e}")))?;
        Self::from_settings(&settings)
    }

    /// Build from an already assembled `config::Config`.
    pub fn from_settings(settings: &config::Config) -> SyncResult<Self> {
        let raw: RawSettings = settings
            .clone()
            .try_deserialize()
            .map_err(|e| SyncError::config(format!("invalid settings: {e}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> SyncResult<Self> {
        let token = required(raw.hubspot_private_app_token, "HUBSPOT_PRIVATE_APP_TOKEN")?;
        let control_token = required(raw.control_api_token, "CONTROL_API_TOKEN")?;
        let forms = parse_form_map(raw.hubspot_form_property_map)?;

        let mut config = Self::with_defaults(token, forms, control_token);

        if let Some(url) = raw.hubspot_base_url.filter(|u| !u.trim().is_empty()) {
            config.hubspot.base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(props) = raw.hubspot_checkbox_properties {
            config.checkbox_properties = parse_list(&props)?;
        }
        if let Some(dry_run) = raw.dry_run {
            config.dry_run = dry_run;
        }
        if let Some(dir) = raw.data_dir {
            config.data_dir = dir;
        }
        config.bind_addr = match (raw.bind_addr, raw.port) {
            (Some(addr), _) => addr
                .parse()
                .map_err(|e| SyncError::config(format!("BIND_ADDR '{addr}' is not a socket address: {e}")))?,
            (None, Some(port)) => SocketAddr::from(([0, 0, 0, 0], port)),
            (None, None) => config.bind_addr,
        };

        let hubspot = &mut config.hubspot;
        hubspot.page_size = raw.page_size.unwrap_or(hubspot.page_size);
        hubspot.request_timeout_seconds = raw
            .request_timeout_seconds
            .unwrap_or(hubspot.request_timeout_seconds);
        hubspot.max_requests_per_second = raw
            .max_requests_per_second
            .unwrap_or(hubspot.max_requests_per_second);

        let runner = &mut config.runner;
        runner.checkpoint_interval = raw.checkpoint_interval.unwrap_or(runner.checkpoint_interval);
        runner.record_delay_ms = raw.record_delay_ms.unwrap_or(runner.record_delay_ms);

        let policy = &mut config.rate_limit;
        if let Some(v) = raw.rate_limit_low_threshold {
            policy.low_threshold = v;
        }
        if let Some(ms) = raw.rate_limit_low_sleep_ms {
            policy.low_sleep = Duration::from_millis(ms);
        }
        if let Some(v) = raw.rate_limit_mid_threshold {
            policy.mid_threshold = v;
        }
        if let Some(ms) = raw.rate_limit_mid_sleep_ms {
            policy.mid_sleep = Duration::from_millis(ms);
        }
        if let Some(ms) = raw.rate_limit_jitter_ms {
            policy.jitter = Duration::from_millis(ms);
        }
        if let Some(secs) = raw.rate_limit_default_retry_after_secs {
            policy.default_retry_after = Duration::from_secs(secs);
        }
        if let Some(n) = raw.rate_limit_max_retries {
            policy.max_retries = n;
        }

        let logging = &mut config.logging;
        if let Some(level) = raw.log_level {
            logging.level = level;
        }
        if let Some(dir) = raw.log_dir {
            logging.directory = dir;
        }
        if let Some(file) = raw.log_file {
            // LOG_FILE may carry a directory part, as in `logs/recovery.log`.
            let path = PathBuf::from(file);
            if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
                if !parent.as_os_str().is_empty() {
                    logging.directory = parent.to_path_buf();
                }
                logging.file_name = name.to_string_lossy().into_owned();
            }
        }
        if let Some(json) = raw.log_json {
            logging.json_format = json;
        }
        if let Some(max) = raw.log_max_files {
            logging.max_files = max;
        }

        config.validate()?;
        Ok(config)
    }

    /// Configuration validation
    pub fn validate(&self) -> SyncResult<()> {
        if self.hubspot.private_app_token.trim().is_empty() {
            return Err(SyncError::config("HUBSPOT_PRIVATE_APP_TOKEN must not be empty"));
        }
        if self.control_api_token.trim().is_empty() {
            return Err(SyncError::config("CONTROL_API_TOKEN must not be empty"));
        }
        if self.forms.is_empty() {
            return Err(SyncError::config("HUBSPOT_FORM_PROPERTY_MAP must map at least one form"));
        }
        url::Url::parse(&self.hubspot.base_url).map_err(|e| {
            SyncError::config(format!("HUBSPOT_BASE_URL '{}' is invalid: {e}", self.hubspot.base_url))
        })?;
        if self.hubspot.page_size == 0 {
            return Err(SyncError::config("PAGE_SIZE must be greater than 0"));
        }
        if self.hubspot.max_requests_per_second == 0 {
            return Err(SyncError::config("MAX_REQUESTS_PER_SECOND must be greater than 0"));
        }
        if self.hubspot.request_timeout_seconds == 0 {
            return Err(SyncError::config("REQUEST_TIMEOUT_SECONDS must be greater than 0"));
        }
        if self.runner.checkpoint_interval == 0 {
            return Err(SyncError::config("CHECKPOINT_INTERVAL must be greater than 0"));
        }
        Ok(())
    }
}

fn required(value: Option<String>, key: &str) -> SyncResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SyncError::config(format!("{key} is required")))
}

/// Accepts the JSON text form used in the environment or a table from the
/// config file.
fn parse_form_map(value: Option<Value>) -> SyncResult<FormFieldMap> {
    let value = match value {
        None => return Err(SyncError::config("HUBSPOT_FORM_PROPERTY_MAP is required")),
        Some(Value::String(text)) => serde_json::from_str::<Value>(&text).map_err(|e| {
            SyncError::config(format!("HUBSPOT_FORM_PROPERTY_MAP is not valid JSON: {e}"))
        })?,
        Some(other) => other,
    };

    let forms: BTreeMap<String, FieldMapping> = serde_json::from_value(value).map_err(|e| {
        SyncError::config(format!(
            "HUBSPOT_FORM_PROPERTY_MAP must be {{form_id: {{field: property}}}}: {e}"
        ))
    })?;
    Ok(FormFieldMap::new(forms))
}

/// Comma-separated text or an array of strings.
fn parse_list(value: &Value) -> SyncResult<Vec<String>> {
    let items: Vec<String> = match value {
        Value::String(text) => text.split(',').map(str::trim).map(String::from).collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| SyncError::config("HUBSPOT_CHECKBOX_PROPERTIES entries must be strings"))
            })
            .collect::<SyncResult<_>>()?,
        other => {
            return Err(SyncError::config(format!(
                "HUBSPOT_CHECKBOX_PROPERTIES must be a list, got {other}"
            )))
        }
    };
    Ok(items.into_iter().filter(|s| !s.is_empty()).collect())
}

/// Default configuration values
pub mod defaults {
    /// Config file looked up in the working directory
    pub const CONFIG_FILE: &str = "consent-recovery.toml";

    /// Default upstream API base URL
    pub const HUBSPOT_BASE_URL: &str = "https://api.hubapi.com";

    /// Consent checkboxes captured from submissions when none are configured
    pub const CHECKBOX_PROPERTIES: &[&str] = &[
        "i_agree_to_vrm_mortgage_services_s_terms_of_service_and_privacy_policy",
        "select_to_receive_information_from_vrm_mortgage_services_regarding_events_and_property_information",
    ];

    /// Default persisted-state directory
    pub const DATA_DIR: &str = "data";

    /// Default control API port
    pub const PORT: u16 = 8000;

    /// Submissions requested per page
    pub const PAGE_SIZE: usize = 50;

    /// Largest page the legacy submissions endpoint serves
    pub const MAX_PAGE_SIZE: usize = 50;

    /// Submissions processed between checkpoints
    pub const CHECKPOINT_INTERVAL: usize = 1000;

    /// Pause between records in milliseconds
    pub const RECORD_DELAY_MS: u64 = 300;

    /// Default request timeout in seconds
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    /// Steady request pacing (HubSpot private apps allow roughly 10/s)
    pub const MAX_REQUESTS_PER_SECOND: u32 = 9;

    /// Default page limit for snapshot preparation
    pub const PREPARE_MAX_PAGES: usize = 10_000;

    /// Default preview slice length
    pub const PREVIEW_LIMIT: usize = 20;

    // Rate limit defaults
    /// Remaining-quota value below which the long sleep applies
    pub const RATE_LIMIT_LOW_THRESHOLD: u64 = 5;

    /// Long sleep in milliseconds
    pub const RATE_LIMIT_LOW_SLEEP_MS: u64 = 2000;

    /// Remaining-quota value below which the short sleep applies
    pub const RATE_LIMIT_MID_THRESHOLD: u64 = 20;

    /// Short sleep in milliseconds
    pub const RATE_LIMIT_MID_SLEEP_MS: u64 = 500;

    /// Jitter added after every call in milliseconds
    pub const RATE_LIMIT_JITTER_MS: u64 = 100;

    /// Backoff used on 429 without a Retry-After header
    pub const RATE_LIMIT_DEFAULT_RETRY_AFTER_SECS: u64 = 10;

    /// 429 retries before giving up
    pub const RATE_LIMIT_MAX_RETRIES: u32 = 5;

    // Log configuration defaults
    /// Default log level
    pub const LOG_LEVEL: &str = "info";

    /// Default JSON format setting
    pub const LOG_JSON_FORMAT: bool = false;

    /// Default console output setting
    pub const LOG_CONSOLE_OUTPUT: bool = true;

    /// Default file output setting
    pub const LOG_FILE_OUTPUT: bool = true;

    /// Default log directory
    pub const LOG_DIR: &str = "logs";

    /// Default log file name
    pub const LOG_FILE: &str = "recovery.log";

    /// Default maximum log files to keep
    pub const LOG_MAX_FILES: usize = 3;
}
