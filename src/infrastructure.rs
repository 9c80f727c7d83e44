//! Infrastructure layer for upstream APIs, local persistence and process setup
//!
//! This module provides the HubSpot HTTP client, the rate-limit policy, the
//! on-disk snapshot store, CSV rendering, configuration and logging.

pub mod config; // Configuration loading and defaults
pub mod csv_export;
pub mod http_client; // HubSpot client (submissions + contacts)
pub mod logging; // Logging infrastructure
pub mod rate_limit;
pub mod snapshot_store;
pub mod sync_error; // Error types

// Re-export commonly used items
pub use config::{AppConfig, LoggingConfig};
pub use csv_export::render_csv;
pub use http_client::{HttpClientConfig, HubSpotClient};
pub use logging::{init_logging_with_config, log_system_info};
pub use rate_limit::{RateLimitHeaders, RateLimitPolicy};
pub use snapshot_store::SnapshotStore;
pub use sync_error::{SyncError, SyncResult};
