//! Consent Recovery - backfills missing CRM contact consent properties
//!
//! Form submissions are paged from HubSpot, deduplicated per email and
//! compared against the matching CRM contact. Consent properties that are
//! blank on the contact are filled from the submission; nothing already set is
//! ever overwritten. A small bearer-protected HTTP API drives the runs.

// Module declarations
pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod commands;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::state::AppState;
use crate::commands::build_router;

/// Serve the control API until `shutdown` is cancelled.
///
/// Cancelling also trips the kill switch so a background run stops at its
/// next checkpoint instead of being dropped mid-record.
pub async fn serve(state: AppState, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    info!(
        addr = %addr,
        forms = state.config.forms.len(),
        dry_run = state.config.dry_run,
        "🌐 Control API listening"
    );

    let kill = state.kill.clone();
    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            kill.kill();
            info!("🛑 Shutdown requested, stopping running jobs");
        })
        .await
        .context("control API server failed")
}
