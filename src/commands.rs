//! Control API: HTTP routes over the recovery use cases.
//!
//! `/health` is open; every other route requires the control bearer token.

pub mod api_error;
pub mod auth;
pub mod control_commands;
pub mod run_commands;
pub mod snapshot_commands;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::application::state::AppState;

pub use api_error::{ApiError, ApiResult};

/// Build the control API router
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/status", get(control_commands::status))
        .route("/kill", post(control_commands::kill))
        .route("/unkill", post(control_commands::unkill))
        // Runs
        .route("/run-all", post(run_commands::run_all))
        .route("/run-form", post(run_commands::run_form))
        .route("/run-form-by-email", post(run_commands::run_form_by_email))
        .route("/batch-run", post(run_commands::batch_run))
        // Snapshots
        .route("/prepare", post(snapshot_commands::prepare))
        .route("/preview", post(snapshot_commands::preview))
        .route("/download-csv", get(snapshot_commands::download_csv))
        .route("/report", get(snapshot_commands::report))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_control_token));

    Router::new()
        .route("/health", get(control_commands::health))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
