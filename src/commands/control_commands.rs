//! Health, status and kill switch endpoints

use axum::extract::State;
use axum::Json;

use crate::application::dto::{HealthDto, KillStateDto, StatusDto};
use crate::application::state::AppState;

/// `GET /health`, unauthenticated.
pub async fn health(State(state): State<AppState>) -> Json<HealthDto> {
    Json(HealthDto {
        status: "ok",
        forms: state.config.forms.len(),
        dry_run: state.config.dry_run,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /status`: kill flag plus the current (or last) job.
pub async fn status(State(state): State<AppState>) -> Json<StatusDto> {
    Json(StatusDto {
        killed: state.kill.is_killed(),
        dry_run: state.config.dry_run,
        job: state.jobs.current().await,
    })
}

pub async fn kill(State(state): State<AppState>) -> Json<KillStateDto> {
    state.kill.kill();
    Json(KillStateDto { killed: true })
}

pub async fn unkill(State(state): State<AppState>) -> Json<KillStateDto> {
    state.kill.reset();
    Json(KillStateDto { killed: false })
}
