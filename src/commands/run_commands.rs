//! Run endpoints: run-all, run-form, run-form-by-email and batch-run.
//!
//! Every request carries an optional `mode` (`smoke` when absent). The global
//! dry-run override is applied inside the runner, not here.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::info;

use crate::application::dto::{
    BatchRunRequestDto, BatchRunResultDto, EmailRunResultDto, JobAcceptedDto, RunAllRequestDto,
    RunFormByEmailRequestDto, RunFormRequestDto,
};
use crate::application::state::AppState;
use crate::commands::api_error::{ApiError, ApiResult};
use crate::domain::job_state::{RunMode, RunSummary};

/// Absent mode means smoke; anything but `smoke`/`write` is a 400.
pub fn parse_mode(mode: Option<&str>) -> ApiResult<RunMode> {
    match mode {
        None => Ok(RunMode::Smoke),
        Some(text) => text.parse().map_err(ApiError::bad_request),
    }
}

fn require_form_id(form_id: &str) -> ApiResult<&str> {
    let form_id = form_id.trim();
    if form_id.is_empty() {
        Err(ApiError::bad_request("form_id is required"))
    } else {
        Ok(form_id)
    }
}

/// An empty body means defaults; anything else must be a valid request.
fn parse_run_all_body(body: &[u8]) -> ApiResult<RunAllRequestDto> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunAllRequestDto::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid run-all body: {e}")))
}

/// `POST /run-all`: 202 with the job id; the run continues in the background.
pub async fn run_all(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<JobAcceptedDto>)> {
    let request = parse_run_all_body(&body)?;
    let mode = parse_mode(request.mode.as_deref())?;
    let job = state.runner.spawn_run_all(mode).await?;
    info!("🚀 run-all accepted as job {} ({} mode)", job.job_id, job.summary.mode);
    Ok((StatusCode::ACCEPTED, Json(JobAcceptedDto::from(&job))))
}

pub async fn run_form(
    State(state): State<AppState>,
    Json(request): Json<RunFormRequestDto>,
) -> ApiResult<Json<RunSummary>> {
    let mode = parse_mode(request.mode.as_deref())?;
    let form_id = require_form_id(&request.form_id)?;
    let summary = state
        .runner
        .run_form(form_id, mode, request.max_records, request.resume)
        .await?;
    Ok(Json(summary))
}

pub async fn run_form_by_email(
    State(state): State<AppState>,
    Json(request): Json<RunFormByEmailRequestDto>,
) -> ApiResult<Json<EmailRunResultDto>> {
    let mode = parse_mode(request.mode.as_deref())?;
    let form_id = require_form_id(&request.form_id)?;
    if request.email.trim().is_empty() {
        return Err(ApiError::bad_request("email is required"));
    }
    let result = state
        .runner
        .run_form_by_email(form_id, &request.email, mode)
        .await?;
    Ok(Json(result))
}

pub async fn batch_run(
    State(state): State<AppState>,
    Json(request): Json<BatchRunRequestDto>,
) -> ApiResult<Json<BatchRunResultDto>> {
    let mode = parse_mode(request.mode.as_deref())?;
    let form_id = require_form_id(&request.form_id)?;
    let result = state
        .runner
        .batch_run(form_id, mode, request.offset, request.limit)
        .await?;
    Ok(Json(result))
}
