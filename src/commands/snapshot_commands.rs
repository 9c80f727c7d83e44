//! Snapshot endpoints: prepare, preview, CSV download and report.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;

use crate::application::dto::{FormQueryDto, PrepareRequestDto, PrepareResultDto, PreviewDto, PreviewRequestDto, ReportDto};
use crate::application::state::AppState;
use crate::commands::api_error::{ApiError, ApiResult};

fn form_id(raw: &str) -> ApiResult<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("form_id is required"));
    }
    Ok(trimmed)
}

pub async fn prepare(
    State(state): State<AppState>,
    Json(request): Json<PrepareRequestDto>,
) -> ApiResult<Json<PrepareResultDto>> {
    let result = state
        .runner
        .prepare(form_id(&request.form_id)?, request.max_pages)
        .await?;
    Ok(Json(result))
}

pub async fn preview(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequestDto>,
) -> ApiResult<Json<PreviewDto>> {
    let result = state
        .runner
        .preview(form_id(&request.form_id)?, request.offset, request.limit)
        .await?;
    Ok(Json(result))
}

/// `GET /download-csv?form_id=`: the deduped snapshot as an attachment.
pub async fn download_csv(
    State(state): State<AppState>,
    Query(query): Query<FormQueryDto>,
) -> ApiResult<impl IntoResponse> {
    let form_id = form_id(&query.form_id)?;
    let body = state.runner.export_csv(form_id).await?;
    let disposition = format!("attachment; filename=\"{}_deduped.csv\"", sanitize_filename(form_id));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

pub async fn report(
    State(state): State<AppState>,
    Query(query): Query<FormQueryDto>,
) -> ApiResult<Json<ReportDto>> {
    Ok(Json(state.runner.report(form_id(&query.form_id)?).await?))
}

fn sanitize_filename(form_id: &str) -> String {
    form_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_header_safe() {
        assert_eq!(sanitize_filename("abc-123"), "abc-123");
        assert_eq!(sanitize_filename("a\"b/c"), "a_b_c");
    }
}
