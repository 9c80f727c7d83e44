//! Bearer token authentication for the control API
//!
//! Every route except `/health` sits behind [`require_control_token`]. The
//! token is compared against `CONTROL_API_TOKEN`; a missing or wrong token is
//! rejected with 401 before any handler runs.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::application::state::AppState;
use crate::commands::api_error::ApiError;

/// Token from an `Authorization: Bearer <token>` header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Constant-time string comparison.
fn tokens_match(given: &str, expected: &str) -> bool {
    let (given, expected) = (given.as_bytes(), expected.as_bytes());
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

pub async fn require_control_token(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let Some(token) = extract_bearer_token(request.headers()) else {
        debug!("Control request missing Bearer token");
        return ApiError::unauthorized("Bearer token required").into_response();
    };

    if !tokens_match(token, &state.config.control_api_token) {
        debug!("Control request with invalid token");
        return ApiError::unauthorized("Invalid token").into_response();
    }

    next.run(request).await
}
