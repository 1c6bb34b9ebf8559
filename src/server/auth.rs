//! Bearer-token authentication.
//!
//! Active only when `AUTH_TOKEN` is configured. Accepts both
//! `Authorization: Bearer <token>` and a bare `Authorization: <token>`,
//! matching the hosted engine's client library.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::core::app_state::AppState;
use crate::core::types::ErrorResponse;

pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.auth_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let authorized = provided
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value) == expected)
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("Unauthorized")),
        )
            .into_response()
    }
}
