//! Shared-secret authentication.

mod api_key;

pub use api_key::{extract_api_key, ApiKeyGate, AuthError};

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::AppState;

/// Middleware that requires `Authorization: Key <secret>` on every one-shot
/// request outside the exempt paths.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.gate.is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    match state.gate.authenticate_headers(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::debug!(
                path = %request.uri().path(),
                "Rejected request: {}",
                e.reason()
            );
            GatewayError::Auth(e).into_response()
        }
    }
}
