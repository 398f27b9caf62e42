//! Outermost failure interceptor for one-shot requests.
//!
//! Error responses carry a [`FailureRecord`]; this layer logs the full record
//! for operators, reports the outcome to the observation hook, and lets the
//! already-sanitized response through. Panics are turned into the generic
//! 500 by [`panic_response`] before they reach this layer.

use std::any::Any;
use std::sync::Arc;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::{FailureRecord, GatewayError};
use crate::metrics::{FailureKind, Outcome, RequestEvent, Transport};
use crate::AppState;

pub async fn contain_failures(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = match state.config.server.request_timeout() {
        Some(limit) => match tokio::time::timeout(limit, next.run(request)).await {
            Ok(response) => response,
            Err(_) => GatewayError::Timeout(limit).into_response(),
        },
        None => next.run(request).await,
    };

    match response.extensions().get::<FailureRecord>() {
        Some(record) => {
            log_failure(&route, record);
            state.observe(RequestEvent::new(
                Transport::Http,
                route,
                Outcome::Failure(record.kind),
            ));
        }
        None if response.status().is_success() => {
            state.observe(RequestEvent::new(Transport::Http, route, Outcome::Success));
        }
        None => {}
    }

    response
}

fn log_failure(route: &str, record: &FailureRecord) {
    match record.kind {
        FailureKind::Unexpected => {
            tracing::error!(route = %route, "Unhandled error: {}", record.detail);
        }
        FailureKind::Decode | FailureKind::Inference => {
            tracing::warn!(
                route = %route,
                "Prediction failed: {} (status: {})",
                record.detail,
                record.status.as_u16()
            );
        }
        FailureKind::Auth | FailureKind::Protocol => {
            tracing::info!(
                route = %route,
                "HTTP error: {} (status: {})",
                record.detail,
                record.status.as_u16()
            );
        }
    }
}

/// Response for a handler that panicked. Used with `CatchPanicLayer::custom`.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "non-string panic payload".to_string()
    };

    GatewayError::Unexpected(format!("handler panicked: {}", message)).into_response()
}
