//! Error types for the prediction gateway.

use std::error::Error as StdError;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use wildlens_common::ErrorDetail;

use crate::auth::AuthError;
use crate::metrics::FailureKind;
use crate::prediction::InferenceError;

/// Body returned for anything the gateway does not classify.
pub const UNEXPECTED_DETAIL: &str = "An unexpected error occurred.";

/// Failures of a one-shot request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("{0}")]
    InvalidUpload(String),

    #[error("{0}")]
    UploadTooLarge(String),

    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::InvalidUpload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::UploadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            GatewayError::Auth(_) => FailureKind::Auth,
            GatewayError::Inference(e) if e.is_decode() => FailureKind::Decode,
            GatewayError::Inference(_) => FailureKind::Inference,
            GatewayError::InvalidUpload(_) | GatewayError::UploadTooLarge(_) => FailureKind::Decode,
            GatewayError::Timeout(_) => FailureKind::Inference,
            GatewayError::Unexpected(_) => FailureKind::Unexpected,
        }
    }

    /// What the caller is told. Never includes an error's sources.
    pub fn public_detail(&self) -> String {
        match self {
            GatewayError::Unexpected(_) => UNEXPECTED_DETAIL.to_string(),
            other => other.to_string(),
        }
    }
}

/// Attached to the extensions of every error response so the containment
/// layer can log and count it without re-parsing the body.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub status: StatusCode,
    /// Full error chain, for the operator log only.
    pub detail: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let record = FailureRecord {
            kind: self.kind(),
            status,
            detail: error_chain(&self),
        };

        let mut response = (status, Json(ErrorDetail::new(self.public_detail()))).into_response();
        response.extensions_mut().insert(record);
        response
    }
}

/// Render an error and all of its sources as `outer: inner: innermost`.
pub fn error_chain(error: &dyn StdError) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}
