//! One-shot prediction endpoints.

use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    routing::post,
    Json, Router,
};
use wildlens_common::{PredictionKind, PredictionResponse};

use crate::error::GatewayError;
use crate::imaging::ImageFrame;
use crate::AppState;

/// Multipart part the image is expected in.
pub const IMAGE_FIELD: &str = "image_file";

/// Build the predictions router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/predictions/binary", post(predict_binary))
        .route("/predictions/multiclass", post(predict_multiclass))
}

/// An uploaded image, from either a multipart form or a raw body.
///
/// Multipart bodies use the `image_file` part; if it is absent the first
/// part that carries a filename is taken instead.
#[derive(Debug)]
pub struct ImageUpload(pub ImageFrame);

#[async_trait]
impl<S> FromRequest<S> for ImageUpload
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let body = Bytes::from_request(req, state)
                .await
                .map_err(|e| upload_rejection(e.status(), e.body_text()))?;
            if body.is_empty() {
                return Err(GatewayError::InvalidUpload("Request body is empty".to_string()));
            }
            return Ok(ImageUpload(ImageFrame::new(body.to_vec())));
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| upload_rejection(e.status(), e.body_text()))?;

        let mut fallback = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| upload_rejection(e.status(), e.body_text()))?
        {
            let is_image_field = field.name() == Some(IMAGE_FIELD);
            let filename = field.file_name().map(str::to_string);
            if !is_image_field && filename.is_none() {
                continue;
            }

            let payload = field
                .bytes()
                .await
                .map_err(|e| upload_rejection(e.status(), e.body_text()))?;
            let frame = ImageFrame {
                payload: payload.to_vec(),
                filename,
            };

            if is_image_field {
                return Ok(ImageUpload(frame));
            }
            fallback.get_or_insert(frame);
        }

        fallback.map(ImageUpload).ok_or_else(|| {
            GatewayError::InvalidUpload(format!("Missing '{}' file in multipart body", IMAGE_FIELD))
        })
    }
}

fn upload_rejection(status: StatusCode, text: String) -> GatewayError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::UploadTooLarge(text)
    } else {
        GatewayError::InvalidUpload(text)
    }
}

/// POST /predictions/binary - footprint / no-footprint scores.
async fn predict_binary(
    State(state): State<Arc<AppState>>,
    ImageUpload(frame): ImageUpload,
) -> Result<Json<PredictionResponse>, GatewayError> {
    predict(&state, PredictionKind::Binary, frame).await
}

/// POST /predictions/multiclass - per-species scores.
async fn predict_multiclass(
    State(state): State<Arc<AppState>>,
    ImageUpload(frame): ImageUpload,
) -> Result<Json<PredictionResponse>, GatewayError> {
    predict(&state, PredictionKind::Multiclass, frame).await
}

async fn predict(
    state: &AppState,
    kind: PredictionKind,
    frame: ImageFrame,
) -> Result<Json<PredictionResponse>, GatewayError> {
    tracing::debug!(
        "{} prediction request for {} ({} bytes)",
        kind,
        frame.filename.as_deref().unwrap_or("<raw body>"),
        frame.payload.len()
    );

    let predictions = state.predictions.predict(kind, &frame).await?;

    Ok(Json(PredictionResponse::new(predictions)))
}
