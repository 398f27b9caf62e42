//! Model dispatch: frame in, prediction vector out.

use std::sync::Arc;

use wildlens_common::PredictionKind;

use crate::imaging::{self, DecodeError, ImageFrame, Tensor};
use crate::model::{ModelCapability, ModelError};

/// What went wrong inside a prediction.
#[derive(Debug, thiserror::Error)]
pub enum InferenceCause {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Image decoding was interrupted")]
    Interrupted(#[source] tokio::task::JoinError),
}

/// A prediction failed. The message names the classifier; the underlying
/// decode or model failure is kept as the error source.
#[derive(Debug, thiserror::Error)]
#[error("Error when predicting with {kind} classifier")]
pub struct InferenceError {
    pub kind: PredictionKind,
    #[source]
    pub cause: InferenceCause,
}

impl InferenceError {
    pub fn is_decode(&self) -> bool {
        matches!(self.cause, InferenceCause::Decode(_))
    }
}

/// Decode on the blocking pool so large uploads do not hold up a runtime
/// worker. A panic in the decoder is resumed on the calling task.
async fn normalize_blocking(frame: ImageFrame) -> Result<Tensor, InferenceCause> {
    match tokio::task::spawn_blocking(move || imaging::normalize(&frame)).await {
        Ok(result) => Ok(result?),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(InferenceCause::Interrupted(e)),
    }
}

/// Owns the two classifier handles and routes frames to them.
///
/// Constructed once at startup and shared (`Arc`) by every request and
/// session. Holds no mutable state.
pub struct PredictionService {
    binary_model: Arc<dyn ModelCapability>,
    multiclass_model: Arc<dyn ModelCapability>,
}

impl PredictionService {
    pub fn new(
        binary_model: Arc<dyn ModelCapability>,
        multiclass_model: Arc<dyn ModelCapability>,
    ) -> Self {
        Self {
            binary_model,
            multiclass_model,
        }
    }

    pub async fn predict_binary(&self, frame: &ImageFrame) -> Result<Vec<f32>, InferenceError> {
        self.predict(PredictionKind::Binary, frame).await
    }

    pub async fn predict_multiclass(
        &self,
        frame: &ImageFrame,
    ) -> Result<Vec<f32>, InferenceError> {
        self.predict(PredictionKind::Multiclass, frame).await
    }

    pub async fn predict(
        &self,
        kind: PredictionKind,
        frame: &ImageFrame,
    ) -> Result<Vec<f32>, InferenceError> {
        let model = match kind {
            PredictionKind::Binary => &self.binary_model,
            PredictionKind::Multiclass => &self.multiclass_model,
        };

        let result = async {
            let tensor = normalize_blocking(frame.clone()).await?;
            tracing::debug!(
                "Running {} model {} on tensor {:?}",
                kind,
                model.name(),
                tensor.shape()
            );
            Ok::<_, InferenceCause>(model.predict(&tensor).await?)
        }
        .await;

        result.map_err(|cause| InferenceError { kind, cause })
    }
}
