//! Model capability abstraction.
//!
//! The classifiers themselves are opaque: the gateway only needs something it
//! can hand a tensor to and get a score vector back. Implementations are
//! constructed by the bootstrap code and injected into the
//! [`PredictionService`](crate::prediction::PredictionService).

mod guarded;
mod tf_serving;

pub use guarded::GuardedModel;
pub use tf_serving::TfServingModel;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ModelsConfig;
use crate::imaging::Tensor;

/// Errors raised by a model capability.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model not available: {0}")]
    Unavailable(String),

    #[error("Model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Model returned invalid output: {0}")]
    InvalidOutput(String),

    #[error("Model invocation failed: {0}")]
    Failed(String),
}

/// An opaque classifier: tensor in, scores out.
///
/// Implementations must tolerate concurrent calls. A model that is not
/// reentrant should be wrapped in a [`GuardedModel`].
#[async_trait]
pub trait ModelCapability: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Run the model on a `(1, H, W, 3)` tensor.
    async fn predict(&self, tensor: &Tensor) -> Result<Vec<f32>, ModelError>;
}

/// Build both remote model handles from configuration.
///
/// With `verify_on_startup` set, each model must report itself available;
/// a failure here is meant to stop the process from starting.
pub async fn connect(
    config: &ModelsConfig,
) -> Result<(Arc<dyn ModelCapability>, Arc<dyn ModelCapability>), ModelError> {
    let binary = TfServingModel::new(&config.binary)?;
    let multiclass = TfServingModel::new(&config.multiclass)?;

    if config.verify_on_startup {
        binary.check_available().await?;
        multiclass.check_available().await?;
    }

    Ok((
        guard(binary, config.max_concurrent_calls),
        guard(multiclass, config.max_concurrent_calls),
    ))
}

fn guard(model: TfServingModel, max_concurrent_calls: usize) -> Arc<dyn ModelCapability> {
    let name = model.name().to_string();
    let guarded = GuardedModel::new(Arc::new(model), max_concurrent_calls);
    match guarded.limit() {
        Some(limit) => tracing::info!("Model {} limited to {} concurrent calls", name, limit),
        None => tracing::info!("Model {} accepts unbounded concurrent calls", name),
    }
    Arc::new(guarded)
}
