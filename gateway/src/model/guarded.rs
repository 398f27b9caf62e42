//! Concurrency guard for models that are not reentrant.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{ModelCapability, ModelError};
use crate::imaging::Tensor;

/// Bounds the number of in-flight calls into the wrapped model.
///
/// A limit of 1 serializes all calls; 0 disables the guard entirely.
pub struct GuardedModel {
    inner: Arc<dyn ModelCapability>,
    permits: Option<Semaphore>,
    limit: usize,
}

impl GuardedModel {
    pub fn new(inner: Arc<dyn ModelCapability>, max_concurrent_calls: usize) -> Self {
        Self {
            inner,
            permits: (max_concurrent_calls > 0).then(|| Semaphore::new(max_concurrent_calls)),
            limit: max_concurrent_calls,
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.permits.as_ref().map(|_| self.limit)
    }
}

#[async_trait]
impl ModelCapability for GuardedModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn predict(&self, tensor: &Tensor) -> Result<Vec<f32>, ModelError> {
        let _permit = match &self.permits {
            Some(permits) => Some(
                permits
                    .acquire()
                    .await
                    .map_err(|_| ModelError::Unavailable(self.inner.name().to_string()))?,
            ),
            None => None,
        };

        self.inner.predict(tensor).await
    }
}
