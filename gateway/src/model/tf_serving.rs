//! Model capability backed by a TensorFlow Serving REST endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ModelCapability, ModelError};
use crate::config::ModelEndpointConfig;
use crate::imaging::Tensor;

/// Remote classifier served by TensorFlow Serving (or anything speaking its
/// REST predict API).
pub struct TfServingModel {
    http_client: Client,
    name: String,
    status_url: String,
    predict_url: String,
}

impl TfServingModel {
    pub fn new(config: &ModelEndpointConfig) -> Result<Self, ModelError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base_url = config.base_url.trim_end_matches('/');

        Ok(Self {
            http_client,
            name: config.name.clone(),
            status_url: format!("{}/v1/models/{}", base_url, config.name),
            predict_url: format!("{}/v1/models/{}:predict", base_url, config.name),
        })
    }

    /// Ask the serving runtime whether any version of this model is loaded.
    pub async fn check_available(&self) -> Result<(), ModelError> {
        let response = self
            .http_client
            .get(&self.status_url)
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(format!("{}: {}", self.name, e)))?;

        if !response.status().is_success() {
            return Err(ModelError::Unavailable(format!(
                "{}: serving runtime returned {}",
                self.name,
                response.status()
            )));
        }

        let status: ModelStatusResponse = response.json().await?;
        if status
            .model_version_status
            .iter()
            .any(|v| v.state == "AVAILABLE")
        {
            tracing::info!("Model {} is available at {}", self.name, self.status_url);
            Ok(())
        } else {
            Err(ModelError::Unavailable(format!(
                "{}: no version in AVAILABLE state",
                self.name
            )))
        }
    }
}

// ============================================================================
// TensorFlow Serving API types
// ============================================================================

#[derive(Debug, Serialize)]
struct PredictRequest {
    instances: Vec<Vec<Vec<Vec<u8>>>>,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ModelStatusResponse {
    #[serde(default)]
    model_version_status: Vec<ModelVersionStatus>,
}

#[derive(Debug, Deserialize)]
struct ModelVersionStatus {
    state: String,
}

/// `(N, H, W, 3)` tensor as row-major nested lists, one entry per instance.
fn to_instances(tensor: &Tensor) -> Vec<Vec<Vec<Vec<u8>>>> {
    tensor
        .outer_iter()
        .map(|image| {
            image
                .outer_iter()
                .map(|row| row.outer_iter().map(|pixel| pixel.to_vec()).collect())
                .collect()
        })
        .collect()
}

// ============================================================================
// ModelCapability implementation
// ============================================================================

#[async_trait]
impl ModelCapability for TfServingModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn predict(&self, tensor: &Tensor) -> Result<Vec<f32>, ModelError> {
        let request = PredictRequest {
            instances: to_instances(tensor),
        };

        let response = self
            .http_client
            .post(&self.predict_url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Failed(format!(
                "{} returned {}: {}",
                self.name, status, body
            )));
        }

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidOutput(e.to_string()))?;

        body.predictions
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidOutput("empty predictions".to_string()))
    }
}
