//! Prediction envelopes returned by the one-shot endpoints.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which classifier a prediction was produced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    /// Footprint / no-footprint classifier.
    Binary,
    /// Species classifier.
    Multiclass,
}

impl PredictionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionKind::Binary => "binary",
            PredictionKind::Multiclass => "multiclass",
        }
    }
}

impl fmt::Display for PredictionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful prediction body: `{"predictions": [float, ...]}`.
///
/// Scores are passed through exactly as the model produced them; no
/// normalization is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predictions: Vec<f32>,
}

impl PredictionResponse {
    pub fn new(predictions: Vec<f32>) -> Self {
        Self { predictions }
    }
}

/// Error body for the one-shot endpoints: `{"detail": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub detail: String,
}

impl ErrorDetail {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}
