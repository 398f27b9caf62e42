//! Stub models, image fixtures, and state builders shared by unit and
//! integration tests.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::config::{
    AuthConfig, Config, LoggingConfig, ModelEndpointConfig, ModelsConfig, ServerConfig,
    StreamConfig,
};
use crate::imaging::Tensor;
use crate::model::{ModelCapability, ModelError};
use crate::prediction::PredictionService;
use crate::AppState;

pub const TEST_API_KEY: &str = "test-secret";

/// Returns a fixed vector.
pub struct StubModel {
    name: String,
    output: Vec<f32>,
}

impl StubModel {
    pub fn new(name: impl Into<String>, output: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            output,
        }
    }
}

#[async_trait]
impl ModelCapability for StubModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn predict(&self, _tensor: &Tensor) -> Result<Vec<f32>, ModelError> {
        Ok(self.output.clone())
    }
}

/// Always fails with [`ModelError::Failed`].
pub struct FailingModel {
    message: String,
}

impl FailingModel {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ModelCapability for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn predict(&self, _tensor: &Tensor) -> Result<Vec<f32>, ModelError> {
        Err(ModelError::Failed(self.message.clone()))
    }
}

/// Panics on every call.
pub struct PanickingModel;

#[async_trait]
impl ModelCapability for PanickingModel {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn predict(&self, _tensor: &Tensor) -> Result<Vec<f32>, ModelError> {
        panic!("model crashed with internal state 0xdeadbeef")
    }
}

/// Sleeps before answering.
pub struct SlowModel {
    delay: Duration,
    output: Vec<f32>,
}

impl SlowModel {
    pub fn new(delay: Duration, output: Vec<f32>) -> Self {
        Self { delay, output }
    }
}

#[async_trait]
impl ModelCapability for SlowModel {
    fn name(&self) -> &str {
        "slow"
    }

    async fn predict(&self, _tensor: &Tensor) -> Result<Vec<f32>, ModelError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.output.clone())
    }
}

/// Records how often it was called and the shape it last saw.
pub struct CountingModel {
    output: Vec<f32>,
    calls: AtomicUsize,
    last_shape: Mutex<Option<Vec<usize>>>,
}

impl CountingModel {
    pub fn new(output: Vec<f32>) -> Self {
        Self {
            output,
            calls: AtomicUsize::new(0),
            last_shape: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_shape(&self) -> Option<Vec<usize>> {
        self.last_shape.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelCapability for CountingModel {
    fn name(&self) -> &str {
        "counting"
    }

    async fn predict(&self, tensor: &Tensor) -> Result<Vec<f32>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_shape.lock().unwrap() = Some(tensor.shape().to_vec());
        Ok(self.output.clone())
    }
}

/// Tracks how many calls overlap. Each call holds for a short sleep.
pub struct OverlapTracker {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    hold: Duration,
}

impl OverlapTracker {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            hold: Duration::from_millis(20),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for OverlapTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelCapability for OverlapTracker {
    fn name(&self) -> &str {
        "overlap"
    }

    async fn predict(&self, _tensor: &Tensor) -> Result<Vec<f32>, ModelError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.0])
    }
}

/// Encode an image in memory.
pub fn encode_image(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, format)
        .expect("Failed to encode test image");
    bytes.into_inner()
}

/// A white RGB JPEG of the given size.
pub fn white_jpeg(width: u32, height: u32) -> Vec<u8> {
    encode_image(
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))),
        ImageFormat::Jpeg,
    )
}

/// [`white_jpeg`], base64-encoded for a stream frame.
pub fn jpeg_base64(width: u32, height: u32) -> String {
    STANDARD.encode(white_jpeg(width, height))
}

fn test_endpoint(name: &str) -> ModelEndpointConfig {
    ModelEndpointConfig {
        base_url: "http://localhost:8501".to_string(),
        name: name.to_string(),
        timeout_secs: 5,
    }
}

pub fn test_config() -> Config {
    Config {
        server: ServerConfig::default(),
        auth: AuthConfig {
            api_key: TEST_API_KEY.to_string(),
            exempt_paths: ["/docs", "/openapi.json", "/metrics", "/health"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        },
        models: ModelsConfig {
            max_concurrent_calls: 0,
            verify_on_startup: false,
            binary: test_endpoint("footprint_binary"),
            multiclass: test_endpoint("footprint_species"),
        },
        stream: StreamConfig::default(),
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}

/// State with stub models: binary returns `[0.9, 0.1]`, multiclass
/// returns `[0.1, 0.2, 0.7]`.
pub fn test_state() -> Arc<AppState> {
    test_state_with(
        StubModel::new("binary", vec![0.9, 0.1]),
        StubModel::new("multiclass", vec![0.1, 0.2, 0.7]),
    )
}

pub fn test_state_with(
    binary: impl ModelCapability + 'static,
    multiclass: impl ModelCapability + 'static,
) -> Arc<AppState> {
    let predictions = PredictionService::new(Arc::new(binary), Arc::new(multiclass));
    Arc::new(AppState::new(test_config(), Arc::new(predictions)))
}
