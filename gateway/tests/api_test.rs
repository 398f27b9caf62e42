use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use wildlens_gateway::metrics::{FailureKind, Outcome, Transport};
use wildlens_gateway::test_util::{
    test_config, test_state, test_state_with, white_jpeg, CountingModel, FailingModel,
    PanickingModel, SlowModel, StubModel, TEST_API_KEY,
};
use wildlens_gateway::{build_router, AppState, PredictionService, RequestEvent, RequestObserver};

const BOUNDARY: &str = "wildlens-test-boundary";

fn key(value: &str) -> String {
    format!("Key {}", value)
}

fn multipart_body(field: &str, filename: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/jpeg\r\n\r\n",
        BOUNDARY, field, filename
    )
    .into_bytes();
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload(uri: &str, authorization: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(value) = authorization {
        builder = builder.header("authorization", value);
    }
    builder.body(Body::from(body)).unwrap()
}

fn image_upload(uri: &str, authorization: Option<&str>, payload: &[u8]) -> Request<Body> {
    upload(
        uri,
        authorization,
        multipart_body("image_file", "valid_image.jpg", payload),
    )
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = build_router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn send_json(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(state, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_binary_prediction_with_valid_key() {
    let request = image_upload(
        "/predictions/binary",
        Some(&key(TEST_API_KEY)),
        &white_jpeg(100, 100),
    );
    let (status, body) = send_json(test_state(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "predictions": [0.9, 0.1] }));
}

#[tokio::test]
async fn test_multiclass_prediction_uses_multiclass_model() {
    let request = image_upload(
        "/predictions/multiclass",
        Some(&key(TEST_API_KEY)),
        &white_jpeg(64, 48),
    );
    let (status, body) = send_json(test_state(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "predictions": [0.1, 0.2, 0.7] }));
}

#[tokio::test]
async fn test_wrong_key_is_rejected() {
    let request = image_upload(
        "/predictions/binary",
        Some("Key wrong-secret"),
        &white_jpeg(100, 100),
    );
    let (status, body) = send_json(test_state(), request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "detail": "Invalid API Key" }));
}

#[tokio::test]
async fn test_missing_key_is_rejected() {
    let request = image_upload("/predictions/binary", None, &white_jpeg(100, 100));
    let (status, body) = send_json(test_state(), request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "detail": "API Key is required" }));
}

#[tokio::test]
async fn test_wrong_scheme_is_rejected() {
    let request = image_upload(
        "/predictions/multiclass",
        Some(&format!("Bearer {}", TEST_API_KEY)),
        &white_jpeg(10, 10),
    );
    let (status, body) = send_json(test_state(), request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "detail": "Invalid API Key" }));
}

#[tokio::test]
async fn test_rejected_request_never_reaches_model() {
    let binary = Arc::new(CountingModel::new(vec![1.0]));
    let predictions = PredictionService::new(
        binary.clone(),
        Arc::new(StubModel::new("multiclass", vec![0.5])),
    );
    let state = Arc::new(AppState::new(test_config(), Arc::new(predictions)));

    let request = image_upload("/predictions/binary", Some("Key nope"), &white_jpeg(8, 8));
    let (status, _) = send(state, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(binary.calls(), 0);
}

#[tokio::test]
async fn test_invalid_image_returns_generic_prediction_error() {
    let request = image_upload(
        "/predictions/binary",
        Some(&key(TEST_API_KEY)),
        b"invalid_image",
    );
    let (status, body) = send_json(test_state(), request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({ "detail": "Error when predicting with binary classifier" })
    );
}

#[tokio::test]
async fn test_model_failure_detail_hides_cause() {
    let state = test_state_with(
        StubModel::new("binary", vec![0.9, 0.1]),
        FailingModel::new("tensor rank mismatch"),
    );
    let request = image_upload(
        "/predictions/multiclass",
        Some(&key(TEST_API_KEY)),
        &white_jpeg(20, 20),
    );
    let (status, body) = send(state, request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("Error when predicting with multiclass classifier"));
    assert!(!text.contains("tensor rank mismatch"));
}

#[tokio::test]
async fn test_panicking_model_yields_unexpected_error() {
    let state = test_state_with(PanickingModel, StubModel::new("multiclass", vec![0.5]));
    let request = image_upload(
        "/predictions/binary",
        Some(&key(TEST_API_KEY)),
        &white_jpeg(20, 20),
    );
    let (status, body) = send(state.clone(), request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({ "detail": "An unexpected error occurred." }));
    assert_eq!(
        state
            .counters
            .count(Transport::Http, Outcome::Failure(FailureKind::Unexpected)),
        1
    );
}

#[tokio::test]
async fn test_slow_model_hits_request_timeout() {
    let mut config = test_config();
    config.server.request_timeout_secs = 1;
    let predictions = PredictionService::new(
        Arc::new(SlowModel::new(Duration::from_secs(3), vec![0.9, 0.1])),
        Arc::new(StubModel::new("multiclass", vec![0.5])),
    );
    let state = Arc::new(AppState::new(config, Arc::new(predictions)));

    let request = image_upload(
        "/predictions/binary",
        Some(&key(TEST_API_KEY)),
        &white_jpeg(20, 20),
    );
    let (status, body) = send_json(state.clone(), request).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body, json!({ "detail": "Request timed out after 1s" }));
    assert_eq!(
        state
            .counters
            .count(Transport::Http, Outcome::Failure(FailureKind::Inference)),
        1
    );
    assert_eq!(state.counters.count(Transport::Http, Outcome::Success), 0);
}

#[tokio::test]
async fn test_raw_body_upload_is_accepted() {
    let request = Request::builder()
        .method("POST")
        .uri("/predictions/binary")
        .header("authorization", key(TEST_API_KEY))
        .header("content-type", "image/jpeg")
        .body(Body::from(white_jpeg(32, 32)))
        .unwrap();
    let (status, body) = send_json(test_state(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "predictions": [0.9, 0.1] }));
}

#[tokio::test]
async fn test_any_file_part_is_accepted_without_image_field() {
    let request = upload(
        "/predictions/binary",
        Some(&key(TEST_API_KEY)),
        multipart_body("upload", "photo.jpg", &white_jpeg(16, 16)),
    );
    let (status, _) = send_json(test_state(), request).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_multipart_without_file_is_unprocessable() {
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = upload(
        "/predictions/binary",
        Some(&key(TEST_API_KEY)),
        body.into_bytes(),
    );
    let (status, body) = send_json(test_state(), request).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body,
        json!({ "detail": "Missing 'image_file' file in multipart body" })
    );
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut config = test_config();
    config.server.max_upload_bytes = 1024;
    let predictions = PredictionService::new(
        Arc::new(StubModel::new("binary", vec![0.9, 0.1])),
        Arc::new(StubModel::new("multiclass", vec![0.5])),
    );
    let state = Arc::new(AppState::new(config, Arc::new(predictions)));

    let request = Request::builder()
        .method("POST")
        .uri("/predictions/binary")
        .header("authorization", key(TEST_API_KEY))
        .header("content-type", "application/octet-stream")
        .body(Body::from(vec![0u8; 4096]))
        .unwrap();
    let (status, _) = send(state, request).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_exempt_paths_skip_authentication() {
    let state = test_state();

    let (status, body) = send_json(state.clone(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(state.clone(), get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("wildlens_up 1"));

    let (status, body) = send_json(state.clone(), get("/openapi.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/predictions/binary"].is_object());

    let (status, _) = send(state, get("/docs")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_service_paths_need_key_when_not_exempt() {
    let mut config = test_config();
    config.auth.exempt_paths = vec!["/health".to_string()];
    let predictions = PredictionService::new(
        Arc::new(StubModel::new("binary", vec![0.9, 0.1])),
        Arc::new(StubModel::new("multiclass", vec![0.5])),
    );
    let state = Arc::new(AppState::new(config, Arc::new(predictions)));

    let (status, _) = send(state.clone(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(state, get("/metrics")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "detail": "API Key is required" }));
}

#[tokio::test]
async fn test_metrics_reflect_completed_requests() {
    let state = test_state();

    let ok = image_upload(
        "/predictions/binary",
        Some(&key(TEST_API_KEY)),
        &white_jpeg(10, 10),
    );
    send(state.clone(), ok).await;
    let denied = image_upload("/predictions/binary", None, &white_jpeg(10, 10));
    send(state.clone(), denied).await;

    let (_, body) = send(state, get("/metrics")).await;
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains(
        "wildlens_requests_total{transport=\"http\",outcome=\"failure\",kind=\"auth\"} 1"
    ));
    assert!(text.contains(
        "wildlens_requests_total{transport=\"http\",outcome=\"success\",kind=\"none\"} 1"
    ));
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<RequestEvent>>,
}

impl RequestObserver for RecordingObserver {
    fn observe(&self, event: &RequestEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[tokio::test]
async fn test_observer_sees_route_and_outcome() {
    let observer = Arc::new(RecordingObserver::default());
    let predictions = PredictionService::new(
        Arc::new(StubModel::new("binary", vec![0.9, 0.1])),
        Arc::new(StubModel::new("multiclass", vec![0.5])),
    );
    let state = Arc::new(
        AppState::new(test_config(), Arc::new(predictions)).with_observer(observer.clone()),
    );

    let request = image_upload(
        "/predictions/multiclass",
        Some(&key(TEST_API_KEY)),
        b"invalid_image",
    );
    send(state, request).await;

    let events = observer.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].transport, Transport::Http);
    assert_eq!(events[0].route, "/predictions/multiclass");
    assert_eq!(events[0].outcome, Outcome::Failure(FailureKind::Decode));
}
