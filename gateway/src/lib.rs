pub mod auth;
pub mod config;
pub mod containment;
pub mod error;
pub mod imaging;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod prediction;
pub mod routes;
pub mod stream;
pub mod test_util;

pub use auth::{ApiKeyGate, AuthError};
pub use config::Config;
pub use error::GatewayError;
pub use imaging::{normalize, DecodeError, ImageFrame, Tensor};
pub use metrics::{RequestCounters, RequestEvent, RequestObserver};
pub use model::{GuardedModel, ModelCapability, ModelError, TfServingModel};
pub use prediction::{InferenceError, PredictionService};

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub gate: ApiKeyGate,
    /// The one prediction service, shared by the router and every session.
    pub predictions: Arc<PredictionService>,
    /// Counters behind `/metrics`.
    pub counters: Arc<RequestCounters>,
    /// Extra observer for request events, if one is installed.
    observer: Option<Arc<dyn RequestObserver>>,
}

impl AppState {
    pub fn new(config: Config, predictions: Arc<PredictionService>) -> Self {
        Self {
            gate: ApiKeyGate::new(&config.auth),
            config,
            predictions,
            counters: Arc::new(RequestCounters::new()),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Record one completed request or stream frame.
    pub fn observe(&self, event: RequestEvent) {
        self.counters.observe(&event);
        if let Some(observer) = &self.observer {
            observer.observe(&event);
        }
    }
}

/// Build the full application router.
///
/// Layers, outermost first: tracing, CORS, request logging, failure
/// containment, panic catching, body limit. The API key check is a route
/// layer on the one-shot routes only; stream sessions authenticate from the
/// handshake themselves.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let one_shot = Router::new()
        .merge(routes::predictions::router())
        .merge(routes::health::router())
        .merge(routes::docs::router())
        .route_layer(from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .merge(one_shot)
        .merge(stream::router())
        .layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes))
        .layer(CatchPanicLayer::custom(containment::panic_response))
        .layer(from_fn_with_state(state.clone(), containment::contain_failures))
        .layer(from_fn(logging::request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
