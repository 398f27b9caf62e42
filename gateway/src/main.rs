use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use wildlens_gateway::{build_router, logging, model, AppState, Config, PredictionService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration, from an explicit path if one was given
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    logging::init_tracing(&config.logging.level);

    tracing::info!("Starting WildLens prediction gateway v{}", env!("CARGO_PKG_VERSION"));

    // Both models must be reachable before we accept traffic
    let (binary, multiclass) = model::connect(&config.models).await.map_err(|e| {
        tracing::error!("Failed to load models: {}", e);
        e
    })?;
    tracing::info!(
        "Models ready: binary={}, multiclass={}",
        binary.name(),
        multiclass.name()
    );

    let predictions = Arc::new(PredictionService::new(binary, multiclass));
    let state = Arc::new(AppState::new(config.clone(), predictions));
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
