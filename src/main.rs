use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use chair_dispatch::api;
use chair_dispatch::config::{Config, LogFormat};
use chair_dispatch::engine;
use chair_dispatch::error::AppError;
use chair_dispatch::state::AppState;
use chair_dispatch::store::Store;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    let store = match &config.fixture_path {
        Some(path) => Store::load_fixture(path).await?,
        None => Store::new()?,
    };

    let (app_state, coordinate_rx) = AppState::new(store, &config);
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(engine::ingest::run_batch_writer(
        shared_state.clone(),
        coordinate_rx,
        config.batch_interval,
    ));
    tokio::spawn(engine::dispatch::run_dispatch_scheduler(
        shared_state.clone(),
        config.matching_interval,
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
