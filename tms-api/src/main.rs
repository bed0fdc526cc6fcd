use std::net::SocketAddr;

use axum::Router;
use tms_api::constants::{DEFAULT_BIND_HOST, DEFAULT_PORT};
use tms_api::providers::ProviderRegistry;
use tms_api::telemetry::{init_tracing, TelemetryConfig};
use tms_api::{
    create_api_router, email_queue_task, ApiConfig, ApiError, ApiResult, AppState, DbClient,
    DbConfig,
};
use tms_core::{ConfigError, TmsError};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let api_config = ApiConfig::from_env();
    let state = build_state(&api_config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let queue_job = tokio::spawn(email_queue_task(
        state.email.clone(),
        api_config.email_queue.clone(),
        shutdown_rx,
    ));

    let app: Router = create_api_router(state, &api_config)?;

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, environment = %api_config.environment, "Starting TMS API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    // The queue job finishes the item in flight before it exits.
    let _ = shutdown_tx.send(true);
    match queue_job.await {
        Ok(metrics) => tracing::info!(stats = ?metrics.snapshot(), "Email queue job stopped"),
        Err(e) => tracing::error!(error = %e, "Email queue job panicked"),
    }
    Ok(())
}

/// PostgreSQL when `TMS_DB_HOST` is set, in-memory stores otherwise.
async fn build_state(api_config: &ApiConfig) -> ApiResult<AppState> {
    let registry = ProviderRegistry::with_defaults();
    let to_api = |e: ConfigError| ApiError::from(TmsError::from(e));

    if std::env::var("TMS_DB_HOST").is_err() {
        tracing::warn!("TMS_DB_HOST not set; using in-memory stores");
        return AppState::in_memory(api_config, registry).map_err(to_api);
    }

    let db = DbClient::from_config(&DbConfig::from_env())?;
    db.migrate().await?;
    tracing::info!(pool_size = db.pool_size(), "Connected to PostgreSQL");
    AppState::with_database(db, api_config, registry).map_err(to_api)
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("TMS_API_BIND").unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("TMS_API_PORT").ok())
        .unwrap_or_else(|| DEFAULT_PORT.to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
