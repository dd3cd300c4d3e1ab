use idshield_backend::{config::Config, errors::ApiError, router, state::AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().map_err(|e| {
        tracing::error!(error = %e, "invalid configuration");
        ApiError::Internal
    })?;

    // Local state (sqlite file, uploaded objects) lives under the data dir.
    tokio::fs::create_dir_all(&config.data_dir).await.map_err(|e| {
        tracing::error!(error = %e, dir = %config.data_dir.display(), "cannot create data dir");
        ApiError::Internal
    })?;

    let addr = config.addr.clone();
    let seed = config.seed_demo_user;
    let state = AppState::from_config(config).await?;
    if seed {
        state.ensure_demo_user().await?;
    }

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|_| ApiError::Internal)?;

    tracing::info!(%addr, "backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|_| ApiError::Internal)?;

    tracing::info!("backend stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
