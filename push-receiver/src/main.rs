use push_receiver::{create_router, AppConfig, AppState};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    tracing::info!("Starting push receiver on port {}", config.port);

    // Ensure the staging directory exists
    std::fs::create_dir_all(&config.staging_dir)?;

    let state = Arc::new(AppState::new(config.clone()));
    let app = create_router(state);

    // Start HTTP server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}, staging into {}", addr, config.staging_dir.display());

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(push_agent::shutdown::wait_for_signal())
        .await?;

    tracing::info!("Server stopped");

    Ok(())
}
