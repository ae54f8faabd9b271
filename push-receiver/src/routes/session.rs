use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path as AxumPath, State};
use axum::routing::post;
use axum::Json;
use axum::Router;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route("/{push_id}", post(open_session).delete(close_session))
}

async fn open_session(
    State(state): State<Arc<AppState>>,
    AxumPath(push_id): AxumPath<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    tokio::fs::create_dir_all(&state.config.staging_dir)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create staging directory: {}", e))?;

    state.open_session(&push_id).await?;
    Ok(Json(serde_json::json!({ "push_id": push_id })))
}

async fn close_session(
    State(state): State<Arc<AppState>>,
    AxumPath(push_id): AxumPath<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.close_session(&push_id).await?;
    Ok(Json(serde_json::json!({ "push_id": push_id })))
}
