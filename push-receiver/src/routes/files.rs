use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Query, Request, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::Json;
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use push_agent::fs::walker::RelPath;
use push_agent::snapshot::fingerprint::{fingerprint, ContentHash};
use push_agent::snapshot::Snapshot;
use push_agent::target::http::{HEADER_CONTENT_HASH, HEADER_FILE_MODE, HEADER_PUSH_ID, HEADER_TOTAL_SIZE};
use serde::Deserialize;
use std::io::{self, Read};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", delete(delete_file))
        .route("/upload", post(upload_file))
        .route("/hashes", get(get_hashes))
}

/// Paths travel in the query string so any UTF-8 name survives the trip.
#[derive(Deserialize)]
struct PathQuery {
    path: String,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest(format!("Missing {} header", name)))
}

/// Inflate a zstd body, reading at most one byte past `expected` so a
/// small body cannot expand without bound.
fn decode_zstd(body: &[u8], expected: u64) -> io::Result<Vec<u8>> {
    let mut decoded = Vec::new();
    zstd::stream::read::Decoder::new(body)?
        .take(expected.saturating_add(1))
        .read_to_end(&mut decoded)?;
    Ok(decoded)
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
    request: Request,
) -> Result<Json<serde_json::Value>, AppError> {
    let push_id = header(&headers, HEADER_PUSH_ID)?.to_string();
    state.require_session(&push_id).await?;

    let relative_path = RelPath::parse(&query.path)?;

    let total_size: u64 = header(&headers, HEADER_TOTAL_SIZE)?
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid x-total-size header".into()))?;

    let limit = state.config.max_upload_bytes;
    if total_size > limit {
        return Err(AppError::TooLarge { path: relative_path, limit });
    }

    let content_hash = ContentHash::from_hex(header(&headers, HEADER_CONTENT_HASH)?)?;

    let mode: Option<u32> = match headers.get(HEADER_FILE_MODE) {
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| AppError::BadRequest("Invalid x-file-mode header".into()))?,
        ),
        None => None,
    };

    let compressed = headers
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        == Some("zstd");

    tracing::debug!(push_id = %push_id, relative_path = %relative_path, total_size, compressed, "Receiving file upload");

    // A body larger than the declared size (or its compressed bound) is wrong
    // before it is complete
    let body_limit = if compressed {
        zstd::zstd_safe::compress_bound(total_size as usize) as u64
    } else {
        total_size
    };
    let mut received = Vec::new();
    let mut stream = request.into_body().into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::Internal(anyhow::anyhow!("Read error: {}", e)))?;
        if (received.len() + chunk.len()) as u64 > body_limit {
            return Err(AppError::Integrity {
                path: relative_path,
                detail: format!("body exceeds declared size {}", total_size),
            });
        }
        received.extend_from_slice(&chunk);
    }

    let content = if compressed {
        tokio::task::spawn_blocking(move || decode_zstd(&received, total_size))
            .await
            .map_err(|e| anyhow::anyhow!(e))?
            .map_err(|e| AppError::Integrity {
                path: relative_path.clone(),
                detail: format!("zstd decompression failed: {}", e),
            })?
    } else {
        received
    };

    // Verify before anything touches the staging directory
    if content.len() as u64 != total_size {
        tracing::warn!(
            push_id = %push_id,
            relative_path = %relative_path,
            expected = total_size,
            actual = content.len(),
            "File size mismatch in upload"
        );
        return Err(AppError::Integrity {
            detail: format!("size mismatch: expected {} got {}", total_size, content.len()),
            path: relative_path,
        });
    }
    let actual_hash = fingerprint(&content);
    if actual_hash != content_hash {
        return Err(AppError::Integrity {
            detail: format!("hash mismatch: expected {} got {}", content_hash, actual_hash),
            path: relative_path,
        });
    }

    // Permission bits only, never setuid/setgid from the wire
    let mode = mode.map(|m| m & 0o777);

    state
        .staging
        .write_file(&relative_path, Bytes::from(content), mode)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Write error for {}: {}", relative_path, e)))?;

    tracing::debug!(push_id = %push_id, relative_path = %relative_path, size = total_size, "File upload complete");

    Ok(Json(serde_json::json!({
        "success": true,
        "path": relative_path,
        "size": total_size,
    })))
}

/// Deleting a file that is already gone succeeds.
async fn delete_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let push_id = header(&headers, HEADER_PUSH_ID)?.to_string();
    state.require_session(&push_id).await?;

    let relative_path = RelPath::parse(&query.path)?;
    let existed = state
        .staging
        .remove_file(&relative_path)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Delete error for {}: {}", relative_path, e)))?;

    tracing::debug!(push_id = %push_id, relative_path = %relative_path, existed, "File deleted");

    Ok(Json(serde_json::json!({
        "success": true,
        "path": relative_path,
        "existed": existed,
    })))
}

/// Current staged state, the "before" side of the agent's next diff.
async fn get_hashes(State(state): State<Arc<AppState>>) -> Result<Json<Snapshot>, AppError> {
    use push_agent::target::PushTarget;

    let snapshot = state.staging.recorded_state().await?;
    Ok(Json(snapshot))
}
