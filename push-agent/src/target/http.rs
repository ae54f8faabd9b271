//! HTTP target: pushes to a `push-receiver` instance.
//!
//! Endpoints:
//! - `POST   /api/session/{push_id}` claim the receiver for a run
//! - `POST   /api/files/upload?path=` store one file (headers carry metadata)
//! - `DELETE /api/files?path=`        remove one file
//!
//! Paths go in the query string rather than a header: header values are
//! ASCII only and file names are not.
//! - `DELETE /api/session/{push_id}` release the receiver
//! - `GET    /api/files/hashes`      recorded state as a snapshot document

use super::{PushTarget, TargetError};
use crate::config::{Compression, TargetConfig};
use crate::diff::ChangeEntry;
use crate::fs::walker::RelPath;
use crate::snapshot::Snapshot;
use crate::utils::errors::{PushError, Result};
use async_compression::tokio::bufread::ZstdEncoder;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

pub const HEADER_PUSH_ID: &str = "x-push-id";
pub const HEADER_TOTAL_SIZE: &str = "x-total-size";
pub const HEADER_CONTENT_HASH: &str = "x-content-hash";
pub const HEADER_FILE_MODE: &str = "x-file-mode";

pub struct HttpTarget {
    base_url: String,
    client: Client,
    compression: Compression,
    push_id: Mutex<Option<String>>,
}

impl HttpTarget {
    pub fn new(base_url: &str, config: &TargetConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PushError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            compression: config.compression,
            push_id: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn current_push_id(&self) -> String {
        self.push_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .unwrap_or_default()
    }

    fn set_push_id(&self, push_id: Option<String>) {
        *self.push_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = push_id;
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, TargetError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TargetError::Connection(format!("request timed out: {}", e))
            } else {
                TargetError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        if status == StatusCode::CONFLICT {
            Err(TargetError::Conflict(error_text))
        } else {
            Err(TargetError::Rejected(format!("{}: {}", status, error_text)))
        }
    }
}

#[async_trait]
impl PushTarget for HttpTarget {
    fn describe(&self) -> String {
        format!("receiver {}", self.base_url)
    }

    async fn open(&self, push_id: &str) -> std::result::Result<(), TargetError> {
        let url = self.url(&format!("/api/session/{}", push_id));
        self.send(self.client.post(&url)).await?;
        self.set_push_id(Some(push_id.to_string()));
        info!("Opened push session {} on {}", push_id, self.base_url);
        Ok(())
    }

    async fn put(&self, entry: &ChangeEntry, bytes: Bytes) -> std::result::Result<(), TargetError> {
        let total_size = bytes.len();
        let mut request = self
            .client
            .post(self.url("/api/files/upload"))
            .query(&[("path", entry.path.as_str())])
            .header(HEADER_PUSH_ID, self.current_push_id())
            .header(HEADER_TOTAL_SIZE, total_size.to_string());

        if let Some(hash) = entry.after_hash {
            request = request.header(HEADER_CONTENT_HASH, hash.to_hex());
        }
        if let Some(mode) = entry.mode {
            request = request.header(HEADER_FILE_MODE, mode.to_string());
        }

        let request = match self.compression {
            Compression::Zstd => {
                let compressed = ZstdEncoder::new(Cursor::new(bytes));
                let body = reqwest::Body::wrap_stream(ReaderStream::new(compressed));
                request.header("content-encoding", "zstd").body(body)
            }
            Compression::None => request.body(bytes),
        };

        self.send(request).await?;
        debug!("Uploaded {} bytes: {}", total_size, entry.path);
        Ok(())
    }

    async fn delete(&self, path: &RelPath) -> std::result::Result<(), TargetError> {
        let request = self
            .client
            .delete(self.url("/api/files"))
            .header(HEADER_PUSH_ID, self.current_push_id())
            .query(&[("path", path.as_str())]);

        self.send(request).await?;
        debug!("Deleted {}", path);
        Ok(())
    }

    async fn close(&self, push_id: &str) -> std::result::Result<(), TargetError> {
        let url = self.url(&format!("/api/session/{}", push_id));
        self.send(self.client.delete(&url)).await?;
        self.set_push_id(None);
        info!("Closed push session {}", push_id);
        Ok(())
    }

    async fn recorded_state(&self) -> Result<Snapshot> {
        let response = self.send(self.client.get(self.url("/api/files/hashes"))).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| TargetError::Connection(e.to_string()))?;
        Ok(serde_json::from_slice(&body)?)
    }
}
