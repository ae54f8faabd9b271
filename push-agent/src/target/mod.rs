//! Push targets.
//!
//! The executor only ever talks to a [`PushTarget`]: put bytes at a path,
//! delete a path, and bracket the run with `open`/`close`. Whether the far
//! side is a device, a receiver over HTTP or a staging directory is up to
//! the implementation.

pub mod http;
pub mod local;

use crate::diff::ChangeEntry;
use crate::fs::walker::RelPath;
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub use http::HttpTarget;
pub use local::LocalDirTarget;

/// Failure of a single target operation. Every variant is retryable from
/// the executor's point of view.
#[derive(Error, Debug)]
pub enum TargetError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rejected by target: {0}")]
    Rejected(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("session conflict: {0}")]
    Conflict(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receiving side of a push.
///
/// A target is owned by one push run at a time; callers serialize runs
/// against the same target.
#[async_trait]
pub trait PushTarget: Send + Sync {
    /// Human-readable name for logs and reports.
    fn describe(&self) -> String;

    /// Claim the target for a run. Failure aborts the run before any entry
    /// is processed.
    async fn open(&self, _push_id: &str) -> Result<(), TargetError> {
        Ok(())
    }

    /// Store `bytes` at `entry.path`, replacing any previous content.
    async fn put(&self, entry: &ChangeEntry, bytes: Bytes) -> Result<(), TargetError>;

    /// Remove `path`. Removing a path that is already gone succeeds.
    async fn delete(&self, path: &RelPath) -> Result<(), TargetError>;

    /// Release the target after a run.
    async fn close(&self, _push_id: &str) -> Result<(), TargetError> {
        Ok(())
    }

    /// The state the target currently holds, used as the "before" side
    /// when no explicit base is given. Targets that keep no record report
    /// an empty snapshot.
    async fn recorded_state(&self) -> crate::Result<Snapshot> {
        Ok(Snapshot::empty())
    }
}
