//! Push executor - applies a manifest against a target.
//!
//! Entries run as independent tasks bounded by a semaphore. Each entry has
//! its own retry loop and timeout, so one broken asset never blocks the
//! rest of the run. Only whole-run preconditions abort a run: a corrupt
//! manifest, a target that cannot be opened, or a target that no longer
//! holds the state the manifest was generated against.

pub mod result;

use crate::config::PushConfig;
use crate::diff::{ChangeEntry, ChangeKind};
use crate::fs::walker::RelPath;
use crate::manifest::Manifest;
use crate::snapshot::fingerprint::fingerprint;
use crate::target::{PushTarget, TargetError};
use bytes::Bytes;
use result::{AbortReason, EntryOutcome, EntryStatus, PushResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use result::RunStatus;

/// Upper bound for the delay between two attempts of one entry.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Maximum entries in flight
    pub concurrency: usize,

    /// First retry delay, doubled per attempt
    pub retry_backoff: Duration,

    /// Timeout for a single target operation
    pub entry_timeout: Duration,

    /// Refuse to run unless the target still holds the manifest's base
    pub verify_base: bool,
}

impl ExecutorOptions {
    pub fn from_config(config: &PushConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            concurrency: config.concurrency,
            retry_backoff: config.retry_backoff(),
            entry_timeout: config.entry_timeout(),
            verify_base: true,
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from_config(&PushConfig::default())
    }
}

/// State shared by every entry task of one run
struct EntryContext {
    target: Arc<dyn PushTarget>,
    source_root: PathBuf,
    options: ExecutorOptions,
    cancel: CancellationToken,
}

/// Main push executor
pub struct PushExecutor {
    target: Arc<dyn PushTarget>,
    source_root: PathBuf,
    options: ExecutorOptions,
    cancel_token: CancellationToken,
}

impl PushExecutor {
    /// Create a new executor (no external cancellation)
    pub fn new(target: Arc<dyn PushTarget>, source_root: impl Into<PathBuf>, options: ExecutorOptions) -> Self {
        Self::with_cancel(target, source_root, options, CancellationToken::new())
    }

    /// Create a new executor that stops when `cancel_token` fires
    pub fn with_cancel(
        target: Arc<dyn PushTarget>,
        source_root: impl Into<PathBuf>,
        options: ExecutorOptions,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            target,
            source_root: source_root.into(),
            options,
            cancel_token,
        }
    }

    /// Run `manifest` to a terminal status.
    ///
    /// The manifest is consumed: a retry after the trees move on needs a
    /// freshly generated one.
    pub async fn execute(&self, manifest: Manifest) -> PushResult {
        let push_id = Uuid::new_v4().to_string();
        let mut result = PushResult::new(push_id.clone(), self.target.describe());

        info!(
            "Starting push {} to {}: {}",
            push_id,
            self.target.describe(),
            manifest.summary()
        );

        if let Err(e) = manifest.verify() {
            error!("Push {} aborted: {}", push_id, e);
            result.abort(AbortReason::CorruptManifest(e.to_string()));
            return result;
        }

        if let Err(e) = self.target.open(&push_id).await {
            error!("Push {} aborted, cannot open {}: {}", push_id, self.target.describe(), e);
            result.abort(AbortReason::TargetUnreachable(e.to_string()));
            return result;
        }

        if self.options.verify_base {
            if let Err(reason) = self.check_base(&manifest).await {
                error!("Push {} aborted: {}", push_id, reason);
                self.release(&push_id).await;
                result.abort(reason);
                return result;
            }
        }

        result.start();

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let context = Arc::new(EntryContext {
            target: Arc::clone(&self.target),
            source_root: self.source_root.clone(),
            options: self.options.clone(),
            cancel: self.cancel_token.clone(),
        });

        // Removals in the way of a put land first, everything else runs freely
        let (blocking, rest) = split_blocking_removals(manifest.entries());
        for batch in [blocking, rest] {
            let handles: Vec<_> = batch
                .into_iter()
                .map(|entry| spawn_entry(entry, &semaphore, &context))
                .collect();

            for (path, kind, handle) in handles {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!("Entry task for {} panicked: {}", path, e);
                        EntryOutcome::failed(kind, 0, format!("entry task failed: {}", e))
                    }
                };
                result.record(path, outcome);
            }
        }

        self.release(&push_id).await;

        result.finish(self.cancel_token.is_cancelled());

        info!(
            "Push {} {}: {} succeeded, {} failed, {} skipped",
            push_id,
            result.status(),
            result.count(EntryStatus::Success),
            result.count(EntryStatus::Failed),
            result.count(EntryStatus::Skipped)
        );

        result
    }

    /// The target must still hold the state the manifest was diffed against.
    async fn check_base(&self, manifest: &Manifest) -> Result<(), AbortReason> {
        let state = self
            .target
            .recorded_state()
            .await
            .map_err(|e| AbortReason::TargetUnreachable(format!("cannot read recorded state: {}", e)))?;

        if state.root_id() != manifest.base_root_id() {
            return Err(AbortReason::StaleBase(format!(
                "manifest expects base {}, target holds {}",
                manifest.base_root_id(),
                state.root_id()
            )));
        }
        Ok(())
    }

    /// Close the session, retrying like an entry so a receiver is not left
    /// claimed by a run that has ended.
    async fn release(&self, push_id: &str) {
        let max_attempts = self.options.max_retries.saturating_add(1);
        for attempt in 1..=max_attempts {
            let closed = tokio::time::timeout(self.options.entry_timeout, self.target.close(push_id))
                .await
                .unwrap_or_else(|_| Err(TargetError::Timeout(self.options.entry_timeout)));

            match closed {
                Ok(()) => return,
                Err(e) if attempt < max_attempts => {
                    debug!("Closing push {} failed (attempt {}): {}", push_id, attempt, e);
                    tokio::time::sleep(backoff(self.options.retry_backoff, attempt)).await;
                }
                Err(e) => {
                    warn!("Failed to close push {} on {}: {}", push_id, self.target.describe(), e);
                }
            }
        }
    }
}

fn spawn_entry(
    entry: ChangeEntry,
    semaphore: &Arc<Semaphore>,
    context: &Arc<EntryContext>,
) -> (RelPath, ChangeKind, JoinHandle<EntryOutcome>) {
    let sem = Arc::clone(semaphore);
    let ctx = Arc::clone(context);
    let path = entry.path.clone();
    let kind = entry.kind;

    let handle = tokio::spawn(async move {
        let permit = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return EntryOutcome::skipped(entry.kind, 0, "cancelled before start");
            }
            permit = sem.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => return EntryOutcome::skipped(entry.kind, 0, format!("semaphore closed: {}", e)),
            },
        };

        let outcome = process_entry(&ctx, &entry).await;
        drop(permit);
        outcome
    });

    (path, kind, handle)
}

/// Split off removals that must finish before some put can land: a removed
/// file standing where a put needs a directory, or a removed file inside a
/// directory that a put replaces with a file.
fn split_blocking_removals(entries: &[ChangeEntry]) -> (Vec<ChangeEntry>, Vec<ChangeEntry>) {
    let puts: Vec<&RelPath> = entries.iter().filter(|e| e.is_put()).map(|e| &e.path).collect();
    let put_files: HashSet<&str> = puts.iter().map(|p| p.as_str()).collect();
    let put_dirs: HashSet<&str> = puts.iter().copied().flat_map(|p| p.ancestors()).collect();

    entries.iter().cloned().partition(|entry| {
        !entry.is_put()
            && (put_dirs.contains(entry.path.as_str())
                || entry.path.ancestors().any(|dir| put_files.contains(dir)))
    })
}

/// Bounded-attempt loop for one entry.
async fn process_entry(ctx: &EntryContext, entry: &ChangeEntry) -> EntryOutcome {
    let bytes = if entry.is_put() {
        match load_source(&ctx.source_root, entry).await {
            Ok(bytes) => Some(bytes),
            Err(reason) => {
                warn!("{} {} failed: {}", entry.kind, entry.path, reason);
                return EntryOutcome::failed(entry.kind, 0, reason);
            }
        }
    } else {
        None
    };

    let max_attempts = ctx.options.max_retries.saturating_add(1);
    let mut attempt = 0u32;

    loop {
        if ctx.cancel.is_cancelled() {
            return EntryOutcome::skipped(entry.kind, attempt, "cancelled");
        }
        attempt += 1;

        let operation = async {
            match &bytes {
                Some(bytes) => ctx.target.put(entry, bytes.clone()).await,
                None => ctx.target.delete(&entry.path).await,
            }
        };

        let outcome = tokio::select! {
            timed = tokio::time::timeout(ctx.options.entry_timeout, operation) => {
                timed.unwrap_or_else(|_| Err(TargetError::Timeout(ctx.options.entry_timeout)))
            }
            _ = ctx.cancel.cancelled() => {
                info!("{} {} abandoned by cancellation", entry.kind, entry.path);
                return EntryOutcome::skipped(entry.kind, attempt, "cancelled while in flight");
            }
        };

        match outcome {
            Ok(()) => {
                debug!("{} {} succeeded (attempt {})", entry.kind, entry.path, attempt);
                return EntryOutcome::success(entry.kind, attempt);
            }
            Err(e) if attempt < max_attempts => {
                let delay = backoff(ctx.options.retry_backoff, attempt);
                warn!(
                    "{} {} failed (attempt {}/{}): {}, retrying in {:?}",
                    entry.kind, entry.path, attempt, max_attempts, e, delay
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancel.cancelled() => {
                        return EntryOutcome::skipped(entry.kind, attempt, format!("cancelled after error: {}", e));
                    }
                }
            }
            Err(e) => {
                warn!(
                    "{} {} failed after {} attempts: {}",
                    entry.kind, entry.path, attempt, e
                );
                return EntryOutcome::failed(entry.kind, attempt, e.to_string());
            }
        }
    }
}

/// Re-read a source file and check it still matches the manifest.
async fn load_source(root: &Path, entry: &ChangeEntry) -> Result<Bytes, String> {
    let path = entry.path.to_native(root);
    let expected = entry.after_hash;

    let loaded = tokio::task::spawn_blocking(move || {
        std::fs::read(&path)
            .map(|content| (fingerprint(&content), content))
            .map_err(|e| format!("cannot read source {}: {}", path.display(), e))
    })
    .await
    .map_err(|e| format!("read task failed: {}", e))?;

    let (actual, content) = loaded?;
    if Some(actual) != expected {
        return Err(format!(
            "source changed since the manifest was generated (expected {}, found {})",
            expected.map(|h| h.to_hex()).unwrap_or_default(),
            actual
        ));
    }

    Ok(Bytes::from(content))
}

/// Delay before the attempt following `attempt`.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}
