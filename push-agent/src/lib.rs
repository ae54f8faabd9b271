//! Push Agent Library
//!
//! Snapshot two directory trees, diff them into a minimal change set, seal
//! the change set in an integrity-checked manifest and push it to a target
//! with bounded concurrency, retries and per-entry failure isolation.

pub mod config;
pub mod diff;
pub mod executor;
pub mod fs;
pub mod manifest;
pub mod shutdown;
pub mod snapshot;
pub mod target;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use diff::{diff, ChangeEntry, ChangeKind, ChangeSet};
pub use executor::{ExecutorOptions, PushExecutor};
pub use manifest::{Manifest, ManifestOptions};
pub use snapshot::{Snapshot, SnapshotBuilder};
pub use utils::errors::{PushError, Result};
