//! Custom error types for the push agent.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PushError {
    /// A file could not be read while fingerprinting it.
    #[error("Read error at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A snapshot could not be built. No partial snapshot is ever returned.
    #[error("Snapshot error at {}: {reason}", path.display())]
    Snapshot { path: PathBuf, reason: String },

    #[error("Empty push: no changes between the two snapshots")]
    EmptyPush,

    #[error("Corrupt manifest: {0}")]
    CorruptManifest(String),

    /// A change set does not match the tree it is applied to.
    #[error("Stale base: {0}")]
    StaleBase(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Target error: {0}")]
    Target(#[from] crate::target::TargetError),
}

pub type Result<T> = std::result::Result<T, PushError>;
