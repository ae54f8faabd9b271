//! Configuration management for the push agent.
//!
//! Loads configuration from a TOML file. Every field has a default, so an
//! empty file (or no file at all) is a valid configuration.

use crate::snapshot::ReadErrorPolicy;
use crate::utils::errors::{PushError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Glob patterns excluded from snapshots
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Retries per entry after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Entries in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Refuse to generate empty manifests
    #[serde(default)]
    pub require_non_empty: bool,

    /// Base delay between retries, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound on a single target operation
    #[serde(default = "default_entry_timeout_secs")]
    pub entry_timeout_secs: u64,

    /// Treat mode-only changes as modifications
    #[serde(default)]
    pub compare_mode: bool,

    /// Fail snapshots whose paths differ only by case
    #[serde(default)]
    pub case_insensitive_paths: bool,

    /// abort or skip
    #[serde(default)]
    pub on_read_error: ReadErrorPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Number of fingerprinting threads
    #[serde(default = "default_io_threads")]
    pub io_threads: usize,
}

/// Wire compression for HTTP targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Zstd,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Compression algorithm (zstd, none)
    #[serde(default)]
    pub compression: Compression,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_ignore_patterns() -> Vec<String> {
    vec![".git".to_string(), "node_modules".to_string(), ".DS_Store".to_string()]
}

fn default_max_retries() -> u32 {
    3
}

fn default_concurrency() -> usize {
    8
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_entry_timeout_secs() -> u64 {
    30
}

fn default_io_threads() -> usize {
    4
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: default_ignore_patterns(),
            max_retries: default_max_retries(),
            concurrency: default_concurrency(),
            require_non_empty: false,
            retry_backoff_ms: default_retry_backoff_ms(),
            entry_timeout_secs: default_entry_timeout_secs(),
            compare_mode: false,
            case_insensitive_paths: false,
            on_read_error: ReadErrorPolicy::default(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            io_threads: default_io_threads(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PushConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn entry_timeout(&self) -> Duration {
        Duration::from_secs(self.entry_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run could work with.
    pub fn validate(&self) -> Result<()> {
        if self.push.concurrency == 0 {
            return Err(PushError::Config("push.concurrency must be at least 1".to_string()));
        }
        if self.push.entry_timeout_secs == 0 {
            return Err(PushError::Config("push.entry_timeout_secs must be at least 1".to_string()));
        }
        if self.snapshot.io_threads == 0 {
            return Err(PushError::Config("snapshot.io_threads must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.push.max_retries, 3);
        assert_eq!(config.push.concurrency, 8);
        assert_eq!(config.push.on_read_error, ReadErrorPolicy::Abort);
        assert_eq!(config.target.compression, Compression::Zstd);
        assert_eq!(config.log.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file() -> std::io::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            "[push]\nconcurrency = 2\non_read_error = \"skip\"\n\n[target]\ncompression = \"none\""
        )?;

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.push.concurrency, 2);
        assert_eq!(config.push.on_read_error, ReadErrorPolicy::Skip);
        assert_eq!(config.push.max_retries, 3);
        assert_eq!(config.push.ignore_patterns, default_ignore_patterns());
        assert_eq!(config.target.compression, Compression::None);
        assert_eq!(config.snapshot.io_threads, 4);
        Ok(())
    }

    #[test]
    fn test_invalid_values() -> std::io::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[push]\nconcurrency = 0")?;
        assert!(matches!(Config::from_file(file.path()), Err(PushError::Config(_))));

        let mut bad_toml = NamedTempFile::new()?;
        writeln!(bad_toml, "[push\nconcurrency = ")?;
        assert!(matches!(Config::from_file(bad_toml.path()), Err(PushError::Toml(_))));
        Ok(())
    }
}
