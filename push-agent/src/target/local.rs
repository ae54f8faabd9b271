//! Staging-directory target.

use super::{PushTarget, TargetError};
use crate::diff::ChangeEntry;
use crate::fs::metadata::apply_mode;
use crate::fs::walker::{IgnoreRules, RelPath};
use crate::snapshot::{Snapshot, SnapshotBuilder};
use crate::utils::errors::PushError;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Writes pushed files into a local directory.
///
/// Puts land atomically: bytes go to a temporary file next to the
/// destination which is then renamed over it, so a reader never sees a
/// half-written file.
#[derive(Debug, Clone)]
pub struct LocalDirTarget {
    root: PathBuf,
}

impl LocalDirTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Atomically write `bytes` at `path`, applying `mode` if given.
    pub async fn write_file(&self, path: &RelPath, bytes: Bytes, mode: Option<u32>) -> io::Result<()> {
        let dest = path.to_native(&self.root);

        tokio::task::spawn_blocking(move || {
            let parent = dest
                .parent()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
            std::fs::create_dir_all(parent)?;

            let mut temp = NamedTempFile::new_in(parent)?;
            temp.write_all(&bytes)?;
            temp.as_file().sync_all()?;
            if let Some(mode) = mode {
                apply_mode(temp.path(), mode)?;
            }
            temp.persist(&dest).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("write task failed: {}", e)))?
    }

    /// Remove `path` and prune directories it leaves empty.
    ///
    /// Returns `false` when the file was already gone.
    pub async fn remove_file(&self, path: &RelPath) -> io::Result<bool> {
        let dest = path.to_native(&self.root);

        match tokio::fs::remove_file(&dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        }

        let mut dir = dest.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == self.root {
                break;
            }
            // Fails on non-empty directories, which ends the pruning
            if tokio::fs::remove_dir(&current).await.is_err() {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }

        Ok(true)
    }
}

#[async_trait]
impl PushTarget for LocalDirTarget {
    fn describe(&self) -> String {
        format!("staging directory {}", self.root.display())
    }

    async fn open(&self, push_id: &str) -> Result<(), TargetError> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            TargetError::Connection(format!("cannot prepare {}: {}", self.root.display(), e))
        })?;
        debug!("Opened {} for push {}", self.describe(), push_id);
        Ok(())
    }

    async fn put(&self, entry: &ChangeEntry, bytes: Bytes) -> Result<(), TargetError> {
        self.write_file(&entry.path, bytes, entry.mode).await?;
        Ok(())
    }

    async fn delete(&self, path: &RelPath) -> Result<(), TargetError> {
        self.remove_file(path).await?;
        Ok(())
    }

    async fn recorded_state(&self) -> crate::Result<Snapshot> {
        if !self.root.exists() {
            return Ok(Snapshot::empty());
        }

        let root = self.root.clone();
        tokio::task::spawn_blocking(move || SnapshotBuilder::new(IgnoreRules::none()).build(&root))
            .await
            .map_err(|e| PushError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::fingerprint::fingerprint;
    use crate::snapshot::FileRecord;
    use tempfile::TempDir;

    fn put_entry(path: &str, content: &[u8]) -> ChangeEntry {
        ChangeEntry::added(&FileRecord {
            path: RelPath::parse(path).unwrap(),
            size: content.len() as u64,
            content_hash: fingerprint(content),
            mode: 0o100644,
        })
    }

    #[tokio::test]
    async fn test_put_creates_parents() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let target = LocalDirTarget::new(temp_dir.path());

        let entry = put_entry("components/CardView.js", b"card");
        target.put(&entry, Bytes::from_static(b"card")).await.unwrap();

        let written = std::fs::read(temp_dir.path().join("components/CardView.js"))?;
        assert_eq!(written, b"card");
        Ok(())
    }

    #[tokio::test]
    async fn test_put_replaces_existing() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        std::fs::write(temp_dir.path().join("index.ios.js"), b"old")?;
        let target = LocalDirTarget::new(temp_dir.path());

        let entry = put_entry("index.ios.js", b"new");
        target.put(&entry, Bytes::from_static(b"new")).await.unwrap();

        assert_eq!(std::fs::read(temp_dir.path().join("index.ios.js"))?, b"new");
        // No temporary files left behind
        assert_eq!(std::fs::read_dir(temp_dir.path())?.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_prunes_and_is_idempotent() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        std::fs::create_dir_all(temp_dir.path().join("components/deep"))?;
        std::fs::write(temp_dir.path().join("components/deep/Old.js"), b"old")?;
        let target = LocalDirTarget::new(temp_dir.path());
        let path = RelPath::parse("components/deep/Old.js").unwrap();

        assert!(target.remove_file(&path).await?);
        assert!(!temp_dir.path().join("components").exists());
        assert!(temp_dir.path().exists());

        assert!(!target.remove_file(&path).await?);
        target.delete(&path).await.unwrap();
        Ok(())
    }

    #[tokio::test]
    async fn test_recorded_state() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        std::fs::write(temp_dir.path().join("index.ios.js"), b"app")?;

        let state = LocalDirTarget::new(temp_dir.path()).recorded_state().await.unwrap();
        assert_eq!(state.len(), 1);

        let missing = LocalDirTarget::new(temp_dir.path().join("nope"));
        assert!(missing.recorded_state().await.unwrap().is_empty());
        Ok(())
    }
}
