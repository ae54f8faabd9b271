//! Immutable point-in-time views of a directory tree.
//!
//! A [`Snapshot`] maps every relative path to a [`FileRecord`]. Snapshots are
//! only ever observable fully built: [`SnapshotBuilder::build`] either
//! returns a complete snapshot or fails, and the type has no mutators.

pub mod fingerprint;

use crate::config::Config;
use crate::fs::metadata::file_mode;
use crate::fs::walker::{walk, IgnoreRules, RelPath, WalkEntry};
use crate::utils::errors::{PushError, Result};
use fingerprint::{fingerprint_file, tagged_digest, ContentHash};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One file inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: RelPath,
    pub size: u64,
    pub content_hash: ContentHash,
    pub mode: u32,
}

/// What to do when a single file cannot be read during a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadErrorPolicy {
    /// Fail the whole build with [`PushError::Snapshot`]
    #[default]
    Abort,
    /// Leave the file out and record a warning
    Skip,
}

/// A file left out of a snapshot under [`ReadErrorPolicy::Skip`].
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Immutable mapping of relative path to [`FileRecord`], in canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotDocument", into = "SnapshotDocument")]
pub struct Snapshot {
    root_id: String,
    files: BTreeMap<RelPath, FileRecord>,
}

/// Wire form of a snapshot: records as an ordered list.
#[derive(Serialize, Deserialize)]
struct SnapshotDocument {
    root_id: String,
    files: Vec<FileRecord>,
}

impl Snapshot {
    /// Assemble a snapshot from records. Duplicate paths are rejected.
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>) -> Result<Self> {
        let mut files = BTreeMap::new();

        for record in records {
            match files.entry(record.path.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(_) => {
                    return Err(PushError::Snapshot {
                        path: PathBuf::from(record.path.as_str()),
                        reason: "duplicate path".to_string(),
                    });
                }
            }
        }

        let root_id = compute_root_id(&files);
        Ok(Self { root_id, files })
    }

    /// A snapshot with no files.
    pub fn empty() -> Self {
        let files = BTreeMap::new();
        Self {
            root_id: compute_root_id(&files),
            files,
        }
    }

    /// Content-derived identifier: identical trees share a root id.
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn files(&self) -> &BTreeMap<RelPath, FileRecord> {
        &self.files
    }

    pub fn get(&self, path: &RelPath) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Records in canonical path order.
    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|r| r.size).sum()
    }

    /// Path to content hash view, the part of a snapshot a diff reasons about.
    pub fn hashes(&self) -> BTreeMap<RelPath, ContentHash> {
        self.files
            .iter()
            .map(|(path, record)| (path.clone(), record.content_hash))
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Persist as a recorded state that can later stand in for a tree.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load a recorded state. Paths are re-validated and the root id is
    /// checked against the records.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl TryFrom<SnapshotDocument> for Snapshot {
    type Error = PushError;

    fn try_from(doc: SnapshotDocument) -> Result<Self> {
        let snapshot = Snapshot::from_records(doc.files)?;
        if snapshot.root_id != doc.root_id {
            return Err(PushError::Snapshot {
                path: PathBuf::new(),
                reason: format!(
                    "root id mismatch: recorded {}, computed {}",
                    doc.root_id, snapshot.root_id
                ),
            });
        }
        Ok(snapshot)
    }
}

impl From<Snapshot> for SnapshotDocument {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            root_id: snapshot.root_id,
            files: snapshot.files.into_values().collect(),
        }
    }
}

fn compute_root_id(files: &BTreeMap<RelPath, FileRecord>) -> String {
    let mut listing = Vec::new();
    for record in files.values() {
        listing.extend_from_slice(record.path.as_str().as_bytes());
        listing.push(0);
        listing.extend_from_slice(record.content_hash.to_hex().as_bytes());
        listing.push(b'\n');
    }
    tagged_digest(&listing)
}

/// Builds snapshots from directory roots.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    rules: IgnoreRules,
    on_read_error: ReadErrorPolicy,
    reject_case_collisions: bool,
    io_threads: usize,
}

impl SnapshotBuilder {
    pub fn new(rules: IgnoreRules) -> Self {
        Self {
            rules,
            on_read_error: ReadErrorPolicy::Abort,
            reject_case_collisions: false,
            io_threads: 4,
        }
    }

    /// Builder configured from the `[push]` and `[snapshot]` sections.
    pub fn from_config(config: &Config) -> Result<Self> {
        let rules = IgnoreRules::new(&config.push.ignore_patterns)?;
        Ok(Self::new(rules)
            .on_read_error(config.push.on_read_error)
            .reject_case_collisions(config.push.case_insensitive_paths)
            .io_threads(config.snapshot.io_threads))
    }

    pub fn on_read_error(mut self, policy: ReadErrorPolicy) -> Self {
        self.on_read_error = policy;
        self
    }

    /// Fail builds containing paths that differ only by case.
    pub fn reject_case_collisions(mut self, reject: bool) -> Self {
        self.reject_case_collisions = reject;
        self
    }

    pub fn io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Build a snapshot of `root`.
    pub fn build(&self, root: &Path) -> Result<Snapshot> {
        let (snapshot, _skipped) = self.build_with_report(root)?;
        Ok(snapshot)
    }

    /// Build a snapshot of `root`, also returning files skipped under
    /// [`ReadErrorPolicy::Skip`].
    pub fn build_with_report(&self, root: &Path) -> Result<(Snapshot, Vec<SkippedFile>)> {
        if !root.is_dir() {
            return Err(PushError::Snapshot {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let mut skipped = Vec::new();
        let mut entries = Vec::new();
        for entry in walk(root, &self.rules) {
            match entry {
                Ok(entry) => entries.push(entry),
                Err(err) => self.handle_read_error(err, &mut skipped)?,
            }
        }

        debug!("Fingerprinting {} files under {}", entries.len(), root.display());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.io_threads)
            .build()
            .map_err(|e| PushError::Config(format!("failed to start fingerprint pool: {}", e)))?;

        // Collecting is the join barrier: nothing is frozen until every
        // fingerprint has finished.
        let results: Vec<Result<FileRecord>> =
            pool.install(|| entries.par_iter().map(record_for).collect());

        let mut records = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(record) => records.push(record),
                Err(err) => self.handle_read_error(err, &mut skipped)?,
            }
        }

        if self.reject_case_collisions {
            check_case_collisions(&records)?;
        }

        let snapshot = Snapshot::from_records(records)?;

        info!(
            "Snapshot of {}: {} files, {} bytes, {} skipped ({})",
            root.display(),
            snapshot.len(),
            snapshot.total_bytes(),
            skipped.len(),
            snapshot.root_id()
        );

        Ok((snapshot, skipped))
    }

    fn handle_read_error(&self, err: PushError, skipped: &mut Vec<SkippedFile>) -> Result<()> {
        let (path, reason) = match err {
            PushError::Read { path, source } => (path, source.to_string()),
            other => return Err(other),
        };

        match self.on_read_error {
            ReadErrorPolicy::Abort => Err(PushError::Snapshot { path, reason }),
            ReadErrorPolicy::Skip => {
                warn!("Skipping unreadable file {}: {}", path.display(), reason);
                skipped.push(SkippedFile { path, reason });
                Ok(())
            }
        }
    }
}

fn record_for(entry: &WalkEntry) -> Result<FileRecord> {
    let (content_hash, size) = fingerprint_file(&entry.path)?;
    let metadata = std::fs::symlink_metadata(&entry.path).map_err(|source| PushError::Read {
        path: entry.path.clone(),
        source,
    })?;

    Ok(FileRecord {
        path: entry.relative_path.clone(),
        size,
        content_hash,
        mode: file_mode(&metadata),
    })
}

fn check_case_collisions(records: &[FileRecord]) -> Result<()> {
    let mut folded: HashMap<RelPath, &RelPath> = HashMap::with_capacity(records.len());

    for record in records {
        if let Some(existing) = folded.insert(record.path.to_lowercase(), &record.path) {
            return Err(PushError::Snapshot {
                path: PathBuf::from(record.path.as_str()),
                reason: format!("differs from {} only by case", existing),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_fixture(root: &Path) -> std::io::Result<()> {
        fs::create_dir_all(root.join("components"))?;
        fs::write(root.join("index.ios.js"), b"var React = require('react-native');\r\n")?;
        fs::write(
            root.join("components/AnimatedProgressView.js"),
            b"module.exports = AnimatedProgressView;\n",
        )?;
        fs::write(root.join("landscape.png"), [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a])?;
        Ok(())
    }

    #[test]
    fn test_build_is_repeatable() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        write_fixture(temp_dir.path())?;

        let builder = SnapshotBuilder::new(IgnoreRules::none());
        let first = builder.build(temp_dir.path()).unwrap();
        let second = builder.build(temp_dir.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.root_id(), second.root_id());
        assert_eq!(first.len(), 3);
        Ok(())
    }

    #[test]
    fn test_records_are_canonically_ordered() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        write_fixture(temp_dir.path())?;

        let snapshot = SnapshotBuilder::new(IgnoreRules::none())
            .io_threads(2)
            .build(temp_dir.path())
            .unwrap();
        let paths: Vec<&str> = snapshot.iter().map(|r| r.path.as_str()).collect();

        assert_eq!(
            paths,
            vec!["components/AnimatedProgressView.js", "index.ios.js", "landscape.png"]
        );
        Ok(())
    }

    #[test]
    fn test_root_id_tracks_content() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        write_fixture(temp_dir.path())?;

        let builder = SnapshotBuilder::new(IgnoreRules::none());
        let before = builder.build(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join("index.ios.js"), b"changed")?;
        let after = builder.build(temp_dir.path()).unwrap();

        assert_ne!(before.root_id(), after.root_id());
        assert_eq!(Snapshot::empty().root_id(), Snapshot::from_records(vec![]).unwrap().root_id());
        Ok(())
    }

    #[test]
    fn test_missing_root_fails() {
        let err = SnapshotBuilder::new(IgnoreRules::none())
            .build(Path::new("/nonexistent/push-files"))
            .unwrap_err();
        assert!(matches!(err, PushError::Snapshot { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn test_unreadable_file_policies() -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        write_fixture(temp_dir.path())?;
        let locked = temp_dir.path().join("locked.js");
        fs::write(&locked, b"secret")?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;

        // Root ignores permission bits, nothing to test there
        if fs::read(&locked).is_ok() {
            return Ok(());
        }

        let abort = SnapshotBuilder::new(IgnoreRules::none()).build(temp_dir.path());
        match abort {
            Err(PushError::Snapshot { path, .. }) => assert!(path.ends_with("locked.js")),
            other => panic!("expected snapshot error, got {:?}", other),
        }

        let (snapshot, skipped) = SnapshotBuilder::new(IgnoreRules::none())
            .on_read_error(ReadErrorPolicy::Skip)
            .build_with_report(temp_dir.path())
            .unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].path.ends_with("locked.js"));

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644))?;
        Ok(())
    }

    #[test]
    fn test_case_collisions() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("CardView.js"), b"a")?;
        // Case-insensitive filesystems merge these two names
        if fs::write(temp_dir.path().join("cardview.js"), b"b").is_err()
            || fs::read_dir(temp_dir.path())?.count() < 2
        {
            return Ok(());
        }

        let relaxed = SnapshotBuilder::new(IgnoreRules::none()).build(temp_dir.path());
        assert_eq!(relaxed.unwrap().len(), 2);

        let strict = SnapshotBuilder::new(IgnoreRules::none())
            .reject_case_collisions(true)
            .build(temp_dir.path());
        assert!(matches!(strict, Err(PushError::Snapshot { .. })));
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let tree = temp_dir.path().join("tree");
        fs::create_dir(&tree)?;
        write_fixture(&tree)?;

        let snapshot = SnapshotBuilder::new(IgnoreRules::none()).build(&tree).unwrap();
        let saved = temp_dir.path().join("state.json");
        snapshot.save(&saved).unwrap();

        assert_eq!(Snapshot::load(&saved).unwrap(), snapshot);
        Ok(())
    }

    #[test]
    fn test_load_rejects_tampered_state() {
        let hash = fingerprint::fingerprint(b"x");
        let doc = serde_json::json!({
            "root_id": "sha256:0000",
            "files": [{ "path": "a.js", "size": 1, "content_hash": hash, "mode": 33188 }],
        });
        assert!(serde_json::from_value::<Snapshot>(doc).is_err());

        let escaping = serde_json::json!({
            "root_id": "sha256:0000",
            "files": [{ "path": "../a.js", "size": 1, "content_hash": hash, "mode": 33188 }],
        });
        assert!(serde_json::from_value::<Snapshot>(escaping).is_err());
    }

    #[test]
    fn test_duplicate_records_rejected() {
        let record = FileRecord {
            path: RelPath::parse("index.ios.js").unwrap(),
            size: 1,
            content_hash: fingerprint::fingerprint(b"x"),
            mode: 0o100644,
        };
        assert!(Snapshot::from_records(vec![record.clone(), record]).is_err());
    }
}
