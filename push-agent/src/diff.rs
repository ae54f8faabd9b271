//! Snapshot comparison.
//!
//! [`diff`] merge-walks two snapshots in canonical path order and emits only
//! real differences. Unchanged paths are never materialized, so a
//! [`ChangeSet`] is minimal by construction and sorted by construction.

use crate::fs::walker::RelPath;
use crate::snapshot::fingerprint::ContentHash;
use crate::snapshot::{FileRecord, Snapshot};
use crate::utils::errors::{PushError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        };
        f.write_str(label)
    }
}

/// A single per-path difference.
///
/// `Added` carries only `after_hash`, `Removed` only `before_hash`, and
/// `Modified` both, with different values. The one exception is a
/// mode-only change, which only exists when mode comparison is enabled and
/// then carries both modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub path: RelPath,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_hash: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_hash: Option<ContentHash>,
    /// Bytes to transmit (added/modified only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Mode to apply on the target (added/modified only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    /// Previous mode, present only for mode-compared modifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_mode: Option<u32>,
}

impl ChangeEntry {
    pub fn added(after: &FileRecord) -> Self {
        Self {
            path: after.path.clone(),
            kind: ChangeKind::Added,
            before_hash: None,
            after_hash: Some(after.content_hash),
            size: Some(after.size),
            mode: Some(after.mode),
            before_mode: None,
        }
    }

    pub fn removed(before: &FileRecord) -> Self {
        Self {
            path: before.path.clone(),
            kind: ChangeKind::Removed,
            before_hash: Some(before.content_hash),
            after_hash: None,
            size: None,
            mode: None,
            before_mode: None,
        }
    }

    pub fn modified(before: &FileRecord, after: &FileRecord) -> Self {
        Self {
            path: after.path.clone(),
            kind: ChangeKind::Modified,
            before_hash: Some(before.content_hash),
            after_hash: Some(after.content_hash),
            size: Some(after.size),
            mode: Some(after.mode),
            before_mode: None,
        }
    }

    /// True for entries that transmit bytes.
    pub fn is_put(&self) -> bool {
        matches!(self.kind, ChangeKind::Added | ChangeKind::Modified)
    }

    /// Check the per-kind hash invariants.
    pub fn validate(&self) -> Result<()> {
        let ok = match self.kind {
            ChangeKind::Added => self.before_hash.is_none() && self.after_hash.is_some(),
            ChangeKind::Removed => self.before_hash.is_some() && self.after_hash.is_none(),
            ChangeKind::Modified => match (self.before_hash, self.after_hash) {
                (Some(before), Some(after)) if before != after => true,
                (Some(_), Some(_)) => matches!(
                    (self.before_mode, self.mode),
                    (Some(old), Some(new)) if old != new
                ),
                _ => false,
            },
        };

        if ok {
            Ok(())
        } else {
            Err(PushError::CorruptManifest(format!(
                "{} entry for {} violates hash invariants",
                self.kind, self.path
            )))
        }
    }
}

/// Ordered, deduplicated list of changes between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChangeSet {
    entries: Vec<ChangeEntry>,
}

impl ChangeSet {
    /// Rebuild a change set from entries read back from a document.
    ///
    /// Entries must be strictly ascending by path and individually valid.
    pub fn from_entries(entries: Vec<ChangeEntry>) -> Result<Self> {
        for entry in &entries {
            entry.validate()?;
        }
        for pair in entries.windows(2) {
            if pair[0].path >= pair[1].path {
                return Err(PushError::CorruptManifest(format!(
                    "entries out of order at {} / {}",
                    pair[0].path, pair[1].path
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ChangeEntry> {
        self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Total bytes the added and modified entries will transmit.
    pub fn bytes_to_transfer(&self) -> u64 {
        self.entries.iter().filter_map(|e| e.size).sum()
    }

    /// Apply to a path/hash view of the base tree.
    ///
    /// Fails with [`PushError::StaleBase`] when an entry does not match the
    /// base (adding an existing path, or modifying/removing a path whose
    /// current hash differs from `before_hash`).
    pub fn apply(
        &self,
        base: &BTreeMap<RelPath, ContentHash>,
    ) -> Result<BTreeMap<RelPath, ContentHash>> {
        let mut result = base.clone();

        for entry in &self.entries {
            let current = result.get(&entry.path).copied();
            match (entry.kind, entry.after_hash) {
                (ChangeKind::Added, Some(after)) if current.is_none() => {
                    result.insert(entry.path.clone(), after);
                }
                (ChangeKind::Modified, Some(after)) if current.is_some() && current == entry.before_hash => {
                    result.insert(entry.path.clone(), after);
                }
                (ChangeKind::Removed, None) if current.is_some() && current == entry.before_hash => {
                    result.remove(&entry.path);
                }
                _ => {
                    return Err(PushError::StaleBase(format!(
                        "{} {} does not apply to the base tree",
                        entry.kind, entry.path
                    )))
                }
            }
        }

        Ok(result)
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a ChangeEntry;
    type IntoIter = std::slice::Iter<'a, ChangeEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Comparison policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    /// Treat a permission-bit change with identical content as `Modified`
    pub compare_mode: bool,
}

/// Compare two snapshots by content hash.
pub fn diff(before: &Snapshot, after: &Snapshot) -> ChangeSet {
    diff_with(before, after, DiffOptions::default())
}

/// Compare two snapshots with an explicit policy.
///
/// Two-pointer merge over both sorted path lists; O(n) in the number of
/// distinct paths.
pub fn diff_with(before: &Snapshot, after: &Snapshot, options: DiffOptions) -> ChangeSet {
    let mut entries = Vec::new();
    let mut left = before.iter().peekable();
    let mut right = after.iter().peekable();

    loop {
        let order = match (left.peek(), right.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(old), Some(new)) => old.path.cmp(&new.path),
        };

        match order {
            Ordering::Less => {
                if let Some(old) = left.next() {
                    entries.push(ChangeEntry::removed(old));
                }
            }
            Ordering::Greater => {
                if let Some(new) = right.next() {
                    entries.push(ChangeEntry::added(new));
                }
            }
            Ordering::Equal => {
                if let (Some(old), Some(new)) = (left.next(), right.next()) {
                    if old.content_hash != new.content_hash {
                        entries.push(ChangeEntry::modified(old, new));
                    } else if options.compare_mode && old.mode != new.mode {
                        let mut entry = ChangeEntry::modified(old, new);
                        entry.before_mode = Some(old.mode);
                        entries.push(entry);
                    }
                }
            }
        }
    }

    ChangeSet { entries }
}
