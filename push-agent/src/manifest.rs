//! Push manifests.
//!
//! A [`Manifest`] is the serializable, integrity-checked form of a
//! [`ChangeSet`]. The integrity digest covers the serialized entries only,
//! so two manifests generated from the same pair of snapshots carry the same
//! digest whatever their `generated_at`.

use crate::diff::{ChangeEntry, ChangeKind, ChangeSet};
use crate::snapshot::fingerprint::tagged_digest;
use crate::utils::errors::{PushError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Current manifest document version.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Generation policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestOptions {
    /// Refuse to generate a manifest with zero entries
    pub require_non_empty: bool,
}

/// Serializable description of a push. Field order is the document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    format_version: u32,
    base_root_id: String,
    target_root_id: String,
    generated_at: DateTime<Utc>,
    entries: Vec<ChangeEntry>,
    integrity_digest: String,
}

/// Per-kind counts of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManifestSummary {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub bytes_to_transfer: u64,
}

impl fmt::Display for ManifestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} modified, {} removed, {} bytes to transfer",
            self.added, self.modified, self.removed, self.bytes_to_transfer
        )
    }
}

impl Manifest {
    /// Generate a manifest stamped with the current time.
    pub fn generate(
        change_set: ChangeSet,
        base_root_id: &str,
        target_root_id: &str,
        options: ManifestOptions,
    ) -> Result<Self> {
        Self::generate_at(change_set, base_root_id, target_root_id, options, Utc::now())
    }

    /// Generate a manifest with an explicit timestamp. Equal inputs give a
    /// byte-identical document.
    pub fn generate_at(
        change_set: ChangeSet,
        base_root_id: &str,
        target_root_id: &str,
        options: ManifestOptions,
        generated_at: DateTime<Utc>,
    ) -> Result<Self> {
        if options.require_non_empty && change_set.is_empty() {
            return Err(PushError::EmptyPush);
        }

        let entries = change_set.into_entries();
        let integrity_digest = compute_digest(&entries)?;

        Ok(Self {
            format_version: MANIFEST_FORMAT_VERSION,
            base_root_id: base_root_id.to_string(),
            target_root_id: target_root_id.to_string(),
            generated_at,
            entries,
            integrity_digest,
        })
    }

    /// Recompute the integrity digest and re-check every entry.
    ///
    /// Any mismatch is reported as [`PushError::CorruptManifest`].
    pub fn verify(&self) -> Result<()> {
        if self.format_version != MANIFEST_FORMAT_VERSION {
            return Err(PushError::CorruptManifest(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }

        let actual = compute_digest(&self.entries)?;
        if actual != self.integrity_digest {
            return Err(PushError::CorruptManifest(format!(
                "integrity digest mismatch: expected {}, computed {}",
                self.integrity_digest, actual
            )));
        }

        ChangeSet::from_entries(self.entries.clone())?;
        Ok(())
    }

    pub fn base_root_id(&self) -> &str {
        &self.base_root_id
    }

    pub fn target_root_id(&self) -> &str {
        &self.target_root_id
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn integrity_digest(&self) -> &str {
        &self.integrity_digest
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> ManifestSummary {
        let count = |kind: ChangeKind| self.entries.iter().filter(|e| e.kind == kind).count();
        ManifestSummary {
            added: count(ChangeKind::Added),
            modified: count(ChangeKind::Modified),
            removed: count(ChangeKind::Removed),
            bytes_to_transfer: self.entries.iter().filter_map(|e| e.size).sum(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a manifest document. Integrity is checked later by
    /// [`Manifest::verify`], when a push run starts.
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

fn compute_digest(entries: &[ChangeEntry]) -> Result<String> {
    let canonical = serde_json::to_vec(entries)?;
    Ok(tagged_digest(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::fs::walker::RelPath;
    use crate::snapshot::fingerprint::fingerprint;
    use crate::snapshot::{FileRecord, Snapshot};
    use chrono::TimeZone;

    fn record(path: &str, content: &[u8]) -> FileRecord {
        FileRecord {
            path: RelPath::parse(path).unwrap(),
            size: content.len() as u64,
            content_hash: fingerprint(content),
            mode: 0o100644,
        }
    }

    fn pair() -> (Snapshot, Snapshot) {
        let a = Snapshot::from_records(vec![
            record("landscape.png", b"h1"),
            record("index.ios.js", b"h2"),
        ])
        .unwrap();
        let b = Snapshot::from_records(vec![
            record("landscape.png", b"h1"),
            record("index.ios.js", b"h3"),
            record("components/CardView.js", b"h4"),
        ])
        .unwrap();
        (a, b)
    }

    fn generate(a: &Snapshot, b: &Snapshot) -> Manifest {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        Manifest::generate_at(diff(a, b), a.root_id(), b.root_id(), ManifestOptions::default(), at)
            .unwrap()
    }

    #[test]
    fn test_manifest_is_byte_stable() {
        let (a, b) = pair();
        let first = generate(&a, &b).to_json().unwrap();
        let second = generate(&a, &b).to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_digest_ignores_timestamp() {
        let (a, b) = pair();
        let stamped = generate(&a, &b);
        let now = Manifest::generate(diff(&a, &b), a.root_id(), b.root_id(), ManifestOptions::default())
            .unwrap();
        assert_eq!(stamped.integrity_digest(), now.integrity_digest());
        assert!(now.integrity_digest().starts_with("sha256:"));
    }

    #[test]
    fn test_verify_round_trip() {
        let (a, b) = pair();
        let manifest = generate(&a, &b);
        manifest.verify().unwrap();

        let parsed = Manifest::from_json(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(parsed, manifest);
        parsed.verify().unwrap();
        assert_eq!(parsed.summary().added, 1);
        assert_eq!(parsed.summary().modified, 1);
        assert_eq!(parsed.summary().removed, 0);
    }

    #[test]
    fn test_tampered_entries_are_detected() {
        let (a, b) = pair();
        let json = generate(&a, &b).to_json().unwrap();
        let tampered = json.replace("components/CardView.js", "components/Evil.js");

        let manifest = Manifest::from_json(&tampered).unwrap();
        assert!(matches!(manifest.verify(), Err(PushError::CorruptManifest(_))));
    }

    #[test]
    fn test_forged_digest_with_broken_invariant() {
        let (a, b) = pair();
        let mut manifest = generate(&a, &b);
        manifest.entries[0].before_hash = Some(fingerprint(b"forged"));
        manifest.integrity_digest = compute_digest(&manifest.entries).unwrap();

        assert!(matches!(manifest.verify(), Err(PushError::CorruptManifest(_))));
    }

    #[test]
    fn test_empty_push_policy() {
        let empty = Snapshot::empty();

        let allowed = Manifest::generate(
            diff(&empty, &empty),
            empty.root_id(),
            empty.root_id(),
            ManifestOptions::default(),
        )
        .unwrap();
        assert!(allowed.is_empty());
        allowed.verify().unwrap();

        let required = Manifest::generate(
            diff(&empty, &empty),
            empty.root_id(),
            empty.root_id(),
            ManifestOptions { require_non_empty: true },
        );
        assert!(matches!(required, Err(PushError::EmptyPush)));
    }
}
