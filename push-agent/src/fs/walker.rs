//! Directory traversal in canonical path order.
//!
//! The walker yields every regular file under a root as a [`RelPath`] plus
//! its on-disk location. Entries come out sorted segment by segment, which is
//! the same order [`RelPath`]'s `Ord` defines, so snapshots and manifests
//! built from a walk iterate deterministically.

use crate::utils::errors::{PushError, Result};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// A validated, `/`-separated path relative to a tree root.
///
/// Never empty, never absolute, and never contains `.` or `..` segments, so
/// joining it onto a root cannot escape that root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    /// Parse a relative path, normalizing `\` separators to `/`.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.replace('\\', "/");

        if normalized.is_empty() {
            return Err(PushError::InvalidPath("empty path".to_string()));
        }
        if normalized.starts_with('/') {
            return Err(PushError::InvalidPath(format!("absolute path: {}", raw)));
        }
        for segment in normalized.split('/') {
            match segment {
                "" => return Err(PushError::InvalidPath(format!("empty segment: {}", raw))),
                "." | ".." => {
                    return Err(PushError::InvalidPath(format!("relative segment: {}", raw)))
                }
                _ => {}
            }
        }

        Ok(Self(normalized))
    }

    /// Build from a native relative path (as produced by `strip_prefix`).
    pub fn from_native(path: &Path) -> Result<Self> {
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| {
                        PushError::InvalidPath(format!("non UTF-8 path: {}", path.display()))
                    })?;
                    segments.push(part);
                }
                _ => {
                    return Err(PushError::InvalidPath(format!(
                        "unexpected component in {}",
                        path.display()
                    )))
                }
            }
        }
        Self::parse(&segments.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Directories above this path, shortest first: `a/b/c` yields `a`
    /// then `a/b`.
    pub fn ancestors(&self) -> impl Iterator<Item = &str> {
        self.0.match_indices('/').map(move |(i, _)| &self.0[..i])
    }

    /// Resolve against a native root directory.
    pub fn to_native(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.segments() {
            path.push(segment);
        }
        path
    }

    /// Case-folded copy, used when comparing trees from case-insensitive
    /// filesystems.
    pub fn to_lowercase(&self) -> Self {
        Self(self.0.to_lowercase())
    }
}

impl Ord for RelPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments().cmp(other.segments())
    }
}

impl PartialOrd for RelPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RelPath {
    type Error = PushError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RelPath> for String {
    fn from(path: RelPath) -> Self {
        path.0
    }
}

/// Compiled ignore patterns.
///
/// A pattern without `/` is matched against every path segment, so `.git`
/// or `node_modules` prune whole directories. A pattern containing `/` is
/// matched against the full relative path.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    segment_patterns: Vec<Pattern>,
    path_patterns: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl IgnoreRules {
    /// Compile glob patterns. Fails with [`PushError::Config`] on a bad pattern.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut rules = Self::default();

        for raw in patterns {
            let raw = raw.as_ref().trim().trim_end_matches('/');
            if raw.is_empty() {
                continue;
            }
            let pattern = Pattern::new(raw)
                .map_err(|e| PushError::Config(format!("invalid ignore pattern '{}': {}", raw, e)))?;
            if raw.contains('/') {
                rules.path_patterns.push(pattern);
            } else {
                rules.segment_patterns.push(pattern);
            }
        }

        Ok(rules)
    }

    /// Rules that ignore nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Check a `/`-separated relative path.
    pub fn is_ignored(&self, relative: &str) -> bool {
        if relative.is_empty() {
            return false;
        }
        if self
            .path_patterns
            .iter()
            .any(|p| p.matches_with(relative, MATCH_OPTIONS))
        {
            return true;
        }

        relative.split('/').any(|segment| {
            self.segment_patterns
                .iter()
                .any(|p| p.matches_with(segment, MATCH_OPTIONS))
        })
    }

    fn is_ignored_entry(&self, root: &Path, entry: &DirEntry) -> bool {
        match entry.path().strip_prefix(root) {
            Ok(relative) => {
                let relative = relative.to_string_lossy().replace('\\', "/");
                self.is_ignored(&relative)
            }
            Err(_) => false,
        }
    }
}

/// A regular file discovered during walking.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Path relative to the walk root
    pub relative_path: RelPath,

    /// Full on-disk location
    pub path: PathBuf,
}

/// Walk a directory tree lazily, yielding regular files in canonical order.
///
/// Each call walks from scratch. Symbolic links are neither followed nor
/// reported. A directory that disappears mid-walk simply yields no further
/// entries; any other traversal failure is yielded as an error item.
///
/// # Example
/// ```no_run
/// use push_agent::fs::walker::{walk, IgnoreRules};
/// use std::path::Path;
///
/// let rules = IgnoreRules::new(&[".git", "node_modules"]).unwrap();
/// for entry in walk(Path::new("./app"), &rules) {
///     println!("{}", entry.unwrap().relative_path);
/// }
/// ```
pub fn walk<'a>(
    root: &'a Path,
    rules: &'a IgnoreRules,
) -> impl Iterator<Item = Result<WalkEntry>> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| !rules.is_ignored_entry(root, entry))
        .filter_map(move |entry| match entry {
            Ok(entry) => {
                // Only regular files; symlinks and directories are skipped
                if !entry.file_type().is_file() {
                    return None;
                }
                Some(WalkEntry::from_entry(&entry, root))
            }
            Err(err) if is_vanished(&err) => {
                debug!("Skipping vanished entry: {}", err);
                None
            }
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                Some(Err(PushError::Read {
                    path,
                    source: err.into(),
                }))
            }
        })
}

impl WalkEntry {
    fn from_entry(entry: &DirEntry, root: &Path) -> Result<Self> {
        let path = entry.path().to_path_buf();
        let relative = path
            .strip_prefix(root)
            .map_err(|_| PushError::InvalidPath(format!("{} is outside the root", path.display())))?;

        Ok(Self {
            relative_path: RelPath::from_native(relative)?,
            path,
        })
    }
}

fn is_vanished(err: &walkdir::Error) -> bool {
    err.io_error()
        .map(|e| e.kind() == std::io::ErrorKind::NotFound)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn collect(root: &Path, rules: &IgnoreRules) -> Vec<String> {
        walk(root, rules)
            .map(|e| e.unwrap().relative_path.to_string())
            .collect()
    }

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        assert!(collect(temp_dir.path(), &IgnoreRules::none()).is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_canonical_order() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("components"))?;
        fs::create_dir_all(temp_dir.path().join("a"))?;
        fs::write(temp_dir.path().join("index.ios.js"), b"app")?;
        fs::write(temp_dir.path().join("components/CardView.js"), b"card")?;
        fs::write(temp_dir.path().join("a.txt"), b"x")?;
        fs::write(temp_dir.path().join("a/b.txt"), b"y")?;

        let paths = collect(temp_dir.path(), &IgnoreRules::none());
        assert_eq!(
            paths,
            vec!["a/b.txt", "a.txt", "components/CardView.js", "index.ios.js"]
        );

        let mut sorted: Vec<RelPath> = paths.iter().map(|p| RelPath::parse(p).unwrap()).collect();
        sorted.sort();
        let sorted: Vec<String> = sorted.into_iter().map(String::from).collect();
        assert_eq!(paths, sorted);

        Ok(())
    }

    #[test]
    fn test_walk_is_restartable() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("one.js"), b"1")?;
        fs::write(temp_dir.path().join("two.js"), b"2")?;

        let rules = IgnoreRules::none();
        assert_eq!(collect(temp_dir.path(), &rules), collect(temp_dir.path(), &rules));
        Ok(())
    }

    #[test]
    fn test_ignore_patterns() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("node_modules/react"))?;
        fs::create_dir_all(temp_dir.path().join("build/ios"))?;
        fs::write(temp_dir.path().join("node_modules/react/index.js"), b"lib")?;
        fs::write(temp_dir.path().join("build/ios/main.jsbundle"), b"bundle")?;
        fs::write(temp_dir.path().join(".DS_Store"), b"junk")?;
        fs::write(temp_dir.path().join("app.log"), b"log")?;
        fs::write(temp_dir.path().join("index.ios.js"), b"keep")?;

        let rules = IgnoreRules::new(&["node_modules", ".DS_Store", "*.log", "build/ios"]).unwrap();
        assert_eq!(collect(temp_dir.path(), &rules), vec!["index.ios.js"]);

        Ok(())
    }

    #[test]
    fn test_hidden_files_are_included() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join(".hidden-file"), b"hidden")?;
        fs::write(temp_dir.path().join("Siphonfile"), b"{}")?;

        assert_eq!(
            collect(temp_dir.path(), &IgnoreRules::none()),
            vec![".hidden-file", "Siphonfile"]
        );
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_are_not_followed() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("dir"))?;
        fs::write(temp_dir.path().join("dir/file.txt"), b"x")?;
        std::os::unix::fs::symlink(temp_dir.path(), temp_dir.path().join("dir/loop"))?;
        std::os::unix::fs::symlink(
            temp_dir.path().join("dir/file.txt"),
            temp_dir.path().join("link.txt"),
        )?;

        assert_eq!(collect(temp_dir.path(), &IgnoreRules::none()), vec!["dir/file.txt"]);
        Ok(())
    }

    #[test]
    fn test_invalid_ignore_pattern() {
        assert!(matches!(
            IgnoreRules::new(&["[unclosed"]),
            Err(PushError::Config(_))
        ));
    }

    #[test]
    fn test_rel_path_rejects_escapes() {
        assert!(RelPath::parse("../bad-file").is_err());
        assert!(RelPath::parse("a/../../etc/passwd").is_err());
        assert!(RelPath::parse("/etc/passwd").is_err());
        assert!(RelPath::parse("a//b").is_err());
        assert!(RelPath::parse("").is_err());
        assert!(RelPath::parse("./a").is_err());
    }

    #[test]
    fn test_rel_path_normalizes_separators() {
        let path = RelPath::parse("components\\CardView.js").unwrap();
        assert_eq!(path.as_str(), "components/CardView.js");
    }

    #[test]
    fn test_rel_path_ancestors() {
        let path = RelPath::parse("assets/icons/logo.png").unwrap();
        assert_eq!(path.ancestors().collect::<Vec<_>>(), vec!["assets", "assets/icons"]);
        assert_eq!(RelPath::parse("logo.png").unwrap().ancestors().count(), 0);
    }

    #[test]
    fn test_rel_path_orders_by_segment() {
        let nested = RelPath::parse("a/b").unwrap();
        let sibling = RelPath::parse("a.txt").unwrap();
        assert!(nested < sibling);
        assert!(RelPath::parse("a").unwrap() < nested);
    }
}
