//! Filesystem access: tree walking and file modes.

pub mod metadata;
pub mod walker;

pub use walker::{walk, IgnoreRules, RelPath, WalkEntry};
