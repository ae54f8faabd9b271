//! File mode handling.
//!
//! Modes are recorded on every [`FileRecord`](crate::snapshot::FileRecord) and
//! travel with put entries so a target can restore them.

use std::fs;
use std::path::Path;

/// Permission and type bits of a file.
///
/// On non-Unix platforms only the read-only flag is observable, so it is
/// mapped onto `0o444`/`0o644`.
pub fn file_mode(metadata: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode()
    }

    #[cfg(not(unix))]
    {
        if metadata.permissions().readonly() {
            0o100444
        } else {
            0o100644
        }
    }
}

/// Apply the permission bits of `mode` to a file.
#[cfg(unix)]
pub fn apply_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let perms = fs::Permissions::from_mode(mode & 0o7777);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
pub fn apply_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms)
}
