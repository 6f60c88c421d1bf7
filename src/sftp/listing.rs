//! Directory listing helpers
//!
//! Pure conversions from SFTP attributes to browse entries.

use chrono::{DateTime, Utc};

use crate::browse::{join_remote_path, DirectoryEntry};

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

/// Directory test on the mode bits. `None` when the server sent no permissions.
pub fn is_directory_mode(permissions: Option<u32>) -> Option<bool> {
    permissions.map(|mode| mode & S_IFMT == S_IFDIR)
}

/// `.` and `..` never show up in a listing
pub fn is_dot_entry(name: &str) -> bool {
    name == "." || name == ".."
}

/// SFTP-side spelling of a browse path: `~` is the login directory, which
/// SFTP servers resolve relative paths against.
pub fn sftp_path(path: &str) -> &str {
    if path == "~" {
        "."
    } else if let Some(rest) = path.strip_prefix("~/") {
        if rest.is_empty() {
            "."
        } else {
            rest
        }
    } else {
        path
    }
}

pub fn mtime_to_datetime(mtime: Option<u32>) -> Option<DateTime<Utc>> {
    mtime.and_then(|secs| DateTime::<Utc>::from_timestamp(i64::from(secs), 0))
}

pub fn directory_entry(
    parent: &str,
    name: &str,
    size: Option<u64>,
    mtime: Option<u32>,
) -> DirectoryEntry {
    DirectoryEntry {
        name: name.to_string(),
        full_path: join_remote_path(parent, name),
        is_directory: true,
        modified_at: mtime_to_datetime(mtime),
        size_bytes: size,
    }
}

/// Case-insensitive by name, byte order as tie-break
pub fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
}
