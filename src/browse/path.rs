//! Remote path normalization
//!
//! Remote SFTP paths always use `/` as separator, even on Windows servers.
//! Normalization here is purely lexical; the server canonicalizes for real.

/// Canonicalizes user-supplied paths and computes parents. Must be pure.
pub trait PathNormalizer: Send + Sync {
    fn normalize(&self, path: &str) -> String;
    fn parent_path(&self, path: &str) -> String;
}

/// Lexical normalizer for `/`-separated remote paths
#[derive(Debug, Clone, Copy, Default)]
pub struct RemotePathNormalizer;

impl PathNormalizer for RemotePathNormalizer {
    fn normalize(&self, path: &str) -> String {
        normalize_remote_path(path)
    }

    fn parent_path(&self, path: &str) -> String {
        parent_remote_path(path)
    }
}

/// Check if a remote SFTP path is absolute.
pub fn is_absolute_remote_path(path: &str) -> bool {
    path.starts_with('/')
}

fn is_home_relative(path: &str) -> bool {
    path == "~" || path.starts_with("~/")
}

/// Normalize a remote path.
///
/// - empty → `/`
/// - `~` and `~/x` stay home-relative (resolved server-side)
/// - repeated slashes collapse, `.` drops, `..` pops (never above root)
/// - relative paths are anchored at `/`
/// - no trailing slash except for the root
pub fn normalize_remote_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return "/".to_string();
    }

    let (prefix, rest) = if is_home_relative(trimmed) {
        ("~", &trimmed[1..])
    } else {
        ("", trimmed)
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if prefix == "~" {
        if segments.is_empty() {
            return "~".to_string();
        }
        return format!("~/{}", segments.join("/"));
    }

    format!("/{}", segments.join("/"))
}

/// Parent of a remote path. The parent of `/` (and of `~`) is `/`.
pub fn parent_remote_path(path: &str) -> String {
    let normalized = normalize_remote_path(path);
    if normalized == "/" || normalized == "~" {
        return "/".to_string();
    }

    match normalized.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
        None => "/".to_string(),
    }
}

/// Join remote SFTP path components using `/` separator.
pub fn join_remote_path(base: &str, component: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_absolute_remote_path() {
        assert!(is_absolute_remote_path("/home/user"));
        assert!(is_absolute_remote_path("/"));
        assert!(!is_absolute_remote_path("relative/path"));
        assert!(!is_absolute_remote_path("C:\\Windows"));
    }

    #[test]
    fn test_normalize_remote_path() {
        assert_eq!(normalize_remote_path(""), "/");
        assert_eq!(normalize_remote_path("   "), "/");
        assert_eq!(normalize_remote_path("/"), "/");
        assert_eq!(normalize_remote_path("//data///logs/"), "/data/logs");
        assert_eq!(normalize_remote_path("/a/./b/../c"), "/a/c");
        assert_eq!(normalize_remote_path("/../.."), "/");
        assert_eq!(normalize_remote_path("data"), "/data");
        assert_eq!(normalize_remote_path(" /srv/www "), "/srv/www");
    }

    #[test]
    fn test_normalize_home_relative() {
        assert_eq!(normalize_remote_path("~"), "~");
        assert_eq!(normalize_remote_path("~/"), "~");
        assert_eq!(normalize_remote_path("~/projects//x/"), "~/projects/x");
    }

    #[test]
    fn test_parent_remote_path() {
        assert_eq!(parent_remote_path("/a/b/c"), "/a/b");
        assert_eq!(parent_remote_path("/a/b/c/"), "/a/b");
        assert_eq!(parent_remote_path("/a"), "/");
        assert_eq!(parent_remote_path("/"), "/");
        assert_eq!(parent_remote_path("~/docs"), "~");
        assert_eq!(parent_remote_path("~"), "/");
    }

    #[test]
    fn test_join_remote_path() {
        assert_eq!(join_remote_path("/home", "file.txt"), "/home/file.txt");
        assert_eq!(join_remote_path("/home/", "file.txt"), "/home/file.txt");
        assert_eq!(join_remote_path("/", "home"), "/home");
    }
}
