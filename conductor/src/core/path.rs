//! Platform-neutral path text handling for the safety gate.
//!
//! Paths are handled as slash-normalized strings so that Windows drive paths
//! (`C:\Windows\...`) keep their absolute meaning on any host.

/// Path syntax family, decided from the text rather than the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathFlavor {
    Posix,
    Windows,
}

impl PathFlavor {
    /// Windows paths compare case-insensitively; POSIX paths follow the host.
    pub fn case_sensitive(self) -> bool {
        match self {
            PathFlavor::Windows => false,
            PathFlavor::Posix => !cfg!(windows),
        }
    }
}

/// `<letter>:\` or `<letter>:/` prefix.
pub fn is_windows_drive_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

pub fn flavor_of(path: &str) -> PathFlavor {
    if is_windows_drive_absolute(path) || path.starts_with("\\\\") {
        PathFlavor::Windows
    } else {
        PathFlavor::Posix
    }
}

/// Replace backslashes with forward slashes.
pub fn to_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// Expand a leading `~` (alone or followed by a separator) to `home`.
///
/// `~user` forms are left untouched, as is everything when `home` is unknown.
pub fn expand_home(path: &str, home: Option<&str>) -> String {
    let Some(home) = home else {
        return path.to_string();
    };
    let home = home.trim_end_matches(['/', '\\']);
    if path == "~" {
        return home.to_string();
    }
    match path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        Some(rest) => format!("{home}/{rest}"),
        None => path.to_string(),
    }
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || path.starts_with('\\') || is_windows_drive_absolute(path)
}

/// Resolve `.` and `..` segments and collapse repeated separators.
///
/// The input must already be slash-normalized. `..` never climbs above the
/// root of an absolute path.
pub fn lexical_normalize(path: &str) -> String {
    let (root, rest) = split_root(path);
    let mut parts: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if root.is_empty() {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if root.is_empty() && joined.is_empty() {
        return ".".to_string();
    }
    format!("{root}{joined}")
}

fn split_root(path: &str) -> (&str, &str) {
    if is_windows_drive_absolute(path) {
        return path.split_at(3);
    }
    if let Some(rest) = path.strip_prefix('/') {
        return ("/", rest);
    }
    ("", path)
}

/// Join `relative` onto `base` (both slash-normalized).
pub fn join(base: &str, relative: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{relative}")
    } else {
        format!("{base}/{relative}")
    }
}

/// True if `path` equals `dir` or lies beneath it.
pub fn is_within(path: &str, dir: &str, case_sensitive: bool) -> bool {
    let (path, dir) = if case_sensitive {
        (path.to_string(), dir.to_string())
    } else {
        (path.to_lowercase(), dir.to_lowercase())
    };
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        return path.starts_with('/');
    }
    path == dir || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// Last path segment.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
