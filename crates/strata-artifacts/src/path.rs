//! Validated manifest-relative paths.
//!
//! Manifest entries are written by the build pipeline and read back from disk, so every path
//! they carry is untrusted input. [`RelativeSafePath`] is the only way to turn one into a
//! filesystem location; once constructed it cannot escape the index root.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Why a manifest path was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsafePathReason {
    Empty,
    Absolute,
    Backslash,
    EmptySegment,
    Traversal,
    NulByte,
}

impl fmt::Display for UnsafePathReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Empty => "path is empty",
            Self::Absolute => "path is absolute",
            Self::Backslash => "path must use '/' separators",
            Self::EmptySegment => "path contains an empty segment",
            Self::Traversal => "path contains '..'",
            Self::NulByte => "path contains a NUL byte",
        };
        f.write_str(text)
    }
}

/// A `/`-separated path relative to an index root with no way out of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelativeSafePath(String);

impl RelativeSafePath {
    /// Validate `raw`, dropping `.` segments.
    pub fn new(raw: &str) -> Result<Self, UnsafePathReason> {
        if raw.is_empty() {
            return Err(UnsafePathReason::Empty);
        }
        if raw.contains('\0') {
            return Err(UnsafePathReason::NulByte);
        }
        if raw.contains('\\') {
            return Err(UnsafePathReason::Backslash);
        }
        if raw.starts_with('/') || has_drive_prefix(raw) {
            return Err(UnsafePathReason::Absolute);
        }

        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" => return Err(UnsafePathReason::EmptySegment),
                "." => {}
                ".." => return Err(UnsafePathReason::Traversal),
                other => segments.push(other),
            }
        }
        if segments.is_empty() {
            return Err(UnsafePathReason::Empty);
        }

        let normalized = segments.join("/");
        // Platform path parsing is the final word on what counts as a root or prefix.
        for component in Path::new(&normalized).components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => return Err(UnsafePathReason::Traversal),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(UnsafePathReason::Absolute)
                }
            }
        }
        Ok(Self(normalized))
    }

    /// Build from a path already known to live under `root`.
    pub fn from_root_relative(root: &Path, path: &Path) -> Result<Self, UnsafePathReason> {
        let rel = path.strip_prefix(root).map_err(|_| UnsafePathReason::Absolute)?;
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(os) => parts.push(os.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir => return Err(UnsafePathReason::Traversal),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(UnsafePathReason::Absolute)
                }
            }
        }
        Self::new(&parts.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Final segment of the path.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Join onto `root` using the platform separator.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for segment in self.segments() {
            out.push(segment);
        }
        out
    }
}

impl fmt::Display for RelativeSafePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelativeSafePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn has_drive_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
