use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Errors produced while reading, resolving, or writing persisted artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {message}")]
    Json { message: String },

    #[error("walkdir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("{path} exceeds max bytes ({size} > {max_bytes})")]
    SizeExceeded {
        path: PathBuf,
        size: u64,
        max_bytes: u64,
    },

    #[error("artifact not found: {path}")]
    NotFound { path: PathBuf },

    #[error("pieces manifest missing in {dir}")]
    ManifestMissing { dir: PathBuf },

    #[error("invalid json in {path}: {message}")]
    ParseInvalid { path: PathBuf, message: String },

    #[error("invalid json at line {line} of {path}: {message}")]
    LineInvalid {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("refusing to read {path}: not a regular file")]
    InvalidFileType { path: PathBuf },

    #[error("decompression failed for {path}: {message}")]
    Decompression { path: PathBuf, message: String },

    #[error("unsafe manifest path {path:?}: {reason}")]
    UnsafePath {
        path: String,
        reason: crate::path::UnsafePathReason,
    },

    #[error("manifest is missing shard parts for {name}: {}", missing.join(", "))]
    ManifestIncomplete { name: String, missing: Vec<String> },

    #[error("{name} shard parts missing{}", format_missing_indexes(missing_indexes))]
    PartsMissing {
        name: String,
        missing_indexes: Vec<usize>,
    },

    #[error("{name} shard record count mismatch: declared {declared}, found {found}")]
    ShardCountMismatch {
        name: String,
        declared: u64,
        found: u64,
    },

    #[error("ambiguous sources for {name}")]
    AmbiguousSources { name: String },

    #[error("unexpected {name} format: {format}")]
    UnexpectedFormat { name: String, format: String },

    #[error("{name} meta schemaVersion unsupported: {version}")]
    UnsupportedSchemaVersion { name: String, version: String },

    #[error("binary-columnar {name}: {message}")]
    Columnar { name: String, message: String },

    #[error("piece assembly failed: {message}")]
    Assembly { message: String },
}

impl ArtifactError {
    pub(crate) fn parse_invalid(path: &Path, err: &serde_json::Error) -> Self {
        Self::ParseInvalid {
            path: path.to_path_buf(),
            message: sanitize_json_error_message(&err.to_string()),
        }
    }

    pub(crate) fn line_invalid(path: &Path, line: usize, err: &serde_json::Error) -> Self {
        Self::LineInvalid {
            path: path.to_path_buf(),
            line,
            message: sanitize_json_error_message(&err.to_string()),
        }
    }

    pub(crate) fn columnar(name: &str, message: impl Into<String>) -> Self {
        Self::Columnar {
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn assembly(message: impl Into<String>) -> Self {
        Self::Assembly {
            message: message.into(),
        }
    }

    /// Whether the error only says that nothing was there to read.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::ManifestMissing { .. } => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether a later fallback candidate may still succeed after this error.
    ///
    /// Size violations are terminal: an oversized primary must never be papered over by an
    /// older backup.
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, Self::SizeExceeded { .. })
    }

    /// Short stable code used in report lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::WalkDir(_) => "ERR_IO",
            Self::Json { .. } | Self::ParseInvalid { .. } | Self::LineInvalid { .. } => {
                "ERR_PARSE_INVALID"
            }
            Self::SizeExceeded { .. } => "ERR_SIZE_EXCEEDED",
            Self::NotFound { .. } => "ERR_NOT_FOUND",
            Self::ManifestMissing { .. } => "ERR_MANIFEST_MISSING",
            Self::InvalidFileType { .. } => "ERR_INVALID_FILE_TYPE",
            Self::Decompression { .. } => "ERR_DECOMPRESSION",
            Self::UnsafePath { .. } => "ERR_MANIFEST_PATH",
            Self::ManifestIncomplete { .. } => "ERR_MANIFEST_INCOMPLETE",
            Self::PartsMissing { .. } => "ERR_ARTIFACT_PARTS_MISSING",
            Self::ShardCountMismatch { .. } => "ERR_SHARD_COUNT_MISMATCH",
            Self::AmbiguousSources { .. } => "ERR_AMBIGUOUS_SOURCES",
            Self::UnexpectedFormat { .. } => "ERR_UNEXPECTED_FORMAT",
            Self::UnsupportedSchemaVersion { .. } => "ERR_SCHEMA_VERSION",
            Self::Columnar { .. } => "ERR_BINARY_COLUMNAR",
            Self::Assembly { .. } => "ERR_ASSEMBLY",
        }
    }
}

fn format_missing_indexes(indexes: &[usize]) -> String {
    if indexes.is_empty() {
        return String::new();
    }
    let listed: Vec<String> = indexes.iter().map(|idx| format!("{idx:05}")).collect();
    format!(" (indexes {})", listed.join(", "))
}

impl From<serde_json::Error> for ArtifactError {
    fn from(err: serde_json::Error) -> Self {
        // Artifact rows carry repository paths and source snippets; keep string values out of
        // error messages that end up in reports and logs.
        let message = sanitize_json_error_message(&err.to_string());
        Self::Json { message }
    }
}

/// Replace each double-quoted value in a serde_json message with `<redacted>`.
///
/// Backtick-quoted field names and the trailing `at line L column C` are kept.
pub(crate) fn sanitize_json_error_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut chars = message.chars();
    while let Some(c) = chars.next() {
        out.push(c);
        if c != '"' {
            continue;
        }
        let mut escaped = false;
        let mut closed = false;
        for inner in chars.by_ref() {
            match inner {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => {
                    closed = true;
                    break;
                }
                _ => escaped = false,
            }
        }
        out.push_str("<redacted>");
        if closed {
            out.push('"');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_does_not_echo_string_values() {
        let secret = "src/internal/credentials.rs";
        let err = serde_json::from_value::<u64>(serde_json::json!(secret))
            .expect_err("expected type error");

        let message = ArtifactError::from(err).to_string();
        assert!(
            !message.contains(secret),
            "expected json message to omit string values: {message}"
        );
        assert!(message.contains("<redacted>"), "{message}");
    }

    #[test]
    fn sanitizer_keeps_field_names_and_positions() {
        assert_eq!(
            sanitize_json_error_message(
                r#"invalid type: string "src/a\"b.rs", expected u64 at line 3 column 18"#
            ),
            r#"invalid type: string "<redacted>", expected u64 at line 3 column 18"#
        );
        assert_eq!(
            sanitize_json_error_message("unknown field `chunkUid`, expected `id` at line 1 column 12"),
            "unknown field `chunkUid`, expected `id` at line 1 column 12"
        );
        assert_eq!(
            sanitize_json_error_message(r#"trailing "unterminated"#),
            r#"trailing "<redacted>"#
        );
    }

    #[test]
    fn size_exceeded_stops_fallback() {
        let err = ArtifactError::SizeExceeded {
            path: PathBuf::from("chunk_meta.json"),
            size: 10,
            max_bytes: 1,
        };
        assert!(!err.allows_fallback());
        assert!(!err.is_not_found());

        let missing = ArtifactError::NotFound {
            path: PathBuf::from("chunk_meta.json"),
        };
        assert!(missing.allows_fallback());
        assert!(missing.is_not_found());
    }

    #[test]
    fn parts_missing_lists_gaps() {
        let err = ArtifactError::PartsMissing {
            name: "chunk_meta".to_string(),
            missing_indexes: vec![1, 3],
        };
        assert_eq!(
            err.to_string(),
            "chunk_meta shard parts missing (indexes 00001, 00003)"
        );
        assert_eq!(err.code(), "ERR_ARTIFACT_PARTS_MISSING");
    }
}
