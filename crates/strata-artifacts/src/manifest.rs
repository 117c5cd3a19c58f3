//! The pieces manifest: `pieces/manifest.json` and its entries.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{file_checksum, parse_checksum, ParsedChecksum};
use crate::error::{ArtifactError, Result};
use crate::kind::is_known_piece_name;
use crate::path::{RelativeSafePath, UnsafePathReason};
use crate::reader::{any_candidate_exists, read_json_value};
use crate::util::{exists, DEFAULT_MAX_JSON_BYTES};

pub const MANIFEST_DIR: &str = "pieces";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Version of the artifact surface this crate reads and writes.
pub const ARTIFACT_SURFACE_VERSION: &str = "1.0.0";
/// Version of the sharded JSONL meta sidecar.
pub const SHARD_META_SCHEMA_VERSION: &str = "1.0.0";
pub const MANIFEST_VERSION: u64 = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_surface_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default)]
    pub pieces: Vec<ManifestPiece>,
}

/// One manifest entry. Fields are optional so that malformed entries can be reported rather
/// than rejected wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPiece {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub piece_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceFormat {
    Json,
    Jsonl,
    Binary,
    BinaryColumnar,
    Dir,
    Unknown,
}

impl PieceFormat {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "json" => Self::Json,
            "jsonl" => Self::Jsonl,
            "binary" => Self::Binary,
            "binary-columnar" => Self::BinaryColumnar,
            "dir" => Self::Dir,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Binary => "binary",
            Self::BinaryColumnar => "binary-columnar",
            Self::Dir => "dir",
            Self::Unknown => "unknown",
        }
    }
}

impl ManifestPiece {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn raw_path(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }

    pub fn format(&self) -> PieceFormat {
        self.format
            .as_deref()
            .map(PieceFormat::parse)
            .unwrap_or(PieceFormat::Unknown)
    }

    pub fn safe_path(&self) -> std::result::Result<RelativeSafePath, UnsafePathReason> {
        RelativeSafePath::new(self.raw_path())
    }
}

#[derive(Debug, Clone)]
pub struct ManifestLoadOptions {
    pub strict: bool,
    pub max_bytes: u64,
    /// Extra attempts after the first when the manifest is not there yet (strict mode only).
    pub retry_attempts: u32,
    pub retry_base: Duration,
}

impl Default for ManifestLoadOptions {
    fn default() -> Self {
        Self {
            strict: true,
            max_bytes: DEFAULT_MAX_JSON_BYTES,
            retry_attempts: 3,
            retry_base: Duration::from_millis(25),
        }
    }
}

pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_DIR).join(MANIFEST_FILE)
}

/// Load the raw manifest document, unwrapping a `{fields: {...}}` envelope.
///
/// In strict mode a missing manifest is retried with linear backoff, to tolerate a build
/// pipeline that is still flushing.
pub fn load_manifest_value(dir: &Path, opts: &ManifestLoadOptions) -> Result<Value> {
    let path = manifest_path(dir);
    let retries = if opts.strict { opts.retry_attempts } else { 0 };
    let mut attempt = 0u32;
    loop {
        if any_candidate_exists(&path) {
            let raw = read_json_value(&path, opts.max_bytes)?;
            return normalize_manifest_value(&path, raw);
        }
        if attempt >= retries {
            return Err(ArtifactError::ManifestMissing {
                dir: dir.to_path_buf(),
            });
        }
        attempt += 1;
        let delay = opts.retry_base * attempt;
        tracing::debug!(
            target: "strata.manifest",
            path = %path.display(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "pieces manifest not present yet; retrying"
        );
        std::thread::sleep(delay);
    }
}

pub fn load_manifest(dir: &Path, opts: &ManifestLoadOptions) -> Result<Manifest> {
    let value = load_manifest_value(dir, opts)?;
    Manifest::from_value(&manifest_path(dir), value)
}

impl Manifest {
    pub fn from_value(source: &Path, value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|err| ArtifactError::parse_invalid(source, &err))
    }

    /// Pieces carrying exactly `name`.
    pub fn pieces_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ManifestPiece> {
        self.pieces.iter().filter(move |piece| piece.name() == name)
    }

    pub fn has_piece(&self, name: &str) -> bool {
        self.pieces_named(name).next().is_some()
    }
}

fn normalize_manifest_value(path: &Path, raw: Value) -> Result<Value> {
    let Value::Object(mut obj) = raw else {
        return Err(ArtifactError::ParseInvalid {
            path: path.to_path_buf(),
            message: "manifest must be a JSON object".to_string(),
        });
    };
    if matches!(obj.get("fields"), Some(Value::Object(_))) {
        if let Some(Value::Object(inner)) = obj.remove("fields") {
            obj = inner;
        }
    }
    if !matches!(obj.get("pieces"), Some(Value::Array(_))) {
        obj.insert("pieces".to_string(), Value::Array(Vec::new()));
    }
    Ok(Value::Object(obj))
}

/// Sum `count` across pieces named `name`; `None` when no such piece declares a count.
pub fn sum_manifest_counts(manifest: &Manifest, name: &str) -> Option<u64> {
    manifest
        .pieces_named(name)
        .filter_map(|piece| piece.count)
        .fold(None, |acc, count| Some(acc.unwrap_or(0) + count))
}

/// Group pieces by name; entries within a name are ordered by path.
pub fn index_pieces(manifest: &Manifest) -> BTreeMap<&str, Vec<&ManifestPiece>> {
    let mut map: BTreeMap<&str, Vec<&ManifestPiece>> = BTreeMap::new();
    for piece in &manifest.pieces {
        let name = piece.name();
        if name.is_empty() {
            continue;
        }
        map.entry(name).or_default().push(piece);
    }
    for entries in map.values_mut() {
        entries.sort_by(|a, b| a.raw_path().cmp(b.raw_path()));
    }
    map
}

/// Whether `version` shares its major component with `supported`.
pub fn is_supported_version(version: &str, supported: &str) -> bool {
    fn major(raw: &str) -> Option<u64> {
        raw.trim().split('.').next()?.parse().ok()
    }
    match (major(version), major(supported)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// A structural problem with one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntryIssue {
    MissingName,
    UnknownName(String),
    MissingPath { name: Option<String> },
    BackslashSeparators(String),
    UnsafePath(String),
    DuplicatePath(String),
    EscapesRoot(String),
    PathMissing(String),
}

impl fmt::Display for ManifestEntryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingName => write!(f, "manifest entry missing name"),
            Self::UnknownName(name) => {
                write!(f, "manifest entry uses unknown artifact name: {name}")
            }
            Self::MissingPath { name } => write!(
                f,
                "manifest entry missing path ({})",
                name.as_deref().unwrap_or("unknown")
            ),
            Self::BackslashSeparators(path) => {
                write!(f, "manifest path must use '/' separators: {path}")
            }
            Self::UnsafePath(path) => write!(f, "manifest path is not safe: {path}"),
            Self::DuplicatePath(path) => write!(f, "manifest path duplicated: {path}"),
            Self::EscapesRoot(path) => write!(f, "manifest path escapes index root: {path}"),
            Self::PathMissing(path) => write!(f, "manifest path missing: {path}"),
        }
    }
}

/// Check every entry's name and path against `root`.
pub fn validate_entries(
    manifest: &Manifest,
    root: &Path,
    strict_names: bool,
) -> Vec<ManifestEntryIssue> {
    let mut issues = Vec::new();
    let mut seen: HashSet<RelativeSafePath> = HashSet::new();
    let canonical_root = std::fs::canonicalize(root).ok();

    for piece in &manifest.pieces {
        let name = piece.name();
        if name.is_empty() {
            issues.push(ManifestEntryIssue::MissingName);
        } else if strict_names && !is_known_piece_name(name) {
            issues.push(ManifestEntryIssue::UnknownName(name.to_string()));
        }

        let raw = piece.raw_path();
        if raw.is_empty() {
            issues.push(ManifestEntryIssue::MissingPath {
                name: (!name.is_empty()).then(|| name.to_string()),
            });
            continue;
        }
        let safe = match RelativeSafePath::new(raw) {
            Ok(safe) => safe,
            Err(UnsafePathReason::Backslash) => {
                issues.push(ManifestEntryIssue::BackslashSeparators(raw.to_string()));
                // A backslash path is also unsafe once read with '/' separators.
                let normalized = raw.replace('\\', "/");
                if RelativeSafePath::new(&normalized).is_err() {
                    issues.push(ManifestEntryIssue::UnsafePath(raw.to_string()));
                }
                continue;
            }
            Err(_) => {
                issues.push(ManifestEntryIssue::UnsafePath(raw.to_string()));
                continue;
            }
        };
        if !seen.insert(safe.clone()) {
            issues.push(ManifestEntryIssue::DuplicatePath(raw.to_string()));
        }

        let resolved = safe.resolve(root);
        if !exists(&resolved) {
            issues.push(ManifestEntryIssue::PathMissing(raw.to_string()));
            continue;
        }
        // Symlinked directories inside the root can still point outside it.
        if let (Some(canonical_root), Ok(canonical)) =
            (canonical_root.as_ref(), std::fs::canonicalize(&resolved))
        {
            if !canonical.starts_with(canonical_root) {
                issues.push(ManifestEntryIssue::EscapesRoot(raw.to_string()));
            }
        }
    }
    issues
}

/// Result of verifying a piece's declared checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumOutcome {
    Match,
    Mismatch { expected: String, actual: String },
    Malformed,
    Unsupported { algo: String },
}

/// Verify the checksum declared by `piece` against the file at `path`.
///
/// Returns `None` when the piece declares no checksum.
pub fn verify_piece_checksum(piece: &ManifestPiece, path: &Path) -> Result<Option<ChecksumOutcome>> {
    let Some(raw) = piece.checksum.as_deref().filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    let outcome = match parse_checksum(raw) {
        ParsedChecksum::Malformed => ChecksumOutcome::Malformed,
        ParsedChecksum::Unsupported { algo } => ChecksumOutcome::Unsupported { algo },
        ParsedChecksum::Supported { algo, expected } => {
            let actual = file_checksum(path, algo)?;
            if actual == expected {
                ChecksumOutcome::Match
            } else {
                ChecksumOutcome::Mismatch { expected, actual }
            }
        }
    };
    Ok(Some(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest_from(value: Value) -> Manifest {
        Manifest::from_value(Path::new("manifest.json"), value).unwrap()
    }

    #[test]
    fn fields_envelope_is_unwrapped() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(MANIFEST_DIR)).unwrap();
        std::fs::write(
            manifest_path(tmp.path()),
            serde_json::to_vec(&json!({
                "fields": {
                    "version": 2,
                    "artifactSurfaceVersion": "1.0.0",
                    "pieces": [{"name": "chunk_meta", "path": "chunk_meta.jsonl", "format": "jsonl"}]
                }
            }))
            .unwrap(),
        )
        .unwrap();

        let manifest = load_manifest(tmp.path(), &ManifestLoadOptions::default()).unwrap();
        assert_eq!(manifest.version, Some(2));
        assert_eq!(manifest.pieces.len(), 1);
        assert_eq!(manifest.pieces[0].format(), PieceFormat::Jsonl);
    }

    #[test]
    fn missing_pieces_array_becomes_empty() {
        let value = normalize_manifest_value(Path::new("m.json"), json!({"version": 2})).unwrap();
        assert_eq!(value["pieces"], json!([]));
        assert!(normalize_manifest_value(Path::new("m.json"), json!([1])).is_err());
    }

    #[test]
    fn index_pieces_groups_and_sorts_by_path() {
        let manifest = manifest_from(json!({
            "pieces": [
                {"name": "chunk_meta", "path": "chunk_meta.parts/chunk_meta.part-00001.jsonl"},
                {"name": "chunk_meta", "path": "chunk_meta.parts/chunk_meta.part-00000.jsonl"},
                {"name": "token_postings", "path": "token_postings.json"},
                {"path": "orphan.json"}
            ]
        }));
        let index = index_pieces(&manifest);
        assert_eq!(index.len(), 2);
        let paths: Vec<_> = index["chunk_meta"].iter().map(|p| p.raw_path()).collect();
        assert_eq!(
            paths,
            vec![
                "chunk_meta.parts/chunk_meta.part-00000.jsonl",
                "chunk_meta.parts/chunk_meta.part-00001.jsonl"
            ]
        );
    }

    #[test]
    fn supported_version_compares_major() {
        assert!(is_supported_version("1.4.2", ARTIFACT_SURFACE_VERSION));
        assert!(!is_supported_version("2.0.0", ARTIFACT_SURFACE_VERSION));
        assert!(!is_supported_version("", ARTIFACT_SURFACE_VERSION));
    }

    #[test]
    fn entry_validation_reports_each_problem() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("chunk_meta.jsonl"), b"").unwrap();
        let manifest = manifest_from(json!({
            "pieces": [
                {"name": "chunk_meta", "path": "chunk_meta.jsonl"},
                {"name": "chunk_meta", "path": "./chunk_meta.jsonl"},
                {"path": "x.json"},
                {"name": "mystery", "path": "../up.json"},
                {"name": "repo_map"},
                {"name": "file_meta", "path": "dir\\file_meta.json"},
                {"name": "filter_index", "path": "filter_index.json"}
            ]
        }));
        let messages: Vec<String> = validate_entries(&manifest, tmp.path(), true)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            messages,
            vec![
                "manifest path duplicated: ./chunk_meta.jsonl",
                "manifest entry missing name",
                "manifest path missing: x.json",
                "manifest entry uses unknown artifact name: mystery",
                "manifest path is not safe: ../up.json",
                "manifest entry missing path (repo_map)",
                "manifest path must use '/' separators: dir\\file_meta.json",
                "manifest path missing: filter_index.json",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("file_meta.json"), b"[]").unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("linked")).unwrap();

        let manifest = manifest_from(json!({
            "pieces": [{"name": "file_meta", "path": "linked/file_meta.json"}]
        }));
        assert_eq!(
            validate_entries(&manifest, tmp.path(), true),
            vec![ManifestEntryIssue::EscapesRoot("linked/file_meta.json".to_string())]
        );
    }
}
