//! Sharded JSONL artifacts: the meta sidecar, the ordered part loader, the emptiness probe
//! and the byte-budgeted writer.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{encode, read_decoded_prefix, Compression};
use crate::error::{ArtifactError, Result};
use crate::kind::{ArtifactKind, PieceName, PieceRole};
use crate::manifest::{is_supported_version, ManifestPiece, SHARD_META_SCHEMA_VERSION};
use crate::reader::{read_json_file, read_jsonl_file};
use crate::util::atomic_write;

pub const SHARDED_FORMAT: &str = "jsonl-sharded";
/// Gaps listed before the check stops counting.
const MAX_REPORTED_GAPS: usize = 8;

/// `<name>.meta.json` for a sharded artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub compression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_part_records: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_part_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_max_bytes: Option<u64>,
    #[serde(default)]
    pub parts: Vec<ShardPart>,
}

/// A part listed in shard meta: either a bare path or an entry with declared totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShardPart {
    Path(String),
    Entry(ShardPartEntry),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardPartEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

impl ShardPart {
    pub fn path(&self) -> &str {
        match self {
            Self::Path(path) => path,
            Self::Entry(entry) => &entry.path,
        }
    }

    pub fn records(&self) -> Option<u64> {
        match self {
            Self::Path(_) => None,
            Self::Entry(entry) => entry.records,
        }
    }
}

impl ShardMeta {
    /// Parse a meta document, unwrapping a `{fields: {...}}` envelope.
    pub fn from_value(source: &Path, value: Value) -> Result<Self> {
        let value = match value {
            Value::Object(mut obj) if matches!(obj.get("fields"), Some(Value::Object(_))) => {
                obj.remove("fields").unwrap_or(Value::Null)
            }
            other => other,
        };
        serde_json::from_value(value).map_err(|err| ArtifactError::parse_invalid(source, &err))
    }

    /// `schemaVersion` rendered as text; numbers are accepted as well as strings.
    pub fn schema_version_string(&self) -> Option<String> {
        match self.schema_version.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The declared schema version when it is present and unsupported.
    pub fn unsupported_schema_version(&self) -> Option<String> {
        let version = self.schema_version_string()?;
        (!is_supported_version(&version, SHARD_META_SCHEMA_VERSION)).then_some(version)
    }

    pub fn part_paths(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(ShardPart::path)
    }

    pub fn is_sharded_format(&self) -> bool {
        matches!(self.format.as_deref(), Some(SHARDED_FORMAT) | Some("sharded"))
    }
}

/// Index parsed from `<anything>.part-NNNNN.jsonl[.gz|.zst]`.
pub fn part_index(path: &Path) -> Option<usize> {
    let file_name = path.file_name()?.to_str()?;
    let (_, rest) = file_name.rsplit_once(".part-")?;
    let (digits, ext) = rest.split_once('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !matches!(ext, "jsonl" | "jsonl.gz" | "jsonl.zst") {
        return None;
    }
    digits.parse().ok()
}

/// Fail when numbered JSONL parts do not cover `0..n` contiguously.
///
/// The check only applies when every path carries a part index.
pub fn check_part_gaps(name: &str, paths: &[PathBuf]) -> Result<()> {
    if paths.len() < 2 {
        return Ok(());
    }
    let mut indexes = BTreeSet::new();
    for path in paths {
        let Some(idx) = part_index(path) else {
            return Ok(());
        };
        indexes.insert(idx);
    }
    let mut missing = Vec::new();
    let mut expected = 0usize;
    for idx in indexes {
        while expected < idx && missing.len() < MAX_REPORTED_GAPS {
            missing.push(expected);
            expected += 1;
        }
        if missing.len() >= MAX_REPORTED_GAPS {
            break;
        }
        expected = idx + 1;
    }
    if missing.is_empty() {
        return Ok(());
    }
    Err(ArtifactError::PartsMissing {
        name: name.to_string(),
        missing_indexes: missing,
    })
}

fn is_json_document(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".json") || name.ends_with(".json.gz") || name.ends_with(".json.zst")
}

/// Read one part: JSONL files yield their lines, JSON files must hold an array.
pub(crate) fn read_part_rows(name: &str, path: &Path, max_bytes: u64) -> Result<Vec<Value>> {
    if !is_json_document(path) {
        return read_jsonl_file(path, max_bytes);
    }
    match read_json_file(path, max_bytes)? {
        Value::Array(rows) => Ok(rows),
        _ => Err(ArtifactError::UnexpectedFormat {
            name: name.to_string(),
            format: format!("non-array part {}", path.display()),
        }),
    }
}

/// Concatenate the rows of `paths` in the given order.
///
/// Declared per-part `records` are checked when `meta` lists as many parts as were resolved,
/// and `totalRecords` is checked against the concatenated length.
pub fn load_jsonl_rows(
    name: &str,
    paths: &[PathBuf],
    meta: Option<&ShardMeta>,
    max_bytes: u64,
) -> Result<Vec<Value>> {
    if paths.is_empty() {
        return Err(ArtifactError::PartsMissing {
            name: name.to_string(),
            missing_indexes: Vec::new(),
        });
    }
    if let Some(version) = meta.and_then(ShardMeta::unsupported_schema_version) {
        return Err(ArtifactError::UnsupportedSchemaVersion {
            name: name.to_string(),
            version,
        });
    }
    check_part_gaps(name, paths)?;

    let declared_parts = meta
        .map(|meta| meta.parts.as_slice())
        .filter(|parts| parts.len() == paths.len());
    let mut rows = Vec::new();
    for (idx, path) in paths.iter().enumerate() {
        let part_rows = read_part_rows(name, path, max_bytes)?;
        if let Some(declared) = declared_parts.and_then(|parts| parts[idx].records()) {
            if declared != part_rows.len() as u64 {
                return Err(ArtifactError::ShardCountMismatch {
                    name: format!("{name} part {idx:05}"),
                    declared,
                    found: part_rows.len() as u64,
                });
            }
        }
        rows.extend(part_rows);
    }
    if let Some(declared) = meta.and_then(|meta| meta.total_records) {
        if declared != rows.len() as u64 {
            return Err(ArtifactError::ShardCountMismatch {
                name: name.to_string(),
                declared,
                found: rows.len() as u64,
            });
        }
    }
    Ok(rows)
}

/// Answer to "does this artifact hold any rows" without a full parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emptiness {
    Empty,
    NonEmpty,
    Unknown,
}

impl Emptiness {
    fn combine(self, other: Emptiness) -> Emptiness {
        match (self, other) {
            (Self::NonEmpty, _) | (_, Self::NonEmpty) => Self::NonEmpty,
            (Self::Empty, Self::Empty) => Self::Empty,
            _ => Self::Unknown,
        }
    }
}

/// Default number of decoded bytes the probe inspects per file.
pub const DEFAULT_PROBE_BYTES: u64 = 64 * 1024;

/// Probe the files of a row artifact.
///
/// Declared totals win; otherwise each file is sniffed within `budget` decoded bytes.
pub fn probe_paths_empty(paths: &[PathBuf], meta: Option<&ShardMeta>, budget: u64) -> Emptiness {
    if let Some(total) = meta.and_then(|meta| meta.total_records) {
        return if total == 0 {
            Emptiness::Empty
        } else {
            Emptiness::NonEmpty
        };
    }
    let mut result = Emptiness::Empty;
    for path in paths {
        let probe = probe_file_empty(path, budget);
        result = result.combine(probe);
        if result == Emptiness::NonEmpty {
            break;
        }
    }
    result
}

fn probe_file_empty(path: &Path, budget: u64) -> Emptiness {
    let (bytes, complete) = match read_decoded_prefix(path, budget) {
        Ok(found) => found,
        Err(err) => {
            tracing::debug!(
                target: "strata.artifacts",
                path = %path.display(),
                error = %err,
                "emptiness probe could not read artifact"
            );
            return Emptiness::Unknown;
        }
    };
    if is_json_document(path) {
        sniff_json_array(&bytes, complete)
    } else if bytes.iter().any(|b| !b.is_ascii_whitespace()) {
        Emptiness::NonEmpty
    } else if complete {
        Emptiness::Empty
    } else {
        Emptiness::Unknown
    }
}

/// `[ ]` is empty, `[` followed by anything else is not; objects are not decided here.
pub(crate) fn sniff_json_array(bytes: &[u8], complete: bool) -> Emptiness {
    let mut rest = bytes.iter().skip_while(|b| b.is_ascii_whitespace());
    match rest.next() {
        Some(b'[') => {}
        Some(_) => return Emptiness::Unknown,
        None => {
            return if complete {
                Emptiness::Empty
            } else {
                Emptiness::Unknown
            }
        }
    }
    match rest.find(|b| !b.is_ascii_whitespace()) {
        Some(b']') => Emptiness::Empty,
        Some(_) => Emptiness::NonEmpty,
        None => Emptiness::Unknown,
    }
}

/// Limits applied by [`write_sharded_jsonl`].
#[derive(Debug, Clone, Copy)]
pub struct ShardBudget {
    pub max_part_bytes: u64,
    pub max_part_records: Option<u64>,
    pub compression: Compression,
}

impl Default for ShardBudget {
    fn default() -> Self {
        Self {
            max_part_bytes: 8 * 1024 * 1024,
            max_part_records: None,
            compression: Compression::None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShardWriteOptions {
    pub budget: ShardBudget,
    /// Stamped into the meta sidecar; callers pass it in so output stays reproducible.
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ShardWriteOutput {
    pub meta: ShardMeta,
    pub meta_path: PathBuf,
    /// Manifest entries for every part followed by the meta sidecar.
    pub pieces: Vec<ManifestPiece>,
}

pub fn parts_dir_name(kind: ArtifactKind) -> String {
    format!("{}.parts", kind.as_str())
}

pub fn meta_file_name(kind: ArtifactKind) -> String {
    format!("{}.meta.json", kind.as_str())
}

/// Write `rows` as `<name>.parts/<name>.part-NNNNN.jsonl` plus `<name>.meta.json`.
///
/// Each part stays within the byte budget unless a single row exceeds it, in which case that
/// row is written to a part of its own. Parts left over from a previous, larger write are
/// removed.
pub fn write_sharded_jsonl(
    dir: &Path,
    kind: ArtifactKind,
    rows: &[Value],
    opts: &ShardWriteOptions,
) -> Result<ShardWriteOutput> {
    let name = kind.as_str();
    let budget = opts.budget;
    let ext = budget.compression.extension().unwrap_or("");

    let mut groups: Vec<Vec<u8>> = Vec::new();
    let mut group_records: Vec<u64> = Vec::new();
    let mut current = Vec::new();
    let mut current_records = 0u64;
    for row in rows {
        let mut line = serde_json::to_vec(row)?;
        line.push(b'\n');
        let over_bytes = (current.len() + line.len()) as u64 > budget.max_part_bytes;
        let over_records = budget
            .max_part_records
            .is_some_and(|max| current_records >= max);
        if current_records > 0 && (over_bytes || over_records) {
            groups.push(std::mem::take(&mut current));
            group_records.push(current_records);
            current_records = 0;
        }
        current.extend_from_slice(&line);
        current_records += 1;
    }
    if current_records > 0 || groups.is_empty() {
        groups.push(current);
        group_records.push(current_records);
    }

    let parts_dir = dir.join(parts_dir_name(kind));
    fs::create_dir_all(&parts_dir)?;
    let mut parts = Vec::with_capacity(groups.len());
    let mut pieces = Vec::with_capacity(groups.len() + 1);
    let mut written = BTreeSet::new();
    let mut total_bytes = 0u64;
    let mut max_part_bytes = 0u64;
    for (idx, (payload, records)) in groups.iter().zip(&group_records).enumerate() {
        let file_name = format!("{name}.part-{idx:05}.jsonl{ext}");
        let bytes = encode(payload, budget.compression)?;
        atomic_write(&parts_dir.join(&file_name), &bytes)?;

        let rel = format!("{}/{file_name}", parts_dir_name(kind));
        let size = bytes.len() as u64;
        total_bytes += size;
        max_part_bytes = max_part_bytes.max(size);
        parts.push(ShardPart::Entry(ShardPartEntry {
            path: rel.clone(),
            records: Some(*records),
            bytes: Some(size),
        }));
        pieces.push(ManifestPiece {
            piece_type: Some(kind.piece_type().to_string()),
            name: Some(name.to_string()),
            format: Some("jsonl".to_string()),
            path: Some(rel),
            count: Some(*records),
            bytes: Some(size),
            checksum: None,
        });
        written.insert(file_name);
    }
    remove_stale_parts(&parts_dir, name, &written)?;

    let meta = ShardMeta {
        schema_version: Some(Value::String(SHARD_META_SCHEMA_VERSION.to_string())),
        artifact: Some(name.to_string()),
        format: Some(SHARDED_FORMAT.to_string()),
        generated_at: opts.generated_at.clone(),
        compression: budget.compression.meta_name().map(str::to_string),
        total_records: Some(rows.len() as u64),
        total_bytes: Some(total_bytes),
        max_part_records: group_records.iter().copied().max(),
        max_part_bytes: Some(max_part_bytes),
        target_max_bytes: Some(budget.max_part_bytes),
        parts,
    };
    let meta_path = dir.join(meta_file_name(kind));
    let meta_bytes = serde_json::to_vec_pretty(&meta)?;
    atomic_write(&meta_path, &meta_bytes)?;
    pieces.push(ManifestPiece {
        piece_type: Some(kind.piece_type().to_string()),
        name: Some(PieceName::render(kind, PieceRole::ShardMeta)),
        format: Some("json".to_string()),
        path: Some(meta_file_name(kind)),
        count: None,
        bytes: Some(meta_bytes.len() as u64),
        checksum: None,
    });

    tracing::debug!(
        target: "strata.artifacts",
        artifact = name,
        parts = group_records.len(),
        records = rows.len(),
        total_bytes,
        "wrote sharded artifact"
    );
    Ok(ShardWriteOutput {
        meta,
        meta_path,
        pieces,
    })
}

fn remove_stale_parts(parts_dir: &Path, name: &str, keep: &BTreeSet<String>) -> Result<()> {
    let prefix = format!("{name}.part-");
    for entry in fs::read_dir(parts_dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.starts_with(&prefix) && !keep.contains(file_name) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn part_index_parses_numbered_jsonl() {
        assert_eq!(
            part_index(Path::new("chunk_meta.parts/chunk_meta.part-00012.jsonl.gz")),
            Some(12)
        );
        assert_eq!(part_index(Path::new("chunk_meta.part-x.jsonl")), None);
        assert_eq!(part_index(Path::new("token_postings.part-00001.json")), None);
    }

    #[test]
    fn gaps_are_listed() {
        let paths: Vec<PathBuf> = [0, 2, 4]
            .iter()
            .map(|idx| PathBuf::from(format!("chunk_meta.part-{idx:05}.jsonl")))
            .collect();
        match check_part_gaps("chunk_meta", &paths).unwrap_err() {
            ArtifactError::PartsMissing {
                missing_indexes, ..
            } => assert_eq!(missing_indexes, vec![1, 3]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn shard_parts_accept_strings_and_entries() {
        let meta = ShardMeta::from_value(
            Path::new("m.json"),
            json!({
                "fields": {
                    "schemaVersion": "1.0.0",
                    "parts": ["a.jsonl", {"path": "b.jsonl", "records": 2}]
                }
            }),
        )
        .unwrap();
        assert_eq!(meta.part_paths().collect::<Vec<_>>(), vec!["a.jsonl", "b.jsonl"]);
        assert_eq!(meta.parts[1].records(), Some(2));
        assert_eq!(meta.unsupported_schema_version(), None);
    }

    #[test]
    fn json_array_sniffing() {
        assert_eq!(sniff_json_array(b"  [ \n ]", true), Emptiness::Empty);
        assert_eq!(sniff_json_array(b"[{}]", true), Emptiness::NonEmpty);
        assert_eq!(sniff_json_array(b"{\"rows\":[]}", true), Emptiness::Unknown);
        assert_eq!(sniff_json_array(b"[   ", false), Emptiness::Unknown);
    }

    #[test]
    fn record_budget_splits_parts() {
        let tmp = tempfile::tempdir().unwrap();
        let rows: Vec<Value> = (0..5).map(|id| json!({"id": id})).collect();
        let opts = ShardWriteOptions {
            budget: ShardBudget {
                max_part_bytes: u64::MAX,
                max_part_records: Some(2),
                compression: Compression::None,
            },
            generated_at: None,
        };
        let out = write_sharded_jsonl(tmp.path(), ArtifactKind::ChunkMeta, &rows, &opts).unwrap();
        let records: Vec<_> = out.meta.parts.iter().map(|p| p.records()).collect();
        assert_eq!(records, vec![Some(2), Some(2), Some(1)]);
        assert_eq!(out.pieces.last().unwrap().name(), "chunk_meta_meta");
    }
}
