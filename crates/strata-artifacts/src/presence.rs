//! Map an artifact name to the files that realize it.
//!
//! Resolution consults the pieces manifest first. Without a manifest, or in non-strict mode
//! when the manifest does not mention the artifact, canonical legacy file names are probed.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde_json::Value;
use walkdir::WalkDir;

use crate::codec::Compression;
use crate::columnar::{
    inflate_columnar_rows, is_columnar_envelope, read_binary_columnar_meta,
    read_binary_columnar_rows, ColumnarSidecars,
};
use crate::error::{ArtifactError, Result};
use crate::kind::{ArtifactKind, PieceName, PieceRole};
use crate::manifest::{index_pieces, Manifest, ManifestPiece, PieceFormat};
use crate::path::RelativeSafePath;
use crate::reader::{any_candidate_exists, read_json_value, read_jsonl_values};
use crate::shards::{load_jsonl_rows, probe_paths_empty, Emptiness, ShardMeta};
use crate::util::{exists, DEFAULT_MAX_JSON_BYTES};

/// Physical realization of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceFormat {
    Json,
    Jsonl,
    Sharded,
    BinaryColumnar,
    Missing,
}

impl PresenceFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Sharded => "sharded",
            Self::BinaryColumnar => "binary-columnar",
            Self::Missing => "missing",
        }
    }
}

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceSource {
    Manifest,
    Legacy,
    None,
}

#[derive(Debug)]
pub struct Presence {
    pub name: String,
    pub format: PresenceFormat,
    pub source: PresenceSource,
    /// Data files in logical row order.
    pub paths: Vec<PathBuf>,
    pub meta_path: Option<PathBuf>,
    pub meta: Option<ShardMeta>,
    /// The meta sidecar as read, for schema checks.
    pub meta_raw: Option<Value>,
    /// Declared paths that do not exist on disk.
    pub missing_paths: Vec<PathBuf>,
    pub missing_meta: bool,
    /// Binary-columnar sidecars, when the artifact also has (or only has) that form.
    pub columnar: Option<ColumnarSidecars>,
    /// Resolution failure. Severity is left to the caller.
    pub error: Option<ArtifactError>,
}

impl Presence {
    fn missing(name: &str, source: PresenceSource) -> Self {
        Self {
            name: name.to_string(),
            format: PresenceFormat::Missing,
            source,
            paths: Vec::new(),
            meta_path: None,
            meta: None,
            meta_raw: None,
            missing_paths: Vec::new(),
            missing_meta: false,
            columnar: None,
            error: None,
        }
    }

    fn with_format(name: &str, source: PresenceSource, format: PresenceFormat) -> Self {
        Self {
            format,
            ..Self::missing(name, source)
        }
    }

    pub fn is_missing(&self) -> bool {
        self.format == PresenceFormat::Missing
    }

    /// Present and resolved without error.
    pub fn is_usable(&self) -> bool {
        !self.is_missing() && self.error.is_none()
    }

    /// Load the artifact's rows in logical order.
    pub fn load_rows(&self, max_bytes: u64) -> Result<Vec<Value>> {
        if let Some(err) = &self.error {
            return Err(ArtifactError::UnexpectedFormat {
                name: self.name.clone(),
                format: format!("unresolved ({err})"),
            });
        }
        match self.format {
            PresenceFormat::Missing => Err(ArtifactError::NotFound {
                path: PathBuf::from(&self.name),
            }),
            PresenceFormat::BinaryColumnar => match &self.columnar {
                Some(sidecars) => read_binary_columnar_rows(&self.name, sidecars, max_bytes),
                None => Err(ArtifactError::columnar(&self.name, "sidecars not resolved")),
            },
            PresenceFormat::Jsonl => match self.paths.as_slice() {
                [single] => read_jsonl_values(single, max_bytes),
                paths => load_jsonl_rows(&self.name, paths, self.meta.as_ref(), max_bytes),
            },
            PresenceFormat::Sharded => {
                load_jsonl_rows(&self.name, &self.paths, self.meta.as_ref(), max_bytes)
            }
            PresenceFormat::Json => match self.load_document(max_bytes)? {
                Value::Array(rows) => Ok(rows),
                value if is_columnar_envelope(&value) => inflate_columnar_rows(&self.name, &value),
                _ => Err(ArtifactError::UnexpectedFormat {
                    name: self.name.clone(),
                    format: "json object where rows were expected".to_string(),
                }),
            },
        }
    }

    /// Load a single-document artifact.
    pub fn load_document(&self, max_bytes: u64) -> Result<Value> {
        if self.format != PresenceFormat::Json {
            return Err(ArtifactError::UnexpectedFormat {
                name: self.name.clone(),
                format: self.format.as_str().to_string(),
            });
        }
        match self.paths.as_slice() {
            [single] => read_json_value(single, max_bytes),
            [] => Err(ArtifactError::NotFound {
                path: PathBuf::from(&self.name),
            }),
            _ => Err(ArtifactError::AmbiguousSources {
                name: self.name.clone(),
            }),
        }
    }

    /// Cheap "does this artifact hold any rows" check.
    ///
    /// A missing artifact is empty.
    pub fn probe_empty(&self, budget: u64) -> Emptiness {
        match self.format {
            PresenceFormat::Missing => Emptiness::Empty,
            PresenceFormat::BinaryColumnar => {
                let Some(sidecars) = &self.columnar else {
                    return Emptiness::Unknown;
                };
                match read_binary_columnar_meta(&self.name, sidecars, DEFAULT_MAX_JSON_BYTES) {
                    Ok(meta) if meta.count == 0 => Emptiness::Empty,
                    Ok(_) => Emptiness::NonEmpty,
                    Err(_) => Emptiness::Unknown,
                }
            }
            PresenceFormat::Json => {
                let existing: Vec<PathBuf> = self
                    .paths
                    .iter()
                    .filter_map(|path| first_existing_candidate(path))
                    .collect();
                if existing.is_empty() {
                    return Emptiness::Unknown;
                }
                probe_paths_empty(&existing, None, budget)
            }
            PresenceFormat::Jsonl | PresenceFormat::Sharded => {
                let existing: Vec<PathBuf> = self
                    .paths
                    .iter()
                    .filter_map(|path| first_existing_candidate(path))
                    .collect();
                if existing.len() != self.paths.len() && self.meta.is_none() {
                    return Emptiness::Unknown;
                }
                probe_paths_empty(&existing, self.meta.as_ref(), budget)
            }
        }
    }

    /// Declared meta schema version that this crate does not support.
    pub fn unsupported_meta_version(&self) -> Option<String> {
        self.meta.as_ref()?.unsupported_schema_version()
    }
}

fn first_existing_candidate(path: &Path) -> Option<PathBuf> {
    crate::reader::candidate_paths(path)
        .into_iter()
        .find(|candidate| exists(candidate))
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub strict: bool,
    pub max_bytes: u64,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            strict: true,
            max_bytes: DEFAULT_MAX_JSON_BYTES,
        }
    }
}

/// Resolve `name` under `dir`.
///
/// Missing files are recorded on the result rather than returned as errors.
pub fn resolve_presence(
    dir: &Path,
    manifest: Option<&Manifest>,
    name: &str,
    opts: ResolveOptions,
) -> Presence {
    if let Some(manifest) = manifest {
        let presence = resolve_from_manifest(dir, manifest, name, opts);
        if !presence.is_missing() || presence.error.is_some() || opts.strict {
            return presence;
        }
        tracing::debug!(
            target: "strata.manifest",
            dir = %dir.display(),
            name,
            "artifact missing from manifest; probing legacy paths"
        );
    }
    resolve_legacy(dir, name, opts)
}

fn effective_format(piece: &ManifestPiece) -> PieceFormat {
    match piece.format() {
        PieceFormat::Unknown => {
            let path = piece.raw_path();
            if path.ends_with(".jsonl") || path.ends_with(".jsonl.gz") || path.ends_with(".jsonl.zst")
            {
                PieceFormat::Jsonl
            } else {
                PieceFormat::Json
            }
        }
        known => known,
    }
}

fn strip_compression(path: &str) -> &str {
    path.strip_suffix(".gz")
        .or_else(|| path.strip_suffix(".zst"))
        .unwrap_or(path)
}

/// Uncompressed first, then zstd, then gzip.
fn compression_rank(path: &str) -> u8 {
    match Compression::from_path(Path::new(path)) {
        Compression::None => 0,
        Compression::Zstd => 1,
        Compression::Gzip => 2,
    }
}

struct ManifestResolver<'a> {
    dir: &'a Path,
    name: &'a str,
    opts: ResolveOptions,
}

impl ManifestResolver<'_> {
    /// Validate a manifest path. `Ok(None)` means "skip this entry".
    fn safe_path(&self, raw: &str) -> Result<Option<PathBuf>> {
        match RelativeSafePath::new(raw) {
            Ok(safe) => Ok(Some(safe.resolve(self.dir))),
            Err(reason) if self.opts.strict => Err(ArtifactError::UnsafePath {
                path: raw.to_string(),
                reason,
            }),
            Err(reason) => {
                tracing::warn!(
                    target: "strata.manifest",
                    name = self.name,
                    path = raw,
                    %reason,
                    "skipping unsafe manifest path"
                );
                Ok(None)
            }
        }
    }

    fn named_path(&self, entries: Option<&Vec<&ManifestPiece>>) -> Result<Option<PathBuf>> {
        let Some(entry) = entries.and_then(|entries| entries.first()) else {
            return Ok(None);
        };
        self.safe_path(entry.raw_path())
    }
}

fn resolve_from_manifest(
    dir: &Path,
    manifest: &Manifest,
    name: &str,
    opts: ResolveOptions,
) -> Presence {
    let mut presence = Presence::missing(name, PresenceSource::Manifest);
    if let Err(err) = fill_from_manifest(&mut presence, dir, manifest, name, opts) {
        presence.error = Some(err);
    }
    presence
}

fn fill_from_manifest(
    presence: &mut Presence,
    dir: &Path,
    manifest: &Manifest,
    name: &str,
    opts: ResolveOptions,
) -> Result<()> {
    let index = index_pieces(manifest);
    let resolver = ManifestResolver { dir, name, opts };
    let entries: Vec<&ManifestPiece> = index.get(name).cloned().unwrap_or_default();
    let (columnar_entries, row_entries): (Vec<&ManifestPiece>, Vec<&ManifestPiece>) = entries
        .into_iter()
        .partition(|piece| piece.format() == PieceFormat::BinaryColumnar);

    if let Some(kind) = ArtifactKind::from_name(name) {
        let sidecar = |role| index.get(PieceName::render(kind, role).as_str());
        let meta_entries = sidecar(PieceRole::ColumnarMeta);
        if !columnar_entries.is_empty() || meta_entries.is_some() {
            if let Some(meta) = resolver.named_path(meta_entries)? {
                let data = match columnar_entries.first() {
                    Some(entry) => resolver.safe_path(entry.raw_path())?,
                    None => None,
                };
                let sidecars = ColumnarSidecars {
                    meta,
                    data,
                    offsets: resolver.named_path(sidecar(PieceRole::ColumnarOffsets))?,
                    lengths: resolver.named_path(sidecar(PieceRole::ColumnarLengths))?,
                };
                for path in [Some(&sidecars.meta), sidecars.data.as_ref()]
                    .into_iter()
                    .chain([sidecars.offsets.as_ref(), sidecars.lengths.as_ref()])
                    .flatten()
                {
                    if !any_candidate_exists(path) {
                        presence.missing_paths.push(path.clone());
                    }
                }
                presence.columnar = Some(sidecars);
                presence.format = PresenceFormat::BinaryColumnar;
            }
        }
    }

    let meta_name = format!("{name}_meta");
    if let Some(meta_path) = resolver.named_path(index.get(meta_name.as_str()))? {
        presence.meta_path = Some(meta_path.clone());
        match read_json_value(&meta_path, opts.max_bytes) {
            Ok(raw) => {
                let meta = ShardMeta::from_value(&meta_path, raw.clone())?;
                presence.meta_raw = Some(raw);
                presence.meta = Some(meta);
            }
            Err(err) if err.is_not_found() => presence.missing_meta = true,
            Err(err) => return Err(err),
        }
    }

    if let Some(meta) = presence.meta.as_ref().filter(|meta| !meta.parts.is_empty()) {
        let declared: BTreeSet<&str> = row_entries.iter().map(|piece| piece.raw_path()).collect();
        if opts.strict {
            let missing: Vec<String> = meta
                .part_paths()
                .filter(|part| !declared.contains(part))
                .map(str::to_string)
                .collect();
            if !missing.is_empty() {
                return Err(ArtifactError::ManifestIncomplete {
                    name: name.to_string(),
                    missing,
                });
            }
        }
        let mut paths = Vec::with_capacity(meta.parts.len());
        for part in meta.part_paths() {
            if let Some(path) = resolver.safe_path(part)? {
                paths.push(path);
            }
        }
        presence.format = PresenceFormat::Sharded;
        set_paths(presence, paths, false);
        return Ok(());
    }
    if opts.strict
        && presence
            .meta
            .as_ref()
            .is_some_and(|meta| meta.is_sharded_format())
    {
        return Err(ArtifactError::UnexpectedFormat {
            name: name.to_string(),
            format: "sharded meta without parts".to_string(),
        });
    }

    if row_entries.is_empty() {
        return Ok(());
    }

    let (jsonl, json): (Vec<&ManifestPiece>, Vec<&ManifestPiece>) = row_entries
        .into_iter()
        .partition(|piece| effective_format(piece) == PieceFormat::Jsonl);
    if !jsonl.is_empty() {
        let mut paths = Vec::with_capacity(jsonl.len());
        for piece in &jsonl {
            if let Some(path) = resolver.safe_path(piece.raw_path())? {
                paths.push(path);
            }
        }
        presence.format = if paths.len() > 1 || presence.meta.is_some() {
            PresenceFormat::Sharded
        } else {
            PresenceFormat::Jsonl
        };
        set_paths(presence, paths, false);
        return Ok(());
    }

    let mut selected = json;
    if selected.len() > 1 && opts.strict {
        let bases: BTreeSet<&str> = selected
            .iter()
            .map(|piece| strip_compression(piece.raw_path()))
            .collect();
        if bases.len() != 1 {
            return Err(ArtifactError::AmbiguousSources {
                name: name.to_string(),
            });
        }
        selected.sort_by_key(|piece| (compression_rank(piece.raw_path()), piece.raw_path()));
        selected.truncate(1);
    }
    let mut paths = Vec::with_capacity(selected.len());
    for piece in &selected {
        if let Some(path) = resolver.safe_path(piece.raw_path())? {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Ok(());
    }
    presence.format = PresenceFormat::Json;
    set_paths(presence, paths, true);
    Ok(())
}

fn set_paths(presence: &mut Presence, paths: Vec<PathBuf>, allow_fallback: bool) {
    for path in &paths {
        let found = if allow_fallback {
            any_candidate_exists(path)
        } else {
            exists(path)
        };
        if !found {
            presence.missing_paths.push(path.clone());
        }
    }
    presence.paths = paths;
}

const PART_EXTENSIONS: &[&str] = &[
    ".jsonl",
    ".jsonl.gz",
    ".jsonl.zst",
    ".json",
    ".json.gz",
    ".json.zst",
];

/// List `<stem>.part-*` files directly inside `parts_dir`, sorted by name.
pub fn list_part_files(parts_dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
    if !parts_dir.is_dir() {
        return Ok(Vec::new());
    }
    let prefix = format!("{stem}.part-");
    let mut parts = Vec::new();
    for entry in WalkDir::new(parts_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        if file_name.starts_with(&prefix) && PART_EXTENSIONS.iter().any(|ext| file_name.ends_with(ext))
        {
            parts.push(entry.into_path());
        }
    }
    Ok(parts)
}

fn resolve_legacy(dir: &Path, name: &str, opts: ResolveOptions) -> Presence {
    let mut presence = Presence::missing(name, PresenceSource::Legacy);
    if let Err(err) = fill_legacy(&mut presence, dir, name, opts) {
        presence.error = Some(err);
    }
    if presence.is_missing() && presence.error.is_none() {
        presence.source = PresenceSource::None;
    }
    presence
}

fn fill_legacy(presence: &mut Presence, dir: &Path, name: &str, opts: ResolveOptions) -> Result<()> {
    let stem = ArtifactKind::from_name(name)
        .map(ArtifactKind::legacy_stem)
        .unwrap_or(name);

    let columnar = ColumnarSidecars::legacy(dir, stem);
    if any_candidate_exists(&columnar.meta) {
        presence.columnar = Some(columnar);
        presence.format = PresenceFormat::BinaryColumnar;
    }

    let meta_path = dir.join(format!("{stem}.meta.json"));
    if any_candidate_exists(&meta_path) {
        let raw = read_json_value(&meta_path, opts.max_bytes)?;
        let meta = ShardMeta::from_value(&meta_path, raw.clone())?;
        presence.meta_path = Some(meta_path);
        presence.meta_raw = Some(raw);
        let parts: Vec<PathBuf> = meta
            .part_paths()
            .map(|part| {
                RelativeSafePath::new(part)
                    .map(|safe| safe.resolve(dir))
                    .map_err(|reason| ArtifactError::UnsafePath {
                        path: part.to_string(),
                        reason,
                    })
            })
            .collect::<Result<_>>()?;
        presence.meta = Some(meta);
        if !parts.is_empty() {
            presence.format = PresenceFormat::Sharded;
            set_paths(presence, parts, false);
            return Ok(());
        }
    }

    for dir_suffix in ["parts", "shards"] {
        let parts = list_part_files(&dir.join(format!("{stem}.{dir_suffix}")), stem)?;
        if !parts.is_empty() {
            presence.format = PresenceFormat::Sharded;
            presence.paths = parts;
            return Ok(());
        }
    }

    let jsonl = dir.join(format!("{stem}.jsonl"));
    if any_candidate_exists(&jsonl) {
        presence.format = PresenceFormat::Jsonl;
        presence.paths = vec![jsonl];
        return Ok(());
    }
    let json = dir.join(format!("{stem}.json"));
    if any_candidate_exists(&json) {
        presence.format = PresenceFormat::Json;
        presence.paths = vec![json];
        return Ok(());
    }
    if presence.format == PresenceFormat::Missing && presence.meta_path.is_some() {
        // A meta sidecar without parts or data.
        presence.format = PresenceFormat::Sharded;
    }
    Ok(())
}

/// Memoized presence lookups for one validation invocation.
#[derive(Debug)]
pub struct PresenceCache<'a> {
    dir: &'a Path,
    manifest: Option<&'a Manifest>,
    opts: ResolveOptions,
    resolved: HashMap<String, Presence>,
}

impl<'a> PresenceCache<'a> {
    pub fn new(dir: &'a Path, manifest: Option<&'a Manifest>, opts: ResolveOptions) -> Self {
        Self {
            dir,
            manifest,
            opts,
            resolved: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &'a Path {
        self.dir
    }

    pub fn manifest(&self) -> Option<&'a Manifest> {
        self.manifest
    }

    pub fn options(&self) -> ResolveOptions {
        self.opts
    }

    pub fn resolve(&mut self, name: &str) -> &Presence {
        let (dir, manifest, opts) = (self.dir, self.manifest, self.opts);
        self.resolved
            .entry(name.to_string())
            .or_insert_with(|| resolve_presence(dir, manifest, name, opts))
    }
}
