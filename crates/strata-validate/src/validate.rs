//! Per-mode validation run.
//!
//! Checks execute in a fixed order. Later checks consume state from earlier ones: the chunk
//! count bounds every posting list and the chunkUid set feeds the risk checks. A failed check
//! halts only itself; independent checks still run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value};
use strata_artifacts::chunk_meta::ChunkMetaLoad;
use strata_artifacts::manifest::{
    is_supported_version, load_manifest_value, manifest_path, validate_entries, verify_piece_checksum,
    ChecksumOutcome, ManifestEntryIssue, ARTIFACT_SURFACE_VERSION,
};
use strata_artifacts::{
    load_chunk_meta, ArtifactError, ArtifactKind, Manifest, ManifestLoadOptions, Presence,
    PresenceCache, PresenceFormat, RelativeSafePath, ResolveOptions,
};
use strata_config::{PostingsConfig, SqliteConfig, StrataConfig};

use crate::error::{Result, ValidateError};
use crate::referential::{
    array_len, chunk_id_issue, chunk_identity_issues, dense_dims_issue, file_meta_issues,
    id_posting_issues, length_mismatch, meta_v2_drift_issues, meta_v2_issues, pair_posting_issues,
    repo_map_collision,
};
use crate::report::{
    Report, COLLISION_HINT, REBUILD_EMBEDDINGS_HINT, REBUILD_HINT, REFRESH_HINT,
};
use crate::risk::{risk_issues, RiskConfig, RiskInputs, RiskStats};
use crate::schema::{self, format_schema_issue, Payload};
use crate::sqlite::check_sqlite_parity;

const MANIFEST_MISSING: &str = "pieces/manifest.json missing";
const MANIFEST_INVALID: &str = "pieces/manifest.json invalid";

const STRICT_REQUIRED: [ArtifactKind; 2] = [ArtifactKind::IndexState, ArtifactKind::Filelists];

const OPTIONAL: [ArtifactKind; 11] = [
    ArtifactKind::MinhashSignatures,
    ArtifactKind::FileRelations,
    ArtifactKind::GraphRelations,
    ArtifactKind::FileMeta,
    ArtifactKind::RepoMap,
    ArtifactKind::FilterIndex,
    ArtifactKind::FieldPostings,
    ArtifactKind::FieldTokens,
    ArtifactKind::DenseVectors,
    ArtifactKind::DenseVectorsDoc,
    ArtifactKind::DenseVectorsCode,
];

const DENSE: [ArtifactKind; 3] = [
    ArtifactKind::DenseVectors,
    ArtifactKind::DenseVectorsDoc,
    ArtifactKind::DenseVectorsCode,
];

/// Everything one validation run needs to know.
#[derive(Debug, Clone)]
pub struct ValidateOptions {
    /// Repository root.
    pub root: PathBuf,
    /// Directory holding `index-<mode>` directories; the root when unset.
    pub index_root: Option<PathBuf>,
    pub modes: Vec<String>,
    pub strict: bool,
    pub max_json_bytes: u64,
    pub sample_meta_v2: usize,
    pub manifest_retry_attempts: u32,
    pub manifest_retry_base: Duration,
    pub postings: PostingsConfig,
    pub sqlite: SqliteConfig,
}

impl ValidateOptions {
    pub fn from_config(root: impl Into<PathBuf>, config: &StrataConfig) -> Self {
        let validate = &config.validate;
        Self {
            root: root.into(),
            index_root: validate.index_root.clone(),
            modes: validate.effective_modes(),
            strict: validate.strict,
            max_json_bytes: validate.max_json_bytes,
            sample_meta_v2: validate.sample_meta_v2,
            manifest_retry_attempts: validate.manifest_retry_attempts,
            manifest_retry_base: Duration::from_millis(validate.manifest_retry_base_ms),
            postings: config.postings.clone(),
            sqlite: config.sqlite.clone(),
        }
    }

    /// Options from an optional TOML config file; defaults when `config_path` is `None`.
    pub fn load(root: impl Into<PathBuf>, config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => StrataConfig::load_from_path(path)?,
            None => StrataConfig::default(),
        };
        Ok(Self::from_config(root, &config))
    }

    /// The resolved index root. A relative configured root is taken from the repo root.
    pub fn resolved_index_root(&self) -> PathBuf {
        match &self.index_root {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.root.join(path),
            None => self.root.clone(),
        }
    }

    pub fn index_dir(&self, mode: &str) -> PathBuf {
        self.resolved_index_root().join(format!("index-{mode}"))
    }

    fn required(&self) -> Vec<ArtifactKind> {
        let mut required = vec![ArtifactKind::ChunkMeta, ArtifactKind::TokenPostings];
        if self.postings.phrase_ngrams {
            required.push(ArtifactKind::PhraseNgrams);
        }
        if self.postings.chargrams {
            required.push(ArtifactKind::ChargramPostings);
        }
        if self.strict {
            required.extend(STRICT_REQUIRED);
        }
        required
    }

    fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            strict: self.strict,
            max_bytes: self.max_json_bytes,
        }
    }

    fn manifest_options(&self) -> ManifestLoadOptions {
        ManifestLoadOptions {
            strict: self.strict,
            max_bytes: self.max_json_bytes,
            retry_attempts: self.manifest_retry_attempts,
            retry_base: self.manifest_retry_base,
        }
    }
}

/// Check `payload` against the registered schema for `name` and report any violation.
///
/// In strict mode an unregistered name is itself an issue. Returns whether the payload passed.
pub fn validate_schema(
    report: &mut Report,
    mode: &str,
    name: &str,
    payload: Payload<'_>,
    hint: &str,
    strict: bool,
) -> bool {
    if strict && !schema::is_registered(name) {
        report.add_issue(Some(mode), format_args!("unknown artifact schema: {name}"), Some(hint));
        return false;
    }
    match schema::check(name, payload) {
        Ok(()) => true,
        Err(errors) => {
            report.add_issue(Some(mode), format_schema_issue(name, &errors), Some(hint));
            false
        }
    }
}

/// Load `chunk_meta` (with `file_meta` and `index_state`) and run the row-level checks.
///
/// Returns `None` when the rows could not be loaded; the failure is already on the report.
pub fn load_and_validate_chunk_meta(
    report: &mut Report,
    mode: &str,
    cache: &mut PresenceCache<'_>,
    max_bytes: u64,
    strict: bool,
) -> Option<ChunkMetaLoad> {
    let load = match load_chunk_meta(cache, max_bytes) {
        Ok(load) => load,
        Err(err) => {
            tracing::debug!(target: "strata.validate", mode, error = %err, "chunk_meta load failed");
            report.add_issue(
                Some(mode),
                format_args!("chunk_meta load failed ({})", err.code()),
                Some(REBUILD_HINT),
            );
            report.mark_failed(mode);
            return None;
        }
    };
    for warning in &load.warnings {
        report.mode_warning(mode, warning);
    }
    let rows = load.chunk_meta.as_slice();
    validate_schema(report, mode, "chunk_meta", Payload::Rows(rows), REBUILD_HINT, strict);
    if let Some(issue) = chunk_id_issue(rows) {
        report.fail_mode(mode, issue, Some(REBUILD_HINT));
    }
    for issue in meta_v2_issues(rows) {
        report.add_issue(Some(mode), issue, Some(REBUILD_HINT));
    }
    Some(load)
}

/// Validate every configured mode and merge the results in mode order.
pub fn validate_index_artifacts(opts: &ValidateOptions) -> Result<Report> {
    if !opts.root.is_dir() {
        return Err(ValidateError::RootMissing(opts.root.clone()));
    }
    let mut report = Report::new(opts.root.clone(), opts.index_root.clone(), opts.strict);
    for mode in &opts.modes {
        report.merge(validate_mode(opts, mode));
    }
    report.finalize();
    Ok(report)
}

/// Validate one mode's index directory into a fresh report.
pub fn validate_mode(opts: &ValidateOptions, mode: &str) -> Report {
    let dir = opts.index_dir(mode);
    let mut run = ModeRun {
        opts,
        mode,
        dir: &dir,
        report: Report::new(opts.root.clone(), opts.index_root.clone(), opts.strict),
    };
    run.report.mode_mut(mode).path = dir.clone();
    tracing::debug!(target: "strata.validate", mode, dir = %dir.display(), "validating mode");

    let manifest = run.check_manifest();
    let mut cache = PresenceCache::new(&dir, manifest.as_ref(), opts.resolve_options());
    for kind in opts.required() {
        run.check_presence(&mut cache, kind.as_str(), true);
    }
    for kind in OPTIONAL {
        run.check_presence(&mut cache, kind.as_str(), false);
    }
    run.check_artifacts(&mut cache);

    let mut report = run.report;
    report.finalize();
    tracing::info!(
        target: "strata.validate",
        mode,
        ok = report.ok,
        issues = report.issues.len(),
        warnings = report.warnings.len(),
        "mode validated"
    );
    report
}

/// Unwrap `{fields: {...}}` and lift `{arrays: {...}}` columns to the top level.
pub fn normalize_document(value: Value) -> Value {
    let mut value = match value {
        Value::Object(mut map) if matches!(map.get("fields"), Some(Value::Object(_))) => {
            map.remove("fields").unwrap_or(Value::Null)
        }
        other => other,
    };
    if let Value::Object(map) = &mut value {
        if let Some(Value::Object(arrays)) = map.remove("arrays") {
            for (key, column) in arrays {
                map.entry(key).or_insert(column);
            }
        }
    }
    value
}

/// Concatenate sharded `token_postings` rows into one document.
fn concat_postings_rows(rows: Vec<Value>) -> Value {
    let mut vocab = Vec::new();
    let mut postings = Vec::new();
    let mut doc_lengths = Vec::new();
    for row in rows {
        let Value::Object(mut row) = normalize_document(row) else {
            continue;
        };
        for (key, dest) in [
            ("vocab", &mut vocab),
            ("postings", &mut postings),
            ("docLengths", &mut doc_lengths),
        ] {
            if let Some(Value::Array(items)) = row.remove(key) {
                dest.extend(items);
            }
        }
    }
    let mut doc = Map::new();
    doc.insert("vocab".to_string(), Value::Array(vocab));
    doc.insert("postings".to_string(), Value::Array(postings));
    doc.insert("docLengths".to_string(), Value::Array(doc_lengths));
    Value::Object(doc)
}

fn array_slice<'v>(doc: &'v Value, key: &str) -> &'v [Value] {
    doc.get(key).and_then(Value::as_array).map_or(&[], Vec::as_slice)
}

struct ModeRun<'a> {
    opts: &'a ValidateOptions,
    mode: &'a str,
    dir: &'a Path,
    report: Report,
}

impl ModeRun<'_> {
    fn issue(&mut self, message: impl std::fmt::Display, hint: Option<&str>) {
        self.report.add_issue(Some(self.mode), message, hint);
    }

    fn schema(&mut self, name: &str, payload: Payload<'_>, hint: &str) -> bool {
        validate_schema(&mut self.report, self.mode, name, payload, hint, self.opts.strict)
    }

    fn check_manifest(&mut self) -> Option<Manifest> {
        let strict = self.opts.strict;
        let raw = match load_manifest_value(self.dir, &self.opts.manifest_options()) {
            Ok(raw) => raw,
            Err(ArtifactError::ManifestMissing { .. }) => {
                if strict {
                    self.report.fail_mode(self.mode, MANIFEST_MISSING, None);
                } else {
                    self.report.mode_warning(self.mode, MANIFEST_MISSING);
                }
                return None;
            }
            Err(err) => {
                tracing::debug!(target: "strata.validate", mode = self.mode, error = %err, "manifest unreadable");
                self.report
                    .fail_mode(self.mode, MANIFEST_INVALID, strict.then_some(REBUILD_HINT));
                return None;
            }
        };
        self.schema("pieces_manifest", Payload::Document(&raw), REBUILD_HINT);
        let manifest = match Manifest::from_value(&manifest_path(self.dir), raw) {
            Ok(manifest) => manifest,
            Err(_) => {
                self.report
                    .fail_mode(self.mode, MANIFEST_INVALID, strict.then_some(REBUILD_HINT));
                return None;
            }
        };

        if strict {
            let supported = manifest
                .artifact_surface_version
                .as_deref()
                .is_some_and(|version| is_supported_version(version, ARTIFACT_SURFACE_VERSION));
            if !supported {
                self.issue(
                    format_args!(
                        "artifactSurfaceVersion unsupported: {}",
                        manifest.artifact_surface_version.as_deref().unwrap_or("missing")
                    ),
                    Some(REBUILD_HINT),
                );
            }
            for entry_issue in validate_entries(&manifest, self.dir, true) {
                if matches!(entry_issue, ManifestEntryIssue::DuplicatePath(_)) {
                    self.report.fail_mode(self.mode, entry_issue, Some(REBUILD_HINT));
                } else {
                    self.issue(entry_issue, Some(REBUILD_HINT));
                }
            }
        }
        self.check_pieces(&manifest);
        Some(manifest)
    }

    fn check_pieces(&mut self, manifest: &Manifest) {
        for piece in &manifest.pieces {
            let raw = piece.raw_path();
            if raw.is_empty() {
                continue;
            }
            // Unsafe paths are reported by the entry checks and never touched.
            let Ok(safe) = RelativeSafePath::new(raw) else {
                continue;
            };
            let path = safe.resolve(self.dir);
            if !path.exists() {
                self.report
                    .fail_mode(self.mode, format_args!("piece missing: {raw}"), None);
                continue;
            }
            match verify_piece_checksum(piece, &path) {
                Ok(None) | Ok(Some(ChecksumOutcome::Match)) => {}
                Ok(Some(ChecksumOutcome::Malformed)) => {
                    self.report
                        .mode_warning(self.mode, format_args!("piece checksum invalid: {raw}"));
                }
                Ok(Some(ChecksumOutcome::Unsupported { .. })) => {
                    self.report
                        .mode_warning(self.mode, format_args!("piece checksum unsupported: {raw}"));
                }
                Ok(Some(ChecksumOutcome::Mismatch { .. })) => {
                    self.report.fail_mode(
                        self.mode,
                        format_args!("piece checksum mismatch: {raw}"),
                        Some(REFRESH_HINT),
                    );
                }
                Err(err) => {
                    self.issue(
                        format_args!("piece unreadable: {raw} ({})", err.code()),
                        Some(REFRESH_HINT),
                    );
                }
            }
        }
    }

    fn check_presence(&mut self, cache: &mut PresenceCache<'_>, name: &str, required: bool) {
        let presence = cache.resolve(name);
        if let Some(err) = &presence.error {
            self.issue(format_args!("manifest entry invalid for {name}: {err}"), None);
            self.report.mark_failed(self.mode);
            return;
        }
        if presence.is_missing() {
            if required {
                self.report.missing_artifact(self.mode, name);
            } else {
                self.report.optional_missing(self.mode, name);
            }
            return;
        }
        if presence.missing_meta {
            self.issue(format_args!("{name} meta missing"), Some(REBUILD_HINT));
            self.report.mark_failed(self.mode);
        }
        if !presence.missing_paths.is_empty() {
            for missing in &presence.missing_paths {
                let rel = missing.strip_prefix(self.dir).unwrap_or(missing);
                self.issue(format_args!("{name} shard missing: {}", rel.display()), None);
            }
            self.report.mark_failed(self.mode);
        }
        if let Some(meta) = &presence.meta_raw {
            self.schema(&format!("{name}_meta"), Payload::Document(meta), REBUILD_HINT);
        }
        if let Some(version) = presence.unsupported_meta_version() {
            self.issue(
                format_args!("{name}_meta schemaVersion unsupported: {version}"),
                Some(REBUILD_HINT),
            );
        }
    }

    /// A usable presence for `kind`, or `None` when absent or already reported as broken.
    fn usable<'c>(cache: &'c mut PresenceCache<'_>, kind: ArtifactKind) -> Option<&'c Presence> {
        let presence = cache.resolve(kind.as_str());
        presence.is_usable().then_some(presence)
    }

    fn load_failed(&mut self, kind: ArtifactKind, err: &ArtifactError, required: bool) {
        tracing::debug!(target: "strata.validate", mode = self.mode, name = %kind, error = %err, "artifact load failed");
        self.issue(format_args!("{kind} load failed ({err})"), Some(REBUILD_HINT));
        if required {
            self.report.mark_failed(self.mode);
        }
    }

    fn document(&mut self, cache: &mut PresenceCache<'_>, kind: ArtifactKind) -> Option<Value> {
        let presence = Self::usable(cache, kind)?;
        match presence.load_document(self.opts.max_json_bytes) {
            // `fields` is field_postings' own payload key, not an envelope.
            Ok(value) if kind == ArtifactKind::FieldPostings => Some(value),
            Ok(value) => Some(normalize_document(value)),
            Err(err) => {
                self.load_failed(kind, &err, false);
                None
            }
        }
    }

    fn rows(&mut self, cache: &mut PresenceCache<'_>, kind: ArtifactKind) -> Option<Vec<Value>> {
        let presence = Self::usable(cache, kind)?;
        match presence.load_rows(self.opts.max_json_bytes) {
            Ok(rows) => Some(rows),
            Err(err) => {
                self.load_failed(kind, &err, false);
                None
            }
        }
    }

    fn token_postings(&mut self, cache: &mut PresenceCache<'_>) -> Option<Value> {
        let kind = ArtifactKind::TokenPostings;
        let presence = Self::usable(cache, kind)?;
        let max_bytes = self.opts.max_json_bytes;
        let loaded = match presence.format {
            PresenceFormat::Json => presence.load_document(max_bytes).map(normalize_document),
            _ => presence.load_rows(max_bytes).map(concat_postings_rows),
        };
        match loaded {
            Ok(doc) => Some(doc),
            Err(err) => {
                tracing::debug!(target: "strata.validate", mode = self.mode, error = %err, "token_postings load failed");
                self.issue(
                    format_args!("token_postings load failed ({})", err.code()),
                    Some(REBUILD_HINT),
                );
                self.report.mark_failed(self.mode);
                None
            }
        }
    }

    fn check_artifacts(&mut self, cache: &mut PresenceCache<'_>) {
        let (mode, strict) = (self.mode, self.opts.strict);
        let Some(load) = load_and_validate_chunk_meta(
            &mut self.report,
            mode,
            cache,
            self.opts.max_json_bytes,
            strict,
        ) else {
            return;
        };
        let chunk_meta = load.chunk_meta.as_slice();
        let chunk_count = chunk_meta.len();

        if strict {
            for issue in chunk_identity_issues(chunk_meta) {
                self.issue(issue, Some(REBUILD_HINT));
            }
        }
        for issue in meta_v2_drift_issues(chunk_meta, self.opts.sample_meta_v2) {
            self.issue(issue, Some(REBUILD_HINT));
        }

        if self.opts.postings.fielded && chunk_count > 0 {
            for kind in [ArtifactKind::FieldPostings, ArtifactKind::FieldTokens] {
                if !cache.resolve(kind.as_str()).is_usable() {
                    self.report.missing_artifact(mode, kind.as_str());
                }
            }
        }

        if let Some(tokens) = self.token_postings(cache) {
            self.schema("token_postings", Payload::Document(&tokens), REBUILD_HINT);
            let doc_lengths = array_len(&tokens, "docLengths");
            if doc_lengths > 0 {
                if let Some(issue) = length_mismatch("docLengths", doc_lengths, chunk_count) {
                    self.report.fail_mode(mode, issue, None);
                }
            }
            for issue in pair_posting_issues("token_postings", array_slice(&tokens, "postings"), chunk_count) {
                self.issue(issue, Some(REBUILD_HINT));
            }
        }

        if let Some(file_meta) = &load.file_meta {
            self.schema("file_meta", Payload::Rows(file_meta), REBUILD_HINT);
            for issue in file_meta_issues(chunk_meta, file_meta) {
                self.issue(issue, Some(REBUILD_HINT));
            }
        }

        if let Some(repo_map) = self.rows(cache, ArtifactKind::RepoMap) {
            self.schema("repo_map", Payload::Rows(&repo_map), REBUILD_HINT);
            if let Some(issue) = repo_map_collision(&repo_map) {
                self.issue(issue, Some(COLLISION_HINT));
            }
        }

        if let Some(graph) = self.document(cache, ArtifactKind::GraphRelations) {
            self.schema("graph_relations", Payload::Document(&graph), REBUILD_HINT);
        }

        if let Some(filter) = self.document(cache, ArtifactKind::FilterIndex) {
            self.schema("filter_index", Payload::Document(&filter), REBUILD_HINT);
            for issue in id_posting_issues("filter_index", array_slice(&filter, "fileChunksById"), chunk_count) {
                self.issue(issue, Some(REBUILD_HINT));
            }
        }

        self.check_index_state(cache, &load);

        if let Some(filelists) = self.document(cache, ArtifactKind::Filelists) {
            self.schema("filelists", Payload::Document(&filelists), REBUILD_HINT);
        }

        if let Some(relations) = self.rows(cache, ArtifactKind::FileRelations) {
            self.schema("file_relations", Payload::Rows(&relations), REBUILD_HINT);
        }

        if let Some(minhash) = self.document(cache, ArtifactKind::MinhashSignatures) {
            self.schema("minhash_signatures", Payload::Document(&minhash), REBUILD_HINT);
            let signatures = array_len(&minhash, "signatures");
            if signatures > 0 {
                if let Some(issue) = length_mismatch("minhash", signatures, chunk_count) {
                    self.report.fail_mode(mode, issue, None);
                }
            }
        }

        if let Some(field_tokens) = self.rows(cache, ArtifactKind::FieldTokens) {
            self.schema("field_tokens", Payload::Rows(&field_tokens), REBUILD_HINT);
            if let Some(issue) = length_mismatch("field_tokens", field_tokens.len(), chunk_count) {
                self.report.fail_mode(mode, issue, None);
            }
        }

        if let Some(field_postings) = self.document(cache, ArtifactKind::FieldPostings) {
            self.schema("field_postings", Payload::Document(&field_postings), REBUILD_HINT);
            let fields = field_postings.get("fields").and_then(Value::as_object);
            for entry in fields.into_iter().flat_map(|fields| fields.values()) {
                for issue in pair_posting_issues("field_postings", array_slice(entry, "postings"), chunk_count) {
                    self.issue(issue, Some(REBUILD_HINT));
                }
                let lengths = array_len(entry, "docLengths");
                if lengths > 0 {
                    if let Some(issue) = length_mismatch("field_postings docLengths", lengths, chunk_count) {
                        self.report.fail_mode(mode, issue, None);
                    }
                }
            }
        }

        for kind in [ArtifactKind::PhraseNgrams, ArtifactKind::ChargramPostings] {
            if let Some(doc) = self.document(cache, kind) {
                self.schema(kind.as_str(), Payload::Document(&doc), REBUILD_HINT);
                for issue in id_posting_issues(kind.as_str(), array_slice(&doc, "postings"), chunk_count) {
                    self.issue(issue, Some(REBUILD_HINT));
                }
            }
        }

        for kind in DENSE {
            let Some(dense) = self.document(cache, kind) else {
                continue;
            };
            self.schema(kind.as_str(), Payload::Document(&dense), REBUILD_EMBEDDINGS_HINT);
            let vectors = array_len(&dense, "vectors");
            if vectors > 0 {
                if let Some(issue) = length_mismatch(kind.as_str(), vectors, chunk_count) {
                    self.report.fail_mode(mode, issue, None);
                }
            }
            if let Some(issue) = dense_dims_issue(kind.as_str(), &dense) {
                self.issue(issue, Some(REBUILD_EMBEDDINGS_HINT));
            }
        }

        self.check_risk(cache, &load);

        if strict && self.opts.sqlite.enabled {
            let index_root = self.opts.resolved_index_root();
            if let Some(db_path) = self.opts.sqlite.db_path(&index_root, mode) {
                check_sqlite_parity(
                    &mut self.report,
                    mode,
                    &db_path,
                    self.opts.sqlite.score_mode,
                    chunk_meta,
                );
            }
        }
    }

    fn check_index_state(&mut self, cache: &mut PresenceCache<'_>, load: &ChunkMetaLoad) {
        let strict = self.opts.strict;
        let Some(state) = &load.index_state else {
            if strict && Self::usable(cache, ArtifactKind::IndexState).is_some() {
                self.report
                    .fail_mode(self.mode, "index_state unreadable", Some(REBUILD_HINT));
            }
            return;
        };
        self.schema("index_state", Payload::Document(state), REBUILD_HINT);
        if strict {
            let version = state.get("artifactSurfaceVersion").and_then(Value::as_str);
            if !version.is_some_and(|v| is_supported_version(v, ARTIFACT_SURFACE_VERSION)) {
                self.issue(
                    format_args!(
                        "index_state artifactSurfaceVersion unsupported: {}",
                        version.unwrap_or("missing")
                    ),
                    Some(REBUILD_HINT),
                );
            }
        }
    }

    fn check_risk(&mut self, cache: &mut PresenceCache<'_>, load: &ChunkMetaLoad) {
        let config = RiskConfig::from_index_state(load.index_state.as_ref());
        if !config.enabled {
            return;
        }
        let stats_doc = self.document(cache, ArtifactKind::RiskInterproceduralStats);
        let stats = match &stats_doc {
            Some(doc) => {
                self.schema("risk_interprocedural_stats", Payload::Document(doc), REBUILD_HINT);
                let parsed = RiskStats::from_value(doc);
                if parsed.is_none() {
                    self.issue("risk_interprocedural_stats invalid", Some(REBUILD_HINT));
                    return;
                }
                parsed
            }
            None => None,
        };
        let summaries = self.rows(cache, ArtifactKind::RiskSummaries);
        let flows = self.rows(cache, ArtifactKind::RiskFlows);
        let call_sites = self.rows(cache, ArtifactKind::CallSites);
        for (kind, rows) in [
            (ArtifactKind::RiskSummaries, &summaries),
            (ArtifactKind::RiskFlows, &flows),
            (ArtifactKind::CallSites, &call_sites),
        ] {
            if let Some(rows) = rows {
                self.schema(kind.as_str(), Payload::Rows(rows), REBUILD_HINT);
            }
        }
        let inputs = RiskInputs {
            stats: stats.as_ref(),
            summaries: summaries.as_deref(),
            flows: flows.as_deref(),
            call_sites: call_sites.as_deref(),
        };
        for issue in risk_issues(&config, inputs, &load.chunk_uids) {
            self.issue(issue, Some(REBUILD_HINT));
        }
    }
}
