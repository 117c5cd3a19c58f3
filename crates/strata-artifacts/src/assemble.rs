//! Merge several partial index directories into one.
//!
//! Inputs are consumed in the order given. Each input's chunk ids and posting doc ids are
//! shifted by the number of chunks contributed by earlier inputs (the doc offset). The output
//! is deterministic: vocabularies are sorted and no wall-clock time is written unless the
//! caller supplies one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use crate::chunk_meta::load_chunk_meta;
use crate::codec::{bytes_checksum, ChecksumAlgo};
use crate::error::{ArtifactError, Result};
use crate::kind::ArtifactKind;
use crate::manifest::{
    load_manifest, manifest_path, Manifest, ManifestLoadOptions, ManifestPiece,
    ARTIFACT_SURFACE_VERSION, MANIFEST_VERSION,
};
use crate::presence::{PresenceCache, ResolveOptions};
use crate::shards::{write_sharded_jsonl, ShardBudget, ShardWriteOptions};
use crate::util::{atomic_write, DEFAULT_MAX_JSON_BYTES};

#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub mode: String,
    pub stage: Option<String>,
    pub strict: bool,
    pub max_bytes: u64,
    /// Written verbatim into the manifest, shard meta, and index state.
    pub generated_at: Option<String>,
    pub budget: ShardBudget,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            mode: "code".to_string(),
            stage: None,
            strict: true,
            max_bytes: DEFAULT_MAX_JSON_BYTES,
            generated_at: None,
            budget: ShardBudget::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleSummary {
    pub inputs: usize,
    pub chunk_count: usize,
    pub manifest_path: PathBuf,
}

/// Frequency postings: token -> `[[docId, freq], ...]`.
type TfPostings = BTreeMap<String, Vec<Value>>;
/// Bare-id postings: token -> `[docId, ...]`.
type IdPostings = BTreeMap<String, Vec<Value>>;

fn shift_doc_id(value: &Value, offset: u64) -> Option<Value> {
    value.as_u64().map(|id| Value::from(id + offset))
}

fn merge_tf_postings(dest: &mut TfPostings, vocab: &[Value], postings: &[Value], offset: u64) {
    for (token, list) in vocab.iter().zip(postings) {
        let (Some(token), Some(list)) = (token.as_str(), list.as_array()) else {
            continue;
        };
        let entry = dest.entry(token.to_string()).or_default();
        for posting in list {
            let Some(pair) = posting.as_array() else {
                continue;
            };
            let Some(doc_id) = pair.first().and_then(|id| shift_doc_id(id, offset)) else {
                continue;
            };
            let mut shifted = pair.clone();
            shifted[0] = doc_id;
            entry.push(Value::Array(shifted));
        }
    }
}

fn merge_id_postings(dest: &mut IdPostings, vocab: &[Value], postings: &[Value], offset: u64) {
    for (token, list) in vocab.iter().zip(postings) {
        let (Some(token), Some(list)) = (token.as_str(), list.as_array()) else {
            continue;
        };
        dest.entry(token.to_string())
            .or_default()
            .extend(list.iter().filter_map(|id| shift_doc_id(id, offset)));
    }
}

fn array_field<'a>(value: Option<&'a Value>, key: &str) -> &'a [Value] {
    value
        .and_then(|v| v.get(key))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn check_length(label: &str, actual: usize, expected: usize, dir: &Path) -> Result<()> {
    if actual != 0 && actual != expected {
        return Err(ArtifactError::assembly(format!(
            "{label} length mismatch in {} ({actual} !== {expected})",
            dir.display()
        )));
    }
    Ok(())
}

#[derive(Default)]
struct FieldState {
    postings: TfPostings,
    doc_lengths: Vec<Value>,
}

#[derive(Default)]
struct MergeState {
    chunks: Vec<Value>,
    doc_lengths: Vec<Value>,
    token_postings: TfPostings,
    fields: BTreeMap<String, FieldState>,
    field_tokens: Vec<Value>,
    field_tokens_seen: bool,
    minhash: Vec<Value>,
    phrase: IdPostings,
    chargram: IdPostings,
    dense: BTreeMap<ArtifactKind, (Option<u64>, Vec<Value>)>,
    file_relations: BTreeMap<String, Value>,
    index_state: Option<Value>,
    compatibility_key: Option<String>,
}

struct LoadedInput {
    manifest: Option<Manifest>,
}

fn load_input_manifest(dir: &Path, opts: &AssembleOptions) -> Result<LoadedInput> {
    if !dir.is_dir() {
        return Err(ArtifactError::assembly(format!(
            "missing input index directory: {}",
            dir.display()
        )));
    }
    let load_opts = ManifestLoadOptions {
        strict: opts.strict,
        max_bytes: opts.max_bytes,
        ..ManifestLoadOptions::default()
    };
    let manifest = match load_manifest(dir, &load_opts) {
        Ok(manifest) => Some(manifest),
        Err(ArtifactError::ManifestMissing { .. }) if !opts.strict => None,
        Err(err) => return Err(err),
    };
    Ok(LoadedInput { manifest })
}

fn optional_document(
    cache: &mut PresenceCache<'_>,
    kind: ArtifactKind,
    max_bytes: u64,
) -> Result<Option<Value>> {
    let presence = cache.resolve(kind.as_str());
    if presence.is_missing() && presence.error.is_none() {
        return Ok(None);
    }
    presence.load_document(max_bytes).map(Some)
}

fn optional_rows(
    cache: &mut PresenceCache<'_>,
    kind: ArtifactKind,
    max_bytes: u64,
) -> Result<Option<Vec<Value>>> {
    let presence = cache.resolve(kind.as_str());
    if presence.is_missing() && presence.error.is_none() {
        return Ok(None);
    }
    presence.load_rows(max_bytes).map(Some)
}

impl MergeState {
    fn absorb(&mut self, dir: &Path, opts: &AssembleOptions) -> Result<()> {
        let input = load_input_manifest(dir, opts)?;
        if let Some(key) = input
            .manifest
            .as_ref()
            .and_then(|m| m.compatibility_key.clone())
        {
            match &self.compatibility_key {
                Some(existing) if *existing != key => {
                    return Err(ArtifactError::assembly(format!(
                        "compatibilityKey mismatch: {existing} vs {key} ({})",
                        dir.display()
                    )));
                }
                _ => self.compatibility_key = Some(key),
            }
        }
        let resolve = ResolveOptions {
            strict: opts.strict,
            max_bytes: opts.max_bytes,
        };
        let mut cache = PresenceCache::new(dir, input.manifest.as_ref(), resolve);
        let loaded = load_chunk_meta(&mut cache, opts.max_bytes)?;
        if loaded.chunk_meta.iter().any(|row| row.get("file").map_or(true, Value::is_null)) {
            return Err(ArtifactError::assembly(format!(
                "file_meta required for chunk metadata in {}",
                dir.display()
            )));
        }
        let count = loaded.chunk_meta.len();
        let offset = self.chunks.len() as u64;

        for (idx, row) in loaded.chunk_meta.into_iter().enumerate() {
            let mut row = row;
            if let Value::Object(obj) = &mut row {
                obj.insert("id".to_string(), Value::from(offset + idx as u64));
                obj.remove("fileId");
            }
            self.chunks.push(row);
        }

        let tokens = optional_document(&mut cache, ArtifactKind::TokenPostings, opts.max_bytes)?;
        let doc_lengths = array_field(tokens.as_ref(), "docLengths");
        check_length("docLengths", doc_lengths.len(), count, dir)?;
        self.doc_lengths.extend_from_slice(doc_lengths);
        merge_tf_postings(
            &mut self.token_postings,
            array_field(tokens.as_ref(), "vocab"),
            array_field(tokens.as_ref(), "postings"),
            offset,
        );

        if let Some(fields) = optional_document(&mut cache, ArtifactKind::FieldPostings, opts.max_bytes)? {
            let fields = match fields.get("fields") {
                Some(Value::Object(map)) => map.clone(),
                _ => fields.as_object().cloned().unwrap_or_default(),
            };
            for (field, entry) in fields {
                let lengths = array_field(Some(&entry), "docLengths");
                check_length(&format!("fieldDocLengths:{field}"), lengths.len(), count, dir)?;
                let state = self.fields.entry(field).or_default();
                state.doc_lengths.extend_from_slice(lengths);
                merge_tf_postings(
                    &mut state.postings,
                    array_field(Some(&entry), "vocab"),
                    array_field(Some(&entry), "postings"),
                    offset,
                );
            }
        }

        match optional_rows(&mut cache, ArtifactKind::FieldTokens, opts.max_bytes)? {
            Some(rows) if !rows.is_empty() => {
                check_length("fieldTokens", rows.len(), count, dir)?;
                if !self.field_tokens_seen {
                    self.field_tokens = vec![Value::Null; offset as usize];
                    self.field_tokens_seen = true;
                }
                self.field_tokens.extend(rows);
            }
            _ if self.field_tokens_seen => {
                self.field_tokens.extend(std::iter::repeat(Value::Null).take(count));
            }
            _ => {}
        }

        if let Some(minhash) = optional_document(&mut cache, ArtifactKind::MinhashSignatures, opts.max_bytes)? {
            let signatures = array_field(Some(&minhash), "signatures");
            if signatures.len() != count {
                return Err(ArtifactError::assembly(format!(
                    "minhash length mismatch in {} ({} !== {count})",
                    dir.display(),
                    signatures.len()
                )));
            }
            self.minhash.extend_from_slice(signatures);
        }

        for (kind, target) in [
            (ArtifactKind::PhraseNgrams, &mut self.phrase),
            (ArtifactKind::ChargramPostings, &mut self.chargram),
        ] {
            if let Some(doc) = optional_document(&mut cache, kind, opts.max_bytes)? {
                merge_id_postings(
                    target,
                    array_field(Some(&doc), "vocab"),
                    array_field(Some(&doc), "postings"),
                    offset,
                );
            }
        }

        for kind in [
            ArtifactKind::DenseVectors,
            ArtifactKind::DenseVectorsDoc,
            ArtifactKind::DenseVectorsCode,
        ] {
            let Some(doc) = optional_document(&mut cache, kind, opts.max_bytes)? else {
                continue;
            };
            let vectors = array_field(Some(&doc), "vectors");
            check_length(kind.as_str(), vectors.len(), count, dir)?;
            let dims = doc.get("dims").and_then(Value::as_u64);
            let (merged_dims, merged) = self.dense.entry(kind).or_default();
            match (*merged_dims, dims) {
                (Some(a), Some(b)) if a != b => {
                    return Err(ArtifactError::assembly(format!(
                        "embedding dims mismatch ({a} !== {b})"
                    )));
                }
                (None, Some(b)) => *merged_dims = Some(b),
                _ => {}
            }
            merged.extend_from_slice(vectors);
        }

        if let Some(rows) = optional_rows(&mut cache, ArtifactKind::FileRelations, opts.max_bytes)? {
            for row in rows {
                if let Some(file) = row.get("file").and_then(Value::as_str) {
                    let relations = row.get("relations").cloned().unwrap_or(Value::Null);
                    self.file_relations.insert(file.to_string(), relations);
                }
            }
        }

        if self.index_state.is_none() {
            self.index_state = loaded.index_state;
        }
        tracing::debug!(
            target: "strata.artifacts",
            dir = %dir.display(),
            chunks = count,
            offset,
            "absorbed partial index"
        );
        Ok(())
    }
}

struct OutputWriter<'a> {
    out: &'a Path,
    pieces: Vec<ManifestPiece>,
}

impl OutputWriter<'_> {
    fn write_json(&mut self, kind: ArtifactKind, file_name: &str, value: &Value, count: Option<u64>) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        atomic_write(&self.out.join(file_name), &bytes)?;
        self.pieces.push(ManifestPiece {
            piece_type: Some(kind.piece_type().to_string()),
            name: Some(kind.as_str().to_string()),
            format: Some("json".to_string()),
            path: Some(file_name.to_string()),
            count,
            bytes: Some(bytes.len() as u64),
            checksum: Some(format!(
                "{}:{}",
                ChecksumAlgo::Sha1,
                bytes_checksum(&bytes, ChecksumAlgo::Sha1)
            )),
        });
        Ok(())
    }
}

fn finalize_postings(map: TfPostings) -> (Vec<Value>, Vec<Value>) {
    let mut vocab = Vec::with_capacity(map.len());
    let mut postings = Vec::with_capacity(map.len());
    for (token, mut list) in map {
        list.sort_by_key(|posting| posting.get(0).and_then(Value::as_u64).unwrap_or(u64::MAX));
        vocab.push(Value::String(token));
        postings.push(Value::Array(list));
    }
    (vocab, postings)
}

fn finalize_id_postings(map: IdPostings) -> (Vec<Value>, Vec<Value>) {
    let mut vocab = Vec::with_capacity(map.len());
    let mut postings = Vec::with_capacity(map.len());
    for (token, list) in map {
        let mut ids: Vec<u64> = list.iter().filter_map(Value::as_u64).collect();
        ids.sort_unstable();
        ids.dedup();
        vocab.push(Value::String(token));
        postings.push(Value::Array(ids.into_iter().map(Value::from).collect()));
    }
    (vocab, postings)
}

/// Build `file_meta` from the merged chunks, assigning file ids in first-seen order.
fn rebuild_file_meta(chunks: &mut [Value]) -> Vec<Value> {
    let mut ids: BTreeMap<String, u64> = BTreeMap::new();
    let mut file_meta = Vec::new();
    for chunk in chunks.iter_mut() {
        let Some(obj) = chunk.as_object_mut() else {
            continue;
        };
        let Some(file) = obj.get("file").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let next = ids.len() as u64;
        let id = *ids.entry(file.clone()).or_insert_with(|| {
            let mut entry = Map::new();
            entry.insert("id".to_string(), Value::from(next));
            entry.insert("file".to_string(), Value::String(file.clone()));
            for (source, target) in [("ext", "ext"), ("fileHash", "hash"), ("fileHashAlgo", "hashAlgo"), ("fileSize", "size"), ("encoding", "encoding")] {
                if let Some(value) = obj.get(source).filter(|v| !v.is_null()) {
                    entry.insert(target.to_string(), value.clone());
                }
            }
            file_meta.push(Value::Object(entry));
            next
        });
        obj.insert("fileId".to_string(), Value::from(id));
    }
    file_meta
}

/// Assemble `inputs` into `out_dir` and write a fresh pieces manifest.
pub fn assemble_pieces(
    inputs: &[PathBuf],
    out_dir: &Path,
    opts: &AssembleOptions,
) -> Result<AssembleSummary> {
    if inputs.is_empty() {
        return Err(ArtifactError::assembly("no input indexes given"));
    }
    let mut state = MergeState::default();
    for dir in inputs {
        state.absorb(dir, opts)?;
    }
    if state.chunks.is_empty() {
        return Err(ArtifactError::assembly("found no chunks to merge"));
    }
    let chunk_count = state.chunks.len();
    check_length("merged docLengths", state.doc_lengths.len(), chunk_count, out_dir)?;

    fs::create_dir_all(out_dir)?;
    let mut writer = OutputWriter {
        out: out_dir,
        pieces: Vec::new(),
    };

    let file_meta = rebuild_file_meta(&mut state.chunks);
    let shard_opts = ShardWriteOptions {
        budget: opts.budget,
        generated_at: opts.generated_at.clone(),
    };
    let sharded = write_sharded_jsonl(out_dir, ArtifactKind::ChunkMeta, &state.chunks, &shard_opts)?;
    writer.pieces.extend(sharded.pieces);
    writer.write_json(
        ArtifactKind::FileMeta,
        "file_meta.json",
        &Value::Array(file_meta.clone()),
        Some(file_meta.len() as u64),
    )?;

    let (vocab, postings) = finalize_postings(std::mem::take(&mut state.token_postings));
    let vocab_len = vocab.len() as u64;
    writer.write_json(
        ArtifactKind::TokenPostings,
        "token_postings.json",
        &json!({
            "vocab": vocab,
            "postings": postings,
            "docLengths": state.doc_lengths,
            "totalDocs": chunk_count,
        }),
        Some(vocab_len),
    )?;

    if !state.fields.is_empty() {
        let mut fields = Map::new();
        for (field, field_state) in std::mem::take(&mut state.fields) {
            let (vocab, postings) = finalize_postings(field_state.postings);
            fields.insert(
                field,
                json!({"vocab": vocab, "postings": postings, "docLengths": field_state.doc_lengths}),
            );
        }
        writer.write_json(
            ArtifactKind::FieldPostings,
            "field_postings.json",
            &json!({ "fields": fields }),
            None,
        )?;
    }
    if state.field_tokens_seen {
        let count = state.field_tokens.len() as u64;
        writer.write_json(
            ArtifactKind::FieldTokens,
            "field_tokens.json",
            &Value::Array(std::mem::take(&mut state.field_tokens)),
            Some(count),
        )?;
    }
    if !state.minhash.is_empty() {
        let count = state.minhash.len() as u64;
        writer.write_json(
            ArtifactKind::MinhashSignatures,
            "minhash_signatures.json",
            &json!({ "signatures": state.minhash }),
            Some(count),
        )?;
    }
    for (kind, map) in [
        (ArtifactKind::PhraseNgrams, std::mem::take(&mut state.phrase)),
        (ArtifactKind::ChargramPostings, std::mem::take(&mut state.chargram)),
    ] {
        if map.is_empty() {
            continue;
        }
        let (vocab, postings) = finalize_id_postings(map);
        let count = vocab.len() as u64;
        writer.write_json(
            kind,
            &format!("{}.json", kind.as_str()),
            &json!({"vocab": vocab, "postings": postings}),
            Some(count),
        )?;
    }
    for (kind, (dims, vectors)) in std::mem::take(&mut state.dense) {
        check_length(kind.as_str(), vectors.len(), chunk_count, out_dir)?;
        let count = vectors.len() as u64;
        writer.write_json(
            kind,
            &format!("{}.json", kind.legacy_stem()),
            &json!({"dims": dims, "vectors": vectors}),
            Some(count),
        )?;
    }
    if !state.file_relations.is_empty() {
        let rows: Vec<Value> = std::mem::take(&mut state.file_relations)
            .into_iter()
            .map(|(file, relations)| json!({"file": file, "relations": relations}))
            .collect();
        let count = rows.len() as u64;
        writer.write_json(
            ArtifactKind::FileRelations,
            "file_relations.json",
            &Value::Array(rows),
            Some(count),
        )?;
    }

    let mut index_state = match state.index_state.take() {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    index_state
        .entry("artifactSurfaceVersion")
        .or_insert_with(|| Value::from(ARTIFACT_SURFACE_VERSION));
    index_state.insert("mode".to_string(), Value::from(opts.mode.clone()));
    if let Some(stage) = &opts.stage {
        index_state.insert("stage".to_string(), Value::from(stage.clone()));
    }
    index_state.insert(
        "generatedAt".to_string(),
        opts.generated_at.clone().map_or(Value::Null, Value::String),
    );
    index_state.insert(
        "compatibilityKey".to_string(),
        state.compatibility_key.clone().map_or(Value::Null, Value::String),
    );
    index_state.insert("assembled".to_string(), Value::Bool(true));
    writer.write_json(
        ArtifactKind::IndexState,
        "index_state.json",
        &Value::Object(index_state),
        None,
    )?;

    let manifest = Manifest {
        version: Some(MANIFEST_VERSION),
        artifact_surface_version: Some(ARTIFACT_SURFACE_VERSION.to_string()),
        compatibility_key: state.compatibility_key,
        generated_at: opts.generated_at.clone(),
        mode: Some(opts.mode.clone()),
        stage: opts.stage.clone(),
        pieces: writer.pieces,
    };
    let manifest_path = manifest_path(out_dir);
    if let Some(parent) = manifest_path.parent() {
        fs::create_dir_all(parent)?;
    }
    atomic_write(&manifest_path, &serde_json::to_vec_pretty(&manifest)?)?;

    tracing::info!(
        target: "strata.artifacts",
        inputs = inputs.len(),
        chunks = chunk_count,
        out = %out_dir.display(),
        "assembled index pieces"
    );
    Ok(AssembleSummary {
        inputs: inputs.len(),
        chunk_count,
        manifest_path,
    })
}
