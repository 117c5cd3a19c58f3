//! Loader for `chunk_meta`, the highest-volume artifact.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::columnar::{inflate_columnar_rows, is_columnar_envelope, read_binary_columnar_rows};
use crate::error::{ArtifactError, Result};
use crate::kind::ArtifactKind;
use crate::presence::{Presence, PresenceCache, PresenceFormat};
use crate::reader::read_json_with_source;

/// Headroom added on top of the manifest-declared piece bytes.
pub const CHUNK_META_BUDGET_HEADROOM: u64 = 8 * 1024 * 1024;

/// Which physical form the rows were finally read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMetaSource {
    BinaryColumnar,
    Jsonl,
    Json,
    /// The structured load failed and a monolithic payload was used instead.
    MonolithicFallback,
}

#[derive(Debug)]
pub struct ChunkMetaLoad {
    pub chunk_meta: Vec<Value>,
    pub file_meta: Option<Vec<Value>>,
    pub index_state: Option<Value>,
    pub chunk_uids: BTreeSet<String>,
    /// Non-fatal problems met while loading.
    pub warnings: Vec<String>,
    pub source: ChunkMetaSource,
}

/// Byte budget for `chunk_meta`: never below the declared piece bytes plus headroom.
pub fn chunk_meta_budget(cache: &PresenceCache<'_>, base: u64) -> u64 {
    let declared: u64 = cache
        .manifest()
        .map(|manifest| {
            manifest
                .pieces
                .iter()
                .filter(|piece| {
                    let name = piece.name();
                    name == "chunk_meta" || name.starts_with("chunk_meta_binary_columnar")
                })
                .filter_map(|piece| piece.bytes)
                .sum()
        })
        .unwrap_or(0);
    if declared == 0 {
        return base;
    }
    base.max(declared.saturating_add(CHUNK_META_BUDGET_HEADROOM))
}

/// Load `chunk_meta` together with `file_meta` and `index_state`.
///
/// Rows are hydrated from `file_meta` by `fileId` and the chunkUid set is built.
pub fn load_chunk_meta(cache: &mut PresenceCache<'_>, base_max_bytes: u64) -> Result<ChunkMetaLoad> {
    let max_bytes = chunk_meta_budget(cache, base_max_bytes);
    let mut warnings = Vec::new();

    let (mut chunk_meta, source) = {
        let presence = cache.resolve(ArtifactKind::ChunkMeta.as_str());
        match load_structured(presence, max_bytes) {
            Ok(loaded) => loaded,
            Err(err) => {
                let dir = cache.dir();
                let fallback = dir.join("chunk_meta.json");
                match read_json_with_source(&fallback, max_bytes) {
                    Ok((payload, used)) => {
                        let rows = normalize_monolithic(&payload)?;
                        tracing::debug!(
                            target: "strata.artifacts",
                            path = %used.display(),
                            error = %err,
                            "chunk_meta structured load failed; using monolithic payload"
                        );
                        warnings.push(format!(
                            "chunk_meta loaded from monolithic fallback ({})",
                            err.code()
                        ));
                        (rows, ChunkMetaSource::MonolithicFallback)
                    }
                    Err(_) => return Err(err),
                }
            }
        }
    };

    let file_meta = load_optional_rows(cache, ArtifactKind::FileMeta, base_max_bytes, &mut warnings);
    let index_state = {
        let presence = cache.resolve(ArtifactKind::IndexState.as_str());
        if presence.is_missing() {
            None
        } else {
            match presence.load_document(base_max_bytes) {
                Ok(state) => Some(unwrap_fields(state)),
                Err(err) => {
                    warnings.push(format!("index_state load failed ({err})"));
                    None
                }
            }
        }
    };

    if let Some(file_meta) = &file_meta {
        hydrate_from_file_meta(&mut chunk_meta, file_meta);
    }
    let chunk_uids = collect_chunk_uids(&chunk_meta);

    Ok(ChunkMetaLoad {
        chunk_meta,
        file_meta,
        index_state,
        chunk_uids,
        warnings,
        source,
    })
}

fn load_structured(presence: &Presence, max_bytes: u64) -> Result<(Vec<Value>, ChunkMetaSource)> {
    if let Some(err) = &presence.error {
        return Err(ArtifactError::UnexpectedFormat {
            name: presence.name.clone(),
            format: format!("unresolved ({err})"),
        });
    }
    if let Some(sidecars) = &presence.columnar {
        match read_binary_columnar_rows(&presence.name, sidecars, max_bytes) {
            Ok(rows) => return Ok((rows, ChunkMetaSource::BinaryColumnar)),
            Err(err) if presence.paths.is_empty() => return Err(err),
            Err(err) => {
                tracing::debug!(
                    target: "strata.artifacts",
                    name = %presence.name,
                    error = %err,
                    "binary-columnar chunk_meta unreadable; trying row files"
                );
            }
        }
    }
    let source = match presence.format {
        PresenceFormat::Jsonl | PresenceFormat::Sharded => ChunkMetaSource::Jsonl,
        PresenceFormat::Json => ChunkMetaSource::Json,
        PresenceFormat::BinaryColumnar | PresenceFormat::Missing => {
            return Err(ArtifactError::NotFound {
                path: PathBuf::from(&presence.name),
            })
        }
    };
    let rows = presence.load_rows(max_bytes)?;
    Ok((rows, source))
}

fn load_optional_rows(
    cache: &mut PresenceCache<'_>,
    kind: ArtifactKind,
    max_bytes: u64,
    warnings: &mut Vec<String>,
) -> Option<Vec<Value>> {
    let presence = cache.resolve(kind.as_str());
    if presence.is_missing() && presence.error.is_none() {
        return None;
    }
    match presence.load_rows(max_bytes) {
        Ok(rows) => Some(rows),
        Err(err) => {
            warnings.push(format!("{kind} load failed ({err})"));
            None
        }
    }
}

fn unwrap_fields(value: Value) -> Value {
    match value {
        Value::Object(mut map) if matches!(map.get("fields"), Some(Value::Object(_))) => {
            map.remove("fields").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Accept the monolithic payload shapes older builds wrote.
///
/// A plain array, a columnar envelope, a `{chunkMeta:[...]}` or `{rows:[...]}` wrapper, or an
/// `{id: row}` map ordered by numeric key.
pub fn normalize_monolithic(payload: &Value) -> Result<Vec<Value>> {
    match payload {
        Value::Array(rows) => Ok(rows.clone()),
        Value::Object(_) if is_columnar_envelope(payload) => {
            inflate_columnar_rows(ArtifactKind::ChunkMeta.as_str(), payload)
        }
        Value::Object(map) => {
            for key in ["chunkMeta", "rows"] {
                if let Some(Value::Array(rows)) = map.get(key) {
                    return Ok(rows.clone());
                }
            }
            let mut ordered = BTreeMap::new();
            for (key, row) in map {
                let id: u64 = key.parse().map_err(|_| {
                    ArtifactError::UnexpectedFormat {
                        name: ArtifactKind::ChunkMeta.as_str().to_string(),
                        format: format!("object with non-numeric key {key:?}"),
                    }
                })?;
                ordered.insert(id, row.clone());
            }
            Ok(ordered.into_values().collect())
        }
        _ => Err(ArtifactError::UnexpectedFormat {
            name: ArtifactKind::ChunkMeta.as_str().to_string(),
            format: "scalar payload".to_string(),
        }),
    }
}

fn is_absent(row: &Map<String, Value>, key: &str) -> bool {
    row.get(key).map_or(true, Value::is_null)
}

/// Copy file-level fields onto chunk rows. Existing values are never overwritten.
pub fn hydrate_from_file_meta(chunk_meta: &mut [Value], file_meta: &[Value]) {
    let by_id: HashMap<u64, &Map<String, Value>> = file_meta
        .iter()
        .filter_map(|entry| {
            let entry = entry.as_object()?;
            Some((entry.get("id")?.as_u64()?, entry))
        })
        .collect();
    if by_id.is_empty() {
        return;
    }
    // (chunk field, file_meta fields in preference order)
    const FIELDS: &[(&str, &[&str])] = &[
        ("file", &["file"]),
        ("ext", &["ext"]),
        ("fileHash", &["hash", "fileHash"]),
        ("fileHashAlgo", &["hashAlgo", "hash_algo", "fileHashAlgo"]),
        ("fileSize", &["size", "fileSize"]),
        ("encoding", &["encoding"]),
    ];
    for row in chunk_meta.iter_mut() {
        let Some(row) = row.as_object_mut() else {
            continue;
        };
        let Some(meta) = row
            .get("fileId")
            .and_then(Value::as_u64)
            .and_then(|id| by_id.get(&id))
        else {
            continue;
        };
        for (target, sources) in FIELDS {
            if !is_absent(row, target) {
                continue;
            }
            let value = sources
                .iter()
                .find_map(|source| meta.get(*source).filter(|v| !v.is_null()));
            if let Some(value) = value {
                row.insert((*target).to_string(), value.clone());
            }
        }
    }
}

/// The chunkUid of a row, from the row itself or its `metaV2`.
pub fn row_chunk_uid(row: &Value) -> Option<&str> {
    row.get("chunkUid")
        .and_then(Value::as_str)
        .or_else(|| row.get("metaV2")?.get("chunkUid")?.as_str())
        .filter(|uid| !uid.is_empty())
}

pub fn collect_chunk_uids(chunk_meta: &[Value]) -> BTreeSet<String> {
    chunk_meta
        .iter()
        .filter_map(row_chunk_uid)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hydration_fills_only_absent_fields() {
        let mut rows = vec![
            json!({"id": 0, "fileId": 7, "file": "kept.rs"}),
            json!({"id": 1, "fileId": 7, "ext": null}),
            json!({"id": 2}),
        ];
        let file_meta = vec![json!({"id": 7, "file": "src/lib.rs", "ext": ".rs", "hash": "abc", "size": 12})];
        hydrate_from_file_meta(&mut rows, &file_meta);
        assert_eq!(rows[0]["file"], "kept.rs");
        assert_eq!(rows[0]["ext"], ".rs");
        assert_eq!(rows[1]["file"], "src/lib.rs");
        assert_eq!(rows[1]["ext"], ".rs");
        assert_eq!(rows[1]["fileHash"], "abc");
        assert_eq!(rows[1]["fileSize"], 12);
        assert!(rows[2].get("file").is_none());
    }

    #[test]
    fn monolithic_id_map_is_ordered_numerically() {
        let payload = json!({"10": {"id": 10}, "2": {"id": 2}, "0": {"id": 0}});
        let rows = normalize_monolithic(&payload).unwrap();
        let ids: Vec<u64> = rows.iter().map(|r| r["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![0, 2, 10]);
    }

    #[test]
    fn chunk_uids_come_from_row_or_meta_v2() {
        let rows = vec![
            json!({"chunkUid": "a"}),
            json!({"metaV2": {"chunkUid": "b"}}),
            json!({"chunkUid": ""}),
        ];
        let uids = collect_chunk_uids(&rows);
        assert_eq!(uids.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
