//! Cross-artifact reference checks.
//!
//! Every function here is pure: it inspects loaded payloads and returns report lines. The
//! caller decides severity and which mode to tag them with.

use std::collections::HashSet;

use serde_json::Value;
use strata_artifacts::meta_v2::build_meta_v2;
use strata_artifacts::stable::stable_stringify;

/// Record-scanning checks stop after this many issues.
pub const MAX_REFERENTIAL_ISSUES: usize = 20;

/// Dense vectors whose `dims` are compared against their length.
pub const DENSE_DIMS_SAMPLE: usize = 25;

fn display_or_null(value: Option<&Value>) -> String {
    value.map_or_else(|| "null".to_string(), Value::to_string)
}

fn as_doc_id(value: Option<&Value>) -> Option<i64> {
    value.and_then(Value::as_i64)
}

/// `id` must be present, unique, and equal to the row's index. Stops at the first violation.
pub fn chunk_id_issue(rows: &[Value]) -> Option<String> {
    let mut seen = HashSet::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let Some(id) = row.get("id").and_then(Value::as_i64) else {
            return Some(format!("chunk_meta missing id at index {idx}"));
        };
        if !seen.insert(id) {
            return Some(format!("chunk_meta duplicate id {id}"));
        }
        if id != idx as i64 {
            return Some(format!("chunk_meta id mismatch at index {idx} (id={id})"));
        }
    }
    None
}

fn out_of_range(doc_id: Option<i64>, chunk_count: usize) -> bool {
    match doc_id {
        Some(id) => id < 0 || id >= chunk_count as i64,
        None => true,
    }
}

/// `[[docId, freq], ...]` lists: every docId must fall in `[0, chunk_count)`.
pub fn pair_posting_issues(label: &str, postings: &[Value], chunk_count: usize) -> Vec<String> {
    let mut issues = Vec::new();
    for list in postings {
        let Some(entries) = list.as_array() else {
            continue;
        };
        for entry in entries {
            let raw = entry.as_array().and_then(|pair| pair.first());
            if out_of_range(as_doc_id(raw), chunk_count) {
                issues.push(format!("{label} docId out of range ({})", display_or_null(raw)));
                if issues.len() >= MAX_REFERENTIAL_ISSUES {
                    return issues;
                }
            }
        }
    }
    issues
}

/// `[docId, ...]` lists: every docId must fall in `[0, chunk_count)`.
pub fn id_posting_issues(label: &str, postings: &[Value], chunk_count: usize) -> Vec<String> {
    let mut issues = Vec::new();
    for list in postings {
        let Some(entries) = list.as_array() else {
            continue;
        };
        for entry in entries {
            if out_of_range(entry.as_i64(), chunk_count) {
                issues.push(format!("{label} docId out of range ({entry})"));
                if issues.len() >= MAX_REFERENTIAL_ISSUES {
                    return issues;
                }
            }
        }
    }
    issues
}

/// `<label> mismatch (<actual> !== <expected>)`, or nothing when the lengths agree.
pub fn length_mismatch(label: &str, actual: usize, expected: usize) -> Option<String> {
    (actual != expected).then(|| format!("{label} mismatch ({actual} !== {expected})"))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

const TYPE_BUCKETS: [&str; 3] = ["declared", "inferred", "tooling"];

/// Entries under `types[bucket][key]`: a list of `{type, ...}` or a `{param: [entries]}` map.
fn type_shape_issue(entries: &Value) -> Option<&'static str> {
    fn list_issue(list: &[Value]) -> Option<&'static str> {
        list.iter()
            .any(|entry| non_empty_str(entry.get("type")).is_none())
            .then_some("missing type")
    }
    match entries {
        Value::Array(list) => list_issue(list),
        Value::Object(params) => {
            for nested in params.values() {
                match nested {
                    Value::Array(list) => {
                        if let Some(issue) = list_issue(list) {
                            return Some(issue);
                        }
                    }
                    _ => return Some("must be a list of type entries"),
                }
            }
            None
        }
        Value::Null => None,
        _ => Some("must be a list or param map"),
    }
}

/// Structural checks on each row's `metaV2`. Rows without `metaV2` are skipped.
pub fn meta_v2_issues(rows: &[Value]) -> Vec<String> {
    let mut issues = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        let Some(meta) = row.get("metaV2").filter(|meta| meta.is_object()) else {
            continue;
        };
        if non_empty_str(meta.get("chunkId")).is_none() {
            issues.push(format!("metaV2 missing chunkId at index {idx}"));
        }
        if non_empty_str(meta.get("file")).is_none() {
            issues.push(format!("metaV2 missing file at index {idx}"));
        }
        if let Some(flows) = meta.pointer("/risk/flows").and_then(Value::as_array) {
            let broken = flows.iter().any(|flow| {
                flow.get("source").map_or(true, Value::is_null)
                    || flow.get("sink").map_or(true, Value::is_null)
            });
            if broken {
                issues.push(format!("metaV2 risk flow missing source/sink at index {idx}"));
            }
        }
        if let Some(types) = meta.get("types").and_then(Value::as_object) {
            for bucket in TYPE_BUCKETS {
                let Some(keys) = types.get(bucket).and_then(Value::as_object) else {
                    continue;
                };
                for (key, entries) in keys {
                    if let Some(problem) = type_shape_issue(entries) {
                        issues.push(format!(
                            "metaV2 type entry {problem} at index {idx} (types.{bucket}.{key})"
                        ));
                    }
                }
            }
        }
        if issues.len() >= MAX_REFERENTIAL_ISSUES {
            issues.truncate(MAX_REFERENTIAL_ISSUES);
            break;
        }
    }
    issues
}

/// Identity of one chunk row, read from `metaV2` first and legacy row fields second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIdentity<'a> {
    pub chunk_uid: Option<&'a str>,
    pub virtual_path: Option<&'a str>,
    pub has_segment: bool,
    pub segment_uid: Option<&'a str>,
}

impl<'a> ChunkIdentity<'a> {
    pub fn of(row: &'a Value) -> Self {
        let meta = row.get("metaV2").filter(|meta| meta.is_object());
        let field = |key: &str| {
            non_empty_str(meta.and_then(|meta| meta.get(key))).or_else(|| non_empty_str(row.get(key)))
        };
        let segment = meta
            .and_then(|meta| meta.get("segment"))
            .filter(|seg| seg.is_object())
            .or_else(|| row.get("segment").filter(|seg| seg.is_object()));
        Self {
            chunk_uid: field("chunkUid"),
            virtual_path: field("virtualPath"),
            has_segment: segment.is_some(),
            segment_uid: non_empty_str(segment.and_then(|seg| seg.get("segmentUid"))),
        }
    }
}

/// Every chunk needs a unique chunkUid and a virtualPath, plus a segmentUid when segmented.
pub fn chunk_identity_issues(rows: &[Value]) -> Vec<String> {
    let mut issues = Vec::new();
    let mut seen: HashSet<&str> = HashSet::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let identity = ChunkIdentity::of(row);
        match identity.chunk_uid {
            None => issues.push(format!("chunk identity missing chunkUid at index {idx}")),
            Some(uid) => {
                if !seen.insert(uid) {
                    issues.push(format!("chunk identity duplicate chunkUid {uid}"));
                }
                if identity.virtual_path.is_none() {
                    issues.push(format!(
                        "chunk identity missing virtualPath at index {idx} (chunkUid={uid})"
                    ));
                }
            }
        }
        if identity.has_segment && identity.segment_uid.is_none() {
            issues.push(format!("chunk identity missing segmentUid at index {idx}"));
        }
        if issues.len() >= MAX_REFERENTIAL_ISSUES {
            issues.truncate(MAX_REFERENTIAL_ISSUES);
            break;
        }
    }
    issues
}

/// Recompute `metaV2` from `docmeta` for up to `sample` rows and compare canonical forms.
///
/// Only rows carrying both `metaV2` and `docmeta` are sampled.
pub fn meta_v2_drift_issues(rows: &[Value], sample: usize) -> Vec<String> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| {
            row.get("metaV2").is_some_and(Value::is_object)
                && row.get("docmeta").is_some_and(Value::is_object)
        })
        .take(sample)
        .filter_map(|(idx, row)| {
            let stored = row.get("metaV2")?;
            let rebuilt = build_meta_v2(row, row.get("docmeta"));
            if stable_stringify(stored) == stable_stringify(&rebuilt) {
                return None;
            }
            let fields = differing_fields(stored, &rebuilt);
            Some(format!(
                "metaV2 mismatch at index {idx} ({})",
                if fields.is_empty() { "shape".to_string() } else { fields.join(", ") }
            ))
        })
        .collect()
}

fn differing_fields(stored: &Value, rebuilt: &Value) -> Vec<String> {
    let (Some(stored), Some(rebuilt)) = (stored.as_object(), rebuilt.as_object()) else {
        return Vec::new();
    };
    let mut keys: Vec<&String> = stored.keys().chain(rebuilt.keys()).collect();
    keys.sort();
    keys.dedup();
    keys.into_iter()
        .filter(|key| {
            let a = stored.get(*key).unwrap_or(&Value::Null);
            let b = rebuilt.get(*key).unwrap_or(&Value::Null);
            stable_stringify(a) != stable_stringify(b)
        })
        .map(|key| key.to_string())
        .collect()
}

/// Duplicate `file_meta` ids, then chunk `fileId`s absent from `file_meta`. One issue each at most.
pub fn file_meta_issues(chunk_meta: &[Value], file_meta: &[Value]) -> Vec<String> {
    let mut issues = Vec::new();
    let mut ids = HashSet::with_capacity(file_meta.len());
    for entry in file_meta {
        let Some(id) = entry.get("id").and_then(Value::as_i64) else {
            continue;
        };
        if !ids.insert(id) {
            issues.push(format!("file_meta duplicate id {id}"));
            break;
        }
    }
    for row in chunk_meta {
        let Some(file_id) = row.get("fileId").and_then(Value::as_i64) else {
            continue;
        };
        if !ids.contains(&file_id) {
            issues.push(format!("chunk_meta fileId missing in file_meta ({file_id})"));
            break;
        }
    }
    issues
}

/// The first repeated `file::name` identifier in `repo_map`.
pub fn repo_map_collision(rows: &[Value]) -> Option<String> {
    let mut seen = HashSet::new();
    for row in rows {
        let (Some(file), Some(name)) = (non_empty_str(row.get("file")), non_empty_str(row.get("name")))
        else {
            continue;
        };
        let key = format!("{file}::{name}");
        if seen.contains(&key) {
            return Some(format!("ERR_ID_COLLISION duplicate file::name identifier: {key}"));
        }
        seen.insert(key);
    }
    None
}

/// `dims` against the length of each of the first vectors. Stops at the first mismatch.
pub fn dense_dims_issue(label: &str, doc: &Value) -> Option<String> {
    let dims = doc.get("dims").and_then(Value::as_u64)?;
    let vectors = doc.get("vectors").and_then(Value::as_array)?;
    vectors
        .iter()
        .take(DENSE_DIMS_SAMPLE)
        .enumerate()
        .find(|(_, vector)| vector.as_array().map_or(true, |v| v.len() as u64 != dims))
        .map(|(idx, _)| format!("{label} dims mismatch at {idx}"))
}

/// Number of entries in `doc[key]`, or zero when absent.
pub fn array_len(doc: &Value, key: &str) -> usize {
    doc.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}
