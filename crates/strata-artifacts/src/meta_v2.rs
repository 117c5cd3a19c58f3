//! Builder for the `metaV2` structured metadata attached to each chunk.
//!
//! The validator re-derives `metaV2` from a row's `docmeta` with this builder and compares the
//! canonical forms, so any change here changes what counts as drift.

use serde_json::{json, Map, Value};

use crate::codec::content_hash_hex;

const DECLARED_CONFIDENCE: f64 = 0.95;

fn normalize_string(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn string_or_null(value: Option<&Value>) -> Value {
    normalize_string(value).map_or(Value::Null, Value::String)
}

fn number_or_null(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Number(number)) => Value::Number(number.clone()),
        _ => Value::Null,
    }
}

fn truthy(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64() != Some(0.0),
        _ => true,
    })
}

fn or_null(value: Option<&Value>) -> Value {
    truthy(value).cloned().unwrap_or(Value::Null)
}

fn normalize_string_array(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| normalize_string(Some(item)))
            .collect(),
        other => normalize_string(other).into_iter().collect(),
    }
}

fn normalize_modifiers(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Object(map)) = value else {
        return normalize_string_array(value);
    };
    let mut out = Vec::new();
    for (key, raw) in map {
        if matches!(raw, Value::Null | Value::Bool(false)) {
            continue;
        }
        let key_text = normalize_string(Some(&Value::String(key.clone())));
        if key == "visibility" {
            out.extend(normalize_string(Some(raw)));
            continue;
        }
        if let Value::Bool(true) = raw {
            out.extend(key_text);
            continue;
        }
        match (normalize_string(Some(raw)), key_text) {
            (Some(value), Some(key)) if key != value => out.push(format!("{key}:{value}")),
            (Some(value), _) => out.push(value),
            (None, _) => {}
        }
    }
    out
}

fn unique(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

fn non_empty_array(values: Vec<String>) -> Value {
    if values.is_empty() {
        Value::Null
    } else {
        Value::Array(values.into_iter().map(Value::String).collect())
    }
}

fn normalize_type_entries(entries: &Value) -> Vec<Value> {
    let Value::Array(entries) = entries else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let entry = entry.as_object()?;
            let ty = normalize_string(entry.get("type"))?;
            Some(json!({
                "type": ty,
                "source": string_or_null(entry.get("source")),
                "confidence": number_or_null(entry.get("confidence")),
                "evidence": or_null(entry.get("evidence")),
                "shape": or_null(entry.get("shape")),
                "elements": or_null(entry.get("elements")),
            }))
        })
        .collect()
}

fn normalize_param_map(raw: &Map<String, Value>) -> Option<Map<String, Value>> {
    let out: Map<String, Value> = raw
        .iter()
        .filter_map(|(key, entries)| {
            let normalized = normalize_type_entries(entries);
            (!normalized.is_empty()).then(|| (key.clone(), Value::Array(normalized)))
        })
        .collect();
    (!out.is_empty()).then_some(out)
}

fn normalize_type_map(raw: Option<&Value>) -> Option<Map<String, Value>> {
    let Some(Value::Object(raw)) = raw else {
        return None;
    };
    let mut out = Map::new();
    for (key, entries) in raw {
        match entries {
            Value::Array(_) => {
                let normalized = normalize_type_entries(entries);
                if !normalized.is_empty() {
                    out.insert(key.clone(), Value::Array(normalized));
                }
            }
            Value::Object(params) => {
                if let Some(params) = normalize_param_map(params) {
                    out.insert(key.clone(), Value::Object(params));
                }
            }
            _ => {}
        }
    }
    (!out.is_empty()).then_some(out)
}

fn is_tooling(entry: &Value) -> bool {
    entry.get("source").and_then(Value::as_str) == Some("tooling")
}

fn split_entries(list: &[Value]) -> (Vec<Value>, Vec<Value>) {
    list.iter().cloned().partition(is_tooling)
}

/// Split inferred types into (non-tooling, tooling) maps.
fn split_tooling_types(raw: Option<&Value>) -> (Option<Map<String, Value>>, Option<Map<String, Value>>) {
    let Some(inferred) = normalize_type_map(raw) else {
        return (None, None);
    };
    let mut tooling = Map::new();
    let mut remaining = Map::new();
    for (key, entries) in inferred {
        match entries {
            Value::Array(list) => {
                let (tool, other) = split_entries(&list);
                if !tool.is_empty() {
                    tooling.insert(key.clone(), Value::Array(tool));
                }
                if !other.is_empty() {
                    remaining.insert(key, Value::Array(other));
                }
            }
            Value::Object(params) => {
                let mut tool_map = Map::new();
                let mut other_map = Map::new();
                for (param, list) in params {
                    let Value::Array(list) = list else { continue };
                    let (tool, other) = split_entries(&list);
                    if !tool.is_empty() {
                        tool_map.insert(param.clone(), Value::Array(tool));
                    }
                    if !other.is_empty() {
                        other_map.insert(param, Value::Array(other));
                    }
                }
                if !tool_map.is_empty() {
                    tooling.insert(key.clone(), Value::Object(tool_map));
                }
                if !other_map.is_empty() {
                    remaining.insert(key, Value::Object(other_map));
                }
            }
            _ => {}
        }
    }
    (
        (!remaining.is_empty()).then_some(remaining),
        (!tooling.is_empty()).then_some(tooling),
    )
}

/// Declared return types from `returnType` and `returns`, deduplicated in order.
pub fn collect_declared_return_types(docmeta: Option<&Value>) -> Vec<String> {
    let Some(docmeta) = docmeta.filter(|d| d.is_object()) else {
        return Vec::new();
    };
    let mut out: Vec<String> = normalize_string(docmeta.get("returnType")).into_iter().collect();
    match docmeta.get("returns") {
        Some(Value::Array(items)) => {
            for item in items {
                let text = match item {
                    Value::Object(entry) => normalize_string(entry.get("type")),
                    other => normalize_string(Some(other)),
                };
                out.extend(text);
            }
        }
        other => out.extend(normalize_string(other)),
    }
    unique(out)
}

fn declared_entry(ty: String) -> Value {
    json!({"type": ty, "source": "annotation", "confidence": DECLARED_CONFIDENCE})
}

fn build_declared_types(docmeta: Option<&Value>) -> Option<Map<String, Value>> {
    let docmeta = docmeta?.as_object()?;
    let mut declared = Map::new();
    if let Some(Value::Object(param_types)) = docmeta.get("paramTypes") {
        let params: Map<String, Value> = param_types
            .iter()
            .filter_map(|(name, ty)| {
                let ty = normalize_string(Some(ty))?;
                Some((name.clone(), Value::Array(vec![declared_entry(ty)])))
            })
            .collect();
        if !params.is_empty() {
            declared.insert("params".to_string(), Value::Object(params));
        }
    }
    let returns = collect_declared_return_types(Some(&Value::Object(docmeta.clone())));
    if !returns.is_empty() {
        declared.insert(
            "returns".to_string(),
            Value::Array(returns.into_iter().map(declared_entry).collect()),
        );
    }
    (!declared.is_empty()).then_some(declared)
}

/// Deterministic chunk id derived from the file and span when the row carries none.
pub fn derive_chunk_id(chunk: &Value) -> String {
    let key = format!(
        "{}:{}:{}:{}:{}",
        chunk.get("file").and_then(Value::as_str).unwrap_or_default(),
        chunk.get("start").map(Value::to_string).unwrap_or_default(),
        chunk.get("end").map(Value::to_string).unwrap_or_default(),
        chunk.get("kind").and_then(Value::as_str).unwrap_or_default(),
        chunk.get("name").and_then(Value::as_str).unwrap_or_default(),
    );
    format!("chunk_{}", content_hash_hex(key.as_bytes()))
}

/// Build `metaV2` for a chunk row and its `docmeta`.
pub fn build_meta_v2(chunk: &Value, docmeta: Option<&Value>) -> Value {
    let docmeta = docmeta.filter(|d| d.is_object());
    let doc = |key: &str| docmeta.and_then(|d| d.get(key));
    let segment = chunk.get("segment").filter(|s| s.is_object());
    let seg = |key: &str| segment.and_then(|s| s.get(key));
    let identity = chunk.get("identity").filter(|i| i.is_object());
    let ident = |key: &str| identity.and_then(|i| i.get(key));
    let relations = chunk.get("codeRelations").filter(|r| r.is_object());

    let chunk_id = normalize_string(chunk.get("chunkId")).unwrap_or_else(|| derive_chunk_id(chunk));
    let chunk_uid = normalize_string(chunk.get("chunkUid"));
    let virtual_path = normalize_string(truthy(chunk.get("virtualPath")))
        .or_else(|| normalize_string(seg("virtualPath")))
        .or_else(|| normalize_string(ident("virtualPath")));
    let container_ext = normalize_string(chunk.get("ext"));
    let container_language = normalize_string(chunk.get("containerLanguageId"));
    let effective_ext = normalize_string(seg("ext"))
        .or_else(|| normalize_string(chunk.get("effectiveExt")))
        .or_else(|| container_ext.clone());
    let effective_language = normalize_string(chunk.get("lang"))
        .or_else(|| normalize_string(seg("languageId")))
        .or_else(|| container_language.clone());
    let chunk_uid_algo = normalize_string(ident("chunkUidAlgoVersion"))
        .or_else(|| chunk_uid.as_ref().map(|_| "v1".to_string()));

    let parser = match doc("parser") {
        Some(Value::Object(parser)) => json!({
            "name": string_or_null(parser.get("name")),
            "version": string_or_null(parser.get("version")),
        }),
        _ => Value::Null,
    };

    let (inferred, tooling) = split_tooling_types(doc("inferredTypes"));
    let mut types = Map::new();
    if let Some(declared) = build_declared_types(docmeta) {
        types.insert("declared".to_string(), Value::Object(declared));
    }
    if let Some(inferred) = inferred {
        types.insert("inferred".to_string(), Value::Object(inferred));
    }
    if let Some(tooling) = tooling {
        types.insert("tooling".to_string(), Value::Object(tooling));
    }

    let mut annotations = normalize_string_array(doc("decorators"));
    annotations.extend(normalize_string_array(doc("annotations")));
    let params: Vec<Value> = match doc("params") {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| truthy(Some(item)).is_some())
            .cloned()
            .collect(),
        _ => Vec::new(),
    };

    let opt_string = |value: Option<String>| value.map_or(Value::Null, Value::String);
    let ext_language = |ext: &Option<String>, language: &Option<String>| {
        if ext.is_some() || language.is_some() {
            json!({"ext": opt_string(ext.clone()), "languageId": opt_string(language.clone())})
        } else {
            Value::Null
        }
    };

    json!({
        "chunkId": chunk_id,
        "chunkUid": opt_string(chunk_uid),
        "chunkUidAlgoVersion": opt_string(chunk_uid_algo),
        "spanHash": string_or_null(ident("spanHash")),
        "preHash": string_or_null(ident("preHash")),
        "postHash": string_or_null(ident("postHash")),
        "collisionOf": string_or_null(ident("collisionOf")),
        "virtualPath": opt_string(virtual_path),
        "file": string_or_null(chunk.get("file")),
        "fileHash": string_or_null(chunk.get("fileHash")),
        "fileHashAlgo": string_or_null(chunk.get("fileHashAlgo")),
        "segment": match segment {
            Some(_) => json!({
                "segmentId": string_or_null(seg("segmentId")),
                "segmentUid": string_or_null(seg("segmentUid")),
                "virtualPath": string_or_null(seg("virtualPath")),
                "type": string_or_null(seg("type")),
                "languageId": string_or_null(seg("languageId")),
                "parentSegmentId": string_or_null(seg("parentSegmentId")),
                "start": number_or_null(seg("start")),
                "end": number_or_null(seg("end")),
                "startLine": number_or_null(seg("startLine")),
                "endLine": number_or_null(seg("endLine")),
                "embeddingContext": string_or_null(seg("embeddingContext")),
            }),
            None => Value::Null,
        },
        "range": {
            "start": number_or_null(chunk.get("start")),
            "end": number_or_null(chunk.get("end")),
            "startLine": number_or_null(chunk.get("startLine")),
            "endLine": number_or_null(chunk.get("endLine")),
        },
        "container": ext_language(&container_ext, &container_language),
        "effective": ext_language(&effective_ext, &effective_language),
        "lang": opt_string(effective_language),
        "ext": opt_string(container_ext),
        "kind": string_or_null(chunk.get("kind")),
        "name": string_or_null(chunk.get("name")),
        "parser": parser,
        "signature": string_or_null(doc("signature")),
        "doc": string_or_null(doc("doc")),
        "annotations": non_empty_array(unique(annotations)),
        "modifiers": non_empty_array(normalize_modifiers(doc("modifiers"))),
        "params": if params.is_empty() { Value::Null } else { Value::Array(params) },
        "returns": opt_string(collect_declared_return_types(docmeta).into_iter().next()),
        "controlFlow": or_null(doc("controlFlow")),
        "dataflow": or_null(doc("dataflow")),
        "dependencies": or_null(doc("dependencies")),
        "relations": match relations {
            Some(rel) => json!({
                "calls": or_null(rel.get("calls")),
                "callLinks": or_null(rel.get("callLinks")),
                "usageLinks": or_null(rel.get("usageLinks")),
                "callSummaries": or_null(rel.get("callSummaries")),
            }),
            None => Value::Null,
        },
        "structural": or_null(doc("structural")),
        "risk": or_null(doc("risk")),
        "types": if types.is_empty() { Value::Null } else { Value::Object(types) },
        "embedded": match segment {
            Some(_) => json!({
                "parentSegmentId": string_or_null(seg("parentSegmentId")),
                "languageId": string_or_null(seg("languageId")),
                "context": string_or_null(seg("embeddingContext")),
            }),
            None => Value::Null,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_range_and_identity() {
        let chunk = json!({
            "file": "src/a.ts", "ext": ".ts", "start": 0, "end": 42,
            "startLine": 1, "endLine": 3, "chunkUid": "uid-1", "virtualPath": "src/a.ts",
            "kind": "function", "name": "run"
        });
        let meta = build_meta_v2(&chunk, None);
        assert_eq!(meta["chunkUid"], "uid-1");
        assert_eq!(meta["chunkUidAlgoVersion"], "v1");
        assert_eq!(meta["range"]["end"], 42);
        assert_eq!(meta["effective"]["ext"], ".ts");
        assert!(meta["segment"].is_null());
        assert!(meta["types"].is_null());
    }

    #[test]
    fn splits_declared_inferred_and_tooling_types() {
        let docmeta = json!({
            "paramTypes": {"x": "number"},
            "returnType": "string",
            "inferredTypes": {
                "returns": [{"type": "string", "source": "flow"}, {"type": "str", "source": "tooling"}],
                "params": {"x": [{"type": "int", "source": "tooling"}]}
            },
            "modifiers": {"async": true, "visibility": "public", "static": false}
        });
        let meta = build_meta_v2(&json!({"file": "a.ts"}), Some(&docmeta));
        let types = &meta["types"];
        assert_eq!(types["declared"]["params"]["x"][0]["type"], "number");
        assert_eq!(types["declared"]["returns"][0]["type"], "string");
        assert_eq!(types["inferred"]["returns"][0]["type"], "string");
        assert_eq!(types["tooling"]["returns"][0]["type"], "str");
        assert_eq!(types["tooling"]["params"]["x"][0]["type"], "int");
        assert_eq!(meta["returns"], "string");
        assert_eq!(meta["modifiers"], json!(["async", "public"]));
    }

    #[test]
    fn chunk_id_is_stable() {
        let chunk = json!({"file": "a", "start": 1, "end": 2});
        assert_eq!(derive_chunk_id(&chunk), derive_chunk_id(&chunk.clone()));
        assert!(derive_chunk_id(&chunk).starts_with("chunk_"));
    }
}
