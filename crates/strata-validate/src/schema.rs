//! Structural checkers for every registered artifact.
//!
//! Errors are JSON-pointer prefixed (`/3/id must be integer`). A checker keeps going after the
//! first error so one run shows the full shape of the damage, bounded by
//! [`MAX_SCHEMA_ERRORS`].

use std::fmt;

use serde_json::{Map, Value};
use strata_artifacts::columnar::is_columnar_envelope;
use strata_artifacts::kind::MANIFEST_ONLY_ALLOWLIST;
use strata_artifacts::ArtifactKind;

pub const MAX_SCHEMA_ERRORS: usize = 20;

/// What a schema name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaTarget {
    Artifact(ArtifactKind),
    /// `<name>_meta`: the shard meta sidecar of a sharded artifact.
    ShardMeta(ArtifactKind),
}

pub fn schema_target(name: &str) -> Option<SchemaTarget> {
    if let Some(kind) = ArtifactKind::from_name(name) {
        return Some(SchemaTarget::Artifact(kind));
    }
    name.strip_suffix("_meta")
        .and_then(ArtifactKind::from_name)
        .map(SchemaTarget::ShardMeta)
}

/// Known to the registry, either with a checker or as a manifest-only name.
pub fn is_registered(name: &str) -> bool {
    schema_target(name).is_some() || MANIFEST_ONLY_ALLOWLIST.contains(&name)
}

/// An artifact payload as handed to a checker.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Rows(&'a [Value]),
    Document(&'a Value),
}

impl<'a> From<&'a Value> for Payload<'a> {
    fn from(value: &'a Value) -> Self {
        Payload::Document(value)
    }
}

impl<'a> From<&'a [Value]> for Payload<'a> {
    fn from(rows: &'a [Value]) -> Self {
        Payload::Rows(rows)
    }
}

impl<'a> From<&'a Vec<Value>> for Payload<'a> {
    fn from(rows: &'a Vec<Value>) -> Self {
        Payload::Rows(rows)
    }
}

/// Check `payload` against the checker registered for `name`.
///
/// Names without a checker (manifest-only or unknown) pass; the caller decides whether an
/// unknown name is itself a problem.
pub fn check(name: &str, payload: Payload<'_>) -> Result<(), Vec<String>> {
    let Some(target) = schema_target(name) else {
        return Ok(());
    };
    let mut checker = Checker::default();
    match target {
        SchemaTarget::Artifact(kind) => checker.artifact(kind, payload),
        SchemaTarget::ShardMeta(_) => match payload {
            Payload::Document(value) => checker.shard_meta(Ptr::Root, value),
            Payload::Rows(_) => checker.push(Ptr::Root, "must be object"),
        },
    }
    checker.finish()
}

/// `<name> schema invalid (e1; e2)`.
pub fn format_schema_issue(name: &str, errors: &[String]) -> String {
    if errors.is_empty() {
        format!("{name} schema invalid")
    } else {
        format!("{name} schema invalid ({})", errors.join("; "))
    }
}

#[derive(Clone, Copy)]
enum Ptr<'a> {
    Root,
    Index(&'a Ptr<'a>, usize),
    Key(&'a Ptr<'a>, &'a str),
}

impl Ptr<'_> {
    fn write_into(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ptr::Root => Ok(()),
            Ptr::Index(parent, idx) => {
                parent.write_into(f)?;
                write!(f, "/{idx}")
            }
            Ptr::Key(parent, key) => {
                parent.write_into(f)?;
                write!(f, "/{key}")
            }
        }
    }
}

impl fmt::Display for Ptr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ptr::Root => f.write_str("/"),
            other => other.write_into(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ty {
    Integer,
    Number,
    String,
    Boolean,
    Array,
    Object,
}

impl Ty {
    fn name(self) -> &'static str {
        match self {
            Ty::Integer => "integer",
            Ty::Number => "number",
            Ty::String => "string",
            Ty::Boolean => "boolean",
            Ty::Array => "array",
            Ty::Object => "object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Ty::Integer => is_integer(value),
            Ty::Number => value.is_number(),
            Ty::String => value.is_string(),
            Ty::Boolean => value.is_boolean(),
            Ty::Array => value.is_array(),
            Ty::Object => value.is_object(),
        }
    }
}

pub(crate) fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
        _ => false,
    }
}

#[derive(Default)]
struct Checker {
    errors: Vec<String>,
    overflow: usize,
}

impl Checker {
    fn push(&mut self, ptr: Ptr<'_>, message: impl fmt::Display) {
        if self.errors.len() < MAX_SCHEMA_ERRORS {
            self.errors.push(format!("{ptr} {message}"));
        } else {
            self.overflow += 1;
        }
    }

    fn finish(mut self) -> Result<(), Vec<String>> {
        if self.errors.is_empty() {
            return Ok(());
        }
        if self.overflow > 0 {
            self.errors.push(format!("... {} more", self.overflow));
        }
        Err(self.errors)
    }

    fn ty(&mut self, ptr: Ptr<'_>, value: &Value, ty: Ty) -> bool {
        if ty.matches(value) {
            return true;
        }
        self.push(ptr, format_args!("must be {}", ty.name()));
        false
    }

    fn object<'v>(&mut self, ptr: Ptr<'_>, value: &'v Value) -> Option<&'v Map<String, Value>> {
        match value {
            Value::Object(map) => Some(map),
            _ => {
                self.push(ptr, "must be object");
                None
            }
        }
    }

    fn array<'v>(&mut self, ptr: Ptr<'_>, value: &'v Value) -> Option<&'v [Value]> {
        match value {
            Value::Array(items) => Some(items),
            _ => {
                self.push(ptr, "must be array");
                None
            }
        }
    }

    fn required<'v>(
        &mut self,
        ptr: Ptr<'_>,
        obj: &'v Map<String, Value>,
        key: &str,
    ) -> Option<&'v Value> {
        let value = obj.get(key);
        if value.is_none() {
            self.push(ptr, format_args!("must have required property '{key}'"));
        }
        value
    }

    fn required_ty(&mut self, ptr: Ptr<'_>, obj: &Map<String, Value>, key: &str, ty: Ty) {
        if let Some(value) = self.required(ptr, obj, key) {
            self.ty(Ptr::Key(&ptr, key), value, ty);
        }
    }

    /// Absent is fine; present must match `ty`, or be null when `nullable`.
    fn optional_ty(&mut self, ptr: Ptr<'_>, obj: &Map<String, Value>, key: &str, ty: Ty, nullable: bool) {
        let Some(value) = obj.get(key) else {
            return;
        };
        if ty.matches(value) || (nullable && value.is_null()) {
            return;
        }
        let child = Ptr::Key(&ptr, key);
        if nullable {
            self.push(child, format_args!("must be {},null", ty.name()));
        } else {
            self.push(child, format_args!("must be {}", ty.name()));
        }
    }

    fn array_of(&mut self, ptr: Ptr<'_>, value: &Value, ty: Ty) {
        let Some(items) = self.array(ptr, value) else {
            return;
        };
        for (idx, item) in items.iter().enumerate() {
            self.ty(Ptr::Index(&ptr, idx), item, ty);
        }
    }

    fn required_array_of(&mut self, ptr: Ptr<'_>, obj: &Map<String, Value>, key: &str, ty: Ty) {
        if let Some(value) = self.required(ptr, obj, key) {
            self.array_of(Ptr::Key(&ptr, key), value, ty);
        }
    }

    /// `[[item, ...], ...]`
    fn nested_array_of(&mut self, ptr: Ptr<'_>, value: &Value, ty: Ty) {
        let Some(lists) = self.array(ptr, value) else {
            return;
        };
        for (idx, list) in lists.iter().enumerate() {
            self.array_of(Ptr::Index(&ptr, idx), list, ty);
        }
    }

    fn rows(&mut self, payload: Payload<'_>, allow_envelope: bool, row: fn(&mut Self, Ptr<'_>, &Value)) {
        let rows = match payload {
            Payload::Rows(rows) => rows,
            Payload::Document(Value::Array(rows)) => rows.as_slice(),
            Payload::Document(value) if allow_envelope && is_columnar_envelope(value) => {
                self.columnar_envelope(Ptr::Root, value);
                return;
            }
            Payload::Document(_) => {
                self.push(Ptr::Root, "must be array");
                return;
            }
        };
        for (idx, value) in rows.iter().enumerate() {
            row(self, Ptr::Index(&Ptr::Root, idx), value);
        }
    }

    fn document<'v>(&mut self, payload: Payload<'v>) -> Option<&'v Map<String, Value>> {
        match payload {
            Payload::Document(value) => self.object(Ptr::Root, value),
            Payload::Rows(_) => {
                self.push(Ptr::Root, "must be object");
                None
            }
        }
    }

    fn artifact(&mut self, kind: ArtifactKind, payload: Payload<'_>) {
        match kind {
            ArtifactKind::ChunkMeta => self.rows(payload, true, Self::chunk_meta_row),
            ArtifactKind::FileMeta => self.rows(payload, true, |c, ptr, row| {
                if let Some(obj) = c.object(ptr, row) {
                    c.required_ty(ptr, obj, "id", Ty::Integer);
                    c.required_ty(ptr, obj, "file", Ty::String);
                }
            }),
            ArtifactKind::RepoMap => self.rows(payload, false, |c, ptr, row| {
                if let Some(obj) = c.object(ptr, row) {
                    c.required_ty(ptr, obj, "file", Ty::String);
                    c.required_ty(ptr, obj, "name", Ty::String);
                }
            }),
            ArtifactKind::FileRelations => self.rows(payload, false, |c, ptr, row| {
                if let Some(obj) = c.object(ptr, row) {
                    c.required_ty(ptr, obj, "file", Ty::String);
                    c.required_ty(ptr, obj, "relations", Ty::Object);
                }
            }),
            ArtifactKind::FieldTokens => self.rows(payload, false, |c, ptr, row| {
                if let Some(obj) = c.object(ptr, row) {
                    for key in ["name", "signature", "doc", "comment", "body"] {
                        if let Some(value) = obj.get(key).filter(|v| !v.is_null()) {
                            c.array_of(Ptr::Key(&ptr, key), value, Ty::String);
                        }
                    }
                }
            }),
            ArtifactKind::RiskSummaries => self.rows(payload, false, |c, ptr, row| {
                if let Some(obj) = c.object(ptr, row) {
                    c.required_ty(ptr, obj, "chunkUid", Ty::String);
                }
            }),
            ArtifactKind::RiskFlows => self.rows(payload, false, Self::risk_flow_row),
            ArtifactKind::CallSites => self.rows(payload, false, |c, ptr, row| {
                if let Some(obj) = c.object(ptr, row) {
                    c.required_ty(ptr, obj, "callSiteId", Ty::String);
                    c.required_ty(ptr, obj, "callerChunkUid", Ty::String);
                }
            }),
            ArtifactKind::TokenPostings => {
                if let Some(obj) = self.document(payload) {
                    self.pair_postings(Ptr::Root, obj);
                }
            }
            ArtifactKind::FieldPostings => {
                let Some(obj) = self.document(payload) else {
                    return;
                };
                let Some(fields) = self.required(Ptr::Root, obj, "fields") else {
                    return;
                };
                let fields_ptr = Ptr::Key(&Ptr::Root, "fields");
                let Some(fields) = self.object(fields_ptr, fields) else {
                    return;
                };
                for (field, entry) in fields {
                    let ptr = Ptr::Key(&fields_ptr, field);
                    if let Some(entry) = self.object(ptr, entry) {
                        self.pair_postings(ptr, entry);
                    }
                }
            }
            ArtifactKind::MinhashSignatures => {
                if let Some(obj) = self.document(payload) {
                    if let Some(signatures) = self.required(Ptr::Root, obj, "signatures") {
                        self.nested_array_of(Ptr::Key(&Ptr::Root, "signatures"), signatures, Ty::Integer);
                    }
                }
            }
            ArtifactKind::PhraseNgrams | ArtifactKind::ChargramPostings => {
                if let Some(obj) = self.document(payload) {
                    self.required_array_of(Ptr::Root, obj, "vocab", Ty::String);
                    if let Some(postings) = self.required(Ptr::Root, obj, "postings") {
                        self.nested_array_of(Ptr::Key(&Ptr::Root, "postings"), postings, Ty::Integer);
                    }
                }
            }
            ArtifactKind::FilterIndex => {
                if let Some(obj) = self.document(payload) {
                    self.required_array_of(Ptr::Root, obj, "fileById", Ty::String);
                    if let Some(chunks) = self.required(Ptr::Root, obj, "fileChunksById") {
                        self.nested_array_of(Ptr::Key(&Ptr::Root, "fileChunksById"), chunks, Ty::Integer);
                    }
                }
            }
            ArtifactKind::GraphRelations => {
                if let Some(obj) = self.document(payload) {
                    self.graph_relations(obj);
                }
            }
            ArtifactKind::DenseVectors | ArtifactKind::DenseVectorsDoc | ArtifactKind::DenseVectorsCode => {
                if let Some(obj) = self.document(payload) {
                    self.optional_ty(Ptr::Root, obj, "dims", Ty::Integer, true);
                    if let Some(vectors) = self.required(Ptr::Root, obj, "vectors") {
                        self.nested_array_of(Ptr::Key(&Ptr::Root, "vectors"), vectors, Ty::Number);
                    }
                }
            }
            ArtifactKind::IndexState => {
                if let Some(obj) = self.document(payload) {
                    self.required_ty(Ptr::Root, obj, "artifactSurfaceVersion", Ty::String);
                    self.optional_ty(Ptr::Root, obj, "riskInterprocedural", Ty::Object, true);
                }
            }
            ArtifactKind::Filelists => {
                if let Some(obj) = self.document(payload) {
                    self.required_ty(Ptr::Root, obj, "generatedAt", Ty::String);
                    for key in ["scanned", "skipped"] {
                        let Some(section) = self.required(Ptr::Root, obj, key) else {
                            continue;
                        };
                        let ptr = Ptr::Key(&Ptr::Root, key);
                        if let Some(section) = self.object(ptr, section) {
                            self.required_ty(ptr, section, "count", Ty::Integer);
                            self.required_array_of(ptr, section, "sample", Ty::Object);
                        }
                    }
                }
            }
            ArtifactKind::PiecesManifest => {
                if let Some(obj) = self.document(payload) {
                    self.required_ty(Ptr::Root, obj, "version", Ty::Integer);
                    let Some(pieces) = self.required(Ptr::Root, obj, "pieces") else {
                        return;
                    };
                    let pieces_ptr = Ptr::Key(&Ptr::Root, "pieces");
                    let Some(pieces) = self.array(pieces_ptr, pieces) else {
                        return;
                    };
                    for (idx, piece) in pieces.iter().enumerate() {
                        let ptr = Ptr::Index(&pieces_ptr, idx);
                        if let Some(piece) = self.object(ptr, piece) {
                            self.required_ty(ptr, piece, "name", Ty::String);
                            self.required_ty(ptr, piece, "path", Ty::String);
                            self.required_ty(ptr, piece, "format", Ty::String);
                        }
                    }
                }
            }
            ArtifactKind::RiskInterproceduralStats => {
                if let Some(obj) = self.document(payload) {
                    self.required_ty(Ptr::Root, obj, "status", Ty::String);
                    self.required_ty(Ptr::Root, obj, "counts", Ty::Object);
                }
            }
        }
    }

    fn chunk_meta_row(&mut self, ptr: Ptr<'_>, row: &Value) {
        let Some(obj) = self.object(ptr, row) else {
            return;
        };
        for key in ["id", "start", "end"] {
            self.required_ty(ptr, obj, key, Ty::Integer);
        }
        for key in ["fileId", "startLine", "endLine"] {
            self.optional_ty(ptr, obj, key, Ty::Integer, true);
        }
        for key in ["kind", "name", "ext"] {
            self.optional_ty(ptr, obj, key, Ty::String, true);
        }
        self.optional_ty(ptr, obj, "metaV2", Ty::Object, true);
    }

    fn risk_flow_row(&mut self, ptr: Ptr<'_>, row: &Value) {
        let Some(obj) = self.object(ptr, row) else {
            return;
        };
        self.required_ty(ptr, obj, "flowId", Ty::String);
        for end in ["source", "sink"] {
            let Some(value) = self.required(ptr, obj, end) else {
                continue;
            };
            let end_ptr = Ptr::Key(&ptr, end);
            if let Some(end_obj) = self.object(end_ptr, value) {
                self.required_ty(end_ptr, end_obj, "chunkUid", Ty::String);
                self.required_ty(end_ptr, end_obj, "ruleId", Ty::String);
            }
        }
        let Some(path) = self.required(ptr, obj, "path") else {
            return;
        };
        let path_ptr = Ptr::Key(&ptr, "path");
        let Some(path) = self.object(path_ptr, path) else {
            return;
        };
        self.required_array_of(path_ptr, path, "chunkUids", Ty::String);
        if let Some(steps) = self.required(path_ptr, path, "callSiteIdsByStep") {
            self.nested_array_of(Ptr::Key(&path_ptr, "callSiteIdsByStep"), steps, Ty::String);
        }
    }

    /// `{vocab:[string], postings:[[[docId,freq]]], docLengths:[int]}`
    fn pair_postings(&mut self, ptr: Ptr<'_>, obj: &Map<String, Value>) {
        self.required_array_of(ptr, obj, "vocab", Ty::String);
        if let Some(postings) = self.required(ptr, obj, "postings") {
            let postings_ptr = Ptr::Key(&ptr, "postings");
            if let Some(lists) = self.array(postings_ptr, postings) {
                for (token_idx, list) in lists.iter().enumerate() {
                    let list_ptr = Ptr::Index(&postings_ptr, token_idx);
                    let Some(entries) = self.array(list_ptr, list) else {
                        continue;
                    };
                    for (entry_idx, entry) in entries.iter().enumerate() {
                        let entry_ptr = Ptr::Index(&list_ptr, entry_idx);
                        let Some(pair) = self.array(entry_ptr, entry) else {
                            continue;
                        };
                        if pair.len() < 2 {
                            self.push(entry_ptr, "must NOT have fewer than 2 items");
                        }
                        for (idx, item) in pair.iter().enumerate() {
                            self.ty(Ptr::Index(&entry_ptr, idx), item, Ty::Integer);
                        }
                    }
                }
            }
        }
        self.required_array_of(ptr, obj, "docLengths", Ty::Integer);
    }

    fn graph_relations(&mut self, obj: &Map<String, Value>) {
        if let Some(version) = self.required(Ptr::Root, obj, "version") {
            let ptr = Ptr::Key(&Ptr::Root, "version");
            if self.ty(ptr, version, Ty::Integer) && version.as_i64().is_some_and(|v| v < 1) {
                self.push(ptr, "must be >= 1");
            }
        }
        self.required_ty(Ptr::Root, obj, "generatedAt", Ty::String);
        for graph in ["callGraph", "usageGraph", "importGraph"] {
            let Some(value) = self.required(Ptr::Root, obj, graph) else {
                continue;
            };
            let graph_ptr = Ptr::Key(&Ptr::Root, graph);
            let Some(graph_obj) = self.object(graph_ptr, value) else {
                continue;
            };
            self.required_ty(graph_ptr, graph_obj, "nodeCount", Ty::Integer);
            self.required_ty(graph_ptr, graph_obj, "edgeCount", Ty::Integer);
            let Some(nodes) = self.required(graph_ptr, graph_obj, "nodes") else {
                continue;
            };
            let nodes_ptr = Ptr::Key(&graph_ptr, "nodes");
            let Some(nodes) = self.array(nodes_ptr, nodes) else {
                continue;
            };
            for (idx, node) in nodes.iter().enumerate() {
                let node_ptr = Ptr::Index(&nodes_ptr, idx);
                if let Some(node) = self.object(node_ptr, node) {
                    self.required_ty(node_ptr, node, "id", Ty::String);
                    self.required_array_of(node_ptr, node, "out", Ty::String);
                    self.required_array_of(node_ptr, node, "in", Ty::String);
                }
            }
        }
    }

    fn columnar_envelope(&mut self, ptr: Ptr<'_>, value: &Value) {
        let Some(obj) = self.object(ptr, value) else {
            return;
        };
        self.required_array_of(ptr, obj, "columns", Ty::String);
        self.required_ty(ptr, obj, "arrays", Ty::Object);
        self.optional_ty(ptr, obj, "length", Ty::Integer, false);
        self.optional_ty(ptr, obj, "tables", Ty::Object, true);
    }

    fn shard_meta(&mut self, ptr: Ptr<'_>, value: &Value) {
        let Some(obj) = self.object(ptr, value) else {
            return;
        };
        if let Some(version) = obj.get("schemaVersion") {
            if !version.is_string() && !is_integer(version) {
                self.push(Ptr::Key(&ptr, "schemaVersion"), "must be string,integer");
            }
        }
        self.required_ty(ptr, obj, "totalRecords", Ty::Integer);
        let Some(parts) = self.required(ptr, obj, "parts") else {
            return;
        };
        let parts_ptr = Ptr::Key(&ptr, "parts");
        let Some(parts) = self.array(parts_ptr, parts) else {
            return;
        };
        for (idx, part) in parts.iter().enumerate() {
            let part_ptr = Ptr::Index(&parts_ptr, idx);
            match part {
                Value::String(_) => {}
                Value::Object(entry) => {
                    self.required_ty(part_ptr, entry, "path", Ty::String);
                    self.optional_ty(part_ptr, entry, "records", Ty::Integer, true);
                    self.optional_ty(part_ptr, entry, "bytes", Ty::Integer, true);
                }
                _ => self.push(part_ptr, "must be string,object"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn errors(name: &str, value: &Value) -> Vec<String> {
        check(name, Payload::Document(value)).err().unwrap_or_default()
    }

    #[test]
    fn chunk_meta_errors_are_path_prefixed() {
        let rows = json!([
            {"id": 0, "start": 0, "end": 3},
            {"id": "1", "start": 0},
            {"id": 2, "start": 0, "end": 1, "fileId": null, "ext": 5, "metaV2": []}
        ]);
        assert_eq!(
            errors("chunk_meta", &rows),
            vec![
                "/1/id must be integer".to_string(),
                "/1 must have required property 'end'".to_string(),
                "/2/ext must be string,null".to_string(),
                "/2/metaV2 must be object,null".to_string(),
            ]
        );
    }

    #[test]
    fn columnar_envelope_passes_for_chunk_meta_but_not_repo_map() {
        let envelope = json!({"format": "columnar", "columns": ["id"], "length": 1, "arrays": {"id": [0]}});
        assert!(errors("chunk_meta", &envelope).is_empty());
        assert_eq!(errors("repo_map", &envelope), vec!["/ must be array".to_string()]);
    }

    #[test]
    fn token_postings_pairs_are_checked() {
        let doc = json!({"vocab": ["a", 1], "postings": [[[0, 1], [2]], [[0, "x"]]], "docLengths": [1]});
        assert_eq!(
            errors("token_postings", &doc),
            vec![
                "/vocab/1 must be string".to_string(),
                "/postings/0/1 must NOT have fewer than 2 items".to_string(),
                "/postings/1/0/1 must be integer".to_string(),
            ]
        );
    }

    #[test]
    fn graph_relations_version_must_be_positive() {
        let graph = json!({"nodeCount": 0, "edgeCount": 0, "nodes": []});
        let doc = json!({
            "version": 0,
            "generatedAt": "2026-01-01T00:00:00Z",
            "callGraph": graph,
            "usageGraph": graph,
            "importGraph": {"nodeCount": 1, "edgeCount": 0, "nodes": [{"id": "a", "out": [], "in": [3]}]}
        });
        assert_eq!(
            errors("graph_relations", &doc),
            vec![
                "/version must be >= 1".to_string(),
                "/importGraph/nodes/0/in/0 must be string".to_string(),
            ]
        );
    }

    #[test]
    fn shard_meta_names_resolve_to_the_meta_checker() {
        assert_eq!(
            schema_target("chunk_meta_meta"),
            Some(SchemaTarget::ShardMeta(ArtifactKind::ChunkMeta))
        );
        let meta = json!({"schemaVersion": "1.0.0", "totalRecords": 2, "parts": ["a.jsonl", {"path": "b.jsonl", "records": 1}]});
        assert!(errors("chunk_meta_meta", &meta).is_empty());
        let bad = json!({"parts": [3]});
        assert_eq!(
            errors("chunk_meta_meta", &bad),
            vec![
                "/ must have required property 'totalRecords'".to_string(),
                "/parts/0 must be string,object".to_string(),
            ]
        );
    }

    #[test]
    fn registry_knows_allowlisted_and_unknown_names() {
        assert!(is_registered("dense_vectors_hnsw"));
        assert!(is_registered("risk_flows"));
        assert!(!is_registered("mystery_blob"));
        assert!(check("mystery_blob", Payload::Document(&json!(1))).is_ok());
    }

    #[test]
    fn errors_are_capped() {
        let rows: Vec<Value> = (0..30).map(|_| json!({})).collect();
        let errs = check("risk_summaries", Payload::Rows(&rows)).unwrap_err();
        assert_eq!(errs.len(), MAX_SCHEMA_ERRORS + 1);
        assert_eq!(errs.last().map(String::as_str), Some("... 10 more"));
        assert_eq!(
            format_schema_issue("risk_summaries", &errs[..1]),
            "risk_summaries schema invalid (/0 must have required property 'chunkUid')"
        );
    }
}
