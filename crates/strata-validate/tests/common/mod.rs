#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};
use strata_artifacts::manifest::{manifest_path, ARTIFACT_SURFACE_VERSION, MANIFEST_VERSION};
use strata_artifacts::meta_v2::build_meta_v2;
use strata_artifacts::{
    write_sharded_jsonl, ArtifactKind, ManifestPiece, ShardBudget, ShardWriteOptions,
};
use strata_config::StrataConfig;
use strata_validate::ValidateOptions;
use tempfile::TempDir;

pub const MODE: &str = "code";

pub fn chunk(id: u64) -> Value {
    let (file, file_id) = if id < 2 { ("src/a.ts", 0) } else { ("src/b.ts", 1) };
    let mut row = json!({
        "id": id,
        "fileId": file_id,
        "file": file,
        "ext": ".ts",
        "lang": "typescript",
        "kind": "function",
        "name": format!("fn{id}"),
        "start": id * 100,
        "end": id * 100 + 80,
        "startLine": id * 10 + 1,
        "endLine": id * 10 + 8,
        "chunkUid": format!("ck:{id}"),
        "virtualPath": file,
    });
    let docmeta = json!({"signature": format!("function fn{id}()"), "params": ["x"]});
    let meta = build_meta_v2(&row, Some(&docmeta));
    row["docmeta"] = docmeta;
    row["metaV2"] = meta;
    row
}

/// A strict-valid index for one mode, written on demand so tests can break pieces first.
pub struct IndexFixture {
    pub root: TempDir,
    pub chunk_meta: Vec<Value>,
    /// Records per part; `None` writes `chunk_meta.json`.
    pub shard_chunk_meta: Option<u64>,
    /// JSON documents keyed by artifact name.
    pub documents: BTreeMap<&'static str, Value>,
    /// JSONL rows keyed by artifact name.
    pub rows: BTreeMap<&'static str, Vec<Value>>,
    pub checksums: BTreeMap<&'static str, String>,
    pub write_manifest: bool,
}

impl IndexFixture {
    pub fn new() -> Self {
        let chunk_meta: Vec<Value> = (0..3).map(chunk).collect();
        let mut documents = BTreeMap::new();
        documents.insert(
            "file_meta",
            json!([
                {"id": 0, "file": "src/a.ts", "ext": ".ts"},
                {"id": 1, "file": "src/b.ts", "ext": ".ts"},
            ]),
        );
        documents.insert(
            "token_postings",
            json!({
                "vocab": ["alpha", "beta"],
                "postings": [[[0, 2], [2, 1]], [[1, 1]]],
                "docLengths": [4, 3, 5],
            }),
        );
        documents.insert(
            "phrase_ngrams",
            json!({"vocab": ["alpha beta"], "postings": [[0, 1]]}),
        );
        documents.insert(
            "chargram_postings",
            json!({"vocab": ["alp", "bet"], "postings": [[0, 2], [1]]}),
        );
        documents.insert(
            "field_postings",
            json!({
                "fields": {
                    "name": {
                        "vocab": ["fn0", "fn1", "fn2"],
                        "postings": [[[0, 1]], [[1, 1]], [[2, 1]]],
                        "docLengths": [1, 1, 1],
                    }
                }
            }),
        );
        documents.insert(
            "field_tokens",
            json!([
                {"name": ["fn0"], "body": ["alpha"]},
                {"name": ["fn1"], "body": ["beta"]},
                {"name": ["fn2"], "body": ["alpha"]},
            ]),
        );
        documents.insert(
            "index_state",
            json!({"artifactSurfaceVersion": ARTIFACT_SURFACE_VERSION, "mode": MODE}),
        );
        documents.insert(
            "filelists",
            json!({
                "generatedAt": "2026-01-01T00:00:00Z",
                "scanned": {"count": 2, "sample": [{"file": "src/a.ts"}]},
                "skipped": {"count": 0, "sample": []},
            }),
        );
        Self {
            root: tempfile::tempdir().unwrap(),
            chunk_meta,
            shard_chunk_meta: None,
            documents,
            rows: BTreeMap::new(),
            checksums: BTreeMap::new(),
            write_manifest: true,
        }
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.path().join(format!("index-{MODE}"))
    }

    pub fn doc_mut(&mut self, name: &'static str) -> &mut Value {
        self.documents.get_mut(name).unwrap()
    }

    /// Turn on interprocedural risk output with one well-formed flow.
    pub fn with_risk(mut self) -> Self {
        self.doc_mut("index_state")["riskInterprocedural"] =
            json!({"enabled": true, "summaryOnly": false, "emitArtifacts": "jsonl"});
        self.documents.insert(
            "risk_interprocedural_stats",
            json!({
                "status": "ok",
                "counts": {
                    "summariesEmitted": 2,
                    "flowsEmitted": 1,
                    "risksWithFlows": 1,
                    "uniqueCallSitesReferenced": 1,
                },
            }),
        );
        self.rows.insert(
            "risk_summaries",
            vec![json!({"chunkUid": "ck:0"}), json!({"chunkUid": "ck:1"})],
        );
        self.rows.insert(
            "call_sites",
            vec![json!({"callSiteId": "cs:1", "callerChunkUid": "ck:0", "calleeName": "fn1"})],
        );
        self.rows.insert(
            "risk_flows",
            vec![json!({
                "flowId": "flow:1",
                "source": {"chunkUid": "ck:0", "ruleId": "source.request"},
                "sink": {"chunkUid": "ck:1", "ruleId": "sink.exec"},
                "path": {"chunkUids": ["ck:0", "ck:1"], "callSiteIdsByStep": [["cs:1"]]},
            })],
        );
        self
    }

    fn piece(&self, name: &str, path: &str, format: &str) -> Value {
        let mut piece = json!({"name": name, "path": path, "format": format});
        if let Some(checksum) = self.checksums.get(name) {
            piece["checksum"] = json!(checksum);
        }
        piece
    }

    /// Write every artifact plus the manifest and return strict options for the mode.
    pub fn write(&self) -> ValidateOptions {
        let dir = self.index_dir();
        fs::create_dir_all(&dir).unwrap();
        let mut pieces = Vec::new();

        match self.shard_chunk_meta {
            Some(records) => {
                let opts = ShardWriteOptions {
                    budget: ShardBudget {
                        max_part_records: Some(records),
                        ..ShardBudget::default()
                    },
                    generated_at: None,
                };
                let out = write_sharded_jsonl(&dir, ArtifactKind::ChunkMeta, &self.chunk_meta, &opts)
                    .unwrap();
                pieces.extend(out.pieces.iter().map(piece_json));
            }
            None => {
                write_json(&dir.join("chunk_meta.json"), &Value::Array(self.chunk_meta.clone()));
                pieces.push(self.piece("chunk_meta", "chunk_meta.json", "json"));
            }
        }
        for (name, doc) in &self.documents {
            let path = if *name == "filelists" {
                ".filelists.json".to_string()
            } else {
                format!("{name}.json")
            };
            write_json(&dir.join(&path), doc);
            pieces.push(self.piece(name, &path, "json"));
        }
        for (name, rows) in &self.rows {
            let path = format!("{name}.jsonl");
            let mut body = String::new();
            for row in rows {
                body.push_str(&serde_json::to_string(row).unwrap());
                body.push('\n');
            }
            fs::write(dir.join(&path), body).unwrap();
            pieces.push(self.piece(name, &path, "jsonl"));
        }

        if self.write_manifest {
            let manifest = json!({
                "version": MANIFEST_VERSION,
                "artifactSurfaceVersion": ARTIFACT_SURFACE_VERSION,
                "mode": MODE,
                "pieces": pieces,
            });
            let path = manifest_path(&dir);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            write_json(&path, &manifest);
        }
        self.options()
    }

    pub fn options(&self) -> ValidateOptions {
        let mut opts = ValidateOptions::from_config(self.root.path(), &StrataConfig::default());
        opts.modes = vec![MODE.to_string()];
        opts.sqlite.enabled = false;
        opts.manifest_retry_attempts = 1;
        opts.manifest_retry_base = Duration::from_millis(1);
        opts
    }
}

fn piece_json(piece: &ManifestPiece) -> Value {
    serde_json::to_value(piece).unwrap()
}

pub fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}
