use serde_json::{json, Value};
use strata_artifacts::{
    load_chunk_meta, write_sharded_jsonl, ArtifactKind, ChunkMetaSource, PresenceCache,
    ResolveOptions, ShardWriteOptions, DEFAULT_MAX_JSON_BYTES,
};

fn lenient() -> ResolveOptions {
    ResolveOptions {
        strict: false,
        ..ResolveOptions::default()
    }
}

#[test]
fn sharded_rows_are_hydrated_from_file_meta() {
    let tmp = tempfile::tempdir().unwrap();
    let rows = vec![
        json!({"id": 0, "fileId": 0, "start": 0, "end": 10, "chunkUid": "u0"}),
        json!({"id": 1, "fileId": 1, "start": 0, "end": 5, "file": "kept.md", "metaV2": {"chunkUid": "u1"}}),
    ];
    write_sharded_jsonl(tmp.path(), ArtifactKind::ChunkMeta, &rows, &ShardWriteOptions::default()).unwrap();
    std::fs::write(
        tmp.path().join("file_meta.json"),
        serde_json::to_vec(&json!([
            {"id": 0, "file": "src/a.rs", "ext": ".rs", "hash": "h0", "hashAlgo": "sha1"},
            {"id": 1, "file": "docs/b.md", "ext": ".md"}
        ]))
        .unwrap(),
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("index_state.json"),
        br#"{"artifactSurfaceVersion":"1.0.0","mode":"code"}"#,
    )
    .unwrap();

    let mut cache = PresenceCache::new(tmp.path(), None, lenient());
    let loaded = load_chunk_meta(&mut cache, DEFAULT_MAX_JSON_BYTES).unwrap();
    assert_eq!(loaded.source, ChunkMetaSource::Jsonl);
    assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
    assert_eq!(loaded.chunk_meta[0]["file"], "src/a.rs");
    assert_eq!(loaded.chunk_meta[0]["fileHash"], "h0");
    assert_eq!(loaded.chunk_meta[0]["fileHashAlgo"], "sha1");
    assert_eq!(loaded.chunk_meta[1]["file"], "kept.md");
    assert_eq!(loaded.chunk_meta[1]["ext"], ".md");
    assert_eq!(loaded.file_meta.as_ref().map(Vec::len), Some(2));
    assert_eq!(loaded.index_state.as_ref().unwrap()["mode"], "code");
    assert_eq!(
        loaded.chunk_uids.iter().cloned().collect::<Vec<_>>(),
        vec!["u0".to_string(), "u1".to_string()]
    );
}

#[test]
fn rows_wrapper_falls_back_with_a_warning() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("chunk_meta.json"),
        serde_json::to_vec(&json!({"rows": [{"id": 0, "file": "a"}, {"id": 1, "file": "b"}]})).unwrap(),
    )
    .unwrap();

    let mut cache = PresenceCache::new(tmp.path(), None, lenient());
    let loaded = load_chunk_meta(&mut cache, DEFAULT_MAX_JSON_BYTES).unwrap();
    assert_eq!(loaded.source, ChunkMetaSource::MonolithicFallback);
    assert_eq!(loaded.chunk_meta.len(), 2);
    assert_eq!(loaded.warnings.len(), 1);
    assert!(loaded.warnings[0].contains("monolithic"));
    assert!(loaded.file_meta.is_none());
}

#[test]
fn columnar_envelope_is_inflated() {
    let tmp = tempfile::tempdir().unwrap();
    let envelope = json!({
        "format": "columnar",
        "columns": ["id", "file", "start"],
        "length": 2,
        "arrays": {"id": [0, 1], "file": [0, 0], "start": [0, 20]},
        "tables": {"file": ["src/only.rs"]}
    });
    std::fs::write(tmp.path().join("chunk_meta.json"), serde_json::to_vec(&envelope).unwrap()).unwrap();

    let mut cache = PresenceCache::new(tmp.path(), None, lenient());
    let loaded = load_chunk_meta(&mut cache, DEFAULT_MAX_JSON_BYTES).unwrap();
    assert_eq!(loaded.source, ChunkMetaSource::Json);
    let files: Vec<&Value> = loaded.chunk_meta.iter().map(|row| &row["file"]).collect();
    assert_eq!(files, vec![&json!("src/only.rs"), &json!("src/only.rs")]);
    assert_eq!(loaded.chunk_meta[1]["start"], 20);
}

#[test]
fn absent_chunk_meta_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cache = PresenceCache::new(tmp.path(), None, lenient());
    let err = load_chunk_meta(&mut cache, DEFAULT_MAX_JSON_BYTES).unwrap_err();
    assert!(err.is_not_found(), "{err}");
}
