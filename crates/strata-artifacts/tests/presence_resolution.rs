use std::path::Path;

use serde_json::{json, Value};
use strata_artifacts::columnar::write_binary_columnar;
use strata_artifacts::manifest::manifest_path;
use strata_artifacts::presence::PresenceSource;
use strata_artifacts::{
    load_manifest, resolve_presence, write_sharded_jsonl, ArtifactError, ArtifactKind,
    Emptiness, ManifestLoadOptions, PresenceCache, PresenceFormat, ResolveOptions, ShardBudget,
    ShardWriteOptions,
};

fn write_manifest(dir: &Path, pieces: Value) {
    let path = manifest_path(dir);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        path,
        serde_json::to_vec(&json!({"version": 2, "artifactSurfaceVersion": "1.0.0", "pieces": pieces})).unwrap(),
    )
    .unwrap();
}

fn one_row_shards() -> ShardWriteOptions {
    ShardWriteOptions {
        budget: ShardBudget {
            max_part_bytes: 1,
            ..ShardBudget::default()
        },
        generated_at: None,
    }
}

#[test]
fn missing_shard_paths_are_recorded_not_thrown() {
    let tmp = tempfile::tempdir().unwrap();
    let rows: Vec<Value> = (0..3).map(|id| json!({"id": id})).collect();
    let out = write_sharded_jsonl(tmp.path(), ArtifactKind::ChunkMeta, &rows, &one_row_shards()).unwrap();
    write_manifest(tmp.path(), serde_json::to_value(&out.pieces).unwrap());
    std::fs::remove_file(tmp.path().join("chunk_meta.parts/chunk_meta.part-00001.jsonl")).unwrap();

    let manifest = load_manifest(tmp.path(), &ManifestLoadOptions::default()).unwrap();
    let presence = resolve_presence(tmp.path(), Some(&manifest), "chunk_meta", ResolveOptions::default());
    assert!(presence.error.is_none());
    assert_eq!(presence.format, PresenceFormat::Sharded);
    assert_eq!(presence.source, PresenceSource::Manifest);
    assert_eq!(presence.paths.len(), 3);
    assert_eq!(
        presence.missing_paths,
        vec![tmp.path().join("chunk_meta.parts/chunk_meta.part-00001.jsonl")]
    );
    assert!(!presence.missing_meta);
}

#[test]
fn strict_meta_parts_must_be_listed_in_the_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let rows: Vec<Value> = (0..2).map(|id| json!({"id": id})).collect();
    let out = write_sharded_jsonl(tmp.path(), ArtifactKind::ChunkMeta, &rows, &one_row_shards()).unwrap();
    // Drop the second part entry, keep the meta entry.
    let pieces: Vec<_> = out
        .pieces
        .iter()
        .filter(|piece| !piece.raw_path().ends_with("part-00001.jsonl"))
        .collect();
    write_manifest(tmp.path(), serde_json::to_value(&pieces).unwrap());
    let manifest = load_manifest(tmp.path(), &ManifestLoadOptions::default()).unwrap();

    let strict = resolve_presence(tmp.path(), Some(&manifest), "chunk_meta", ResolveOptions::default());
    match strict.error {
        Some(ArtifactError::ManifestIncomplete { missing, .. }) => {
            assert_eq!(missing, vec!["chunk_meta.parts/chunk_meta.part-00001.jsonl"]);
        }
        other => panic!("unexpected resolution error: {other:?}"),
    }

    let lenient = resolve_presence(
        tmp.path(),
        Some(&manifest),
        "chunk_meta",
        ResolveOptions {
            strict: false,
            ..ResolveOptions::default()
        },
    );
    assert!(lenient.error.is_none());
    assert_eq!(lenient.load_rows(1 << 20).unwrap(), rows);
}

#[test]
fn legacy_parts_directory_is_discovered_without_a_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let parts = tmp.path().join("file_relations.parts");
    std::fs::create_dir_all(&parts).unwrap();
    std::fs::write(parts.join("file_relations.part-00000.jsonl"), b"{\"file\":\"a\",\"relations\":{}}\n").unwrap();
    std::fs::write(parts.join("file_relations.part-00001.jsonl"), b"{\"file\":\"b\",\"relations\":{}}\n").unwrap();
    std::fs::write(parts.join("notes.txt"), b"ignored").unwrap();

    let presence = resolve_presence(tmp.path(), None, "file_relations", ResolveOptions::default());
    assert_eq!(presence.source, PresenceSource::Legacy);
    assert_eq!(presence.format, PresenceFormat::Sharded);
    assert_eq!(presence.paths.len(), 2);
    let rows = presence.load_rows(1 << 20).unwrap();
    assert_eq!(rows[1]["file"], "b");
}

#[test]
fn legacy_probe_prefers_jsonl_over_json() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("repo_map.json"), b"[]").unwrap();
    std::fs::write(tmp.path().join("repo_map.jsonl"), b"{\"file\":\"a\",\"name\":\"x\"}\n").unwrap();
    let presence = resolve_presence(tmp.path(), None, "repo_map", ResolveOptions::default());
    assert_eq!(presence.format, PresenceFormat::Jsonl);
    assert_eq!(presence.load_rows(1 << 20).unwrap().len(), 1);
}

#[test]
fn missing_artifact_is_empty_and_unresolved() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cache = PresenceCache::new(tmp.path(), None, ResolveOptions::default());
    let presence = cache.resolve("risk_flows");
    assert!(presence.is_missing());
    assert_eq!(presence.source, PresenceSource::None);
    assert_eq!(presence.probe_empty(1024), Emptiness::Empty);
}

#[test]
fn binary_columnar_rows_decode_in_order_with_file_table() {
    let tmp = tempfile::tempdir().unwrap();
    let rows = vec![
        json!({"id": 0, "file": "src/a.rs", "start": 0, "end": 4}),
        json!({"id": 1, "file": "src/b.rs", "start": 0, "end": 8}),
        json!({"id": 2, "file": "src/a.rs", "start": 5, "end": 9}),
    ];
    write_binary_columnar(tmp.path(), ArtifactKind::ChunkMeta, &rows).unwrap();

    let presence = resolve_presence(tmp.path(), None, "chunk_meta", ResolveOptions::default());
    assert_eq!(presence.format, PresenceFormat::BinaryColumnar);
    assert_eq!(presence.probe_empty(1024), Emptiness::NonEmpty);
    let decoded = presence.load_rows(1 << 20).unwrap();
    assert_eq!(decoded, rows);
}

#[test]
fn manifest_declared_binary_columnar_sidecars_resolve() {
    let tmp = tempfile::tempdir().unwrap();
    let rows = vec![json!({"id": 0, "file": "x.rs"})];
    write_binary_columnar(tmp.path(), ArtifactKind::ChunkMeta, &rows).unwrap();
    write_manifest(
        tmp.path(),
        json!([
            {"name": "chunk_meta", "format": "binary-columnar", "path": "chunk_meta.binary-columnar.bin"},
            {"name": "chunk_meta_binary_columnar_meta", "format": "json", "path": "chunk_meta.binary-columnar.meta.json"},
            {"name": "chunk_meta_binary_columnar_offsets", "format": "binary", "path": "chunk_meta.binary-columnar.offsets.bin"},
            {"name": "chunk_meta_binary_columnar_lengths", "format": "binary", "path": "chunk_meta.binary-columnar.lengths.varint"}
        ]),
    );
    let manifest = load_manifest(tmp.path(), &ManifestLoadOptions::default()).unwrap();
    let presence = resolve_presence(tmp.path(), Some(&manifest), "chunk_meta", ResolveOptions::default());
    assert!(presence.error.is_none(), "{:?}", presence.error);
    assert_eq!(presence.format, PresenceFormat::BinaryColumnar);
    assert!(presence.missing_paths.is_empty());
    assert_eq!(presence.load_rows(1 << 20).unwrap(), rows);
}
