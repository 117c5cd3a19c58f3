use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use strata_artifacts::codec::{bytes_checksum, ChecksumAlgo};
use strata_artifacts::manifest::{
    manifest_path, validate_entries, verify_piece_checksum, ChecksumOutcome, ManifestEntryIssue,
};
use strata_artifacts::{
    load_manifest, sum_manifest_counts, ArtifactError, Manifest, ManifestLoadOptions,
};

fn manifest(value: serde_json::Value) -> Manifest {
    Manifest::from_value(Path::new("manifest.json"), value).unwrap()
}

fn write_manifest(dir: &Path, value: &serde_json::Value) {
    let path = manifest_path(dir);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
}

#[test]
fn counts_are_summed_per_exact_name() {
    let m = manifest(json!({
        "pieces": [
            {"name": "symbols", "count": 2, "path": "a"},
            {"name": "symbols", "count": 3, "path": "b"},
            {"name": "symbols_meta", "path": "c"}
        ]
    }));
    assert_eq!(sum_manifest_counts(&m, "symbols"), Some(5));
    assert_eq!(sum_manifest_counts(&m, "symbols_meta"), None);
    assert_eq!(sum_manifest_counts(&m, "absent"), None);
}

#[test]
fn strict_load_waits_for_a_late_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().to_path_buf();
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        write_manifest(&dir, &json!({"version": 2, "pieces": []}));
    });
    let opts = ManifestLoadOptions {
        retry_attempts: 3,
        retry_base: Duration::from_millis(25),
        ..ManifestLoadOptions::default()
    };
    let loaded = load_manifest(tmp.path(), &opts);
    writer.join().unwrap();
    assert!(loaded.is_ok(), "{:?}", loaded.err());
}

#[test]
fn non_strict_load_does_not_retry() {
    let tmp = tempfile::tempdir().unwrap();
    let opts = ManifestLoadOptions {
        strict: false,
        retry_base: Duration::from_secs(5),
        ..ManifestLoadOptions::default()
    };
    let started = Instant::now();
    let err = load_manifest(tmp.path(), &opts).unwrap_err();
    assert!(matches!(err, ArtifactError::ManifestMissing { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn entry_validation_reports_each_problem() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("chunk_meta.json"), b"[]").unwrap();
    let m = manifest(json!({
        "pieces": [
            {"name": "chunk_meta", "path": "chunk_meta.json"},
            {"name": "file_meta", "path": "chunk_meta.json"},
            {"name": "", "path": "x.json"},
            {"name": "repo_map", "path": "../escape.json"},
            {"name": "repo_map", "path": "dir\\repo_map.json"},
            {"name": "mystery_blob", "path": "mystery.json"},
            {"name": "dense_vectors_hnsw", "path": "dense_vectors_hnsw.bin"}
        ]
    }));
    let issues = validate_entries(&m, tmp.path(), true);
    assert!(issues.contains(&ManifestEntryIssue::DuplicatePath("chunk_meta.json".to_string())));
    assert!(issues.contains(&ManifestEntryIssue::MissingName));
    assert!(issues.contains(&ManifestEntryIssue::UnsafePath("../escape.json".to_string())));
    assert!(issues.contains(&ManifestEntryIssue::BackslashSeparators(
        "dir\\repo_map.json".to_string()
    )));
    assert!(issues.contains(&ManifestEntryIssue::UnknownName("mystery_blob".to_string())));
    assert!(!issues.contains(&ManifestEntryIssue::UnknownName(
        "dense_vectors_hnsw".to_string()
    )));
}

#[test]
fn checksums_match_mismatch_and_unsupported() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("token_postings.json");
    let bytes = br#"{"vocab":[],"postings":[]}"#;
    std::fs::write(&path, bytes).unwrap();
    let digest = bytes_checksum(bytes, ChecksumAlgo::Sha1);

    let piece = |checksum: &str| {
        manifest(json!({"pieces": [{"name": "token_postings", "path": "token_postings.json", "checksum": checksum}]}))
            .pieces
            .remove(0)
    };

    let ok = verify_piece_checksum(&piece(&format!("sha1:{digest}")), &path).unwrap();
    assert_eq!(ok, Some(ChecksumOutcome::Match));

    let bad = verify_piece_checksum(&piece(&format!("sha1:{}", "0".repeat(40))), &path).unwrap();
    assert!(matches!(bad, Some(ChecksumOutcome::Mismatch { .. })));

    let unsupported = verify_piece_checksum(&piece("md5:abcd"), &path).unwrap();
    assert!(matches!(unsupported, Some(ChecksumOutcome::Unsupported { .. })));

    let xxh = bytes_checksum(bytes, ChecksumAlgo::Xxh64);
    let ok = verify_piece_checksum(&piece(&format!("xxh64:{xxh}")), &path).unwrap();
    assert_eq!(ok, Some(ChecksumOutcome::Match));
}
