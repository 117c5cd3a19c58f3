use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use serde_json::json;

fn strata() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("strata"))
}

/// A partial index with `chunks` chunks, enough for a non-strict assembly.
fn partial_index(dir: &assert_fs::fixture::ChildPath, file: &str, chunks: usize, token: &str) {
    dir.create_dir_all().unwrap();
    let rows: Vec<_> = (0..chunks)
        .map(|id| json!({"id": id, "file": file, "ext": ".rs", "start": id * 10, "end": id * 10 + 9}))
        .collect();
    dir.child("chunk_meta.json")
        .write_str(&serde_json::to_string(&rows).unwrap())
        .unwrap();
    let postings: Vec<_> = (0..chunks).map(|id| json!([id, 1])).collect();
    dir.child("token_postings.json")
        .write_str(
            &json!({"vocab": [token], "postings": [postings], "docLengths": vec![1; chunks]})
                .to_string(),
        )
        .unwrap();
    dir.child("phrase_ngrams.json")
        .write_str(&json!({"vocab": [format!("{token} call")], "postings": [[0]]}).to_string())
        .unwrap();
    dir.child("chargram_postings.json")
        .write_str(&json!({"vocab": [token.get(..3).unwrap()], "postings": [[0]]}).to_string())
        .unwrap();
    dir.child("index_state.json")
        .write_str(r#"{"artifactSurfaceVersion":"1.0.0"}"#)
        .unwrap();
}

#[test]
fn help_mentions_core_commands() {
    strata().arg("--help").assert().success().stdout(
        predicate::str::contains("validate").and(predicate::str::contains("assemble")),
    );
}

#[test]
fn missing_root_exits_with_usage_error() {
    let temp = TempDir::new().unwrap();
    strata()
        .arg("validate")
        .arg("--root")
        .arg(temp.path().join("absent"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("absent"));
}

#[test]
fn empty_mode_directory_fails_validation() {
    let temp = TempDir::new().unwrap();
    temp.child("index-code").create_dir_all().unwrap();

    let output = strata()
        .args(["validate", "--mode", "code", "--non-strict", "--json", "--root"])
        .arg(temp.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(v["ok"], false);
    assert_eq!(v["modes"]["code"]["ok"], false);
    let issues = v["issues"].as_array().unwrap();
    assert!(issues.contains(&json!("[code] missing chunk_meta")), "{issues:?}");
}

#[test]
fn assembled_index_validates() {
    let temp = TempDir::new().unwrap();
    let a = temp.child("parts/a");
    let b = temp.child("parts/b");
    partial_index(&a, "src/a.rs", 2, "alpha");
    partial_index(&b, "src/b.rs", 3, "beta");
    let config = temp.child("strata.toml");
    config.write_str("[postings]\nfielded = false\n").unwrap();

    let out = temp.child("index-code");
    let output = strata()
        .args(["assemble", "--non-strict", "--json", "--out"])
        .arg(out.path())
        .arg(a.path())
        .arg(b.path())
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["chunkCount"], 5);
    assert_eq!(summary["inputs"], 2);
    out.child("pieces/manifest.json").assert(predicate::path::exists());

    strata()
        .args(["validate", "--mode", "code", "--non-strict", "--no-sqlite", "--root"])
        .arg(temp.path())
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("summary: ok"));
}
