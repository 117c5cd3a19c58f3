//! Byte-bounded JSON and JSONL reads with an ordered fallback chain.
//!
//! A logical file `x.json` may be present as `x.json`, `x.json.gz`, `x.json.zst` or
//! `x.json.bak`. Candidates are tried in that order and the first one that decodes wins.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::{read_decoded, Compression};
use crate::error::{ArtifactError, Result};
use crate::util::with_suffix;

/// One failed attempt in a fallback chain.
#[derive(Debug)]
pub struct CandidateError {
    pub path: PathBuf,
    pub error: ArtifactError,
}

/// Outcome of trying candidates in order.
#[derive(Debug)]
pub enum FirstOk<T> {
    Found { value: T, source: PathBuf },
    AllFailed(Vec<CandidateError>),
}

impl<T> FirstOk<T> {
    /// Collapse into a `Result`, choosing which error to surface.
    ///
    /// A terminal error (size violation) always wins. Otherwise the last candidate that existed
    /// but failed is reported; if nothing existed the error is `NotFound` for `primary`.
    pub fn into_result(self, primary: &Path) -> Result<(T, PathBuf)> {
        let errors = match self {
            FirstOk::Found { value, source } => return Ok((value, source)),
            FirstOk::AllFailed(errors) => errors,
        };
        let mut surfaced = None;
        for candidate in errors {
            if !candidate.error.allows_fallback() {
                return Err(candidate.error);
            }
            if !candidate.error.is_not_found() {
                surfaced = Some(candidate.error);
            }
        }
        Err(surfaced.unwrap_or_else(|| ArtifactError::NotFound {
            path: primary.to_path_buf(),
        }))
    }
}

/// Evaluate `attempt` over `candidates` until one succeeds or a terminal error occurs.
pub fn first_ok<T>(
    candidates: &[PathBuf],
    mut attempt: impl FnMut(&Path) -> Result<T>,
) -> FirstOk<T> {
    let mut errors = Vec::new();
    for path in candidates {
        match attempt(path) {
            Ok(value) => {
                if !errors.is_empty() {
                    tracing::debug!(
                        target: "strata.artifacts",
                        path = %path.display(),
                        skipped = errors.len(),
                        "read artifact from fallback candidate"
                    );
                }
                return FirstOk::Found {
                    value,
                    source: path.clone(),
                };
            }
            Err(error) => {
                let terminal = !error.allows_fallback();
                if !error.is_not_found() {
                    tracing::debug!(
                        target: "strata.artifacts",
                        path = %path.display(),
                        error = %error,
                        "artifact candidate failed"
                    );
                }
                errors.push(CandidateError {
                    path: path.clone(),
                    error,
                });
                if terminal {
                    break;
                }
            }
        }
    }
    FirstOk::AllFailed(errors)
}

/// Physical candidates for `primary`, in the order they are tried.
///
/// A primary that already names a compressed file only falls back to its `.bak` sibling.
pub fn candidate_paths(primary: &Path) -> Vec<PathBuf> {
    if Compression::from_path(primary) != Compression::None {
        return vec![primary.to_path_buf(), with_suffix(primary, ".bak")];
    }
    vec![
        primary.to_path_buf(),
        with_suffix(primary, ".gz"),
        with_suffix(primary, ".zst"),
        with_suffix(primary, ".bak"),
    ]
}

/// Parse one JSON document from `path` without consulting fallbacks.
pub fn read_json_file(path: &Path, max_bytes: u64) -> Result<Value> {
    let bytes = read_decoded(path, max_bytes)?;
    serde_json::from_slice(&bytes).map_err(|err| ArtifactError::parse_invalid(path, &err))
}

/// Parse one JSONL file from `path` without consulting fallbacks.
pub fn read_jsonl_file(path: &Path, max_bytes: u64) -> Result<Vec<Value>> {
    let bytes = read_decoded(path, max_bytes)?;
    parse_jsonl(path, &bytes)
}

/// Read a JSON document through the fallback chain, returning the path that was used.
pub fn read_json_with_source(path: &Path, max_bytes: u64) -> Result<(Value, PathBuf)> {
    first_ok(&candidate_paths(path), |candidate| {
        read_json_file(candidate, max_bytes)
    })
    .into_result(path)
}

pub fn read_json_value(path: &Path, max_bytes: u64) -> Result<Value> {
    read_json_with_source(path, max_bytes).map(|(value, _)| value)
}

pub fn read_json<T: DeserializeOwned>(path: &Path, max_bytes: u64) -> Result<T> {
    let (value, source) = read_json_with_source(path, max_bytes)?;
    serde_json::from_value(value).map_err(|err| ArtifactError::parse_invalid(&source, &err))
}

/// Read a JSONL file through the fallback chain.
pub fn read_jsonl_values(path: &Path, max_bytes: u64) -> Result<Vec<Value>> {
    first_ok(&candidate_paths(path), |candidate| {
        read_jsonl_file(candidate, max_bytes)
    })
    .into_result(path)
    .map(|(rows, _)| rows)
}

/// Split `bytes` into JSON values, one per non-blank line.
pub fn parse_jsonl(path: &Path, bytes: &[u8]) -> Result<Vec<Value>> {
    let mut rows = Vec::new();
    for (idx, line) in bytes.split(|&b| b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let value = serde_json::from_slice(line)
            .map_err(|err| ArtifactError::line_invalid(path, idx + 1, &err))?;
        rows.push(value);
    }
    Ok(rows)
}

/// Whether any fallback candidate for `primary` exists on disk.
pub fn any_candidate_exists(primary: &Path) -> bool {
    candidate_paths(primary)
        .iter()
        .any(|candidate| crate::util::exists(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use serde_json::json;

    #[test]
    fn primary_wins_over_siblings() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index_state.json");
        std::fs::write(&path, br#"{"stage":"primary"}"#).unwrap();
        std::fs::write(with_suffix(&path, ".bak"), br#"{"stage":"bak"}"#).unwrap();

        let (value, source) = read_json_with_source(&path, 1024).unwrap();
        assert_eq!(value, json!({"stage": "primary"}));
        assert_eq!(source, path);
    }

    #[test]
    fn corrupt_primary_falls_through_to_compressed_sibling() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index_state.json");
        std::fs::write(&path, b"{not json").unwrap();
        std::fs::write(
            with_suffix(&path, ".zst"),
            encode(br#"{"stage":"zst"}"#, Compression::Zstd).unwrap(),
        )
        .unwrap();

        assert_eq!(read_json_value(&path, 1024).unwrap(), json!({"stage": "zst"}));
    }

    #[test]
    fn last_existing_error_surfaces() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index_state.json");
        std::fs::write(with_suffix(&path, ".bak"), b"[1,").unwrap();

        let err = read_json_value(&path, 1024).unwrap_err();
        match err {
            ArtifactError::ParseInvalid { path: failed, .. } => {
                assert_eq!(failed, with_suffix(&path, ".bak"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_everywhere_is_not_found_for_primary() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index_state.json");
        match read_json_value(&path, 1024).unwrap_err() {
            ArtifactError::NotFound { path: missing } => assert_eq!(missing, path),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!any_candidate_exists(&path));
    }

    #[test]
    fn oversized_primary_is_not_replaced_by_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("chunk_meta.json");
        std::fs::write(&path, vec![b' '; 256]).unwrap();
        std::fs::write(with_suffix(&path, ".bak"), b"[]").unwrap();

        let err = read_json_value(&path, 64).unwrap_err();
        assert!(matches!(err, ArtifactError::SizeExceeded { .. }), "{err:?}");
    }

    #[test]
    fn compressed_primary_only_falls_back_to_bak() {
        let candidates = candidate_paths(Path::new("dir/a.jsonl.gz"));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("dir/a.jsonl.gz"),
                PathBuf::from("dir/a.jsonl.gz.bak")
            ]
        );
    }

    #[test]
    fn jsonl_skips_blank_lines_and_reports_line_numbers() {
        let path = Path::new("rows.jsonl");
        let rows = parse_jsonl(path, b"{\"id\":0}\r\n\n  \n{\"id\":1}\n").unwrap();
        assert_eq!(rows, vec![json!({"id": 0}), json!({"id": 1})]);

        let err = parse_jsonl(path, b"{\"id\":0}\n\n{\"id\":\n").unwrap_err();
        match err {
            ArtifactError::LineInvalid { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
