//! Parity sampling between `chunk_meta` and the mode's sqlite database.
//!
//! The database is corroborating infrastructure: failing to open or query it is a warning.
//! Only a missing database file, missing tables, or diverging rows are issues. Each query
//! runs on its own read-only handle.

use std::path::Path;

use rusqlite::{params, Connection, OpenFlags};
use serde_json::{Map, Value};
use strata_artifacts::meta_v2::build_meta_v2;
use strata_artifacts::stable::stable_stringify;
use strata_config::ScoreMode;

use crate::error::{Result, ValidateError};
use crate::report::{Report, SQLITE_HINT};

/// Rows compared per mode.
pub const SQLITE_SAMPLE_ROWS: i64 = 10;

const BM25_TABLES: [&str; 12] = [
    "chunks",
    "token_vocab",
    "token_postings",
    "doc_lengths",
    "token_stats",
    "phrase_vocab",
    "phrase_postings",
    "chargram_vocab",
    "chargram_postings",
    "minhash_signatures",
    "dense_vectors",
    "dense_meta",
];

const FTS_TABLES: [&str; 5] = [
    "chunks",
    "chunks_fts",
    "minhash_signatures",
    "dense_vectors",
    "dense_meta",
];

/// metaV2 fields that must agree between the JSONL and sqlite copies.
pub const PARITY_FIELDS: [&str; 8] = [
    "chunkId", "file", "range", "lang", "ext", "types", "relations", "segment",
];

const TABLES_SQL: &str = "SELECT name FROM sqlite_master WHERE type = 'table'";
const SAMPLE_SQL: &str = "SELECT id, metaV2_json FROM chunks WHERE mode = ? ORDER BY id LIMIT ?";

/// Tables a database built for `score_mode` must contain.
pub fn required_tables(score_mode: ScoreMode) -> &'static [&'static str] {
    match score_mode {
        ScoreMode::Bm25 => &BM25_TABLES,
        ScoreMode::Fts => &FTS_TABLES,
    }
}

/// A sampled database row.
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteRow {
    pub id: i64,
    pub meta_v2_json: Option<String>,
}

/// Run `query` against a fresh read-only handle. The handle is closed when dropped, on every
/// exit path.
fn with_read_only<T>(path: &Path, query: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    query(&conn)
}

fn missing_tables(conn: &Connection, score_mode: ScoreMode) -> Result<Vec<&'static str>> {
    let mut stmt = conn.prepare(TABLES_SQL)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(required_tables(score_mode)
        .iter()
        .copied()
        .filter(|table| !names.iter().any(|name| name == table))
        .collect())
}

fn sample_rows(conn: &Connection, mode: &str) -> Result<Vec<SqliteRow>> {
    let mut stmt = conn.prepare(SAMPLE_SQL)?;
    let rows = stmt
        .query_map(params![mode, SQLITE_SAMPLE_ROWS], |row| {
            Ok(SqliteRow {
                id: row.get(0)?,
                meta_v2_json: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The fixed projection compared across stores.
pub fn project(meta: &Value) -> Value {
    let mut out = Map::new();
    for field in PARITY_FIELDS {
        out.insert(field.to_string(), meta.get(field).cloned().unwrap_or(Value::Null));
    }
    Value::Object(out)
}

/// Fields of the projection that differ between the two sides.
fn diverging_fields(expected: &Value, stored: &Value) -> Vec<&'static str> {
    PARITY_FIELDS
        .into_iter()
        .filter(|field| {
            let a = expected.get(field).unwrap_or(&Value::Null);
            let b = stored.get(field).unwrap_or(&Value::Null);
            stable_stringify(a) != stable_stringify(b)
        })
        .collect()
}

fn jsonl_meta_v2(row: &Value) -> Value {
    match row.get("metaV2") {
        Some(meta) if meta.is_object() => meta.clone(),
        _ => build_meta_v2(row, row.get("docmeta")),
    }
}

/// Compare sampled rows against `chunk_meta`, returning one line per divergent row.
pub fn compare_rows(chunk_meta: &[Value], rows: &[SqliteRow]) -> Vec<String> {
    let mut issues = Vec::new();
    for row in rows {
        let Some(chunk) = usize::try_from(row.id).ok().and_then(|idx| chunk_meta.get(idx)) else {
            issues.push(format!("sqlite chunk id {} not in chunk_meta", row.id));
            continue;
        };
        let stored = match row.meta_v2_json.as_deref().map(serde_json::from_str::<Value>) {
            Some(Ok(value)) if value.is_object() => value,
            Some(Ok(_)) | Some(Err(_)) => {
                issues.push(format!("sqlite metaV2 invalid for chunk id {}", row.id));
                continue;
            }
            None => {
                issues.push(format!("sqlite metaV2 missing for chunk id {}", row.id));
                continue;
            }
        };
        let expected = jsonl_meta_v2(chunk);
        let fields = diverging_fields(&project(&expected), &project(&stored));
        if !fields.is_empty() {
            issues.push(format!(
                "sqlite metaV2 mismatch for chunk id {} ({})",
                row.id,
                fields.join(", ")
            ));
        }
    }
    issues
}

fn degraded(report: &mut Report, mode: &str, db_path: &Path, err: &ValidateError) {
    tracing::warn!(
        target: "strata.sqlite",
        mode,
        path = %db_path.display(),
        error = %err,
        "sqlite parity check degraded"
    );
    report.mode_warning(mode, format_args!("sqlite parity unavailable ({err})"));
}

/// Run the table and parity checks for `mode` against the database at `db_path`.
pub fn check_sqlite_parity(
    report: &mut Report,
    mode: &str,
    db_path: &Path,
    score_mode: ScoreMode,
    chunk_meta: &[Value],
) {
    if !db_path.is_file() {
        report.add_issue(
            Some(mode),
            format_args!("sqlite db missing: {}", db_path.display()),
            Some(SQLITE_HINT),
        );
        return;
    }
    let missing = match with_read_only(db_path, |conn| missing_tables(conn, score_mode)) {
        Ok(missing) => missing,
        Err(err) => return degraded(report, mode, db_path, &err),
    };
    if !missing.is_empty() {
        report.add_issue(
            Some(mode),
            format_args!("sqlite missing tables: {}", missing.join(", ")),
            Some(SQLITE_HINT),
        );
        if missing.contains(&"chunks") {
            return;
        }
    }
    match with_read_only(db_path, |conn| sample_rows(conn, mode)) {
        Ok(rows) => {
            tracing::debug!(
                target: "strata.sqlite",
                mode,
                path = %db_path.display(),
                sampled = rows.len(),
                "comparing sqlite rows"
            );
            for issue in compare_rows(chunk_meta, &rows) {
                report.add_issue(Some(mode), issue, Some(SQLITE_HINT));
            }
        }
        Err(err) => degraded(report, mode, db_path, &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn projection_ignores_other_fields() {
        let meta = json!({"chunkId": "c", "file": "a.ts", "doc": "ignored"});
        let projected = project(&meta);
        assert_eq!(projected["chunkId"], "c");
        assert!(projected.get("doc").is_none());
        assert!(projected["segment"].is_null());
    }

    #[test]
    fn compare_flags_divergent_and_unknown_rows() {
        let chunk_meta = vec![json!({
            "id": 0,
            "metaV2": {"chunkId": "c0", "file": "a.ts", "lang": "typescript", "doc": "x"}
        })];
        let same = SqliteRow {
            id: 0,
            meta_v2_json: Some(r#"{"file":"a.ts","chunkId":"c0","lang":"typescript"}"#.into()),
        };
        assert!(compare_rows(&chunk_meta, &[same]).is_empty());

        let drifted = SqliteRow {
            id: 0,
            meta_v2_json: Some(r#"{"chunkId":"c0","file":"b.ts","lang":"typescript"}"#.into()),
        };
        let unknown = SqliteRow {
            id: 4,
            meta_v2_json: None,
        };
        let empty = SqliteRow {
            id: 0,
            meta_v2_json: None,
        };
        assert_eq!(
            compare_rows(&chunk_meta, &[drifted, unknown, empty]),
            vec![
                "sqlite metaV2 mismatch for chunk id 0 (file)",
                "sqlite chunk id 4 not in chunk_meta",
                "sqlite metaV2 missing for chunk id 0",
            ]
        );
    }

    #[test]
    fn missing_database_is_an_issue() {
        let tmp = tempfile::tempdir().unwrap();
        let mut report = Report::new(tmp.path().to_path_buf(), None, true);
        check_sqlite_parity(
            &mut report,
            "code",
            &tmp.path().join("absent.db"),
            ScoreMode::Bm25,
            &[],
        );
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].starts_with("[code] sqlite db missing"));
        assert_eq!(report.hints, vec![SQLITE_HINT]);
    }

    #[test]
    fn missing_table_is_an_issue() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("index-code.db");
        Connection::open(&db)
            .unwrap()
            .execute_batch("CREATE TABLE other (id INTEGER)")
            .unwrap();
        let mut report = Report::new(tmp.path().to_path_buf(), None, true);
        check_sqlite_parity(&mut report, "code", &db, ScoreMode::Fts, &[]);
        assert_eq!(
            report.issues,
            vec![
                "[code] sqlite missing tables: \
                 chunks, chunks_fts, minhash_signatures, dense_vectors, dense_meta"
            ]
        );
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn bm25_database_needs_its_vocabulary_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("index-code.db");
        let tables: Vec<String> = required_tables(ScoreMode::Bm25)
            .iter()
            .filter(|table| **table != "token_vocab")
            .map(|table| format!("CREATE TABLE {table} (id INTEGER, mode TEXT, metaV2_json TEXT);"))
            .collect();
        Connection::open(&db)
            .unwrap()
            .execute_batch(&tables.concat())
            .unwrap();

        let mut report = Report::new(tmp.path().to_path_buf(), None, true);
        check_sqlite_parity(&mut report, "code", &db, ScoreMode::Bm25, &[]);
        assert_eq!(report.issues, vec!["[code] sqlite missing tables: token_vocab"]);

        let mut report = Report::new(tmp.path().to_path_buf(), None, true);
        check_sqlite_parity(&mut report, "code", &db, ScoreMode::Fts, &[]);
        assert_eq!(report.issues, vec!["[code] sqlite missing tables: chunks_fts"]);
    }

    #[test]
    fn unreadable_database_degrades_to_a_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("index-code.db");
        std::fs::write(&db, b"definitely not a sqlite file, padded to look like a header")
            .unwrap();
        let mut report = Report::new(tmp.path().to_path_buf(), None, true);
        check_sqlite_parity(&mut report, "code", &db, ScoreMode::Bm25, &[]);
        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("[code] sqlite parity unavailable"));
    }
}
