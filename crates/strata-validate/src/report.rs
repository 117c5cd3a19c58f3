use std::fmt::Display;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Serialize;

pub const REBUILD_HINT: &str = "Rebuild index artifacts for this mode.";
pub const REBUILD_EMBEDDINGS_HINT: &str = "Rebuild embeddings for this mode.";
pub const REBUILD_MISSING_HINT: &str = "Run a full index build to rebuild missing artifacts.";
pub const REFRESH_HINT: &str = "Run a full index build to refresh index artifacts.";
pub const COLLISION_HINT: &str = "Resolve symbol name collisions or update artifact generation.";
pub const SQLITE_HINT: &str = "Rebuild the sqlite index for this mode.";

/// Outcome for one mode's index directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeReport {
    pub path: PathBuf,
    pub ok: bool,
    pub missing: Vec<String>,
    pub warnings: Vec<String>,
}

impl ModeReport {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            ok: true,
            missing: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Accumulated result of one validation run.
///
/// Issue and warning lines are prefixed with `[mode] `. `ok` is only meaningful after
/// [`Report::finalize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub ok: bool,
    pub root: PathBuf,
    pub index_root: Option<PathBuf>,
    pub strict: bool,
    pub modes: IndexMap<String, ModeReport>,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub hints: Vec<String>,
}

fn tagged(mode: Option<&str>, message: impl Display) -> String {
    match mode {
        Some(mode) => format!("[{mode}] {message}"),
        None => message.to_string(),
    }
}

impl Report {
    pub fn new(root: PathBuf, index_root: Option<PathBuf>, strict: bool) -> Self {
        Self {
            ok: true,
            root,
            index_root,
            strict,
            modes: IndexMap::new(),
            issues: Vec::new(),
            warnings: Vec::new(),
            hints: Vec::new(),
        }
    }

    /// The entry for `mode`, created with `ok = true` on first use.
    pub fn mode_mut(&mut self, mode: &str) -> &mut ModeReport {
        self.modes
            .entry(mode.to_string())
            .or_insert_with(|| ModeReport::new(PathBuf::new()))
    }

    pub fn add_hint(&mut self, hint: &str) {
        if !self.hints.iter().any(|existing| existing == hint) {
            self.hints.push(hint.to_string());
        }
    }

    /// Record an issue without touching the mode's `ok` flag.
    pub fn add_issue(&mut self, mode: Option<&str>, message: impl Display, hint: Option<&str>) {
        self.issues.push(tagged(mode, message));
        if let Some(hint) = hint {
            self.add_hint(hint);
        }
    }

    pub fn add_warning(&mut self, mode: Option<&str>, message: impl Display) {
        self.warnings.push(tagged(mode, message));
    }

    pub fn mark_failed(&mut self, mode: &str) {
        self.mode_mut(mode).ok = false;
    }

    /// Record an issue that marks the mode not-ok and lists it under `missing`.
    pub fn fail_mode(&mut self, mode: &str, message: impl Display, hint: Option<&str>) {
        let message = message.to_string();
        let entry = self.mode_mut(mode);
        entry.ok = false;
        entry.missing.push(message.clone());
        self.add_issue(Some(mode), message, hint);
    }

    /// A required artifact is absent.
    pub fn missing_artifact(&mut self, mode: &str, name: &str) {
        let entry = self.mode_mut(mode);
        entry.ok = false;
        entry.missing.push(name.to_string());
        self.add_issue(Some(mode), format_args!("missing {name}"), Some(REBUILD_MISSING_HINT));
    }

    /// An optional artifact is absent.
    pub fn optional_missing(&mut self, mode: &str, name: &str) {
        self.mode_mut(mode).warnings.push(name.to_string());
        self.add_warning(Some(mode), format_args!("optional {name} missing"));
    }

    /// A warning also listed on the mode entry.
    pub fn mode_warning(&mut self, mode: &str, message: impl Display) {
        let message = message.to_string();
        self.mode_mut(mode).warnings.push(message.clone());
        self.add_warning(Some(mode), message);
    }

    /// Append `other`'s entries after this report's.
    pub fn merge(&mut self, other: Report) {
        self.issues.extend(other.issues);
        self.warnings.extend(other.warnings);
        for hint in &other.hints {
            self.add_hint(hint);
        }
        for (mode, entry) in other.modes {
            self.modes.insert(mode, entry);
        }
    }

    /// Compute the overall verdict: ok when no issue was recorded.
    pub fn finalize(&mut self) {
        self.ok = self.issues.is_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> Report {
        Report::new(PathBuf::from("/repo"), None, true)
    }

    #[test]
    fn issues_are_tagged_and_hints_deduplicated() {
        let mut report = report();
        report.add_issue(Some("code"), "chunk_meta duplicate id 3", Some(REBUILD_HINT));
        report.add_issue(None, "current.json invalid", Some(REBUILD_HINT));
        report.add_warning(Some("prose"), "optional repo_map missing");

        assert_eq!(
            report.issues,
            vec!["[code] chunk_meta duplicate id 3", "current.json invalid"]
        );
        assert_eq!(report.warnings, vec!["[prose] optional repo_map missing"]);
        assert_eq!(report.hints, vec![REBUILD_HINT]);
        // Plain issues leave the mode verdict alone.
        assert!(!report.modes.contains_key("code"));
    }

    #[test]
    fn failing_a_mode_records_missing_and_flips_ok() {
        let mut report = report();
        report.fail_mode("code", "docLengths mismatch (3 !== 4)", None);
        report.missing_artifact("code", "token_postings");
        report.optional_missing("code", "repo_map");

        let code = &report.modes["code"];
        assert!(!code.ok);
        assert_eq!(code.missing, vec!["docLengths mismatch (3 !== 4)", "token_postings"]);
        assert_eq!(code.warnings, vec!["repo_map"]);
        assert_eq!(report.issues[1], "[code] missing token_postings");

        report.finalize();
        assert!(!report.ok);
    }

    #[test]
    fn merge_keeps_mode_order() {
        let mut first = report();
        first.mode_mut("code");
        let mut second = report();
        second.mode_warning("prose", "piece checksum unsupported: a.json");
        second.add_hint(REBUILD_HINT);
        first.add_hint(REBUILD_HINT);

        first.merge(second);
        first.finalize();
        assert!(first.ok);
        assert_eq!(first.modes.keys().collect::<Vec<_>>(), vec!["code", "prose"]);
        assert_eq!(first.hints.len(), 1);
        assert_eq!(first.warnings, vec!["[prose] piece checksum unsupported: a.json"]);
    }
}
