//! Consistency of the interprocedural risk artifacts.
//!
//! `index_state.riskInterprocedural` says whether the build ran the analysis and what it
//! emitted. Summaries, flows, and call sites must then agree with each other, with the chunk
//! set, and with the counts declared in `risk_interprocedural_stats`.

use std::collections::{BTreeSet, HashSet};

use serde::Deserialize;
use serde_json::Value;

use crate::referential::{length_mismatch, MAX_REFERENTIAL_ISSUES};

/// Build-time flags from `index_state.riskInterprocedural`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskConfig {
    pub enabled: bool,
    pub summary_only: bool,
    pub emit_artifacts: String,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            summary_only: false,
            emit_artifacts: "jsonl".to_string(),
        }
    }
}

impl RiskConfig {
    /// Read the flags from a loaded `index_state`. Absent or malformed flags mean disabled.
    pub fn from_index_state(index_state: Option<&Value>) -> Self {
        index_state
            .and_then(|state| state.get("riskInterprocedural"))
            .filter(|flags| flags.is_object())
            .and_then(|flags| serde_json::from_value(flags.clone()).ok())
            .unwrap_or_default()
    }

    /// Whether the build was asked to write risk artifacts at all.
    pub fn emits_artifacts(&self) -> bool {
        self.emit_artifacts != "none"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStatus {
    Ok,
    TimedOut,
    Disabled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskCounts {
    pub summaries_emitted: Option<u64>,
    pub flows_emitted: Option<u64>,
    pub risks_with_flows: Option<u64>,
    pub unique_call_sites_referenced: Option<u64>,
}

/// `risk_interprocedural_stats.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RiskStats {
    pub status: RiskStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub counts: RiskCounts,
}

impl RiskStats {
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// The risk artifacts as loaded. `None` means the artifact was not present.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskInputs<'a> {
    pub stats: Option<&'a RiskStats>,
    pub summaries: Option<&'a [Value]>,
    pub flows: Option<&'a [Value]>,
    pub call_sites: Option<&'a [Value]>,
}

fn str_at<'v>(value: &'v Value, pointer: &str) -> Option<&'v str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Bounded issue sink shared by the record-scanning checks.
struct Capped {
    issues: Vec<String>,
}

impl Capped {
    fn new() -> Self {
        Self { issues: Vec::new() }
    }

    fn full(&self) -> bool {
        self.issues.len() >= MAX_REFERENTIAL_ISSUES
    }

    fn push(&mut self, issue: String) {
        if !self.full() {
            self.issues.push(issue);
        }
    }
}

/// Check one flow row. `referenced` collects every call-site id the flow mentions.
pub fn flow_issues<'a>(
    idx: usize,
    flow: &'a Value,
    chunk_uids: &BTreeSet<String>,
    call_site_ids: &HashSet<&str>,
    referenced: &mut HashSet<&'a str>,
) -> Vec<String> {
    let mut issues = Vec::new();
    let flow_id = str_at(flow, "/flowId").unwrap_or("?");
    if str_at(flow, "/flowId").is_none() {
        issues.push(format!("risk_flows missing flowId at index {idx}"));
    }

    let path_uids: Vec<&str> = flow
        .pointer("/path/chunkUids")
        .and_then(Value::as_array)
        .map(|uids| uids.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if path_uids.len() < 2 {
        issues.push(format!(
            "risk_flows path too short at index {idx} (flowId={flow_id}, {} chunkUids)",
            path_uids.len()
        ));
        return issues;
    }

    let steps: &[Value] = flow
        .pointer("/path/callSiteIdsByStep")
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice);
    let expected_steps = path_uids.len() - 1;
    if steps.len() != expected_steps {
        issues.push(format!(
            "risk_flows step count mismatch at index {idx} (flowId={flow_id}, expected {expected_steps}, got {})",
            steps.len()
        ));
    }

    let first = path_uids[0];
    let last = path_uids[path_uids.len() - 1];
    if str_at(flow, "/source/chunkUid") != Some(first) {
        issues.push(format!("risk_flows source mismatch at index {idx} (flowId={flow_id})"));
    }
    if str_at(flow, "/sink/chunkUid") != Some(last) {
        issues.push(format!("risk_flows sink mismatch at index {idx} (flowId={flow_id})"));
    }
    if str_at(flow, "/source/ruleId").is_none() || str_at(flow, "/sink/ruleId").is_none() {
        issues.push(format!("risk_flows missing ruleId at index {idx} (flowId={flow_id})"));
    }

    for uid in &path_uids {
        if !chunk_uids.contains(*uid) {
            issues.push(format!("risk_flows unknown chunkUid {uid} at index {idx}"));
        }
    }
    for step in steps {
        for id in step.as_array().into_iter().flatten().filter_map(Value::as_str) {
            referenced.insert(id);
            if !call_site_ids.contains(id) {
                issues.push(format!("risk_flows unknown callSiteId {id} at index {idx}"));
            }
        }
    }
    issues
}

fn summary_issues(summaries: &[Value], chunk_uids: &BTreeSet<String>, out: &mut Capped) {
    let mut seen = HashSet::with_capacity(summaries.len());
    for (idx, row) in summaries.iter().enumerate() {
        if out.full() {
            return;
        }
        let Some(uid) = str_at(row, "/chunkUid") else {
            out.push(format!("risk_summaries missing chunkUid at index {idx}"));
            continue;
        };
        if !seen.insert(uid) {
            out.push(format!("risk_summaries duplicate chunkUid {uid}"));
        }
        if !chunk_uids.contains(uid) {
            out.push(format!("risk_summaries unknown chunkUid {uid}"));
        }
    }
}

fn call_site_issues<'a>(
    call_sites: &'a [Value],
    chunk_uids: &BTreeSet<String>,
    out: &mut Capped,
) -> HashSet<&'a str> {
    let mut ids = HashSet::with_capacity(call_sites.len());
    for (idx, row) in call_sites.iter().enumerate() {
        match str_at(row, "/callSiteId") {
            Some(id) if !ids.insert(id) => {
                out.push(format!("call_sites duplicate callSiteId {id}"));
            }
            Some(_) => {}
            None => out.push(format!("call_sites missing callSiteId at index {idx}")),
        }
        if let Some(caller) = str_at(row, "/callerChunkUid") {
            if !chunk_uids.contains(caller) {
                out.push(format!("call_sites unknown callerChunkUid {caller}"));
            }
        }
    }
    ids
}

/// Every risk consistency issue for one mode.
pub fn risk_issues(
    config: &RiskConfig,
    inputs: RiskInputs<'_>,
    chunk_uids: &BTreeSet<String>,
) -> Vec<String> {
    if !config.enabled {
        return Vec::new();
    }
    let emitting = config.emits_artifacts();
    let mut issues = Vec::new();

    let Some(stats) = inputs.stats else {
        if emitting {
            issues.push("risk_interprocedural_stats missing".to_string());
        }
        return issues;
    };
    let counts = &stats.counts;

    if stats.status == RiskStatus::TimedOut {
        let emitted = [
            counts.flows_emitted,
            counts.risks_with_flows,
            counts.unique_call_sites_referenced,
        ];
        if emitted.into_iter().flatten().any(|count| count > 0) {
            issues.push("risk_interprocedural_stats timed_out with nonzero emitted counts".to_string());
        }
    }

    match inputs.summaries {
        Some(summaries) => {
            let mut capped = Capped::new();
            summary_issues(summaries, chunk_uids, &mut capped);
            issues.extend(capped.issues);
            if let Some(declared) = counts.summaries_emitted {
                issues.extend(length_mismatch("risk_summaries", summaries.len(), declared as usize));
            }
        }
        None if emitting => issues.push("missing risk_summaries".to_string()),
        None => {}
    }

    if config.summary_only || stats.status != RiskStatus::Ok {
        return issues;
    }

    let mut capped = Capped::new();
    let call_site_ids = match inputs.call_sites {
        Some(rows) => call_site_issues(rows, chunk_uids, &mut capped),
        None => {
            if emitting {
                capped.push("missing call_sites".to_string());
            }
            HashSet::new()
        }
    };
    issues.extend(capped.issues);

    let Some(flows) = inputs.flows else {
        if emitting {
            issues.push("missing risk_flows".to_string());
        }
        return issues;
    };
    let mut capped = Capped::new();
    let mut referenced = HashSet::new();
    // Every flow feeds `referenced`; only the reported lines are capped.
    for (idx, flow) in flows.iter().enumerate() {
        for issue in flow_issues(idx, flow, chunk_uids, &call_site_ids, &mut referenced) {
            capped.push(issue);
        }
    }
    issues.extend(capped.issues);
    if let Some(declared) = counts.flows_emitted {
        issues.extend(length_mismatch("risk_flows", flows.len(), declared as usize));
    }
    if let Some(declared) = counts.unique_call_sites_referenced {
        issues.extend(length_mismatch(
            "risk_flows unique call sites",
            referenced.len(),
            declared as usize,
        ));
    }
    issues
}
