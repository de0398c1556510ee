use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::router::{ComparisonRecord, RollbackReason};
use crate::storage::JsonlLog;
use crate::Result;

/// Aggregate view over a set of comparison records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total: usize,
    pub eligible_rate: f64,
    pub routed_rate: f64,
    /// Share of requests whose quality gates passed (only the hash may have excluded them)
    pub gate_pass_rate: f64,
    /// Share of requests where the candidate passed the gates without being slower
    pub win_rate: f64,
    pub intent_agreement_rate: f64,
    pub schema_validity_rate: f64,
    pub tool_agreement_rate: f64,
    pub mean_similarity: f64,
    pub latency_delta_p50_ms: f64,
    pub latency_delta_p95_ms: f64,
    pub rollback_reasons: BTreeMap<RollbackReason, usize>,
    /// Lines in the log that could not be parsed
    #[serde(default)]
    pub skipped_lines: usize,
}

impl ComparisonSummary {
    pub fn from_records(records: &[ComparisonRecord]) -> Self {
        let total = records.len();
        if total == 0 {
            return Self::default();
        }
        let rate = |pred: &dyn Fn(&ComparisonRecord) -> bool| {
            records.iter().filter(|&r| pred(r)).count() as f64 / total as f64
        };
        let gates_pass = |r: &ComparisonRecord| {
            matches!(r.rollback_reason, None | Some(RollbackReason::NotSelected))
        };

        let mut rollback_reasons = BTreeMap::new();
        for reason in records.iter().filter_map(|r| r.rollback_reason) {
            *rollback_reasons.entry(reason).or_insert(0) += 1;
        }

        let mut deltas: Vec<f64> = records.iter().map(|r| r.latency_delta_ms).collect();
        deltas.sort_by(|a, b| a.total_cmp(b));

        Self {
            total,
            eligible_rate: rate(&|r: &ComparisonRecord| r.eligible),
            routed_rate: rate(&|r: &ComparisonRecord| r.routed),
            gate_pass_rate: rate(&gates_pass),
            win_rate: rate(&|r: &ComparisonRecord| gates_pass(r) && r.latency_delta_ms <= 0.0),
            intent_agreement_rate: rate(&|r: &ComparisonRecord| r.intent_agreement),
            schema_validity_rate: rate(&|r: &ComparisonRecord| r.schema_agreement()),
            tool_agreement_rate: rate(&|r: &ComparisonRecord| r.tool_agreement),
            mean_similarity: records.iter().map(|r| r.similarity).sum::<f64>() / total as f64,
            latency_delta_p50_ms: nearest_rank(&deltas, 50.0),
            latency_delta_p95_ms: nearest_rank(&deltas, 95.0),
            rollback_reasons,
            skipped_lines: 0,
        }
    }

    /// Summarize a JSONL comparison log
    pub fn from_log(path: &Path) -> Result<Self> {
        let read = JsonlLog::new(path).read_all::<ComparisonRecord>()?;
        let mut summary = Self::from_records(&read.records);
        summary.skipped_lines = read.skipped;
        Ok(summary)
    }
}

/// Nearest-rank percentile of sorted values
fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
