//! Shadow evaluation and gated canary routing
//!
//! Every request runs through both the primary and the candidate policy. The
//! router compares the two results, decides whether this session's traffic
//! may be served by the candidate, and appends one [`ComparisonRecord`] per
//! request to the evaluation log.
//!
//! A request is *eligible* when its session hashes under the canary
//! percentage, its complexity is allowed, both results are schema-valid,
//! intents agree and the latency increase stays within bounds. It is *routed*
//! when it is eligible and the rolling rates over the evaluation window still
//! meet the configured minimums.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::compare::{compare, Comparison, EvaluationResult};
use super::config::CanaryConfig;
use super::summary::ComparisonSummary;
use crate::error::Error;
use crate::features::percent_bucket;
use crate::routing::TaskComplexity;
use crate::storage::JsonlLog;
use crate::Result;

/// One request as seen by both policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryRequest {
    pub session_id: String,
    pub complexity: TaskComplexity,
    #[serde(default)]
    pub input: Value,
}

impl CanaryRequest {
    pub fn new(session_id: impl Into<String>, complexity: TaskComplexity) -> Self {
        Self {
            session_id: session_id.into(),
            complexity,
            input: Value::Null,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }
}

/// A policy that can fully process a request
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(&self, request: &CanaryRequest) -> Result<EvaluationResult>;
}

/// Why a request was kept on the primary policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackReason {
    DisallowedComplexity,
    SchemaFailure,
    IntentMismatch,
    LatencyRegression,
    NotSelected,
}

impl RollbackReason {
    pub const ALL: [RollbackReason; 5] = [
        Self::DisallowedComplexity,
        Self::SchemaFailure,
        Self::IntentMismatch,
        Self::LatencyRegression,
        Self::NotSelected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DisallowedComplexity => "disallowed_complexity",
            Self::SchemaFailure => "schema_failure",
            Self::IntentMismatch => "intent_mismatch",
            Self::LatencyRegression => "latency_regression",
            Self::NotSelected => "not_selected",
        }
    }
}

impl std::fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one shadow evaluation. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub request_id: Uuid,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub complexity: TaskComplexity,
    pub intent_agreement: bool,
    pub primary_schema_valid: bool,
    pub candidate_schema_valid: bool,
    pub tool_agreement: bool,
    pub primary_latency_ms: f64,
    pub candidate_latency_ms: f64,
    pub latency_delta_ms: f64,
    pub similarity: f64,
    /// Session bucket in [0, 100)
    pub bucket: f64,
    pub eligible: bool,
    pub routed: bool,
    pub rollback_reason: Option<RollbackReason>,
    /// Rolling schema-validity rate including this request
    pub window_schema_validity: f64,
    /// Rolling intent-agreement rate including this request
    pub window_intent_agreement: f64,
}

impl ComparisonRecord {
    pub fn schema_agreement(&self) -> bool {
        self.primary_schema_valid && self.candidate_schema_valid
    }
}

/// The result served to the caller plus the comparison behind it
#[derive(Debug, Clone)]
pub struct CanaryDecision {
    pub served: EvaluationResult,
    pub served_by_candidate: bool,
    pub record: ComparisonRecord,
}

/// First failing gate, in precedence order
pub fn rollback_reason(
    config: &CanaryConfig,
    comparison: &Comparison,
    bucket: f64,
) -> Option<RollbackReason> {
    if !config.allows(comparison.complexity) {
        Some(RollbackReason::DisallowedComplexity)
    } else if !comparison.schema_agreement() {
        Some(RollbackReason::SchemaFailure)
    } else if !comparison.intent_agreement {
        Some(RollbackReason::IntentMismatch)
    } else if comparison.latency_delta_ms > config.max_latency_increase_ms {
        Some(RollbackReason::LatencyRegression)
    } else if bucket >= config.effective_percent() {
        Some(RollbackReason::NotSelected)
    } else {
        None
    }
}

#[derive(Debug, Default)]
struct Window {
    records: VecDeque<ComparisonRecord>,
}

impl Window {
    fn push(&mut self, record: ComparisonRecord, capacity: usize) {
        self.records.push_back(record);
        while self.records.len() > capacity.max(1) {
            self.records.pop_front();
        }
    }

    /// (schema validity, intent agreement) over the window plus one pending sample
    fn rates_with(&self, comparison: &Comparison, capacity: usize) -> (f64, f64) {
        let keep = capacity.max(1) - 1;
        let skip = self.records.len().saturating_sub(keep);
        let mut total = 1usize;
        let mut schema = usize::from(comparison.schema_agreement());
        let mut intent = usize::from(comparison.intent_agreement);
        for record in self.records.iter().skip(skip) {
            total += 1;
            schema += usize::from(record.schema_agreement());
            intent += usize::from(record.intent_agreement);
        }
        (schema as f64 / total as f64, intent as f64 / total as f64)
    }
}

/// Runs candidate policies in shadow and gates their live traffic
pub struct CanaryRouter {
    config: ArcSwap<CanaryConfig>,
    primary: Arc<dyn PolicyEvaluator>,
    candidate: Arc<dyn PolicyEvaluator>,
    window: Mutex<Window>,
    log: Option<JsonlLog>,
}

impl std::fmt::Debug for CanaryRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanaryRouter")
            .field("config", &*self.config.load_full())
            .field("log", &self.log.as_ref().map(|l| l.path().to_path_buf()))
            .finish_non_exhaustive()
    }
}

impl CanaryRouter {
    pub fn new(
        config: CanaryConfig,
        primary: Arc<dyn PolicyEvaluator>,
        candidate: Arc<dyn PolicyEvaluator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            primary,
            candidate,
            window: Mutex::new(Window::default()),
            log: None,
        })
    }

    /// Append every comparison to a JSONL file
    pub fn with_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.log = Some(JsonlLog::new(path));
        self
    }

    pub fn config(&self) -> Arc<CanaryConfig> {
        self.config.load_full()
    }

    /// Replace the configuration; takes effect on the next request
    pub fn update_config(&self, config: CanaryConfig) -> Result<()> {
        config.validate()?;
        debug!(
            enabled = config.enabled,
            traffic_percent = config.traffic_percent,
            "Canary configuration replaced"
        );
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Session bucket under the current seed
    pub fn bucket(&self, session_id: &str) -> f64 {
        percent_bucket(self.config.load().hash_seed, session_id)
    }

    /// Evaluate a request with both policies and decide which result to serve
    pub async fn handle(&self, request: &CanaryRequest) -> Result<CanaryDecision> {
        let (primary, candidate) = tokio::join!(
            self.primary.evaluate(request),
            self.candidate.evaluate(request)
        );
        let primary = primary.map_err(|e| Error::EvaluationFailed(e.to_string()))?;
        let candidate = candidate.unwrap_or_else(|e| {
            warn!(session_id = %request.session_id, error = %e, "Candidate evaluation failed");
            EvaluationResult::failed()
        });

        let config = self.config.load_full();
        let comparison = compare(&primary, &candidate, request.complexity);
        let bucket = percent_bucket(config.hash_seed, &request.session_id);
        let reason = rollback_reason(&config, &comparison, bucket);
        let eligible = reason.is_none();

        let record = {
            let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
            let (schema_rate, intent_rate) =
                window.rates_with(&comparison, config.evaluation_window);
            let routed = eligible
                && schema_rate >= config.min_schema_validity
                && intent_rate >= config.min_intent_agreement;
            let record = ComparisonRecord {
                request_id: Uuid::new_v4(),
                session_id: request.session_id.clone(),
                timestamp: Utc::now(),
                complexity: request.complexity,
                intent_agreement: comparison.intent_agreement,
                primary_schema_valid: comparison.primary_schema_valid,
                candidate_schema_valid: comparison.candidate_schema_valid,
                tool_agreement: comparison.tool_agreement,
                primary_latency_ms: primary.latency_ms,
                candidate_latency_ms: candidate.latency_ms,
                latency_delta_ms: comparison.latency_delta_ms,
                similarity: comparison.similarity,
                bucket,
                eligible,
                routed,
                rollback_reason: reason,
                window_schema_validity: schema_rate,
                window_intent_agreement: intent_rate,
            };
            window.push(record.clone(), config.evaluation_window);
            record
        };

        if let Some(log) = &self.log {
            if let Err(e) = log.append(&record) {
                warn!(path = %log.path().display(), error = %e, "Failed to append comparison record");
            }
        }

        debug!(
            session_id = %record.session_id,
            eligible = record.eligible,
            routed = record.routed,
            reason = ?record.rollback_reason,
            "Canary comparison"
        );

        let served_by_candidate = record.routed;
        Ok(CanaryDecision {
            served: if served_by_candidate { candidate } else { primary },
            served_by_candidate,
            record,
        })
    }

    /// Records currently in the evaluation window, oldest first
    pub fn recent(&self) -> Vec<ComparisonRecord> {
        let window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.records.iter().cloned().collect()
    }

    /// Aggregate over the evaluation window
    pub fn summary(&self) -> ComparisonSummary {
        ComparisonSummary::from_records(&self.recent())
    }
}
