use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::routing::TaskComplexity;

/// What one policy produced for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub intent: Option<String>,
    /// Whether the output passed the response schema
    pub schema_valid: bool,
    pub tool: Option<String>,
    pub latency_ms: f64,
    #[serde(default)]
    pub output: Value,
}

impl EvaluationResult {
    pub fn new(intent: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            intent: Some(intent.into()),
            schema_valid: true,
            tool: None,
            latency_ms,
            output: Value::Null,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_schema_valid(mut self, valid: bool) -> Self {
        self.schema_valid = valid;
        self
    }

    /// Placeholder for a candidate that failed to produce anything
    pub(crate) fn failed() -> Self {
        Self {
            intent: None,
            schema_valid: false,
            tool: None,
            latency_ms: 0.0,
            output: Value::Null,
        }
    }
}

/// Side-by-side comparison of primary and candidate results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub intent_agreement: bool,
    pub primary_schema_valid: bool,
    pub candidate_schema_valid: bool,
    pub tool_agreement: bool,
    /// candidate - primary
    pub latency_delta_ms: f64,
    /// Jaccard similarity of the flattened outputs, in [0, 1]
    pub similarity: f64,
    pub complexity: TaskComplexity,
}

impl Comparison {
    /// Both results passed the schema
    pub fn schema_agreement(&self) -> bool {
        self.primary_schema_valid && self.candidate_schema_valid
    }
}

pub fn compare(
    primary: &EvaluationResult,
    candidate: &EvaluationResult,
    complexity: TaskComplexity,
) -> Comparison {
    let intent_agreement = match (&primary.intent, &candidate.intent) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    let latency_delta_ms = candidate.latency_ms - primary.latency_ms;

    Comparison {
        intent_agreement,
        primary_schema_valid: primary.schema_valid,
        candidate_schema_valid: candidate.schema_valid,
        tool_agreement: primary.tool == candidate.tool,
        latency_delta_ms: if latency_delta_ms.is_finite() {
            latency_delta_ms
        } else {
            f64::MAX
        },
        similarity: structural_similarity(&primary.output, &candidate.output),
        complexity,
    }
}

/// Jaccard similarity over `path=value` leaves of two JSON documents
pub fn structural_similarity(a: &Value, b: &Value) -> f64 {
    let left = leaves(a);
    let right = leaves(b);
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let shared = left.intersection(&right).count();
    let union = left.union(&right).count();
    shared as f64 / union as f64
}

fn leaves(value: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_leaves(value, String::new(), &mut out);
    out
}

fn collect_leaves(value: &Value, path: String, out: &mut BTreeSet<String>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                collect_leaves(child, child_path, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_leaves(child, format!("{}[{}]", path, i), out);
            }
        }
        leaf => {
            out.insert(format!("{}={}", path, leaf));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_results_agree() {
        let result = EvaluationResult::new("billing", 120.0)
            .with_tool("invoice_lookup")
            .with_output(json!({"answer": "ok", "items": [1, 2]}));
        let cmp = compare(&result, &result, TaskComplexity::Simple);

        assert!(cmp.intent_agreement);
        assert!(cmp.schema_agreement());
        assert!(cmp.tool_agreement);
        assert_eq!(cmp.latency_delta_ms, 0.0);
        assert_eq!(cmp.similarity, 1.0);
    }

    #[test]
    fn test_differences() {
        let primary = EvaluationResult::new("billing", 100.0).with_output(json!({"a": 1, "b": 2}));
        let candidate = EvaluationResult::new("refund", 180.0)
            .with_schema_valid(false)
            .with_output(json!({"a": 1, "b": 3}));
        let cmp = compare(&primary, &candidate, TaskComplexity::Medium);

        assert!(!cmp.intent_agreement);
        assert!(!cmp.schema_agreement());
        assert_eq!(cmp.latency_delta_ms, 80.0);
        // {a=1} shared out of {a=1, b=2, b=3}
        assert!((cmp.similarity - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_intent_never_agrees() {
        let primary = EvaluationResult::new("billing", 10.0);
        let cmp = compare(&primary, &EvaluationResult::failed(), TaskComplexity::Simple);
        assert!(!cmp.intent_agreement);
        assert!(!cmp.candidate_schema_valid);
    }

    #[test]
    fn test_similarity_edges() {
        assert_eq!(structural_similarity(&Value::Null, &json!({})), 1.0);
        assert_eq!(structural_similarity(&json!({"x": 1}), &json!({"y": 1})), 0.0);
        assert_eq!(structural_similarity(&json!([1, 2]), &json!([1, 2])), 1.0);
    }
}
