//! Observed outcome of a served request

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Signals the reward is computed from.
///
/// Absent or unreadable fields take the neutral value: `false` for flags, `0`
/// for latency and cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Outcome {
    pub success: bool,
    pub tool_correct: bool,
    pub latency_ms: f64,
    pub cost: f64,
    pub cache_hit: bool,
    pub policy_violation: bool,
}

impl Outcome {
    /// Read an outcome from loosely-typed JSON. Never fails.
    pub fn from_value(value: &Value) -> Self {
        let field = |key: &str| value.get(key);
        let latency_ms = match field("latency_ms").and_then(coerce_f64) {
            Some(ms) => ms,
            None => field("latency_s")
                .and_then(coerce_f64)
                .map(|s| s * 1000.0)
                .unwrap_or(0.0),
        };
        Self {
            success: field("success").and_then(coerce_bool).unwrap_or(false),
            tool_correct: field("tool_correct")
                .and_then(coerce_bool)
                .unwrap_or(false),
            latency_ms: latency_ms.max(0.0),
            cost: field("cost").and_then(coerce_f64).unwrap_or(0.0).max(0.0),
            cache_hit: field("cache_hit").and_then(coerce_bool).unwrap_or(false),
            policy_violation: field("policy_violation")
                .and_then(coerce_bool)
                .unwrap_or(false),
        }
    }

    pub fn latency_seconds(&self) -> f64 {
        self.latency_ms / 1000.0
    }
}

/// Booleans, 0/1 numbers and common truthy strings
pub(crate) fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" => Some(true),
            "false" | "0" | "no" | "n" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Finite numbers, including numeric strings
pub(crate) fn coerce_f64(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}
