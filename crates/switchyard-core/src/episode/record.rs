use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::features::{FeatureRecord, FeatureVector};
use crate::reward::{coerce_f64, Outcome};
use crate::routing::TaskComplexity;

/// One served request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub episode_id: String,
    pub session_id: String,
    pub intent: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub complexity: Option<TaskComplexity>,
    /// Raw request context
    #[serde(default)]
    pub context: FeatureRecord,
    /// Routing tier that served the request
    #[serde(default)]
    pub arm: Option<String>,
    /// Tool invoked, if any
    #[serde(default)]
    pub tool: Option<String>,
    /// Feature vector the routing decision was made on
    #[serde(default)]
    pub features: Option<FeatureVector>,
    #[serde(default)]
    pub outcome: Outcome,
}

impl Episode {
    pub fn new(session_id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            episode_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            intent: intent.into(),
            timestamp: Utc::now(),
            complexity: None,
            context: FeatureRecord::new(),
            arm: None,
            tool: None,
            features: None,
            outcome: Outcome::default(),
        }
    }

    pub fn with_context(mut self, context: FeatureRecord) -> Self {
        self.context = context;
        self
    }

    pub fn with_arm(mut self, arm: impl Into<String>) -> Self {
        self.arm = Some(arm.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_features(mut self, features: FeatureVector) -> Self {
        self.features = Some(features);
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Parse an episode from loosely-typed JSON. Never fails.
    ///
    /// Missing identifiers are generated, an unreadable timestamp becomes
    /// "now", and the action may sit at the top level or under `action`.
    /// Outcome fields may sit under `outcome` or at the top level.
    pub fn from_value(value: &Value) -> Self {
        let text = |v: Option<&Value>| -> Option<String> {
            match v? {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };
        let action = value.get("action");
        let action_field = |key: &str| {
            text(value.get(key)).or_else(|| text(action.and_then(|a| a.get(key))))
        };

        let outcome = match value.get("outcome") {
            Some(inner @ Value::Object(_)) => Outcome::from_value(inner),
            _ => Outcome::from_value(value),
        };

        let features = value.get("features").and_then(|v| match v {
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|item| coerce_f64(item).unwrap_or(0.0))
                    .collect::<FeatureVector>(),
            ),
            _ => None,
        });

        Self {
            episode_id: text(value.get("episode_id")).unwrap_or_else(|| Uuid::new_v4().to_string()),
            session_id: text(value.get("session_id")).unwrap_or_default(),
            intent: text(value.get("intent")).unwrap_or_else(|| "unknown".to_string()),
            timestamp: value
                .get("timestamp")
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
            complexity: text(value.get("complexity")).and_then(|c| c.parse().ok()),
            context: value
                .get("context")
                .map(FeatureRecord::from_value)
                .unwrap_or_default(),
            arm: action_field("arm").or_else(|| action_field("tier")),
            tool: action_field("tool"),
            features,
            outcome,
        }
    }
}

/// RFC 3339 strings or Unix seconds
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            if !secs.is_finite() {
                return None;
            }
            Utc.timestamp_millis_opt((secs * 1000.0) as i64).single()
        }
        _ => None,
    }
}
