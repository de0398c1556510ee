//! Versioned policy packages
//!
//! A package bundles up to four sub-policies with the provenance needed to
//! audit it: where each came from, its SHA-256, and how validation went.
//! Packages are immutable once exported; a new version supersedes an old one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::Error;
use crate::Result;

/// Named parts of the active policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyComponent {
    /// Routing policy parameters from the package
    Routing,
    /// Tool catalogue per intent from the package
    Tools,
    /// Response cache settings from the package
    Cache,
    /// Model adapter reference from the package
    Adapter,
    /// Learned routing bandit state
    RoutingState,
    /// Learned tool bandit state
    ToolState,
}

impl PolicyComponent {
    /// Components that live inside a package
    pub const PACKAGED: [PolicyComponent; 4] = [Self::Routing, Self::Tools, Self::Cache, Self::Adapter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::Tools => "tools",
            Self::Cache => "cache",
            Self::Adapter => "adapter",
            Self::RoutingState => "routing_state",
            Self::ToolState => "tool_state",
        }
    }

    /// Fields every exported file for this component must carry
    pub fn required_fields(&self) -> &'static [(&'static str, FieldKind)] {
        match self {
            Self::Routing => &[
                ("arms", FieldKind::StringArray),
                ("alpha", FieldKind::Number),
                ("feature_dim", FieldKind::PositiveInteger),
            ],
            Self::Tools => &[("intents", FieldKind::Object)],
            Self::Cache => &[
                ("ttl_seconds", FieldKind::PositiveInteger),
                ("max_entries", FieldKind::PositiveInteger),
            ],
            Self::Adapter => &[("name", FieldKind::String), ("path", FieldKind::String)],
            Self::RoutingState | Self::ToolState => &[],
        }
    }
}

impl std::fmt::Display for PolicyComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PolicyComponent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "routing" => Ok(Self::Routing),
            "tools" | "tool" => Ok(Self::Tools),
            "cache" => Ok(Self::Cache),
            "adapter" => Ok(Self::Adapter),
            "routing_state" => Ok(Self::RoutingState),
            "tool_state" => Ok(Self::ToolState),
            _ => Err(Error::InvalidInput(format!(
                "Unknown policy component '{}'. Valid: routing, tools, cache, adapter",
                s
            ))),
        }
    }
}

/// JSON shape a required field must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    PositiveInteger,
    StringArray,
    Object,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            Self::Number => value.as_f64().is_some_and(f64::is_finite),
            Self::PositiveInteger => value.as_u64().is_some_and(|n| n > 0),
            Self::StringArray => value
                .as_array()
                .is_some_and(|items| !items.is_empty() && items.iter().all(Value::is_string)),
            Self::Object => value.is_object(),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::String => "a non-empty string",
            Self::Number => "a finite number",
            Self::PositiveInteger => "a positive integer",
            Self::StringArray => "a non-empty array of strings",
            Self::Object => "an object",
        }
    }
}

/// Routing parameters shipped with a package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    /// Arm names in tie-break order
    pub arms: Vec<String>,
    pub alpha: f64,
    pub feature_dim: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lambda: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoutingPolicy {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.arms.is_empty() {
            return Err("arms must not be empty".into());
        }
        for (i, arm) in self.arms.iter().enumerate() {
            if self.arms[..i].contains(arm) {
                return Err(format!("duplicate arm '{}'", arm));
            }
        }
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(format!("alpha must be >= 0, got {}", self.alpha));
        }
        if self.feature_dim == 0 {
            return Err("feature_dim must be positive".into());
        }
        if let Some(lambda) = self.lambda {
            if !lambda.is_finite() || lambda < 0.0 {
                return Err(format!("lambda must be >= 0, got {}", lambda));
            }
        }
        Ok(())
    }
}

/// Tools available per intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPolicy {
    pub intents: BTreeMap<String, Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolPolicy {
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (intent, tools) in &self.intents {
            if tools.is_empty() {
                return Err(format!("intent '{}' lists no tools", intent));
            }
            if tools.iter().any(|t| t.trim().is_empty()) {
                return Err(format!("intent '{}' has an empty tool name", intent));
            }
        }
        Ok(())
    }
}

/// Response cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub ttl_seconds: u64,
    pub max_entries: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CachePolicy {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(t) = self.similarity_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(format!("similarity_threshold must be in [0, 1], got {}", t));
            }
        }
        Ok(())
    }
}

/// Reference to a fine-tuned model adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterRef {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_model: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AdapterRef {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() || self.path.trim().is_empty() {
            return Err("adapter name and path must not be empty".into());
        }
        Ok(())
    }
}

/// The sub-policies of a package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CachePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<AdapterRef>,
}

impl PolicySet {
    pub fn is_empty(&self) -> bool {
        self.routing.is_none() && self.tools.is_none() && self.cache.is_none() && self.adapter.is_none()
    }

    /// JSON copy of one sub-policy
    pub fn get(&self, component: PolicyComponent) -> Option<Value> {
        let value = match component {
            PolicyComponent::Routing => serde_json::to_value(self.routing.as_ref()?),
            PolicyComponent::Tools => serde_json::to_value(self.tools.as_ref()?),
            PolicyComponent::Cache => serde_json::to_value(self.cache.as_ref()?),
            PolicyComponent::Adapter => serde_json::to_value(self.adapter.as_ref()?),
            PolicyComponent::RoutingState | PolicyComponent::ToolState => return None,
        };
        value.ok()
    }

    /// Validate and insert one sub-policy from raw JSON
    pub fn insert(&mut self, component: PolicyComponent, value: &Value) -> ValidationResult {
        let mut result = check_required_fields(component, value);
        if !result.valid {
            return result;
        }

        let typed = match component {
            PolicyComponent::Routing => parse_typed::<RoutingPolicy>(value)
                .and_then(|p| p.validate().map(|_| self.routing = Some(p))),
            PolicyComponent::Tools => parse_typed::<ToolPolicy>(value)
                .and_then(|p| p.validate().map(|_| self.tools = Some(p))),
            PolicyComponent::Cache => parse_typed::<CachePolicy>(value)
                .and_then(|p| p.validate().map(|_| self.cache = Some(p))),
            PolicyComponent::Adapter => parse_typed::<AdapterRef>(value)
                .and_then(|p| p.validate().map(|_| self.adapter = Some(p))),
            PolicyComponent::RoutingState | PolicyComponent::ToolState => {
                Err(format!("'{}' is not a packaged component", component))
            }
        };
        if let Err(message) = typed {
            result.valid = false;
            result.errors.push(message);
        }
        result
    }

    /// Re-run the typed checks on every present sub-policy
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (PolicyComponent::Routing, self.routing.as_ref().map(RoutingPolicy::validate)),
            (PolicyComponent::Tools, self.tools.as_ref().map(ToolPolicy::validate)),
            (PolicyComponent::Cache, self.cache.as_ref().map(CachePolicy::validate)),
            (PolicyComponent::Adapter, self.adapter.as_ref().map(AdapterRef::validate)),
        ];
        for (component, check) in checks {
            if let Some(Err(message)) = check {
                return Err(Error::PolicyValidation {
                    component: component.to_string(),
                    message,
                });
            }
        }
        Ok(())
    }
}

fn parse_typed<T: serde::de::DeserializeOwned>(value: &Value) -> std::result::Result<T, String> {
    serde_json::from_value(value.clone()).map_err(|e| e.to_string())
}

/// Outcome of validating one sub-policy file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![message.into()],
        }
    }
}

/// Check a sub-policy against its minimal required-fields schema
pub fn check_required_fields(component: PolicyComponent, value: &Value) -> ValidationResult {
    let Some(object) = value.as_object() else {
        return ValidationResult::invalid(format!("{} policy must be a JSON object", component));
    };
    let errors: Vec<String> = component
        .required_fields()
        .iter()
        .filter_map(|(field, kind)| match object.get(*field) {
            None => Some(format!("missing required field '{}'", field)),
            Some(v) if !kind.matches(v) => {
                Some(format!("field '{}' must be {}", field, kind.describe()))
            }
            Some(_) => None,
        })
        .collect();
    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}

/// Provenance and validation record of a package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// component → file it was read from
    #[serde(default)]
    pub source_files: BTreeMap<String, String>,
    /// component → SHA-256 of the file bytes
    #[serde(default)]
    pub file_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub validation_results: BTreeMap<String, ValidationResult>,
    pub package_valid: bool,
}

/// An immutable, versioned policy bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyPackage {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub policies: PolicySet,
    pub metadata: PackageMetadata,
}

impl PolicyPackage {
    /// Parse a package file and re-validate its sub-policies
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let package: Self = serde_json::from_slice(bytes)?;
        if package.version.trim().is_empty() {
            return Err(Error::PolicyValidation {
                component: "package".into(),
                message: "version must not be empty".into(),
            });
        }
        package.policies.validate()?;
        Ok(package)
    }

    /// Canonical on-disk bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn is_valid(&self) -> bool {
        self.metadata.package_valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn routing_json() -> Value {
        json!({"arms": ["fast", "planner", "deep"], "alpha": 0.8, "feature_dim": 28, "notes": "v2"})
    }

    #[test]
    fn test_required_fields() {
        let result = check_required_fields(PolicyComponent::Routing, &json!({"arms": [], "alpha": "high"}));
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors.iter().any(|e| e.contains("feature_dim")));

        assert!(check_required_fields(PolicyComponent::Routing, &routing_json()).valid);
        assert!(!check_required_fields(PolicyComponent::Cache, &json!([1])).valid);
    }

    #[test]
    fn test_insert_keeps_extra_fields() {
        let mut set = PolicySet::default();
        assert!(set.insert(PolicyComponent::Routing, &routing_json()).valid);

        let routing = set.routing.as_ref().unwrap();
        assert_eq!(routing.arms.len(), 3);
        assert_eq!(routing.extra["notes"], "v2");
        assert_eq!(set.get(PolicyComponent::Routing).unwrap()["notes"], "v2");
    }

    #[test]
    fn test_insert_rejects_semantic_errors() {
        let mut set = PolicySet::default();
        let result = set.insert(
            PolicyComponent::Routing,
            &json!({"arms": ["a", "a"], "alpha": 1.0, "feature_dim": 4}),
        );
        assert!(!result.valid);
        assert!(result.errors[0].contains("duplicate"));
        assert!(set.routing.is_none());

        let result = set.insert(PolicyComponent::Tools, &json!({"intents": {"faq": []}}));
        assert!(!result.valid);
        assert!(set.is_empty());
    }

    #[test]
    fn test_package_round_trip() {
        let mut policies = PolicySet::default();
        policies.insert(PolicyComponent::Cache, &json!({"ttl_seconds": 60, "max_entries": 1000}));
        policies.insert(PolicyComponent::Adapter, &json!({"name": "support-lora", "path": "s3://adapters/support"}));

        let package = PolicyPackage {
            version: "v1".into(),
            created_at: Utc::now(),
            policies,
            metadata: PackageMetadata {
                package_valid: true,
                ..Default::default()
            },
        };
        let bytes = package.to_bytes().unwrap();
        assert_eq!(PolicyPackage::from_slice(&bytes).unwrap(), package);
    }

    #[test]
    fn test_from_slice_rejects_bad_package() {
        assert!(PolicyPackage::from_slice(b"{not json").is_err());
        let bad = json!({
            "version": "v2",
            "created_at": "2026-01-01T00:00:00Z",
            "policies": {"routing": {"arms": [], "alpha": 1.0, "feature_dim": 3}},
            "metadata": {"package_valid": true}
        });
        let err = PolicyPackage::from_slice(bad.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, Error::PolicyValidation { .. }));
    }

    #[test]
    fn test_component_names() {
        for component in PolicyComponent::PACKAGED {
            assert_eq!(component.as_str().parse::<PolicyComponent>().unwrap(), component);
        }
        assert!("widgets".parse::<PolicyComponent>().is_err());
    }
}
