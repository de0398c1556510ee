//! Raw request context as received from the serving layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key/value context for a single request.
///
/// Values stay loosely typed at this boundary; the encoder decides per key
/// whether a value is read as categorical or numeric, and coerces anything it
/// cannot read to "absent".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureRecord(BTreeMap<String, Value>);

impl FeatureRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build from an arbitrary JSON value; non-objects become an empty record
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            _ => Self::new(),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Raw access to a field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read a field as a categorical value.
    ///
    /// Strings are trimmed; empty strings, nulls, arrays and objects are absent.
    pub fn categorical(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Read a field as a finite number.
    ///
    /// Numeric strings are parsed and booleans map to 1/0.
    pub fn numeric(&self, key: &str) -> Option<f64> {
        let value = match self.0.get(key)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            _ => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for FeatureRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_categorical_coercion() {
        let record = FeatureRecord::from_value(&json!({
            "intent": " billing ",
            "empty": "",
            "flag": true,
            "tier": 3,
            "nested": {"a": 1},
            "missing": null,
        }));

        assert_eq!(record.categorical("intent").as_deref(), Some("billing"));
        assert_eq!(record.categorical("empty"), None);
        assert_eq!(record.categorical("flag").as_deref(), Some("true"));
        assert_eq!(record.categorical("tier").as_deref(), Some("3"));
        assert_eq!(record.categorical("nested"), None);
        assert_eq!(record.categorical("missing"), None);
        assert_eq!(record.categorical("absent"), None);
    }

    #[test]
    fn test_numeric_coercion() {
        let record = FeatureRecord::from_value(&json!({
            "length": 120,
            "load": "0.75",
            "cached": false,
            "bad": "n/a",
        }));

        assert_eq!(record.numeric("length"), Some(120.0));
        assert_eq!(record.numeric("load"), Some(0.75));
        assert_eq!(record.numeric("cached"), Some(0.0));
        assert_eq!(record.numeric("bad"), None);
    }

    #[test]
    fn test_non_object_is_empty() {
        assert!(FeatureRecord::from_value(&json!([1, 2, 3])).is_empty());
        assert!(FeatureRecord::from_value(&Value::Null).is_empty());
    }
}
