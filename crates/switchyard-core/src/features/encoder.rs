//! Feature encoder: request context → fixed-length numeric vector.
//!
//! Layout of every vector produced by one encoder:
//!
//! ```text
//! [ bias | hashed categoricals (hash_dim) | z-scored numerics | interactions (interaction_dim) ]
//! ```
//!
//! Positional slots are what the routing bandit learns against, so the
//! transform is a pure function of (schema, fitted statistics, record).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::hashing::{self, FEATURE_HASH_SEED};
use super::record::FeatureRecord;
use crate::error::{Error, Result};

/// Numeric features are clipped to this absolute value after z-scoring
pub const Z_CLIP: f64 = 10.0;

/// Variance below this is treated as zero
const MIN_VARIANCE: f64 = 1e-12;

/// A dense feature vector
pub type FeatureVector = Vec<f64>;

/// A pair of keys combined into one interaction slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub left: String,
    pub right: String,
}

impl Interaction {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }
}

/// Which keys are read and how large each hashed block is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSchema {
    /// Keys hashed into the categorical block
    pub categorical: Vec<String>,
    /// Keys z-scored into the numeric block (one slot each, in this order)
    pub numeric: Vec<String>,
    /// Key pairs hashed into the interaction block
    pub interactions: Vec<Interaction>,
    /// Size of the categorical block
    pub hash_dim: usize,
    /// Size of the interaction block
    pub interaction_dim: usize,
    /// Hash seed; part of the schema because it decides slot positions
    pub seed: u64,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self {
            categorical: vec![
                "intent".to_string(),
                "channel".to_string(),
                "language".to_string(),
                "user_tier".to_string(),
            ],
            numeric: vec![
                "message_length".to_string(),
                "history_turns".to_string(),
                "system_load".to_string(),
            ],
            interactions: vec![
                Interaction::new("intent", "user_tier"),
                Interaction::new("message_length", "intent"),
                Interaction::new("message_length", "system_load"),
            ],
            hash_dim: 16,
            interaction_dim: 8,
            seed: FEATURE_HASH_SEED,
        }
    }
}

impl FeatureSchema {
    /// Total vector dimension
    pub fn dimension(&self) -> usize {
        1 + self.hash_dim + self.numeric.len() + self.interaction_dim
    }

    /// Check that the schema can be encoded
    pub fn validate(&self) -> Result<()> {
        if self.hash_dim == 0 {
            return Err(Error::InvalidInput("hash_dim must be at least 1".to_string()));
        }
        if !self.interactions.is_empty() && self.interaction_dim == 0 {
            return Err(Error::InvalidInput(
                "interaction_dim must be at least 1 when interactions are configured".to_string(),
            ));
        }
        for interaction in &self.interactions {
            for key in [&interaction.left, &interaction.right] {
                if !self.categorical.contains(key) && !self.numeric.contains(key) {
                    return Err(Error::InvalidInput(format!(
                        "interaction key '{}' is neither categorical nor numeric",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    /// Stable fingerprint of everything that decides slot positions
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update((self.hash_dim as u64).to_le_bytes());
        hasher.update((self.interaction_dim as u64).to_le_bytes());
        for key in &self.categorical {
            hasher.update(b"c:");
            hasher.update(key.as_bytes());
            hasher.update([0]);
        }
        for key in &self.numeric {
            hasher.update(b"n:");
            hasher.update(key.as_bytes());
            hasher.update([0]);
        }
        for interaction in &self.interactions {
            hasher.update(b"i:");
            hasher.update(interaction.left.as_bytes());
            hasher.update([0]);
            hasher.update(interaction.right.as_bytes());
            hasher.update([0]);
        }
        hex::encode(&hasher.finalize()[..8])
    }

    fn is_numeric(&self, key: &str) -> bool {
        self.numeric.iter().any(|k| k == key)
    }
}

/// Fitted statistics for one numeric key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub mean: f64,
    pub std: f64,
    pub count: u64,
}

impl Default for NumericStats {
    fn default() -> Self {
        Self {
            mean: 0.0,
            std: 1.0,
            count: 0,
        }
    }
}

/// Hashing-trick encoder with fitted numeric normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    schema: FeatureSchema,
    stats: BTreeMap<String, NumericStats>,
}

impl Default for FeatureEncoder {
    fn default() -> Self {
        Self {
            schema: FeatureSchema::default(),
            stats: BTreeMap::new(),
        }
    }
}

impl FeatureEncoder {
    /// Create an unfitted encoder (numerics pass through with mean 0, std 1)
    pub fn new(schema: FeatureSchema) -> Result<Self> {
        schema.validate()?;
        Ok(Self {
            schema,
            stats: BTreeMap::new(),
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn dimension(&self) -> usize {
        self.schema.dimension()
    }

    pub fn fingerprint(&self) -> String {
        self.schema.fingerprint()
    }

    /// Fitted statistics for a numeric key, if any
    pub fn stats(&self, key: &str) -> Option<&NumericStats> {
        self.stats.get(key)
    }

    /// Compute mean and sample standard deviation per numeric key.
    ///
    /// Keys with fewer than 2 observations, or near-zero variance, get std 1.0.
    pub fn fit<'a>(&mut self, records: impl IntoIterator<Item = &'a FeatureRecord>) {
        // Welford running mean and sum of squared deviations
        let mut running: BTreeMap<&str, (u64, f64, f64)> = BTreeMap::new();
        for record in records {
            for key in &self.schema.numeric {
                if let Some(value) = record.numeric(key) {
                    let (count, mean, m2) = running.entry(key.as_str()).or_insert((0, 0.0, 0.0));
                    *count += 1;
                    let delta = value - *mean;
                    *mean += delta / *count as f64;
                    *m2 += delta * (value - *mean);
                }
            }
        }

        let mut stats = BTreeMap::new();
        for key in &self.schema.numeric {
            let (count, mean, m2) = running.get(key.as_str()).copied().unwrap_or((0, 0.0, 0.0));
            let std = if count < 2 {
                1.0
            } else {
                let variance = (m2 / (count - 1) as f64).max(0.0);
                if variance < MIN_VARIANCE {
                    1.0
                } else {
                    variance.sqrt()
                }
            };
            if count < 2 {
                warn!(key = %key, count, "Too few samples to fit numeric feature, using std=1.0");
            }
            stats.insert(key.clone(), NumericStats { mean, std, count });
        }

        debug!(keys = stats.len(), "Fitted feature statistics");
        self.stats = stats;
    }

    /// z-score and clip one numeric value
    pub fn normalize(&self, key: &str, value: f64) -> f64 {
        let stats = self.stats.get(key).copied().unwrap_or_default();
        let std = if stats.std.is_finite() && stats.std > 0.0 {
            stats.std
        } else {
            1.0
        };
        let z = (value - stats.mean) / std;
        if z.is_finite() { z.clamp(-Z_CLIP, Z_CLIP) } else { 0.0 }
    }

    fn normalized(&self, record: &FeatureRecord, key: &str) -> Option<f64> {
        record.numeric(key).map(|v| self.normalize(key, v))
    }

    /// Encode one record
    pub fn transform(&self, record: &FeatureRecord) -> FeatureVector {
        let schema = &self.schema;
        let mut x = vec![0.0; schema.dimension()];
        x[0] = 1.0;

        let cat_offset = 1;
        for key in &schema.categorical {
            if let Some(value) = record.categorical(key) {
                let token = format!("{}={}", key, value);
                let (slot, sign) = hashing::slot_and_sign(schema.seed, &token, schema.hash_dim);
                x[cat_offset + slot] += sign;
            }
        }

        let num_offset = cat_offset + schema.hash_dim;
        for (i, key) in schema.numeric.iter().enumerate() {
            if let Some(z) = self.normalized(record, key) {
                x[num_offset + i] = z;
            }
        }

        let int_offset = num_offset + schema.numeric.len();
        for interaction in &schema.interactions {
            let (left, right) = (&interaction.left, &interaction.right);
            match (schema.is_numeric(left), schema.is_numeric(right)) {
                (false, false) => {
                    if let (Some(a), Some(b)) = (record.categorical(left), record.categorical(right)) {
                        let token = format!("{}={}&{}={}", left, a, right, b);
                        let (slot, sign) =
                            hashing::slot_and_sign(schema.seed, &token, schema.interaction_dim);
                        x[int_offset + slot] += sign;
                    }
                }
                (true, false) | (false, true) => {
                    let (num_key, cat_key) = if schema.is_numeric(left) {
                        (left, right)
                    } else {
                        (right, left)
                    };
                    if let (Some(z), Some(cat)) =
                        (self.normalized(record, num_key), record.categorical(cat_key))
                    {
                        let token = format!("{}*{}={}", num_key, cat_key, cat);
                        let (slot, sign) =
                            hashing::slot_and_sign(schema.seed, &token, schema.interaction_dim);
                        x[int_offset + slot] += sign * z;
                    }
                }
                (true, true) => {
                    if let (Some(a), Some(b)) =
                        (self.normalized(record, left), self.normalized(record, right))
                    {
                        let token = format!("{}*{}", left, right);
                        let (slot, _) =
                            hashing::slot_and_sign(schema.seed, &token, schema.interaction_dim);
                        x[int_offset + slot] += (a * b).clamp(-Z_CLIP, Z_CLIP);
                    }
                }
            }
        }

        x
    }
}
