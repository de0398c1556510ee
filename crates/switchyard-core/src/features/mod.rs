//! Feature encoding for contextual routing
//!
//! Turns a request's loosely-typed context into the dense vector the routing
//! bandit learns against:
//!
//! - **Categorical keys** are hashed (`"key=value"`) into a fixed block with a
//!   deterministic ±1 sign.
//! - **Numeric keys** are z-scored with fitted statistics and clipped.
//! - **Interactions** combine two keys into a second hashed block.
//!
//! The hash function and dimensions are part of the persisted state contract:
//! a routing snapshot records the schema fingerprint it was trained with.

pub mod encoder;
pub mod hashing;
mod record;

pub use encoder::{FeatureEncoder, FeatureSchema, FeatureVector, Interaction, NumericStats, Z_CLIP};
pub use hashing::{percent_bucket, stable_hash64};
pub use record::FeatureRecord;
