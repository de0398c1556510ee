//! Deterministic hashing for the feature hashing trick and traffic bucketing.
//!
//! Nothing here is cryptographic. The only requirement is that the same input
//! maps to the same output on every platform, in every process, forever:
//! persisted bandit state is indexed by these slots.

/// Seed used for categorical slot hashing.
pub const FEATURE_HASH_SEED: u64 = 0x5717_c4ad_0bad_f00d;

/// Seed used to derive the ±1 sign of a hashed feature.
const SIGN_HASH_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// FNV-1a over the bytes, finalized with SplitMix64.
#[must_use]
pub fn stable_hash64(seed: u64, s: &str) -> u64 {
    let mut h: u64 = 14695981039346656037u64;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211u64);
    }
    splitmix64(seed ^ h)
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Map a token to a slot in `[0, dim)` and a sign in `{-1.0, +1.0}`.
///
/// The sign comes from an independent hash so colliding tokens tend to cancel
/// instead of accumulating bias.
#[must_use]
pub fn slot_and_sign(seed: u64, token: &str, dim: usize) -> (usize, f64) {
    let dim = dim.max(1);
    let slot = (stable_hash64(seed, token) % dim as u64) as usize;
    let sign = if stable_hash64(seed ^ SIGN_HASH_SEED, token) & 1 == 0 {
        1.0
    } else {
        -1.0
    };
    (slot, sign)
}

/// Map a key to a bucket in `[0, 100)` with two decimals of resolution.
#[must_use]
pub fn percent_bucket(seed: u64, key: &str) -> f64 {
    (stable_hash64(seed, key) % 10_000) as f64 / 100.0
}
