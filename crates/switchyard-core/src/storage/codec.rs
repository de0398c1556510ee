//! Bit-exact encoding of floating point state.
//!
//! Matrices and vectors are stored as base64 over little-endian IEEE-754
//! bytes so a snapshot reloads to exactly the same bits it was taken from.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::Error;
use crate::Result;

/// Encode a slice of `f64` as base64 of little-endian bytes
pub fn encode_f64s(values: &[f64]) -> String {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode the output of [`encode_f64s`]
pub fn decode_f64s(encoded: &str) -> Result<Vec<f64>> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::InvalidInput(format!("Invalid base64 state: {}", e)))?;
    if bytes.len() % 8 != 0 {
        return Err(Error::InvalidInput(format!(
            "Encoded state has {} bytes, not a multiple of 8",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect())
}

/// `#[serde(with = "...")]` adapter for `Vec<f64>` fields
pub mod f64_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_f64s(values))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        super::decode_f64s(&encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_survive_encoding() {
        let values = vec![0.1 + 0.2, -0.0, f64::MIN_POSITIVE, 1e300, 1.0 / 3.0];
        let decoded = decode_f64s(&encode_f64s(&values)).unwrap();
        let bits: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
        let decoded_bits: Vec<u64> = decoded.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, decoded_bits);
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let encoded = STANDARD.encode([1u8, 2, 3]);
        assert!(decode_f64s(&encoded).is_err());
        assert!(decode_f64s("not base64!").is_err());
    }

    #[test]
    fn test_empty_vector() {
        assert_eq!(encode_f64s(&[]), "");
        assert!(decode_f64s("").unwrap().is_empty());
    }
}
