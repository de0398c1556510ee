//! On-disk formats shared by the policy store, deployment pipeline and logs
//!
//! - `codec`: lossless base64 encoding of `f64` vectors and matrices
//! - `files`: atomic writes and modification-time probes
//! - `jsonl`: append-only JSON Lines logs (episodes, canary comparisons)

pub mod codec;
pub mod files;
pub mod jsonl;

pub use files::{content_hash, file_stamp, write_atomic, write_json_atomic, FileStamp};
pub use jsonl::{JsonlLog, JsonlReadResult};
