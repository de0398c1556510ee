//! Directory layout of a deployment stage
//!
//! ```text
//! <root>/<stage>/
//! ├── active.json              # pointer to the live package
//! ├── packages/<version>.json  # promoted packages
//! ├── snapshots/<stage>-<timestamp>.json  # rollback points
//! ├── history/                 # packages replaced by a rollback
//! └── state/
//!     ├── routing.json         # routing bandit snapshot
//!     └── tools.json           # tool bandit snapshot
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::Result;

pub const POINTER_FILE: &str = "active.json";

/// Deployment stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Canary,
    Prod,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Canary => "canary",
            Self::Prod => "prod",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "canary" => Ok(Self::Canary),
            "prod" | "production" => Ok(Self::Prod),
            _ => Err(Error::UnknownStage(s.to_string())),
        }
    }
}

/// Contents of `active.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivePointer {
    pub version: String,
    /// Package path relative to the stage directory
    pub package: String,
    /// SHA-256 of the package file
    pub sha256: String,
    pub activated_at: DateTime<Utc>,
}

/// Paths for one stage under a policy root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLayout {
    root: PathBuf,
    stage: Stage,
}

impl StageLayout {
    pub fn new(root: impl Into<PathBuf>, stage: Stage) -> Self {
        Self {
            root: root.into(),
            stage,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_dir(&self) -> PathBuf {
        self.root.join(self.stage.as_str())
    }

    pub fn pointer_path(&self) -> PathBuf {
        self.stage_dir().join(POINTER_FILE)
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.stage_dir().join("packages")
    }

    /// Relative path recorded in the pointer for a package version
    pub fn package_relative(&self, version: &str) -> String {
        format!("packages/{}.json", sanitize_file_stem(version))
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.stage_dir().join(relative)
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.stage_dir().join("snapshots")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.stage_dir().join("history")
    }

    pub fn routing_state_path(&self) -> PathBuf {
        self.stage_dir().join("state").join("routing.json")
    }

    pub fn tool_state_path(&self) -> PathBuf {
        self.stage_dir().join("state").join("tools.json")
    }

    /// Read and parse the active pointer; `None` if the stage has none
    pub fn read_pointer(&self) -> Result<Option<ActivePointer>> {
        match std::fs::read(self.pointer_path()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keep version strings safe to use as file names
fn sanitize_file_stem(version: &str) -> String {
    let cleaned: String = version
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "package".to_string()
    } else {
        cleaned
    }
}
