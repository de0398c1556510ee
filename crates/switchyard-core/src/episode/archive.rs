use serde_json::Value;
use std::path::{Path, PathBuf};

use super::Episode;
use crate::storage::JsonlLog;
use crate::Result;

/// Append-only JSONL archive of consumed episodes
#[derive(Debug)]
pub struct EpisodeArchive {
    log: JsonlLog,
}

impl EpisodeArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            log: JsonlLog::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    pub fn append(&self, episode: &Episode) -> Result<()> {
        self.log.append(episode)
    }

    /// Read all episodes in archive order.
    ///
    /// Lines go through [`Episode::from_value`], so hand-written or older
    /// records are coerced rather than rejected.
    pub fn read_all(&self) -> Result<Vec<Episode>> {
        let read = self.log.read_all::<Value>()?;
        Ok(read.records.iter().map(Episode::from_value).collect())
    }
}
