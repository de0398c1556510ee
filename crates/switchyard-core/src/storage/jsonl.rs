//! Append-only JSON Lines logs
//!
//! One record per line. Writers append whole lines under a process-local lock;
//! readers skip lines that fail to parse instead of failing the whole file, so
//! a torn final line from a crash never blocks replay.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::Result;

/// Records read back from a log, plus how many lines were unusable
#[derive(Debug, Clone)]
pub struct JsonlReadResult<T> {
    pub records: Vec<T>,
    pub skipped: usize,
}

/// An append-only JSONL file
#[derive(Debug)]
pub struct JsonlLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        self.append_all(std::slice::from_ref(record)).map(|_| ())
    }

    /// Append records in order; returns the number written
    pub fn append_all<T: Serialize>(&self, records: &[T]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        // Serialize before taking the lock
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&buf)?;
        writer.flush()?;
        Ok(records.len())
    }

    /// Read every parseable record. A missing file reads as empty.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<JsonlReadResult<T>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(JsonlReadResult {
                    records: Vec::new(),
                    skipped: 0,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut skipped = 0;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    warn!(
                        path = %self.path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping malformed JSONL line"
                    );
                }
            }
        }
        Ok(JsonlReadResult { records, skipped })
    }
}
