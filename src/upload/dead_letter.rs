//! # Dead-Letter Log
//!
//! Append-only JSON Lines file of snapshots the object store rejected
//! permanently. These are never requeued; an operator can replay them once
//! the store configuration is fixed.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

use crate::error::Result;
use crate::telemetry::SensorSnapshot;

/// One rejected snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub reason: String,
    pub key: String,
    /// RFC 3339, UTC
    pub failed_at: String,
    pub snapshot: SensorSnapshot,
}

/// Dead-letter JSONL writer
///
/// Clones append to the same file under a shared lock.
#[derive(Debug, Clone)]
pub struct DeadLetterLog {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl DeadLetterLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a rejected snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the entry cannot be encoded or written
    pub fn record(&self, key: &str, reason: &str, snapshot: &SensorSnapshot) -> Result<()> {
        let entry = DeadLetter {
            reason: reason.to_string(),
            key: key.to_string(),
            failed_at: Utc::now().to_rfc3339(),
            snapshot: snapshot.clone(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Append a rejected snapshot, logging instead of failing
    pub fn record_or_log(&self, key: &str, reason: &str, snapshot: &SensorSnapshot) {
        if let Err(e) = self.record(key, reason, snapshot) {
            error!(
                "Failed to write dead letter for {} to {}: {}. Snapshot: {:?}",
                key,
                self.path.display(),
                e,
                snapshot
            );
        }
    }

    /// [`DeadLetterLog::record_or_log`] on the blocking thread pool
    pub async fn record_in_background(&self, key: &str, reason: &str, snapshot: &SensorSnapshot) {
        let log = self.clone();
        let (key, reason, snapshot) = (key.to_string(), reason.to_string(), snapshot.clone());
        let task = tokio::task::spawn_blocking(move || log.record_or_log(&key, &reason, &snapshot));
        if let Err(e) = task.await {
            error!("Dead letter task failed: {}", e);
        }
    }

    /// Read back all recorded entries
    ///
    /// A missing file has no entries.
    pub fn entries(&self) -> Result<Vec<DeadLetter>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }
}
