//! # Offline Queue
//!
//! Bounded FIFO of snapshots waiting for a successful upload, mirrored to a
//! JSON file.
//!
//! ## Capacity
//!
//! When the queue is full, new snapshots are dropped and older ones are kept.
//!
//! ## Persistence
//!
//! Saves are snapshots of the whole queue, taken on a schedule and at
//! shutdown, not a write-ahead log. Items enqueued after the last save are
//! lost if the process crashes. The file is replaced by rename, so a crash
//! mid-save leaves the previous file intact. An empty queue removes the file.

use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::telemetry::SensorSnapshot;

/// Default queue capacity
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// Disk-backed FIFO of snapshots awaiting delivery
#[derive(Debug)]
pub struct OfflineQueue {
    items: Mutex<VecDeque<SensorSnapshot>>,
    capacity: usize,
    path: PathBuf,
    /// Serializes file writes; holds the time of the last successful save
    file_state: Mutex<Option<Instant>>,
}

impl OfflineQueue {
    /// Creates an empty queue backed by `path`
    ///
    /// Nothing is read from disk until [`OfflineQueue::restore`] is called.
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            path: path.into(),
            file_state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    /// Time of the last successful [`OfflineQueue::persist`]
    pub fn last_saved(&self) -> Option<Instant> {
        *self.lock_file()
    }

    /// Append a snapshot unless the queue is full
    ///
    /// Returns `false` if the snapshot was dropped.
    pub fn enqueue(&self, item: SensorSnapshot) -> bool {
        let mut items = self.lock_items();
        if items.len() >= self.capacity {
            warn!(
                "Offline queue is full ({} items), discarding new snapshot {:?}",
                items.len(),
                item.timestamp
            );
            return false;
        }
        items.push_back(item);
        true
    }

    /// Remove up to `n` snapshots from the front, oldest first
    pub fn drain_batch(&self, n: usize) -> Vec<SensorSnapshot> {
        let mut items = self.lock_items();
        let count = n.min(items.len());
        items.drain(..count).collect()
    }

    /// Put snapshots back at the front, keeping their relative order
    ///
    /// May temporarily exceed capacity if new items arrived meanwhile; the
    /// returned items were already accepted once and are never dropped here.
    pub fn requeue_front(&self, failed: Vec<SensorSnapshot>) {
        let mut items = self.lock_items();
        for item in failed.into_iter().rev() {
            items.push_front(item);
        }
    }

    /// Copy of the queue contents in FIFO order
    pub fn snapshot(&self) -> Vec<SensorSnapshot> {
        self.lock_items().iter().cloned().collect()
    }

    /// Write the queue to its file, or remove the file if the queue is empty
    ///
    /// Returns the number of items written.
    ///
    /// # Errors
    ///
    /// Returns error if the queue cannot be encoded or the file cannot be
    /// written, renamed or removed. The in-memory queue is unaffected.
    pub fn persist(&self) -> Result<usize> {
        let mut last_saved = self.lock_file();
        let items = self.snapshot();

        if items.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) => info!("Queue is empty, removed {}", self.path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            *last_saved = Some(Instant::now());
            return Ok(0);
        }

        let encoded = serde_json::to_vec(&items)?;
        let temp_path = self.temp_path();
        fs::write(&temp_path, &encoded)?;
        fs::rename(&temp_path, &self.path)?;

        *last_saved = Some(Instant::now());
        info!("Saved {} items to {}", items.len(), self.path.display());
        Ok(items.len())
    }

    /// [`OfflineQueue::persist`], logging failures
    ///
    /// Returns whether the save succeeded.
    pub fn persist_or_log(&self) -> bool {
        match self.persist() {
            Ok(_) => true,
            Err(e) => {
                error!("Error saving queue to {}: {}", self.path.display(), e);
                false
            }
        }
    }

    /// Replace the queue contents with the persisted file
    ///
    /// A missing, unreadable or corrupt file yields an empty queue. A single
    /// entry that does not decode is skipped without discarding the rest.
    /// Entries beyond capacity are dropped, newest first. Returns the number
    /// of items loaded.
    pub fn restore(&self) -> usize {
        let mut loaded: VecDeque<SensorSnapshot> = match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<serde_json::Value>>(&bytes) {
                Ok(entries) => self.decode_entries(entries),
                Err(e) => {
                    warn!(
                        "Error loading queue from {}: {}. Starting with an empty queue.",
                        self.path.display(),
                        e
                    );
                    VecDeque::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No queue file at {}", self.path.display());
                VecDeque::new()
            }
            Err(e) => {
                warn!(
                    "Error reading queue from {}: {}. Starting with an empty queue.",
                    self.path.display(),
                    e
                );
                VecDeque::new()
            }
        };

        if loaded.len() > self.capacity {
            warn!(
                "Queue file holds {} items, keeping the oldest {}",
                loaded.len(),
                self.capacity
            );
            loaded.truncate(self.capacity);
        }

        let count = loaded.len();
        *self.lock_items() = loaded;
        if count > 0 {
            info!("Loaded {} items from {}", count, self.path.display());
        }
        count
    }

    /// [`OfflineQueue::persist_or_log`] on the blocking thread pool
    ///
    /// For async tasks, which must not block on file I/O.
    pub async fn persist_in_background(self: &Arc<Self>) -> bool {
        let queue = Arc::clone(self);
        match tokio::task::spawn_blocking(move || queue.persist_or_log()).await {
            Ok(saved) => saved,
            Err(e) => {
                error!("Queue save task failed: {}", e);
                false
            }
        }
    }

    /// Guard that persists the queue when dropped
    pub fn flush_guard(self: &Arc<Self>) -> FlushGuard {
        FlushGuard {
            queue: Arc::clone(self),
        }
    }

    fn decode_entries(&self, entries: Vec<serde_json::Value>) -> VecDeque<SensorSnapshot> {
        let total = entries.len();
        let items: VecDeque<SensorSnapshot> = entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| match serde_json::from_value(entry) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("Skipping queue entry {} in {}: {}", index, self.path.display(), e);
                    None
                }
            })
            .collect();

        if items.len() < total {
            warn!("Recovered {} of {} queue entries", items.len(), total);
        }
        items
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn lock_items(&self) -> MutexGuard<'_, VecDeque<SensorSnapshot>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_file(&self) -> MutexGuard<'_, Option<Instant>> {
        self.file_state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Persists the queue on drop
///
/// Runs when its owner goes out of scope on normal shutdown. The release
/// profile aborts on panic, so a panic skips it.
#[derive(Debug)]
pub struct FlushGuard {
    queue: Arc<OfflineQueue>,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        info!("Saving offline queue ({} items) before exit", self.queue.len());
        self.queue.persist_or_log();
    }
}

/// Persist the queue every `period`, regardless of queue activity
pub async fn run_periodic_save(queue: Arc<OfflineQueue>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; the restored file is already current
    ticker.tick().await;

    loop {
        ticker.tick().await;
        debug!("Periodic queue save");
        queue.persist_in_background().await;
    }
}
