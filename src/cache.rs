//! # Latest-State Cache
//!
//! Holds the most recently merged [`SensorSnapshot`] for readers such as the
//! status report.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::telemetry::SensorSnapshot;

#[derive(Debug, Default)]
struct CacheState {
    snapshot: SensorSnapshot,
    updates: u64,
}

/// Lock-guarded slot for the latest sensor state
#[derive(Debug, Default)]
pub struct LatestState {
    inner: Mutex<CacheState>,
}

impl LatestState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a new snapshot into the cached state
    ///
    /// See [`SensorSnapshot::merge`] for the overwrite rules.
    pub fn update(&self, snapshot: &SensorSnapshot) {
        let mut state = self.lock();
        state.snapshot.merge(snapshot);
        state.updates += 1;
    }

    /// Point-in-time copy of the cached state
    pub fn read(&self) -> SensorSnapshot {
        self.lock().snapshot.clone()
    }

    /// Number of snapshots merged since start
    pub fn updates(&self) -> u64 {
        self.lock().updates
    }

    // Poisoned locks are recovered; the next update overwrites the slot.
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
