//! # Status Summary
//!
//! Read-only view of the bridge: queue depth, cache activity and the most
//! recent snapshot. Logged periodically as JSON.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::cache::LatestState;
use crate::error::Result;
use crate::queue::OfflineQueue;
use crate::telemetry::SensorSnapshot;

/// Status line reported while the bridge is running
pub const RUNNING_STATUS: &str = "Serial bridge running. Uploading to object store.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub status: String,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub bus_type: String,
    pub cache_updates: u64,
    pub latest: SensorSnapshot,
}

impl StatusReport {
    /// Copy the shared state
    ///
    /// The cache and queue are read one after the other, never locked together.
    pub fn capture(cache: &LatestState, queue: &OfflineQueue, bus_type: &str) -> Self {
        let latest = cache.read();
        let cache_updates = cache.updates();

        Self {
            status: RUNNING_STATUS.to_string(),
            queue_size: queue.len(),
            queue_capacity: queue.capacity(),
            bus_type: bus_type.to_string(),
            cache_updates,
            latest,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Log a [`StatusReport`] every `period` until the task is aborted
pub async fn run_status_reporter(
    cache: Arc<LatestState>,
    queue: Arc<OfflineQueue>,
    bus_type: String,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match StatusReport::capture(&cache, &queue, &bus_type).to_json() {
            Ok(json) => info!("Status: {}", json),
            Err(e) => warn!("Failed to encode status: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_capture_empty_state() {
        let cache = LatestState::new();
        let queue = OfflineQueue::new("unused.json", 100);

        let report = StatusReport::capture(&cache, &queue, "route_7");

        assert_eq!(report.queue_size, 0);
        assert_eq!(report.queue_capacity, 100);
        assert_eq!(report.bus_type, "route_7");
        assert_eq!(report.cache_updates, 0);
        assert_eq!(report.latest, SensorSnapshot::default());
    }

    #[test]
    fn test_capture_reflects_cache_and_queue() {
        let cache = LatestState::new();
        let queue = OfflineQueue::new("unused.json", 100);
        let snapshot = SensorSnapshot {
            timestamp: Some("2025-01-01 12:00:00".to_string()),
            gps_fix_valid: true,
            latitude: Some(10.5),
            ..Default::default()
        };
        cache.update(&snapshot);
        queue.enqueue(snapshot.clone());
        queue.enqueue(snapshot);

        let report = StatusReport::capture(&cache, &queue, "gold");

        assert_eq!(report.queue_size, 2);
        assert_eq!(report.cache_updates, 1);
        assert_eq!(report.latest.latitude, Some(10.5));
    }

    #[test]
    fn test_json_shape() {
        let cache = LatestState::new();
        let queue = OfflineQueue::new("unused.json", 10);

        let json = StatusReport::capture(&cache, &queue, "gold").to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["status"], RUNNING_STATUS);
        assert_eq!(value["queue_size"], 0);
        assert_eq!(value["queue_capacity"], 10);
        assert_eq!(value["bus_type"], "gold");
        assert!(value["latest"].is_object());
    }

    #[tokio::test]
    async fn test_reporter_runs_until_aborted() {
        let cache = Arc::new(LatestState::new());
        let queue = Arc::new(OfflineQueue::new("unused.json", 10));

        let task = tokio::spawn(run_status_reporter(
            Arc::clone(&cache),
            Arc::clone(&queue),
            "gold".to_string(),
            Duration::from_millis(5),
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!task.is_finished());
        task.abort();
    }
}
