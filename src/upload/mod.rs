//! # Upload Module
//!
//! Delivers snapshots to an object store.
//!
//! This module handles:
//! - The [`ObjectStore`] seam (`put(key, body, content_type)`)
//! - Deterministic object keys derived from the snapshot timestamp
//! - Classifying each attempt as delivered, transient or permanent failure
//! - Recording permanently rejected snapshots in a dead-letter file

pub mod dead_letter;
pub mod store;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::telemetry::SensorSnapshot;

pub use dead_letter::{DeadLetter, DeadLetterLog};
pub use store::DirectoryStore;

/// Content type of every uploaded object
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Top-level key prefix for sensor objects
pub const KEY_PREFIX: &str = "sensor_data";

/// Device timestamp format produced by the parser
const DEVICE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Failure reported by an object store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Network or service error; retrying may succeed
    #[error("transient store failure: {0}")]
    Transient(String),

    /// Credential or configuration error; retrying will not help
    #[error("permanent store failure: {0}")]
    Permanent(String),
}

/// Destination for uploaded objects
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StoreError>;
}

/// Result of a single upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Delivered { key: String },
    TransientFailure { key: String, reason: String },
    PermanentFailure { key: String, reason: String },
}

impl UploadOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, UploadOutcome::Delivered { .. })
    }
}

/// Serializes snapshots and puts them into an [`ObjectStore`]
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    bus_type: String,
    date_partitioned: bool,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("bus_type", &self.bus_type)
            .field("date_partitioned", &self.date_partitioned)
            .finish_non_exhaustive()
    }
}

impl Uploader {
    /// Creates an uploader
    ///
    /// # Arguments
    ///
    /// * `store` - Object store to deliver to
    /// * `bus_type` - Bus type or trip identifier, used as a key segment
    /// * `date_partitioned` - Insert `yyyy/mm/dd/` directories into keys
    pub fn new(store: Arc<dyn ObjectStore>, bus_type: impl Into<String>, date_partitioned: bool) -> Self {
        Self {
            store,
            bus_type: bus_type.into(),
            date_partitioned,
        }
    }

    pub fn bus_type(&self) -> &str {
        &self.bus_type
    }

    /// Attempt one delivery of `snapshot`
    ///
    /// Never retries; the caller decides what to do with a failure.
    pub async fn attempt(&self, snapshot: &SensorSnapshot) -> UploadOutcome {
        let key = object_key(&self.bus_type, self.date_partitioned, snapshot, Utc::now());

        let body = match snapshot.to_json_bytes() {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                error!("Failed to serialize snapshot for {}: {}", key, e);
                return UploadOutcome::PermanentFailure {
                    key,
                    reason: e.to_string(),
                };
            }
        };

        match self.store.put(&key, body, JSON_CONTENT_TYPE).await {
            Ok(()) => {
                info!("Successfully uploaded {}", key);
                UploadOutcome::Delivered { key }
            }
            Err(StoreError::Transient(reason)) => {
                warn!("Upload of {} failed: {}", key, reason);
                UploadOutcome::TransientFailure { key, reason }
            }
            Err(StoreError::Permanent(reason)) => {
                error!("Upload of {} rejected: {}", key, reason);
                UploadOutcome::PermanentFailure { key, reason }
            }
        }
    }
}

/// Build the object key for a snapshot
///
/// `sensor_data/<bus_type>/[<yyyy>/<mm>/<dd>/]data_<timestamp>.json`, where the
/// device timestamp has spaces replaced by `T` and colons by `-`. Without a
/// timestamp, `now` is used instead (formatted `%Y-%m-%dT%H-%M-%SZ`). Date
/// directories come from the device timestamp when it parses, else from `now`.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use sensor_bridge::telemetry::SensorSnapshot;
/// use sensor_bridge::upload::object_key;
///
/// let snapshot = SensorSnapshot {
///     timestamp: Some("2025-03-30 17:23:59".to_string()),
///     ..Default::default()
/// };
///
/// assert_eq!(
///     object_key("gold", true, &snapshot, Utc::now()),
///     "sensor_data/gold/2025/03/30/data_2025-03-30T17-23-59.json"
/// );
/// ```
pub fn object_key(
    bus_type: &str,
    date_partitioned: bool,
    snapshot: &SensorSnapshot,
    now: DateTime<Utc>,
) -> String {
    let (stamp, date) = match snapshot.timestamp.as_deref() {
        Some(ts) => {
            let date = NaiveDateTime::parse_from_str(ts, DEVICE_TIMESTAMP_FORMAT)
                .unwrap_or_else(|_| now.naive_utc());
            (ts.replace(' ', "T").replace(':', "-"), date)
        }
        None => (now.format("%Y-%m-%dT%H-%M-%SZ").to_string(), now.naive_utc()),
    };

    if date_partitioned {
        format!(
            "{}/{}/{}/data_{}.json",
            KEY_PREFIX,
            bus_type,
            date.format("%Y/%m/%d"),
            stamp
        )
    } else {
        format!("{}/{}/data_{}.json", KEY_PREFIX, bus_type, stamp)
    }
}
