//! # Ingestion
//!
//! Reads lines from a [`LineSource`], assembles and parses blocks, updates the
//! latest-state cache and hands each snapshot to the [`Dispatcher`].
//!
//! A disconnected source is reopened after a fixed backoff, forever. Lines of
//! a block that was in flight at the disconnect are discarded.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cache::LatestState;
use crate::config::AssemblerConfig;
use crate::dispatch::{Dispatcher, Disposition};
use crate::error::Result;
use crate::serial::LineSource;
use crate::telemetry::{BlockAssembler, BlockParser, SensorSnapshot};

/// Result of handling one completed block
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub snapshot: SensorSnapshot,
    pub disposition: Disposition,
}

/// Line-to-delivery pipeline state
#[derive(Debug)]
pub struct Ingestor {
    assembler: BlockAssembler,
    parser: BlockParser,
    cache: Arc<LatestState>,
    dispatcher: Arc<Dispatcher>,
    blocks_parsed: u64,
    blocks_rejected: u64,
}

impl Ingestor {
    /// Creates an ingestor
    ///
    /// # Errors
    ///
    /// Returns error if the block parser patterns fail to compile
    pub fn new(
        assembler: &AssemblerConfig,
        cache: Arc<LatestState>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        Ok(Self {
            assembler: BlockAssembler::new(assembler.max_block_lines, assembler.terminator_min_dashes),
            parser: BlockParser::new()?,
            cache,
            dispatcher,
            blocks_parsed: 0,
            blocks_rejected: 0,
        })
    }

    /// Number of blocks parsed and dispatched
    pub fn blocks_parsed(&self) -> u64 {
        self.blocks_parsed
    }

    /// Number of blocks discarded as malformed
    pub fn blocks_rejected(&self) -> u64 {
        self.blocks_rejected
    }

    /// Handle one line
    ///
    /// Returns the snapshot and its fate when the line completed a block that
    /// parsed successfully.
    pub async fn handle_line(&mut self, line: &str) -> Option<Ingested> {
        let block = self.assembler.feed(line)?;

        let Some(snapshot) = self.parser.parse(&block) else {
            self.blocks_rejected += 1;
            return None;
        };
        self.blocks_parsed += 1;

        self.cache.update(&snapshot);
        let disposition = self.dispatcher.dispatch(snapshot.clone()).await;
        debug!("Block {:?} -> {:?}", snapshot.timestamp, disposition);

        Some(Ingested {
            snapshot,
            disposition,
        })
    }

    /// Read from `source` until it disconnects
    ///
    /// Returns the number of snapshots ingested.
    pub async fn consume<S: LineSource>(&mut self, source: &mut S) -> usize {
        let mut ingested = 0;

        loop {
            match source.next_line().await {
                Ok(Some(line)) => {
                    if self.handle_line(&line).await.is_some() {
                        ingested += 1;
                    }
                }
                Ok(None) => {
                    warn!("{} closed", source.describe());
                    break;
                }
                Err(e) => {
                    warn!("{} error: {}. Reconnecting...", source.describe(), e);
                    break;
                }
            }
        }

        self.assembler.reset();
        ingested
    }

    /// Open sources with `connect` and consume them, reconnecting forever
    ///
    /// Waits `backoff` after every failed open and every disconnect.
    pub async fn run<S, F>(&mut self, mut connect: F, backoff: Duration)
    where
        S: LineSource,
        F: FnMut() -> Result<S> + Send,
    {
        loop {
            match connect() {
                Ok(mut source) => {
                    info!("Reading telemetry from {}", source.describe());
                    let ingested = self.consume(&mut source).await;
                    info!("{} snapshots ingested before disconnect", ingested);
                }
                Err(e) => {
                    warn!("Failed to connect: {}. Retrying in {:?}", e, backoff);
                }
            }
            sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RetryPolicy;
    use crate::error::BridgeError;
    use crate::queue::OfflineQueue;
    use crate::serial::line_source::mocks::MockLineSource;
    use crate::upload::{DeadLetterLog, MockObjectStore, StoreError, Uploader};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    const SEARCHING_BLOCK: &[&str] = &[
        "Date/Time: 2025-01-01 12:00:00",
        "GPS: Searching, No fix for 12 seconds",
        "-------",
    ];

    fn ingestor(store: MockObjectStore, dir: &TempDir) -> (Ingestor, Arc<LatestState>, Arc<OfflineQueue>) {
        let cache = Arc::new(LatestState::new());
        let queue = Arc::new(OfflineQueue::new(dir.path().join("queue.json"), 10));
        let dispatcher = Arc::new(Dispatcher::new(
            Uploader::new(Arc::new(store), "gold", true),
            Arc::clone(&queue),
            DeadLetterLog::new(dir.path().join("dead.jsonl")),
            RetryPolicy::default(),
        ));
        let ingestor = Ingestor::new(&AssemblerConfig::default(), Arc::clone(&cache), dispatcher).unwrap();
        (ingestor, cache, queue)
    }

    #[tokio::test]
    async fn test_block_updates_cache_and_uploads() {
        let dir = tempdir().unwrap();
        let mut store = MockObjectStore::new();
        store
            .expect_put()
            .withf(|key, _, _| key == "sensor_data/gold/2025/01/01/data_2025-01-01T12-00-00.json")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let (mut ingestor, cache, queue) = ingestor(store, &dir);

        assert!(ingestor.handle_line(SEARCHING_BLOCK[0]).await.is_none());
        assert!(ingestor.handle_line(SEARCHING_BLOCK[1]).await.is_none());
        let ingested = ingestor.handle_line(SEARCHING_BLOCK[2]).await.unwrap();

        assert_eq!(ingested.disposition, Disposition::Uploaded);
        assert_eq!(
            ingested.snapshot,
            SensorSnapshot {
                timestamp: Some("2025-01-01 12:00:00".to_string()),
                gps_fix_valid: false,
                latitude: Some(0.0),
                longitude: Some(0.0),
                altitude: Some(0.0),
                speed: Some(0.0),
                bearing: Some(0.0),
                seconds_since_fix: Some(12),
                ..Default::default()
            }
        );
        assert_eq!(cache.read(), ingested.snapshot);
        assert!(queue.is_empty());
        assert_eq!(ingestor.blocks_parsed(), 1);
    }

    #[tokio::test]
    async fn test_failed_upload_goes_to_queue() {
        let dir = tempdir().unwrap();
        let mut store = MockObjectStore::new();
        store
            .expect_put()
            .returning(|_, _, _| Err(StoreError::Transient("offline".to_string())));
        let (mut ingestor, cache, queue) = ingestor(store, &dir);

        let mut last = None;
        for line in ["GPS: Lat: 10.5, Lon: 20.5, Alt: 5.0", "-----"] {
            last = ingestor.handle_line(line).await;
        }

        let ingested = last.unwrap();
        assert_eq!(ingested.disposition, Disposition::Queued);
        assert_eq!(queue.snapshot(), vec![ingested.snapshot.clone()]);
        assert!(cache.read().gps_fix_valid);
        assert_eq!(cache.read().latitude, Some(10.5));
    }

    #[tokio::test]
    async fn test_malformed_block_is_not_cached_or_uploaded() {
        let dir = tempdir().unwrap();
        let mut store = MockObjectStore::new();
        store.expect_put().never();
        let (mut ingestor, cache, queue) = ingestor(store, &dir);

        ingestor.handle_line("Date/Time: 2025-01-01 12:00:00").await;
        ingestor.handle_line("Mean (Magnitude): 9..8.1").await;
        assert!(ingestor.handle_line("-------").await.is_none());

        assert_eq!(cache.updates(), 0);
        assert!(queue.is_empty());
        assert_eq!(ingestor.blocks_rejected(), 1);
    }

    #[tokio::test]
    async fn test_consume_until_disconnect_discards_partial_block() {
        let dir = tempdir().unwrap();
        let mut store = MockObjectStore::new();
        store.expect_put().times(1).returning(|_, _, _| Ok(()));
        let (mut ingestor, _cache, _queue) = ingestor(store, &dir);

        let mut lines = SEARCHING_BLOCK.to_vec();
        lines.push("Date/Time: 2025-01-01 12:00:01");
        let mut source = MockLineSource::new(&lines).failing_with(std::io::ErrorKind::BrokenPipe);

        assert_eq!(ingestor.consume(&mut source).await, 1);

        // The half block from before the disconnect is gone
        let mut next = MockLineSource::new(&["-------"]);
        assert_eq!(ingestor.consume(&mut next).await, 0);
    }

    #[tokio::test]
    async fn test_run_reconnects_after_failures() {
        let dir = tempdir().unwrap();
        let mut store = MockObjectStore::new();
        store.expect_put().returning(|_, _, _| Ok(()));
        let (mut ingestor, cache, _queue) = ingestor(store, &dir);

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let connect = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(BridgeError::SerialPortNotFound("/dev/ttyACM0".to_string()))
            } else {
                Ok(MockLineSource::new(SEARCHING_BLOCK))
            }
        };

        let _ = tokio::time::timeout(
            Duration::from_millis(200),
            ingestor.run(connect, Duration::from_millis(20)),
        )
        .await;

        assert!(attempts.load(Ordering::SeqCst) >= 3);
        assert!(cache.updates() >= 2);
        assert_eq!(cache.read().seconds_since_fix, Some(12));
    }
}
