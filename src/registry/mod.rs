//! Stream registry.
//!
//! Process-wide map from stream identifier to its [`StreamRecord`]. The map
//! is sharded ([`DashMap`]), so updates for different streams never contend
//! on a single lock. Each identifier has exactly one writer at a time: the
//! lifecycle controller's worker for that stream.

mod types;

pub use types::*;

use chrono::Utc;
use dashmap::DashMap;
use liveforged_common::StreamId;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Thread-safe registry of stream records.
#[derive(Clone, Default)]
pub struct Registry {
    records: Arc<DashMap<StreamId, StreamRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one stream.
    pub fn get(&self, id: &StreamId) -> Option<StreamRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    /// Current state; unknown streams are `Idle`.
    pub fn state(&self, id: &StreamId) -> StreamState {
        self.records
            .get(id)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// Snapshots of all streams, ordered by identifier.
    pub fn list(&self) -> Vec<StreamRecord> {
        let mut records: Vec<StreamRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Number of streams in `state`.
    pub fn count_in(&self, state: StreamState) -> usize {
        self.records.iter().filter(|e| e.state == state).count()
    }

    /// Store the latest record for a stream.
    pub(crate) fn put(&self, record: StreamRecord) {
        self.records.insert(record.id.clone(), record);
    }

    /// Remove `Idle` records whose last event is older than `older_than`.
    ///
    /// The state check runs under the entry's shard lock, so a record that is
    /// re-published concurrently is never evicted.
    ///
    /// # Returns
    /// The number of records removed.
    pub fn evict_idle(&self, older_than: Duration) -> usize {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(older_than)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let mut removed_count = 0;
        self.records.retain(|stream_id, record| {
            let idle_for = now - record.last_event_at;
            if record.state == StreamState::Idle && idle_for > max_age {
                tracing::debug!(
                    stream_id = %stream_id,
                    idle_secs = idle_for.num_seconds(),
                    "Evicted idle stream record"
                );
                removed_count += 1;
                false
            } else {
                true
            }
        });

        removed_count
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Start a background task that periodically evicts stale idle records.
///
/// # Arguments
/// * `registry` - The registry to sweep.
/// * `retention` - How long an idle record is kept.
/// * `interval` - How often to sweep.
/// * `cancel` - Stops the task when triggered.
pub fn start_eviction_task(
    registry: Registry,
    retention: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }
            let removed = registry.evict_idle(retention);
            if removed > 0 {
                tracing::debug!(removed, "Swept idle stream records");
            }
        }
    })
}
