//! In-memory window store implementations.
//!
//! Both stores keep records in process memory only, which suits a
//! single-instance deployment. [`InMemoryWindowStore`] guards one map with a
//! read/write lock; [`ShardedWindowStore`] spreads keys over the shards of a
//! concurrent map so unrelated keys never contend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use super::store::{elapsed_since, StoreError, WindowRecord, WindowStore};

/// Stores that can drop records past a retention horizon.
pub trait Evict: Send + Sync {
    /// Remove every record whose window started more than `retention` ago.
    ///
    /// Returns the number of records removed.
    fn evict_stale(&self, retention: Duration) -> usize;
}

/// Window store backed by a single map behind a read/write lock.
///
/// Lookups take the shared lock; increments and eviction take the exclusive
/// lock for exactly one map access.
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    records: RwLock<HashMap<String, WindowRecord>>,
}

impl InMemoryWindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn increment_at(&self, key: &str, window: Duration, now: DateTime<Utc>) -> WindowRecord {
        let mut records = self.records.write();
        match records.get_mut(key) {
            Some(record) if !record.is_expired(window, now) => {
                record.count += 1;
                record.clone()
            }
            _ => {
                let record = WindowRecord::fresh(key, now);
                records.insert(key.to_string(), record.clone());
                record
            }
        }
    }

    fn evict_at(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| elapsed_since(record.window_start, now) <= retention);
        before - records.len()
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn get(&self, key: &str) -> Result<Option<WindowRecord>, StoreError> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn increment_and_get(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowRecord, StoreError> {
        let record = self.increment_at(key, window, Utc::now());
        trace!(key = %key, count = record.count, "Incremented window record");
        Ok(record)
    }
}

impl Evict for InMemoryWindowStore {
    fn evict_stale(&self, retention: Duration) -> usize {
        self.evict_at(retention, Utc::now())
    }
}

/// Window store backed by a sharded concurrent map.
///
/// Each key's entry lock serializes increments for that key while keys in
/// other shards proceed in parallel.
#[derive(Debug, Default)]
pub struct ShardedWindowStore {
    records: DashMap<String, WindowRecord>,
}

impl ShardedWindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn increment_at(&self, key: &str, window: Duration, now: DateTime<Utc>) -> WindowRecord {
        let mut entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| WindowRecord {
                key: key.to_string(),
                count: 0,
                window_start: now,
            });

        if entry.is_expired(window, now) {
            *entry = WindowRecord::fresh(key, now);
        } else {
            entry.count += 1;
        }
        entry.clone()
    }

    fn evict_at(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| elapsed_since(record.window_start, now) <= retention);
        before.saturating_sub(self.records.len())
    }
}

#[async_trait]
impl WindowStore for ShardedWindowStore {
    async fn get(&self, key: &str) -> Result<Option<WindowRecord>, StoreError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn increment_and_get(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowRecord, StoreError> {
        let record = self.increment_at(key, window, Utc::now());
        trace!(key = %key, count = record.count, "Incremented window record");
        Ok(record)
    }
}

impl Evict for ShardedWindowStore {
    fn evict_stale(&self, retention: Duration) -> usize {
        self.evict_at(retention, Utc::now())
    }
}
