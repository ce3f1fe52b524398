//! Blob store contract and the in-memory implementation.
//!
//! The whole protocol leans on one external property: for a given code,
//! `consume` succeeds at most once even under concurrency. [`MemoryBlobStore`]
//! gets it from `DashMap::remove_if`, which checks the nonce and removes the
//! entry under the same shard lock.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use super::record::ExchangeRecord;
use crate::logging::redact;
use crate::types::{RelayError, Result};

/// Key-addressed, expiring, single-read store
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Park a record until it is consumed or expires.
    async fn publish(&self, record: ExchangeRecord) -> Result<()>;

    /// Read and destroy the record for `code` if `nonce` matches and it has
    /// not expired. `Ok(None)` covers missing, expired and already consumed.
    async fn consume(&self, code: &str, nonce: &str) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    async fn publish(&self, record: ExchangeRecord) -> Result<()> {
        (**self).publish(record).await
    }

    async fn consume(&self, code: &str, nonce: &str) -> Result<Option<Vec<u8>>> {
        (**self).consume(code, nonce).await
    }
}

/// Limits enforced by the in-memory store
#[derive(Debug, Clone)]
pub struct ExchangeStoreConfig {
    /// Longest lifetime a published record may ask for
    pub max_ttl: Duration,

    /// Largest accepted payload
    pub max_payload_bytes: usize,

    /// Upper bound on live records
    pub max_records: usize,
}

impl Default for ExchangeStoreConfig {
    fn default() -> Self {
        Self {
            max_ttl: Duration::from_secs(300), // 5 minutes
            max_payload_bytes: 64 * 1024,      // chains are a few KB
            max_records: 100_000,
        }
    }
}

/// Store counters
#[derive(Debug, Default)]
struct StoreStats {
    published: AtomicU64,
    consumed: AtomicU64,
    expired: AtomicU64,
    misses: AtomicU64,
}

/// Snapshot of store counters
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatsSnapshot {
    pub live: usize,
    pub published: u64,
    pub consumed: u64,
    pub expired: u64,
    pub misses: u64,
}

/// In-memory exchange store
pub struct MemoryBlobStore {
    records: DashMap<String, ExchangeRecord>,
    config: ExchangeStoreConfig,
    stats: StoreStats,
    /// Records held or being inserted; reserved before insert so the cap holds
    slots: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new(config: ExchangeStoreConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
            stats: StoreStats::default(),
            slots: AtomicUsize::new(0),
        }
    }

    fn reserve_slot(&self) -> bool {
        let max = self.config.max_records;
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    fn release_slots(&self, count: usize) {
        let _ = self
            .slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(count))
            });
    }

    pub fn config(&self) -> &ExchangeStoreConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_limits(&self, record: &ExchangeRecord) -> Result<()> {
        if record.code.is_empty() || record.nonce.is_empty() {
            return Err(RelayError::Parameter("code and nonce are required".to_string()));
        }
        if record.payload.len() > self.config.max_payload_bytes {
            return Err(RelayError::PayloadTooLarge(format!(
                "{} bytes exceeds {} byte limit",
                record.payload.len(),
                self.config.max_payload_bytes
            )));
        }

        let now = Utc::now();
        if record.is_expired_at(now) {
            return Err(RelayError::ExpiryRejected("expiry is in the past".to_string()));
        }
        let max_ttl = chrono::Duration::from_std(self.config.max_ttl)
            .map_err(|e| RelayError::Config(format!("max_ttl out of range: {e}")))?;
        if record.expires_at > now + max_ttl {
            return Err(RelayError::ExpiryRejected(format!(
                "expiry exceeds {}s limit",
                self.config.max_ttl.as_secs()
            )));
        }
        Ok(())
    }

    /// Drop every expired record, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        self.records.retain(|_, record| {
            let expired = record.is_expired_at(now);
            if expired {
                removed += 1;
            }
            !expired
        });
        self.release_slots(removed);
        self.stats.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn stats(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            live: self.records.len(),
            published: self.stats.published.load(Ordering::Relaxed),
            consumed: self.stats.consumed.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new(ExchangeStoreConfig::default())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn publish(&self, record: ExchangeRecord) -> Result<()> {
        self.check_limits(&record)?;

        if !self.reserve_slot() {
            self.purge_expired();
            if !self.reserve_slot() {
                return Err(RelayError::Exchange("exchange store is full".to_string()));
            }
        }

        let now = Utc::now();
        let code = redact(&record.code);
        match self.records.entry(record.code.clone()) {
            Entry::Occupied(existing) if !existing.get().is_expired_at(now) => {
                self.release_slots(1);
                return Err(RelayError::Conflict("code already in use".to_string()));
            }
            Entry::Occupied(mut stale) => {
                stale.insert(record);
                // Replaced in place, so the reservation was not needed
                self.release_slots(1);
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        debug!(code = %code, "Exchange record published");
        Ok(())
    }

    async fn consume(&self, code: &str, nonce: &str) -> Result<Option<Vec<u8>>> {
        let now = Utc::now();

        // Nonce check and removal happen atomically; a mismatched nonce
        // leaves the record for its rightful owner.
        let Some((_, record)) = self.records.remove_if(code, |_, r| r.nonce == nonce) else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!(code = %redact(code), "Exchange consume missed");
            return Ok(None);
        };
        self.release_slots(1);

        if record.is_expired_at(now) {
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
            debug!(code = %redact(code), "Exchange record expired before consume");
            return Ok(None);
        }

        self.stats.consumed.fetch_add(1, Ordering::Relaxed);
        debug!(code = %redact(code), "Exchange record consumed");
        Ok(Some(record.payload))
    }
}

/// Periodically purge expired records.
pub fn spawn_cleanup_task(store: Arc<MemoryBlobStore>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = store.purge_expired();
            if removed > 0 {
                debug!(removed = removed, live = store.len(), "Exchange cleanup completed");
            }
        }
    });

    info!(
        interval_secs = interval.as_secs(),
        "Exchange cleanup task started"
    );
}
