//! TTL-bounded read cache
//!
//! Keeps the bodies of successful remote reads so the application can keep reading
//! while offline. Entries past their expiry are logically absent: a read that finds
//! one deletes it and reports a miss, and the periodic sweep removes the ones nobody
//! reads again.
//!
//! Writes, including the delete of an expired entry, go through one lock so an eviction
//! can never remove a value a concurrent `put` just stored.

pub mod key;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::{CacheError, Result};
use crate::store::{self, DurableStore, Namespace, StoreOp};

pub use key::cache_key;

/// A cached response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Expired entries are treated as absent even before the sweep removes them
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Statistics about cache state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub total_size_bytes: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

enum Lookup {
    Hit(Vec<u8>),
    Miss,
    /// Expired or unreadable, due for deletion
    Stale,
}

/// Read cache over the durable store's cache namespace
#[derive(Clone)]
pub struct ReadCache {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    writes: Arc<Mutex<()>>,
}

impl ReadCache {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Get a cached payload, or `None` on a miss.
    ///
    /// An entry found past its expiry is deleted before the miss is returned.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.lookup(key).await? {
            Lookup::Hit(payload) => return Ok(Some(payload)),
            Lookup::Miss => return Ok(None),
            Lookup::Stale => {}
        }

        // The entry may have been replaced since it was read
        let _guard = self.writes.lock().await;
        match self.lookup(key).await? {
            Lookup::Hit(payload) => Ok(Some(payload)),
            Lookup::Miss => Ok(None),
            Lookup::Stale => {
                log::debug!("Cache entry {} expired, evicting", key);
                self.store.delete(Namespace::Cache, key).await?;
                Ok(None)
            }
        }
    }

    async fn lookup(&self, key: &str) -> Result<Lookup> {
        let Some(data) = self.store.get(Namespace::Cache, key).await? else {
            return Ok(Lookup::Miss);
        };

        match store::decode::<CacheEntry>(Namespace::Cache, key, &data) {
            Ok(entry) if entry.is_expired(self.clock.now()) => Ok(Lookup::Stale),
            Ok(entry) => Ok(Lookup::Hit(entry.payload)),
            Err(e) => {
                log::warn!("Dropping unreadable cache entry {}: {}", key, e);
                Ok(Lookup::Stale)
            }
        }
    }

    /// Store a payload, replacing any existing entry under the same key.
    ///
    /// `ttl_seconds` must be positive.
    pub async fn put(&self, key: &str, payload: &[u8], ttl_seconds: i64) -> Result<()> {
        if ttl_seconds <= 0 {
            return Err(CacheError::InvalidTtl(ttl_seconds).into());
        }

        let now = self.clock.now();
        let entry = CacheEntry {
            key: key.to_string(),
            payload: payload.to_vec(),
            created_at: now,
            expires_at: Duration::try_seconds(ttl_seconds)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        let data = store::encode(&entry)?;
        let _guard = self.writes.lock().await;
        self.store.put(Namespace::Cache, key, data).await?;
        Ok(())
    }

    /// Get and deserialize a cached JSON payload
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Serialize and cache a JSON payload
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: i64) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        self.put(key, &data, ttl_seconds).await
    }

    /// Delete a specific entry by key
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        let _guard = self.writes.lock().await;
        Ok(self.store.delete(Namespace::Cache, key).await?)
    }

    /// Remove every expired entry, returning how many were removed
    pub async fn sweep(&self) -> Result<usize> {
        let _guard = self.writes.lock().await;
        let now = self.clock.now();
        let mut ops = Vec::new();

        for (key, data) in self.store.scan(Namespace::Cache).await? {
            let expired = match store::decode::<CacheEntry>(Namespace::Cache, &key, &data) {
                Ok(entry) => entry.is_expired(now),
                Err(_) => true,
            };
            if expired {
                ops.push(StoreOp::delete(Namespace::Cache, key));
            }
        }

        let removed = ops.len();
        self.store.apply(ops).await?;
        if removed > 0 {
            log::debug!("Cache sweep removed {} entries", removed);
        }
        Ok(removed)
    }

    /// Clear all cache entries
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.writes.lock().await;
        let ops: Vec<StoreOp> = self
            .store
            .scan(Namespace::Cache)
            .await?
            .into_iter()
            .map(|(key, _)| StoreOp::delete(Namespace::Cache, key))
            .collect();
        let removed = ops.len();
        self.store.apply(ops).await?;
        Ok(removed)
    }

    /// Get cache statistics
    pub async fn stats(&self) -> Result<CacheStats> {
        let now = self.clock.now();
        let mut stats = CacheStats::default();

        for (key, data) in self.store.scan(Namespace::Cache).await? {
            stats.total_entries += 1;
            stats.total_size_bytes += data.len();

            let Ok(entry) = store::decode::<CacheEntry>(Namespace::Cache, &key, &data) else {
                stats.expired_entries += 1;
                continue;
            };
            if entry.is_expired(now) {
                stats.expired_entries += 1;
                continue;
            }

            stats.valid_entries += 1;
            stats.oldest_entry = Some(match stats.oldest_entry {
                Some(t) => t.min(entry.created_at),
                None => entry.created_at,
            });
            stats.newest_entry = Some(match stats.newest_entry {
                Some(t) => t.max(entry.created_at),
                None => entry.created_at,
            });
        }

        Ok(stats)
    }
}
