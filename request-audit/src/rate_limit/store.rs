//! Counter stores backing the rate limiter
//!
//! A store must increment atomically: two concurrent requests for the same
//! key can never both observe the same post-increment count.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;

#[cfg(feature = "cache")]
use deadpool_redis::Pool as RedisPool;
#[cfg(feature = "cache")]
use std::ops::DerefMut;

/// Result of one atomic increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterValue {
    /// Count after this increment
    pub count: u64,
    /// Time until the counter resets
    pub ttl_remaining: Duration,
}

/// Shared counter store with increment-with-TTL semantics
///
/// The TTL is applied when a key is first created, so a counter resets a
/// full `ttl` after its first hit regardless of later traffic.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Atomically increment `key`, creating it with `ttl` if absent or expired
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterValue>;
}

struct Slot {
    count: u64,
    expires_at: Instant,
}

/// In-process counter store
///
/// Suitable for a single instance or for tests. The read-modify-write runs
/// under the shard lock of the underlying `DashMap`.
pub struct MemoryCounterStore {
    counters: DashMap<String, Slot>,
    increments: AtomicU64,
    purge_every: u64,
}

impl MemoryCounterStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            increments: AtomicU64::new(0),
            purge_every: 1024,
        }
    }

    /// Drop every expired counter
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.counters.retain(|_, slot| slot.expires_at > now);
    }

    /// Number of live keys (including expired ones not yet purged)
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterValue> {
        let now = Instant::now();
        let value = {
            let mut slot = self.counters.entry(key.to_string()).or_insert_with(|| Slot {
                count: 0,
                expires_at: now + ttl,
            });

            if slot.expires_at <= now {
                slot.count = 0;
                slot.expires_at = now + ttl;
            }
            slot.count += 1;

            CounterValue {
                count: slot.count,
                ttl_remaining: slot.expires_at.saturating_duration_since(now),
            }
        }; // shard lock released here

        if self.increments.fetch_add(1, Ordering::Relaxed) % self.purge_every == self.purge_every - 1 {
            self.purge_expired();
        }

        Ok(value)
    }
}

/// Redis-backed counter store shared by every service instance
///
/// Uses `INCR` (atomic on the server), sets `EXPIRE` on the first hit and
/// reads `TTL` for the reset time. A key left without expiry (e.g. because
/// the `EXPIRE` after its first `INCR` was lost) is repaired on the next hit.
#[cfg(feature = "cache")]
#[derive(Clone)]
pub struct RedisCounterStore {
    pool: RedisPool,
}

#[cfg(feature = "cache")]
impl RedisCounterStore {
    /// Create a store on top of an existing pool
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "cache")]
#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterValue> {
        let window_secs = ttl.as_secs().max(1) as i64;

        let mut conn = self.pool.get().await.map_err(|e| {
            crate::error::Error::CounterStore(format!("Failed to get Redis connection: {}", e))
        })?;

        let count: u64 = redis::cmd("INCR")
            .arg(key)
            .query_async(conn.deref_mut())
            .await?;

        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .query_async(conn.deref_mut())
                .await?;
        }

        let mut ttl_secs: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(conn.deref_mut())
            .await
            .unwrap_or(window_secs);

        if ttl_secs < 0 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .query_async(conn.deref_mut())
                .await?;
            ttl_secs = window_secs;
        }

        Ok(CounterValue {
            count,
            ttl_remaining: Duration::from_secs(ttl_secs as u64),
        })
    }
}
