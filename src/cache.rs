// Cache module - short-lived memoization of metric snapshots
//
// Request handlers consult the cache before polling a metrics source.
// A miss is never an error: callers fall through to the live source and
// store the fresh value. Expired entries read as absent and are reclaimed
// by a periodic sweep.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe TTL cache keyed by string
///
/// Cloning is cheap and every clone shares the same entries.
#[derive(Clone)]
pub struct TtlCache<V> {
    entries: Arc<DashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    /// Creates an empty cache
    ///
    /// # Arguments
    /// * `default_ttl` - Lifetime used by [`TtlCache::set`]
    pub fn new(default_ttl: Duration) -> Self {
        TtlCache {
            entries: Arc::new(DashMap::new()),
            default_ttl,
        }
    }

    /// Returns the value for `key` if present and not expired
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Stores `value` under `key` with the default TTL
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Stores `value` under `key`, replacing any previous entry
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.into(), entry);
    }

    /// Removes `key`, returning whether an entry existed
    #[allow(dead_code)]
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    #[allow(dead_code)]
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drops every expired entry
    ///
    /// # Returns
    /// Number of entries removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawns a task that sweeps expired entries every `every` until cancelled
    pub fn spawn_sweeper(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();

        tokio::spawn(async move {
            info!("Starting cache sweeper (every {}s)", every.as_secs());

            let mut timer = interval(every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing can be expired yet
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {
                        if cache.is_empty() {
                            continue;
                        }
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!("Cache sweep removed {} expired entr(ies)", removed);
                        }
                    }
                }
            }

            info!("Cache sweeper stopped");
        })
    }
}
