//! Keyed byte-blob store with TTL and bounded pruning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;

use crate::cache::CacheTier;
use crate::compression::Encoding;
use crate::observability::metrics;

/// Everything needed to replay a response from cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: Bytes,
    pub content_encoding: Option<Encoding>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub cache_control: String,
}

/// A stored response.
#[derive(Debug)]
pub struct CacheEntry {
    pub response: CachedResponse,
    pub created: Instant,
    pub expires: Instant,
    /// Milliseconds after `created` of the most recent hit.
    last_used_ms: AtomicU64,
    /// `METHOD uri` of the request that populated the entry.
    pub request_snapshot: String,
    pub local_url: String,
}

impl CacheEntry {
    pub fn new(
        response: CachedResponse,
        now: Instant,
        ttl: Duration,
        request_snapshot: String,
        local_url: String,
    ) -> Self {
        Self {
            response,
            created: now,
            expires: now + ttl,
            last_used_ms: AtomicU64::new(0),
            request_snapshot,
            local_url,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires
    }

    pub fn last_used(&self) -> Instant {
        self.created + Duration::from_millis(self.last_used_ms.load(Ordering::Relaxed))
    }

    fn touch(&self, now: Instant) {
        let offset = now.saturating_duration_since(self.created).as_millis() as u64;
        self.last_used_ms.fetch_max(offset, Ordering::Relaxed);
    }
}

/// Point-in-time counters of one tier.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub pruned: u64,
}

/// One cache tier.
#[derive(Debug)]
pub struct ResponseCache {
    tier: CacheTier,
    entries: DashMap<String, Arc<CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    pruned: AtomicU64,
}

impl ResponseCache {
    pub fn new(tier: CacheTier) -> Self {
        Self {
            tier,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
        }
    }

    pub fn tier(&self) -> CacheTier {
        self.tier
    }

    /// Live entry for `key`, never one at or past its expiry.
    pub fn try_get(&self, key: &str, now: Instant) -> Option<Arc<CacheEntry>> {
        let hit = self
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| Arc::clone(e.value()));

        match &hit {
            Some(entry) => {
                entry.touch(now);
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        metrics::record_cache_lookup(self.tier.as_str(), hit.is_some());
        hit
    }

    /// Store unconditionally; a concurrent writer for the same key may win.
    pub fn put(&self, key: String, entry: CacheEntry) {
        self.entries.insert(key, Arc::new(entry));
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove at most `batch` expired entries. Each candidate is re-checked
    /// under the shard lock so an entry rewritten since the scan survives.
    pub fn prune(&self, now: Instant, batch: usize) -> usize {
        let candidates: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now))
            .take(batch)
            .map(|e| e.key().clone())
            .collect();

        let removed = candidates
            .iter()
            .filter(|key| {
                self.entries
                    .remove_if(key.as_str(), |_, e| e.is_expired(now))
                    .is_some()
            })
            .count();

        if removed > 0 {
            self.pruned.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(tier = %self.tier, removed, "Pruned expired cache entries");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &'static [u8]) -> CachedResponse {
        CachedResponse {
            body: Bytes::from_static(body),
            content_encoding: None,
            content_type: Some("text/plain".into()),
            etag: None,
            cache_control: "no-cache".into(),
        }
    }

    fn entry(body: &'static [u8], now: Instant, ttl: Duration) -> CacheEntry {
        CacheEntry::new(response(body), now, ttl, "GET /".into(), "/".into())
    }

    #[test]
    fn test_never_served_past_expiry() {
        let cache = ResponseCache::new(CacheTier::Global);
        let now = Instant::now();
        cache.put("k".into(), entry(b"v", now, Duration::from_secs(10)));

        assert!(cache.try_get("k", now + Duration::from_secs(9)).is_some());
        assert!(cache.try_get("k", now + Duration::from_secs(10)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_hit_updates_last_used() {
        let cache = ResponseCache::new(CacheTier::Session);
        let now = Instant::now();
        cache.put("k".into(), entry(b"v", now, Duration::from_secs(10)));

        let later = now + Duration::from_secs(3);
        let hit = cache.try_get("k", later).unwrap();
        assert!(hit.last_used() >= now + Duration::from_millis(2999));
    }

    #[test]
    fn test_last_writer_wins() {
        let cache = ResponseCache::new(CacheTier::Global);
        let now = Instant::now();
        cache.put("k".into(), entry(b"first", now, Duration::from_secs(10)));
        cache.put("k".into(), entry(b"second", now, Duration::from_secs(10)));
        assert_eq!(&cache.try_get("k", now).unwrap().response.body[..], b"second");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_prune_is_bounded() {
        let cache = ResponseCache::new(CacheTier::Global);
        let now = Instant::now();
        for i in 0..10 {
            cache.put(format!("old{i}"), entry(b"x", now, Duration::from_millis(1)));
        }
        cache.put("fresh".into(), entry(b"y", now, Duration::from_secs(60)));

        let later = now + Duration::from_secs(1);
        assert_eq!(cache.prune(later, 4), 4);
        assert_eq!(cache.len(), 7);
        assert_eq!(cache.prune(later, 100), 6);
        assert_eq!(cache.len(), 1);
        assert!(cache.try_get("fresh", later).is_some());
        assert_eq!(cache.stats().pruned, 10);
    }
}
