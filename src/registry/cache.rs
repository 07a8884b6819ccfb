//! TTL cache recording which CustomerIDs have recently had an agent come and go
//!
//! An `AgentCacheEntry` exists so that a client arriving a moment after its
//! agent left (or timed out) knows it's worth waiting a little longer rather
//! than immediately reporting "no agent" — the same shape as a short-lived
//! dedupe/presence cache.

use crate::domain_types::CustomerId;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// TTL-bounded record of recent agent presence, keyed by `CustomerId`.
#[derive(Default)]
pub struct AgentCache {
    entries: DashMap<CustomerId, Instant>,
}

impl AgentCache {
    /// Records that an agent was just picked up or abandoned its wait for `product`.
    pub fn record(&self, product: CustomerId, now: Instant) {
        self.entries.insert(product, now);
    }

    /// True if an agent was seen for `product` within the last `ttl`.
    #[must_use]
    pub fn is_fresh(&self, product: CustomerId, now: Instant, ttl: Duration) -> bool {
        self.entries
            .get(&product)
            .is_some_and(|seen| now.saturating_duration_since(*seen) < ttl)
    }

    /// Drops every entry older than `ttl`, freeing memory for CustomerIDs that
    /// haven't seen agent activity in a while.
    pub fn evict_expired(&self, now: Instant, ttl: Duration) {
        self.entries
            .retain(|_, seen| now.saturating_duration_since(*seen) < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_within_ttl_then_stale_after() {
        let cache = AgentCache::default();
        let product = CustomerId::new(1);
        let start = Instant::now();
        cache.record(product, start);

        assert!(cache.is_fresh(product, start, Duration::from_millis(100)));
        let later = start + Duration::from_millis(200);
        assert!(!cache.is_fresh(product, later, Duration::from_millis(100)));
    }

    #[test]
    fn unseen_product_is_never_fresh() {
        let cache = AgentCache::default();
        assert!(!cache.is_fresh(CustomerId::new(9), Instant::now(), Duration::from_secs(1)));
    }

    #[test]
    fn eviction_drops_only_expired_entries() {
        let cache = AgentCache::default();
        let start = Instant::now();
        cache.record(CustomerId::new(1), start);
        cache.record(CustomerId::new(2), start);

        let later = start + Duration::from_millis(200);
        cache.record(CustomerId::new(2), later);
        cache.evict_expired(later, Duration::from_millis(50));

        assert!(!cache.is_fresh(CustomerId::new(1), later, Duration::from_secs(10)));
        assert!(cache.is_fresh(CustomerId::new(2), later, Duration::from_secs(10)));
    }
}
