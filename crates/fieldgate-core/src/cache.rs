//! Policy cache decorator.
//!
//! [`CachingProvider`] wraps any column or row provider and memoizes its
//! answers per `(user_id, schema, table)`. It satisfies the same traits as
//! the provider it wraps, so it can be slotted into a
//! [`SecurityProvider`](crate::SecurityProvider) transparently.
//!
//! Concurrent misses for the same key may each reach the inner provider; the
//! last one to finish populates the entry. An entry's age counts from when its
//! lookup started, so it is never served after its TTL has elapsed. A lookup
//! that overlaps an invalidation is not cached, and failed lookups are never
//! cached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use crate::column::{ColumnSecurity, ColumnSecurityProvider};
use crate::error::SecurityResult;
use crate::row::{RowSecurity, RowSecurityProvider};

/// Default lifetime of a cached policy.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Default number of entries kept per policy kind.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

type CacheKey = (i64, String, String);

/// Taken before a lookup reaches the inner provider.
#[derive(Clone, Copy)]
struct Lookup {
    started: Instant,
    generation: u64,
}

struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries dropped for capacity or expiry.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Caching decorator around a policy provider.
pub struct CachingProvider<P> {
    inner: P,
    columns: DashMap<CacheKey, CacheEntry<Vec<ColumnSecurity>>>,
    rows: DashMap<CacheKey, CacheEntry<RowSecurity>>,
    ttl: Duration,
    capacity: usize,
    /// Bumped by every invalidation.
    generation: AtomicU64,
    stats: CacheStats,
}

impl<P> CachingProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            columns: DashMap::new(),
            rows: DashMap::new(),
            ttl: DEFAULT_CACHE_TTL,
            capacity: DEFAULT_CACHE_CAPACITY,
            generation: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Maximum entries per policy kind. Zero disables caching.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Cached entries across both policy kinds, expired ones included.
    pub fn len(&self) -> usize {
        self.columns.len() + self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry cached for `user_id`.
    pub fn invalidate_user(&self, user_id: i64) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.columns.retain(|key, _| key.0 != user_id);
        self.rows.retain(|key, _| key.0 != user_id);
    }

    /// Drop every entry cached for `schema.table`, for all users.
    pub fn invalidate_table(&self, schema: &str, table: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.columns
            .retain(|key, _| key.1 != schema || key.2 != table);
        self.rows.retain(|key, _| key.1 != schema || key.2 != table);
    }

    /// Clear all cached entries.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.columns.clear();
        self.rows.clear();
    }

    fn get<T: Clone>(&self, map: &DashMap<CacheKey, CacheEntry<T>>, key: &CacheKey) -> Option<T> {
        if let Some(entry) = map.get(key) {
            if entry.is_fresh(self.ttl) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }

        if map.remove_if(key, |_, entry| !entry.is_fresh(self.ttl)).is_some() {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn begin(&self) -> Lookup {
        Lookup {
            started: Instant::now(),
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    fn insert<T>(
        &self,
        map: &DashMap<CacheKey, CacheEntry<T>>,
        key: CacheKey,
        value: T,
        lookup: Lookup,
    ) {
        if self.capacity == 0 {
            return;
        }
        if self.generation.load(Ordering::Acquire) != lookup.generation {
            trace!("policy changed during lookup, not caching");
            return;
        }
        if map.len() >= self.capacity && !map.contains_key(&key) {
            self.evict(map);
        }
        map.insert(
            key,
            CacheEntry {
                value,
                inserted_at: lookup.started,
            },
        );
    }

    /// Make room for one entry: drop expired entries first, then the oldest.
    fn evict<T>(&self, map: &DashMap<CacheKey, CacheEntry<T>>) {
        let before = map.len();
        map.retain(|_, entry| entry.is_fresh(self.ttl));
        let mut evicted = before.saturating_sub(map.len());

        if map.len() >= self.capacity {
            let oldest = map
                .iter()
                .min_by_key(|entry| entry.value().inserted_at)
                .map(|entry| entry.key().clone());
            if let Some(key) = oldest {
                if map.remove(&key).is_some() {
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            trace!(evicted, "policy cache eviction");
            self.stats
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    fn key(user_id: i64, schema: &str, table: &str) -> CacheKey {
        (user_id, schema.to_string(), table.to_string())
    }
}

#[async_trait]
impl<P: ColumnSecurityProvider> ColumnSecurityProvider for CachingProvider<P> {
    async fn column_security(
        &self,
        user_id: i64,
        schema: &str,
        table: &str,
    ) -> SecurityResult<Vec<ColumnSecurity>> {
        let key = Self::key(user_id, schema, table);
        if let Some(rules) = self.get(&self.columns, &key) {
            return Ok(rules);
        }
        let lookup = self.begin();
        let rules = self.inner.column_security(user_id, schema, table).await?;
        self.insert(&self.columns, key, rules.clone(), lookup);
        Ok(rules)
    }
}

#[async_trait]
impl<P: RowSecurityProvider> RowSecurityProvider for CachingProvider<P> {
    async fn row_security(
        &self,
        user_id: i64,
        schema: &str,
        table: &str,
    ) -> SecurityResult<RowSecurity> {
        let key = Self::key(user_id, schema, table);
        if let Some(policy) = self.get(&self.rows, &key) {
            return Ok(policy);
        }
        let lookup = self.begin();
        let policy = self.inner.row_security(user_id, schema, table).await?;
        self.insert(&self.rows, key, policy.clone(), lookup);
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SecurityError;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;

    /// Provider counting calls, optionally failing.
    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    impl CountingProvider {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn check(&self) -> SecurityResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(SecurityError::Storage("store unavailable".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ColumnSecurityProvider for Arc<CountingProvider> {
        async fn column_security(
            &self,
            user_id: i64,
            _schema: &str,
            _table: &str,
        ) -> SecurityResult<Vec<ColumnSecurity>> {
            self.check()?;
            Ok(vec![ColumnSecurity::hide([format!("secret_{}", user_id)])])
        }
    }

    #[async_trait]
    impl RowSecurityProvider for Arc<CountingProvider> {
        async fn row_security(
            &self,
            user_id: i64,
            schema: &str,
            table: &str,
        ) -> SecurityResult<RowSecurity> {
            self.check()?;
            Ok(RowSecurity::new(schema, table, user_id, "owner = {UserID}"))
        }
    }

    fn cached() -> (CachingProvider<Arc<CountingProvider>>, Arc<CountingProvider>) {
        let inner = Arc::new(CountingProvider::default());
        (CachingProvider::new(inner.clone()), inner)
    }

    #[tokio::test]
    async fn test_second_lookup_is_a_hit() {
        let (cache, inner) = cached();

        let first = cache.column_security(1, "public", "users").await.unwrap();
        let second = cache.column_security(1, "public", "users").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls(), 1);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_keys_are_per_user_and_table() {
        let (cache, inner) = cached();

        cache.row_security(1, "public", "orders").await.unwrap();
        cache.row_security(2, "public", "orders").await.unwrap();
        cache.row_security(1, "public", "items").await.unwrap();
        cache.column_security(1, "public", "orders").await.unwrap();

        assert_eq!(inner.calls(), 4);
        assert_eq!(cache.len(), 4);

        let policy = cache.row_security(2, "public", "orders").await.unwrap();
        assert_eq!(policy.user_id, 2);
        assert_eq!(inner.calls(), 4);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let (cache, inner) = cached();
        let cache = cache.with_ttl(Duration::ZERO);

        cache.row_security(1, "public", "orders").await.unwrap();
        cache.row_security(1, "public", "orders").await.unwrap();

        assert_eq!(inner.calls(), 2);
        assert_eq!(cache.stats().hits(), 0);
        assert!(cache.stats().evictions() >= 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let (cache, inner) = cached();
        inner.failing.store(true, Ordering::SeqCst);

        assert!(cache.column_security(1, "public", "users").await.is_err());
        assert!(cache.is_empty());

        inner.failing.store(false, Ordering::SeqCst);
        assert!(cache.column_security(1, "public", "users").await.is_ok());
        assert_eq!(inner.calls(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let (cache, inner) = cached();
        let cache = cache.with_capacity(2);

        cache.row_security(1, "s", "t").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.row_security(2, "s", "t").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.row_security(3, "s", "t").await.unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions(), 1);

        // User 1 was the oldest and must be fetched again.
        cache.row_security(1, "s", "t").await.unwrap();
        assert_eq!(inner.calls(), 4);
        cache.row_security(3, "s", "t").await.unwrap();
        assert_eq!(inner.calls(), 4);
    }

    #[tokio::test]
    async fn test_zero_capacity_disables_caching() {
        let (cache, inner) = cached();
        let cache = cache.with_capacity(0);

        cache.row_security(1, "s", "t").await.unwrap();
        cache.row_security(1, "s", "t").await.unwrap();
        assert_eq!(inner.calls(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidation() {
        let (cache, inner) = cached();

        cache.row_security(1, "public", "orders").await.unwrap();
        cache.column_security(1, "public", "users").await.unwrap();
        cache.row_security(2, "public", "orders").await.unwrap();
        assert_eq!(cache.len(), 3);

        cache.invalidate_user(1);
        assert_eq!(cache.len(), 1);

        cache.invalidate_table("public", "orders");
        assert!(cache.is_empty());

        cache.row_security(2, "public", "orders").await.unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(inner.calls(), 4);
    }

    /// Row provider that takes `delay` to answer.
    struct SlowProvider {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RowSecurityProvider for Arc<SlowProvider> {
        async fn row_security(
            &self,
            user_id: i64,
            schema: &str,
            table: &str,
        ) -> SecurityResult<RowSecurity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(RowSecurity::new(schema, table, user_id, "owner = {UserID}"))
        }
    }

    fn slow(delay: Duration) -> (CachingProvider<Arc<SlowProvider>>, Arc<SlowProvider>) {
        let inner = Arc::new(SlowProvider {
            delay,
            calls: AtomicUsize::new(0),
        });
        (CachingProvider::new(inner.clone()), inner)
    }

    #[tokio::test]
    async fn test_entry_age_includes_lookup_time() {
        let (cache, inner) = slow(Duration::from_millis(60));
        let cache = cache.with_ttl(Duration::from_millis(50));

        cache.row_security(1, "public", "orders").await.unwrap();
        cache.row_security(1, "public", "orders").await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().hits(), 0);
    }

    #[tokio::test]
    async fn test_lookup_overlapping_invalidation_is_not_cached() {
        let (cache, inner) = slow(Duration::from_millis(40));

        let (policy, ()) = tokio::join!(cache.row_security(1, "public", "orders"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.invalidate_table("public", "orders");
        });
        assert_eq!(policy.unwrap().user_id, 1);
        assert!(cache.is_empty());

        cache.row_security(1, "public", "orders").await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
