//! The public facade: a single `Cache<K, V>` handle composing the Entry
//! Table, Locksmith, Courier, Janitor, Limit engine, and Informant.
//!
//! Data flow follows `SPEC_FULL.md` §2: a call resolves its descriptor,
//! runs against the Entry Table, then broadcasts a post-event through
//! the Informant. This module is the "builder" the design notes call
//! for in place of the source's macro-generated safe/unsafe API pairs:
//! one fallible API, no panicking twin.

use std::hash::Hash;
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::courier::{Courier, FetchResult, Loader};
use crate::entry::{now_millis, Entry};
use crate::error::{CacheError, CacheResult};
use crate::hooks::{ActionTag, Informant};
use crate::janitor::{Janitor, JanitorState};
use crate::limit::{self, LimitEnforcer};
use crate::locksmith::Locksmith;
use crate::overseer::{CacheDescriptor, Overseer};
use crate::query::{Predicate, Projected, Projection};
use crate::stats::StatsCollector;
use crate::table::EntryTable;

/// Options overriding a single `put`/commit's TTL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Per-entry TTL override, milliseconds. `None`/`Some(0)` falls back
    /// to the cache's default TTL.
    pub expire_ms: Option<u64>,
}

/// A running cache instance: the public entry point for this crate.
pub struct Cache<K, V> {
    name: String,
    table: EntryTable<K, V>,
    locksmith: Locksmith<K>,
    courier: Courier<K, V>,
    informant: Informant,
    stats: Arc<StatsCollector>,
    config: CacheConfig,
    janitor: Option<Janitor>,
    limit: Option<LimitEnforcer<K, V>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Start a new, unregistered cache with `config`.
    pub async fn start(name: impl Into<String>, config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let name = name.into();
        let table = EntryTable::new();
        let informant = Informant::new(config.hooks.clone());
        let stats = Arc::new(StatsCollector::new());
        informant.subscribe(stats.as_hook()).await;

        let janitor = Some(Janitor::spawn(
            table.clone(),
            config.expiration.janitor_interval(),
            informant.clone(),
        ));

        let limit = Some(LimitEnforcer::build(table.clone(), config.limit.clone(), informant.clone()));

        let courier = Courier::new(config.expiration.default_ttl_ms);
        let locksmith = Locksmith::new();

        Ok(Self {
            name,
            table,
            locksmith,
            courier,
            informant,
            stats,
            config,
            janitor,
            limit,
        })
    }

    /// Start this cache and register it with `overseer` under its name.
    pub async fn start_registered(name: impl Into<String>, config: CacheConfig, overseer: &Overseer) -> CacheResult<Self>
    where
        K: 'static,
        V: 'static,
    {
        let cache = Self::start(name, config.clone()).await?;
        let descriptor = CacheDescriptor::new(cache.name.clone(), config)?;
        overseer.register(cache.name.clone(), descriptor);
        Ok(cache)
    }

    /// This cache's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current live statistics snapshot.
    pub fn stats(&self) -> crate::stats::StatsSnapshot {
        self.stats.snapshot()
    }

    /// Last completed Janitor sweep state.
    pub fn janitor_state(&self) -> JanitorState {
        self.janitor.as_ref().map(|j| j.state()).unwrap_or_default()
    }

    async fn after_growth_event(&self, tag: ActionTag) {
        self.informant.notify_post(tag, 1).await;
        if let Some(LimitEnforcer::Evented(evented)) = &self.limit {
            evented.on_action(tag).await;
        }
    }

    fn maybe_touch(&self, key: &K, tag: ActionTag) {
        limit::maybe_touch(&self.table, key, tag, &self.config.limit);
    }

    /// Point read. Returns the stored value, interpreting lazy expiry.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.informant.notify_pre(ActionTag::Get).await;
        let found = self.table.get(key);
        self.informant.notify_post(ActionTag::Get, found.is_some() as i64).await;
        if found.is_some() {
            self.maybe_touch(key, ActionTag::Get);
        }
        found.map(|e| e.value)
    }

    /// Whether `key` is present and unexpired.
    pub async fn exists(&self, key: &K) -> bool {
        let found = self.table.get(key).is_some();
        self.informant.notify_post(ActionTag::Exists, found as i64).await;
        if found {
            self.maybe_touch(key, ActionTag::Exists);
        }
        found
    }

    /// Overwrite `key`'s entry, honoring `options.expire_ms` or else the
    /// cache default TTL.
    pub async fn put(&self, key: K, value: V, options: PutOptions) {
        let ttl = options.expire_ms.filter(|ms| *ms > 0).or(self.config.expiration.default_ttl_ms);
        self.table.put(key, Entry::new(value, ttl));
        self.after_growth_event(ActionTag::Put).await;
    }

    /// Insert only if `key` is currently absent.
    pub async fn insert_new(&self, key: K, value: V, options: PutOptions) -> bool {
        let ttl = options.expire_ms.filter(|ms| *ms > 0).or(self.config.expiration.default_ttl_ms);
        let inserted = self.table.insert_new(key, Entry::new(value, ttl));
        if inserted {
            self.after_growth_event(ActionTag::InsertNew).await;
        }
        inserted
    }

    /// Delete `key`. Returns `true` if something was removed.
    pub async fn delete(&self, key: &K) -> bool {
        let removed = self.table.delete(key);
        self.informant.notify_post(ActionTag::Delete, removed as i64).await;
        removed
    }

    /// Remove every entry. Returns the count removed.
    pub async fn clear(&self) -> usize {
        let count = self.table.clear();
        self.informant.notify_post(ActionTag::Clear, count as i64).await;
        count
    }

    /// Current entry count.
    pub fn size(&self) -> usize {
        self.table.size()
    }

    /// Predicate-filtered, projected scan.
    pub fn scan(&self, predicate: &Predicate<K, V>, projection: Projection) -> Vec<Projected<K, V>> {
        self.table.scan(predicate, projection)
    }

    /// `expire(key, ms)`: set a new TTL on an existing entry.
    pub async fn expire(&self, key: &K, ms: u64) -> bool {
        let ok = self.table.update_fields(key, |e| e.set_ttl(Some(ms)));
        self.informant.notify_post(ActionTag::Expire, ok as i64).await;
        ok
    }

    /// `expire_at(key, epoch_ms)`: set an absolute expiry time.
    pub async fn expire_at(&self, key: &K, epoch_ms: u64) -> bool {
        let now = now_millis();
        let ttl = epoch_ms.saturating_sub(now).max(1);
        self.expire(key, ttl).await
    }

    /// `persist(key)`: clear the TTL, making the entry eternal.
    pub async fn persist(&self, key: &K) -> bool {
        let ok = self.table.update_fields(key, |e| e.persist());
        self.informant.notify_post(ActionTag::Persist, ok as i64).await;
        ok
    }

    /// `refresh(key)`: reset `modified` to now without changing TTL.
    pub async fn refresh(&self, key: &K) -> bool {
        let ok = self.table.update_fields(key, |e| e.touch());
        self.informant.notify_post(ActionTag::Refresh, ok as i64).await;
        ok
    }

    /// `touch(key)`: alias of `refresh`, invoked via the LRU read path.
    pub async fn touch(&self, key: &K) -> bool {
        let ok = self.table.update_fields(key, |e| e.touch());
        self.informant.notify_post(ActionTag::Touch, ok as i64).await;
        ok
    }

    /// `ttl(key)`: remaining time-to-live, or `None` if eternal, or
    /// `Err(Missing)` if the key is absent.
    pub async fn ttl(&self, key: &K) -> CacheResult<Option<u64>> {
        let now = now_millis();
        let result = self.table.get(key).map(|e| e.remaining_ttl_at(now));
        self.informant.notify_post(ActionTag::Ttl, result.is_some() as i64).await;
        match result {
            Some(ttl) => {
                self.maybe_touch(key, ActionTag::Ttl);
                Ok(ttl)
            }
            None => Err(CacheError::Missing),
        }
    }

    /// Coalesced fetch-on-miss via the Courier.
    pub async fn fetch<L>(&self, key: K, loader: &L) -> CacheResult<FetchResult<V>>
    where
        L: Loader<K, V>,
    {
        let result = self.courier.fetch(&self.table, key.clone(), loader).await?;
        let hit = matches!(result, FetchResult::Ok(_));
        self.informant.notify_post(ActionTag::Fetch, hit as i64).await;
        self.maybe_touch(&key, ActionTag::Fetch);
        if matches!(result, FetchResult::Commit(_)) {
            if let Some(LimitEnforcer::Evented(evented)) = &self.limit {
                evented.on_action(ActionTag::Fetch).await;
            }
        }
        Ok(result)
    }

    /// Run `f` with key-scoped write exclusion via the Locksmith.
    pub async fn write<F, T>(&self, key: &K, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.locksmith.write(key, f).await
    }

    /// Atomically acquire locks on `keys`, run `f`, then release.
    pub async fn transaction<F, Fut, T>(&self, keys: Vec<K>, f: F) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = CacheResult<T>>,
    {
        self.locksmith.transaction(keys, f).await
    }

    /// Whether the calling task is inside a `transaction` body.
    pub fn in_transaction(&self) -> bool {
        crate::locksmith::in_transaction()
    }

    /// Export the live entry set to `path`, compressed per the cache's
    /// configured level (or `compression_level` if given explicitly).
    pub fn export(&self, path: &str) -> CacheResult<()>
    where
        K: serde::Serialize,
        V: serde::Serialize,
    {
        crate::persistence::export(&self.table, path, self.config.persistence.compression_level)
    }

    /// Import entries previously written by [`Self::export`].
    pub fn import(&self, path: &str) -> CacheResult<usize>
    where
        K: serde::de::DeserializeOwned,
        V: serde::de::DeserializeOwned,
    {
        crate::persistence::import(&self.table, path)
    }

    /// Gracefully stop background subsystems (Janitor, Scheduled Limit).
    pub async fn stop(self) {
        if let Some(janitor) = self.janitor {
            janitor.shutdown().await;
        }
        if let Some(LimitEnforcer::Scheduled(sched)) = self.limit {
            sched.shutdown().await;
        }
    }
}

/// Caches storing a bare `i64` get `incr`/`decr` for free, matching the
/// spec's numeric increment/decrement interface. A cache whose `V` is
/// not `i64` simply does not have these methods; the spec's
/// `non_numeric` error models a value that was stored as something
/// other than a number, which this crate represents at the type level
/// instead of at runtime.
impl<K> Cache<K, i64>
where
    K: Eq + Hash + Clone + Ord + Send + Sync + 'static,
{
    /// `incr(key, delta, initial)`: atomically add `delta` to the
    /// existing value, or write `initial + delta` if absent.
    pub async fn incr(&self, key: &K, delta: i64, initial: i64) -> CacheResult<i64> {
        self.apply_delta(key, delta, initial, |current, delta| {
            current.checked_add(delta).ok_or(CacheError::NonNumeric)
        })
        .await
    }

    /// `decr(key, delta, initial)`: atomically subtract `delta` from the
    /// existing value, or write `initial - delta` if absent.
    pub async fn decr(&self, key: &K, delta: i64, initial: i64) -> CacheResult<i64> {
        self.apply_delta(key, delta, initial, |current, delta| {
            current.checked_sub(delta).ok_or(CacheError::NonNumeric)
        })
        .await
    }

    async fn apply_delta<F>(&self, key: &K, delta: i64, initial: i64, op: F) -> CacheResult<i64>
    where
        F: Fn(i64, i64) -> CacheResult<i64>,
    {
        let mut result = None;
        let mut op_err = None;
        let applied = self.table.update_fields(key, |e| match op(e.value, delta) {
            Ok(v) => {
                e.value = v;
                e.touch();
                result = Some(v);
            }
            Err(err) => op_err = Some(err),
        });

        if let Some(err) = op_err {
            return Err(err);
        }

        let value = if applied {
            result.expect("update_fields applied without producing a result")
        } else {
            let seeded = op(initial, delta).unwrap_or(initial);
            self.table.put(key.clone(), Entry::new(seeded, self.config.expiration.default_ttl_ms));
            seeded
        };

        self.after_growth_event(ActionTag::Incr).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimitConfig, LimitMode};
    use std::time::Duration;

    async fn cache(config: CacheConfig) -> Cache<String, i32> {
        Cache::start("test", config).await.unwrap()
    }

    #[tokio::test]
    async fn s1_basic_put_get() {
        let c = cache(CacheConfig::default()).await;
        c.put("a".into(), 1, PutOptions::default()).await;
        assert_eq!(c.get(&"a".to_string()).await, Some(1));
        assert_eq!(c.size(), 1);
        assert!(c.delete(&"a".to_string()).await);
        assert_eq!(c.get(&"a".to_string()).await, None);
        c.stop().await;
    }

    #[tokio::test]
    async fn s2_ttl_and_lazy_expiry() {
        let c = cache(CacheConfig::default()).await;
        c.put("k".into(), 1, PutOptions { expire_ms: Some(5) }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(c.get(&"k".to_string()).await, None);
        assert_eq!(c.size(), 0);
        c.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn s3_janitor_purge() {
        let mut config = CacheConfig::default();
        config.expiration.janitor_interval_ms = Some(50);
        let c = cache(config).await;
        for i in 0..100 {
            c.put(format!("k{i}"), i, PutOptions { expire_ms: Some(25) }).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(c.size(), 0);
        c.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn s4_single_flight_fetch() {
        use crate::courier::LoaderOutcome;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let c = Arc::new(cache(CacheConfig::default()).await);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let c = c.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let loader = move |_: &String| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(80)).await;
                        Ok(LoaderOutcome::commit(42))
                    }
                };
                c.fetch("k".to_string(), &loader).await.unwrap().into_value()
            }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|v| *v == 42));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn s5_lrw_eviction() {
        let mut config = CacheConfig::default();
        config.limit = LimitConfig {
            max_size: Some(100),
            reclaim: 0.75,
            mode: LimitMode::Evented,
            ..Default::default()
        };
        let c = cache(config).await;
        for i in 0..100 {
            c.put(format!("k{i}"), i, PutOptions::default()).await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        c.put("k100".into(), 100, PutOptions::default()).await;

        assert_eq!(c.size(), 25);
        for i in 0..76 {
            assert!(c.get(&format!("k{i}")).await.is_none());
        }
        for i in 77..=100 {
            assert!(c.get(&format!("k{i}")).await.is_some());
        }
        c.stop().await;
    }

    #[tokio::test]
    async fn s6_transaction_excludes_concurrent_writers() {
        let c = Arc::new(cache(CacheConfig::default()).await);
        c.put("k".into(), 1, PutOptions::default()).await;

        let c1 = c.clone();
        let t1 = tokio::spawn(async move {
            c1.transaction(vec!["k".to_string()], || async {
                c1_put(&c1, 2).await;
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, CacheError>(())
            })
            .await
        });

        async fn c1_put(c: &Cache<String, i32>, v: i32) {
            c.put("k".into(), v, PutOptions::default()).await;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        let c2 = c.clone();
        let t2 = tokio::spawn(async move {
            c2.write(&"k".to_string(), || {}).await;
            c2.put("k".into(), 3, PutOptions::default()).await;
        });

        let _ = tokio::join!(t1, t2);
        assert_eq!(c.get(&"k".to_string()).await, Some(3));
        c.stop().await;
    }

    #[tokio::test]
    async fn incr_seeds_initial_value_when_absent() {
        let c: Cache<String, i64> = Cache::start("counters", CacheConfig::default()).await.unwrap();
        let v = c.incr(&"counter".to_string(), 5, 10).await.unwrap();
        assert_eq!(v, 15);
        let v2 = c.incr(&"counter".to_string(), 5, 10).await.unwrap();
        assert_eq!(v2, 20);
        c.stop().await;
    }

    #[tokio::test]
    async fn decr_seeds_initial_value_when_absent() {
        let c: Cache<String, i64> = Cache::start("counters", CacheConfig::default()).await.unwrap();
        let v = c.decr(&"counter".to_string(), 5, 10).await.unwrap();
        assert_eq!(v, 5);
        c.stop().await;
    }

    #[tokio::test]
    async fn refresh_is_idempotent_with_respect_to_ttl() {
        let c = cache(CacheConfig::default()).await;
        c.put("k".into(), 1, PutOptions { expire_ms: Some(10_000) }).await;
        let before = c.ttl(&"k".to_string()).await.unwrap();
        c.refresh(&"k".to_string()).await;
        let after = c.ttl(&"k".to_string()).await.unwrap();
        assert!(after >= before);
        c.stop().await;
    }
}
