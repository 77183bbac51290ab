//! The Courier: single-flight fetch coalescing for misses.
//!
//! Grounded on the reference codebase's use of `tokio::sync::broadcast`
//! channels for fan-out notification (`invalidation.rs`'s
//! `PubSubInvalidator`) and the `DashMap::entry` race-free
//! install-or-join pattern from `lock.rs`'s lock acquisition. The first
//! caller to win the `entry()` race becomes the executor; every other
//! caller observes the same outcome over a broadcast channel.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as DashEntry;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::entry::Entry as CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::table::EntryTable;

/// What a loader may return for a given fetch.
#[derive(Debug, Clone)]
pub enum LoaderOutcome<V> {
    /// Store the value (honoring `expire_ms`, else the cache default).
    Commit { value: V, expire_ms: Option<u64> },
    /// Return the value to every caller without storing it.
    Ignore(V),
}

impl<V> LoaderOutcome<V> {
    /// Plain values are treated as an unconditional `Commit`.
    pub fn commit(value: V) -> Self {
        LoaderOutcome::Commit {
            value,
            expire_ms: None,
        }
    }
}

/// A user-supplied loader invoked on a cache miss.
#[async_trait]
pub trait Loader<K, V>: Send + Sync {
    /// Resolve a value for `key`. At most one call is in flight per key
    /// at any time across all concurrent `fetch` callers.
    async fn load(&self, key: &K) -> CacheResult<LoaderOutcome<V>>;
}

#[async_trait]
impl<K, V, F, Fut> Loader<K, V> for F
where
    K: Sync,
    F: Fn(&K) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = CacheResult<LoaderOutcome<V>>> + Send,
{
    async fn load(&self, key: &K) -> CacheResult<LoaderOutcome<V>> {
        self(key).await
    }
}

/// What a `fetch` call ultimately resolves to, for every caller in the
/// overlapping window.
#[derive(Debug, Clone)]
pub enum FetchResult<V> {
    /// The key was already present; returned as-is.
    Ok(V),
    /// This fetch's loader committed a fresh value.
    Commit(V),
    /// This fetch's loader resolved a value without storing it.
    Ignore(V),
}

impl<V> FetchResult<V> {
    /// The resolved value, regardless of which variant produced it.
    pub fn into_value(self) -> V {
        match self {
            FetchResult::Ok(v) | FetchResult::Commit(v) | FetchResult::Ignore(v) => v,
        }
    }
}

#[derive(Clone)]
enum Outcome<V> {
    Resolved(FetchResult<V>),
    Failed(CacheError),
}

/// Per-key single-flight dispatcher.
#[derive(Clone)]
pub struct Courier<K, V> {
    pending: Arc<DashMap<K, broadcast::Sender<Outcome<V>>>>,
    default_ttl_ms: Option<u64>,
}

impl<K, V> Courier<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    /// Build a Courier using `default_ttl_ms` when a loader commits
    /// without its own `expire` override.
    pub fn new(default_ttl_ms: Option<u64>) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            default_ttl_ms,
        }
    }

    /// Coalesced fetch-on-miss against `table`.
    pub async fn fetch<L>(&self, table: &EntryTable<K, V>, key: K, loader: &L) -> CacheResult<FetchResult<V>>
    where
        L: Loader<K, V>,
    {
        if let Some(entry) = table.get(&key) {
            return Ok(FetchResult::Ok(entry.value));
        }

        // Race to become the executor: dashmap's shard-locked entry API
        // gives us an atomic install-or-join decision.
        let (tx, mut rx, is_executor) = match self.pending.entry(key.clone()) {
            DashEntry::Occupied(e) => {
                let tx = e.get().clone();
                let rx = tx.subscribe();
                (tx, rx, false)
            }
            DashEntry::Vacant(v) => {
                let (tx, rx) = broadcast::channel(1);
                v.insert(tx.clone());
                (tx, rx, true)
            }
        };

        if !is_executor {
            return match rx.recv().await {
                Ok(Outcome::Resolved(result)) => Ok(result),
                Ok(Outcome::Failed(e)) => Err(e),
                Err(_) => Err(CacheError::Killed),
            };
        }

        let outcome = match loader.load(&key).await {
            Ok(LoaderOutcome::Commit { value, expire_ms }) => {
                let ttl = expire_ms.or(self.default_ttl_ms);
                table.put(key.clone(), CacheEntry::new(value.clone(), ttl));
                Outcome::Resolved(FetchResult::Commit(value))
            }
            Ok(LoaderOutcome::Ignore(value)) => Outcome::Resolved(FetchResult::Ignore(value)),
            Err(e) => Outcome::Failed(e),
        };

        self.pending.remove(&key);
        // Broadcasting may fail if there were no waiters; that's fine.
        let _ = tx.send(outcome.clone());

        match outcome {
            Outcome::Resolved(result) => Ok(result),
            Outcome::Failed(e) => Err(e),
        }
    }

    /// Whether a fetch for `key` currently has an in-flight executor.
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }
}
