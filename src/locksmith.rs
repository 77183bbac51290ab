//! The Locksmith: per-key write exclusion plus a transactional executor.
//!
//! Grounded on the reference codebase's `lock.rs` (`DistributedMutex`,
//! `LockHolder`, the busy-poll-with-backoff `lock()` loop) — adapted from
//! distributed, fencing-token-bearing locks down to the simpler
//! in-process case: no lease renewal, no cross-node fencing, just a
//! `DashMap<K, Uuid>` lock table and a serial executor for transactions.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::{CacheError, CacheResult};

tokio::task_local! {
    static IN_TRANSACTION: bool;
}

/// Returns whether the calling task is currently executing inside a
/// [`Locksmith::transaction`] body.
pub fn in_transaction() -> bool {
    IN_TRANSACTION.try_with(|v| *v).unwrap_or(false)
}

const RETRY_BASE: Duration = Duration::from_millis(5);
const RETRY_MAX: Duration = Duration::from_millis(100);

/// Key-scoped lock manager and transactional executor.
///
/// Cheap to clone: clones share the same lock table and serial executor.
#[derive(Clone)]
pub struct Locksmith<K> {
    locks: Arc<DashMap<K, Uuid>>,
    // Guards the "serial executor" section so transaction bodies across
    // the whole cache run one at a time, matching the spec's requirement
    // that transactions run in submission order on a single executor.
    executor: Arc<AsyncMutex<()>>,
}

impl<K> Default for Locksmith<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Locksmith<K>
where
    K: Eq + Hash + Clone + Ord,
{
    /// Build an empty Locksmith.
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            executor: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Test-and-set: succeeds only if every key in `keys` is currently
    /// unlocked, in which case all are locked atomically under `owner`.
    pub fn lock(&self, keys: &[K], owner: Uuid) -> bool {
        // Lock in a canonical (sorted) order everywhere to avoid
        // introducing lock-ordering deadlocks between overlapping
        // transactions that share more than one key.
        let mut sorted: Vec<K> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut acquired: Vec<K> = Vec::with_capacity(sorted.len());
        for key in &sorted {
            match self.locks.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    for taken in &acquired {
                        self.locks.remove(taken);
                    }
                    return false;
                }
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(owner);
                    acquired.push(key.clone());
                }
            }
        }
        true
    }

    /// Release every key in `keys`, regardless of owner.
    pub fn unlock(&self, keys: &[K]) -> bool {
        let mut any = false;
        for key in keys {
            if self.locks.remove(key).is_some() {
                any = true;
            }
        }
        any
    }

    /// Whether `key` is currently held by any owner.
    pub fn is_locked(&self, key: &K) -> bool {
        self.locks.contains_key(key)
    }

    /// Run `f` with key-scoped exclusion: if `key` is unlocked, run `f`
    /// immediately on the caller. If `key` is locked by an in-flight
    /// transaction, wait for the serial executor's critical section
    /// before running `f`, matching how `write` defers to the
    /// transaction that currently owns the key.
    pub async fn write<F, T>(&self, key: &K, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        if !self.is_locked(key) {
            return f();
        }
        let _permit = self.executor.lock().await;
        f()
    }

    /// Atomically acquire locks on every key in `keys`, run `f` inside
    /// the serial executor, then release. Retries with jittered
    /// exponential backoff if the keys are currently held elsewhere.
    pub async fn transaction<F, Fut, T>(&self, keys: Vec<K>, f: F) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = CacheResult<T>>,
    {
        let owner = Uuid::new_v4();
        let mut backoff = RETRY_BASE;
        loop {
            if self.lock(&keys, owner) {
                break;
            }
            sleep(backoff).await;
            backoff = (backoff * 2).min(RETRY_MAX);
        }

        let _permit = self.executor.lock().await;
        let result = IN_TRANSACTION.scope(true, f()).await;
        self.unlock(&keys);
        result.map_err(|e| match e {
            CacheError::Other(msg) => CacheError::Other(msg),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_succeeds_only_if_all_keys_free() {
        let ls: Locksmith<&str> = Locksmith::new();
        let a = Uuid::new_v4();
        assert!(ls.lock(&["x"], a));
        let b = Uuid::new_v4();
        assert!(!ls.lock(&["x", "y"], b));
        assert!(!ls.is_locked(&"y"));
    }

    #[test]
    fn unlock_frees_keys() {
        let ls: Locksmith<&str> = Locksmith::new();
        let owner = Uuid::new_v4();
        ls.lock(&["x"], owner);
        assert!(ls.unlock(&["x"]));
        assert!(!ls.is_locked(&"x"));
    }

    #[tokio::test]
    async fn write_runs_immediately_when_unlocked() {
        let ls: Locksmith<&str> = Locksmith::new();
        let result = ls.write(&"k", || 42).await;
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn transaction_runs_body_and_releases_locks() {
        let ls: Locksmith<&str> = Locksmith::new();
        let result: CacheResult<i32> = ls
            .transaction(vec!["k"], || async {
                assert!(in_transaction());
                Ok(7)
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert!(!ls.is_locked(&"k"));
    }

    #[tokio::test]
    async fn transaction_releases_locks_even_on_failure() {
        let ls: Locksmith<&str> = Locksmith::new();
        let result: CacheResult<()> = ls
            .transaction(vec!["k"], || async { Err(CacheError::other("boom")) })
            .await;
        assert!(result.is_err());
        assert!(!ls.is_locked(&"k"));
    }

    #[tokio::test]
    async fn concurrent_transactions_on_same_key_serialize() {
        let ls: Locksmith<&str> = Locksmith::new();
        let ls2 = ls.clone();
        let order = Arc::new(AsyncMutex::new(Vec::new()));
        let order2 = order.clone();

        let t1 = tokio::spawn(async move {
            ls.transaction(vec!["k"], || async {
                sleep(Duration::from_millis(30)).await;
                order.lock().await.push(1);
                Ok::<_, CacheError>(())
            })
            .await
        });
        sleep(Duration::from_millis(5)).await;
        let t2 = tokio::spawn(async move {
            ls2.transaction(vec!["k"], || async {
                order2.lock().await.push(2);
                Ok::<_, CacheError>(())
            })
            .await
        });

        let _ = tokio::join!(t1, t2);
        let order = order.lock().await;
        assert_eq!(*order, vec![1, 2]);
    }
}
