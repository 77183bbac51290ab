//! The Entry Table: the authoritative concurrent store.
//!
//! Grounded on the reference codebase's pervasive `Arc<DashMap<K, V>>`
//! pattern (`tier.rs`'s `LruCache`/`MultiTierCache`, `strategy.rs`'s
//! `InMemoryStore`, `lock.rs`'s lock maps) — `dashmap` gives per-key
//! atomicity for point ops without a coarse table-wide lock.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::entry::{now_millis, Entry};
use crate::query::{Predicate, Projected, Projection};

/// Concurrent table mapping key to entry. Cheap to clone: all clones
/// share the same underlying map.
#[derive(Clone)]
pub struct EntryTable<K, V> {
    inner: Arc<DashMap<K, Entry<V>>>,
}

impl<K, V> Default for EntryTable<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> EntryTable<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Build an empty table.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Return the stored entry, without interpreting expiration.
    pub fn get_raw(&self, key: &K) -> Option<Entry<V>> {
        self.inner.get(key).map(|e| e.clone())
    }

    /// Return the stored entry if present and not expired, evicting it
    /// first if it has expired (lazy expiration).
    pub fn get(&self, key: &K) -> Option<Entry<V>> {
        let now = now_millis();
        let expired = self
            .inner
            .get(key)
            .map(|e| e.is_expired_at(now))
            .unwrap_or(false);
        if expired {
            self.inner.remove(key);
            return None;
        }
        self.inner.get(key).map(|e| e.clone())
    }

    /// Overwrite any existing entry for `key`.
    pub fn put(&self, key: K, entry: Entry<V>) {
        self.inner.insert(key, entry);
    }

    /// Insert only if `key` is currently absent. Returns `true` if the
    /// insert happened.
    pub fn insert_new(&self, key: K, entry: Entry<V>) -> bool {
        match self.inner.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(entry);
                true
            }
        }
    }

    /// Apply `f` to the existing entry for `key` atomically. Returns
    /// `false` if `key` is absent (or already expired).
    pub fn update_fields<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut Entry<V>),
    {
        let now = now_millis();
        let mut expired = false;
        let mut applied = false;
        if let Some(mut e) = self.inner.get_mut(key) {
            if e.is_expired_at(now) {
                expired = true;
            } else {
                f(&mut e);
                applied = true;
            }
        }
        if expired {
            self.inner.remove(key);
        }
        applied
    }

    /// Remove `key`. Returns `true` if something was removed.
    pub fn delete(&self, key: &K) -> bool {
        self.inner.remove(key).is_some()
    }

    /// Remove every entry. Returns the number removed.
    pub fn clear(&self) -> usize {
        let count = self.inner.len();
        self.inner.clear();
        count
    }

    /// Current entry count, including not-yet-lazily-expired entries.
    pub fn size(&self) -> usize {
        self.inner.len()
    }

    /// Predicate-filtered, projected scan. Accepts eventual consistency
    /// against concurrent writers, per the spec's design notes: this is a
    /// snapshot-at-iteration-time pass over the shards, not a
    /// linearizable cursor.
    pub fn scan(&self, predicate: &Predicate<K, V>, projection: Projection) -> Vec<Projected<K, V>> {
        self.inner
            .iter()
            .filter(|entry| predicate.matches(entry.key(), entry.value()))
            .map(|entry| projection.project(entry.key(), entry.value()))
            .collect()
    }

    /// Delete every entry matching `predicate`. Used by the Janitor and
    /// the Limit engine's key-list deletes. Returns the number removed.
    pub fn delete_matching<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K, &Entry<V>) -> bool,
    {
        let doomed: Vec<K> = self
            .inner
            .iter()
            .filter(|e| predicate(e.key(), e.value()))
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for key in doomed {
            if self.inner.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Delete exactly the given keys, regardless of their current state.
    /// Used by the Limit engine once it has chosen victims. Returns the
    /// number actually removed.
    pub fn delete_keys(&self, keys: &[K]) -> usize {
        keys.iter().filter(|k| self.inner.remove(k).is_some()).count()
    }

    /// Project `(key, modified)` for every live entry, for the Limit
    /// engine's LRW sort.
    pub fn modified_snapshot(&self) -> Vec<(K, u64)> {
        self.inner.iter().map(|e| (e.key().clone(), e.value().modified)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> EntryTable<&'static str, i32> {
        EntryTable::new()
    }

    #[test]
    fn put_then_get_roundtrips() {
        let t = table();
        t.put("a", Entry::new(1, None));
        assert_eq!(t.get(&"a").map(|e| e.value), Some(1));
    }

    #[test]
    fn insert_new_fails_if_present() {
        let t = table();
        assert!(t.insert_new("a", Entry::new(1, None)));
        assert!(!t.insert_new("a", Entry::new(2, None)));
        assert_eq!(t.get(&"a").map(|e| e.value), Some(1));
    }

    #[test]
    fn get_evicts_expired_entry() {
        let t = table();
        t.put(
            "a",
            Entry {
                modified: 1,
                ttl: Some(1),
                value: 1,
            },
        );
        assert_eq!(t.get(&"a"), None);
        assert_eq!(t.size(), 0);
    }

    #[test]
    fn delete_removes_entry() {
        let t = table();
        t.put("a", Entry::new(1, None));
        assert!(t.delete(&"a"));
        assert!(!t.delete(&"a"));
    }

    #[test]
    fn clear_removes_everything_and_reports_count() {
        let t = table();
        t.put("a", Entry::new(1, None));
        t.put("b", Entry::new(2, None));
        assert_eq!(t.clear(), 2);
        assert_eq!(t.size(), 0);
    }

    #[test]
    fn update_fields_mutates_in_place() {
        let t = table();
        t.put("a", Entry::new(1, None));
        assert!(t.update_fields(&"a", |e| e.value = 99));
        assert_eq!(t.get(&"a").map(|e| e.value), Some(99));
        assert!(!t.update_fields(&"missing", |_| {}));
    }

    #[test]
    fn scan_applies_predicate_and_projection() {
        let t = table();
        t.put("a", Entry::new(1, None));
        t.put("b", Entry::new(2, None));
        let results = t.scan(
            &Predicate::ValueWhere(std::sync::Arc::new(|v: &i32| *v > 1)),
            Projection::Value,
        );
        assert_eq!(results, vec![Projected::Value(2)]);
    }
}
