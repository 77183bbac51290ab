//! The Limit/Policy Engine: LRW/LRU bounded-size eviction.
//!
//! Grounded on the reference codebase's `tier.rs` (`LruCache`'s
//! access-order bookkeeping, `MultiTierCache::maintenance`'s periodic
//! demotion sweep) adapted from multi-tier promotion/demotion down to
//! this spec's single-tier LRW formula (§4.5).

use std::hash::Hash;
use tracing::debug;

use crate::config::{LimitConfig, LimitMode};
use crate::hooks::{ActionTag, Informant};
use crate::janitor::Janitor;
use crate::table::EntryTable;

/// Run the LRW algorithm once against `table`, per `SPEC_FULL.md` §4.5:
/// purge expired entries first, then compute `excess` and evict the
/// oldest-`modified` keys. Returns the number of keys evicted.
pub fn enforce_once<K, V>(table: &EntryTable<K, V>, config: &LimitConfig) -> usize
where
    K: Eq + Hash + Clone + Ord,
    V: Clone,
{
    let Some(max_size) = config.max_size else {
        return 0;
    };

    let size = table.size();
    if size <= max_size {
        return 0;
    }

    Janitor::sweep_once(table);
    let size = table.size();
    if size <= max_size {
        return 0;
    }

    let reclaimed_floor = max_size - ((max_size as f64 * config.reclaim).floor() as usize).min(max_size);
    let excess = size.saturating_sub(reclaimed_floor);
    if excess == 0 {
        return 0;
    }

    let mut snapshot = table.modified_snapshot();
    // Ties broken arbitrarily: stable sort over (modified, key) gives a
    // deterministic but otherwise unconstrained order among equal
    // timestamps.
    snapshot.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let victims: Vec<K> = snapshot.into_iter().take(excess).map(|(k, _)| k).collect();
    table.delete_keys(&victims)
}

/// Touch `key`'s `modified` timestamp if `tag` is one of the canonical
/// "Accessed" events and LRU touch is enabled. Best-effort: a missing
/// key is silently ignored.
pub fn maybe_touch<K, V>(table: &EntryTable<K, V>, key: &K, tag: ActionTag, config: &LimitConfig)
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    if config.lru_touch && tag.is_touch_event() {
        table.update_fields(key, |e| e.touch());
    }
}

/// An Evented enforcement subscriber: a post-hook that re-runs
/// `enforce_once` after any action tagged as an LRW-growth event.
pub struct EventedLimit<K, V> {
    table: EntryTable<K, V>,
    config: LimitConfig,
    informant: Informant,
}

impl<K, V> EventedLimit<K, V>
where
    K: Eq + Hash + Clone + Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Build an Evented limit enforcer. Call [`Self::on_action`] after
    /// every mutating action tagged `tag`.
    pub fn new(table: EntryTable<K, V>, config: LimitConfig, informant: Informant) -> Self {
        Self {
            table,
            config,
            informant,
        }
    }

    /// Invoke after an action completes; no-ops for non-growth tags.
    pub async fn on_action(&self, tag: ActionTag) {
        if !tag.is_growth_event() {
            return;
        }
        let evicted = enforce_once(&self.table, &self.config);
        if evicted > 0 {
            debug!(evicted, "evented limit enforcement ran");
            self.informant.notify_post(ActionTag::ClearEvicted, evicted as i64).await;
        }
    }
}

/// A Scheduled enforcement task: runs `enforce_once` on a fixed
/// interval, independent of write traffic.
pub struct ScheduledLimit {
    shutdown: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ScheduledLimit {
    /// Spawn the scheduled sweep loop.
    pub fn spawn<K, V>(table: EntryTable<K, V>, config: LimitConfig, informant: Informant) -> Self
    where
        K: Eq + Hash + Clone + Ord + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let (shutdown, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let interval = config.interval();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => break,
                }
                let evicted = enforce_once(&table, &config);
                if evicted > 0 {
                    debug!(evicted, "scheduled limit enforcement ran");
                    informant.notify_post(ActionTag::ClearEvicted, evicted as i64).await;
                }
            }
        });
        Self { shutdown, task }
    }

    /// Stop the scheduled sweep task.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Apply `config.mode` to decide whether to wire Evented or Scheduled
/// enforcement for a cache, returning the enforcer's runtime handle
/// in whichever shape applies. Assembled by [`crate::cache::Cache`].
pub enum LimitEnforcer<K, V> {
    Evented(EventedLimit<K, V>),
    Scheduled(ScheduledLimit),
    Disabled,
}

impl<K, V> LimitEnforcer<K, V>
where
    K: Eq + Hash + Clone + Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Build the enforcer named by `config.mode`, or `Disabled` if
    /// `config.max_size` is unset.
    pub fn build(table: EntryTable<K, V>, config: LimitConfig, informant: Informant) -> Self {
        if config.max_size.is_none() {
            return LimitEnforcer::Disabled;
        }
        match config.mode {
            LimitMode::Evented => LimitEnforcer::Evented(EventedLimit::new(table, config, informant)),
            LimitMode::Scheduled => LimitEnforcer::Scheduled(ScheduledLimit::spawn(table, config, informant)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;

    fn config(max_size: usize, reclaim: f64) -> LimitConfig {
        LimitConfig {
            max_size: Some(max_size),
            reclaim,
            ..Default::default()
        }
    }

    #[test]
    fn no_op_below_max_size() {
        let table: EntryTable<u32, i32> = EntryTable::new();
        table.put(1, Entry::new(1, None));
        assert_eq!(enforce_once(&table, &config(10, 0.5)), 0);
    }

    #[test]
    fn evicts_oldest_modified_entries_first() {
        let table: EntryTable<u32, i32> = EntryTable::new();
        for i in 0..100u32 {
            table.put(
                i,
                Entry {
                    modified: i as u64,
                    ttl: None,
                    value: i as i32,
                },
            );
        }
        table.put(
            100,
            Entry {
                modified: 100,
                ttl: None,
                value: 100,
            },
        );

        let evicted = enforce_once(&table, &config(100, 0.75));
        assert_eq!(evicted, 76);
        assert_eq!(table.size(), 25);
        for i in 0..76u32 {
            assert!(table.get(&i).is_none(), "key {i} should have been evicted");
        }
        for i in 77..=100u32 {
            assert!(table.get(&i).is_some(), "key {i} should survive");
        }
    }

    #[test]
    fn maybe_touch_only_applies_to_touch_events_when_enabled() {
        let table: EntryTable<&str, i32> = EntryTable::new();
        table.put(
            "a",
            Entry {
                modified: 1,
                ttl: None,
                value: 1,
            },
        );
        let mut cfg = LimitConfig::default();
        cfg.lru_touch = true;
        maybe_touch(&table, &"a", ActionTag::Get, &cfg);
        assert!(table.get(&"a").unwrap().modified > 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scheduled_limit_runs_on_its_own_timer() {
        let table: EntryTable<u32, i32> = EntryTable::new();
        for i in 0..20u32 {
            table.put(i, Entry { modified: i as u64, ttl: None, value: 0 });
        }
        let mut cfg = config(10, 0.5);
        cfg.mode = LimitMode::Scheduled;
        cfg.interval_ms = 20;
        let informant = Informant::new(Default::default());
        let sched = ScheduledLimit::spawn(table.clone(), cfg, informant);
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(table.size() <= 10);
        sched.shutdown().await;
    }
}
