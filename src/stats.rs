//! Statistics aggregation: a lock-free counter bank subscribed to the
//! hook bus as an ordinary post-hook.
//!
//! Grounded on the reference codebase's `MultiTierCache::increment_stat`/
//! `hit_rate` bookkeeping in `tier.rs`. Output shape is explicitly not a
//! stability contract per the spec, so [`StatsSnapshot`] is a plain
//! struct rather than a versioned wire format.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::entry::now_millis;
use crate::hooks::{ActionTag, Delivery, Hook, HookPhase};

/// A read-only snapshot of cache statistics.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// Milliseconds timestamp the collector was created.
    pub creation_date: u64,
    /// Count of `get`/`fetch` calls that found a live value.
    pub hits: u64,
    /// Count of `get`/`fetch` calls that found nothing.
    pub misses: u64,
    /// `hits / (hits + misses)`, or `0.0` if there have been no calls.
    pub hit_rate: f64,
    /// `misses / (hits + misses)`, or `0.0` if there have been no calls.
    pub miss_rate: f64,
    /// Per-action-tag call counts.
    pub calls: Vec<(&'static str, u64)>,
    /// Total operations observed (sum of all `calls`).
    pub operations: u64,
    /// Count of mutating (write-shaped) actions.
    pub writes: u64,
}

fn tag_name(tag: ActionTag) -> &'static str {
    match tag {
        ActionTag::Get => "get",
        ActionTag::Exists => "exists",
        ActionTag::Ttl => "ttl",
        ActionTag::Put => "put",
        ActionTag::PutMany => "put_many",
        ActionTag::InsertNew => "insert_new",
        ActionTag::Update => "update",
        ActionTag::Delete => "delete",
        ActionTag::Clear => "clear",
        ActionTag::Incr => "incr",
        ActionTag::Decr => "decr",
        ActionTag::Expire => "expire",
        ActionTag::Persist => "persist",
        ActionTag::Refresh => "refresh",
        ActionTag::Touch => "touch",
        ActionTag::Fetch => "fetch",
        ActionTag::Purge => "purge",
        ActionTag::ClearEvicted => "clear_evicted",
    }
}

fn is_write_tag(tag: ActionTag) -> bool {
    matches!(
        tag,
        ActionTag::Put
            | ActionTag::PutMany
            | ActionTag::InsertNew
            | ActionTag::Update
            | ActionTag::Delete
            | ActionTag::Clear
            | ActionTag::Incr
            | ActionTag::Decr
            | ActionTag::Expire
            | ActionTag::Persist
            | ActionTag::Refresh
            | ActionTag::Touch
    )
}

/// Lock-free counter bank. Register with [`crate::hooks::Informant`] via
/// [`StatsCollector::as_hook`].
pub struct StatsCollector {
    creation_date: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    calls: DashMap<&'static str, AtomicU64>,
    writes: AtomicU64,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    /// Build a fresh collector.
    pub fn new() -> Self {
        Self {
            creation_date: now_millis(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            calls: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    /// Record a hit or miss for a read-shaped action. `hit` should be
    /// `true` when the key was found (and not expired).
    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record that `tag` occurred, independent of hit/miss bookkeeping.
    pub fn record_call(&self, tag: ActionTag) {
        self.calls
            .entry(tag_name(tag))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        if is_write_tag(tag) {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Produce a point-in-time snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let calls: Vec<(&'static str, u64)> = self
            .calls
            .iter()
            .map(|e| (*e.key(), e.value().load(Ordering::Relaxed)))
            .collect();
        let operations = calls.iter().map(|(_, n)| n).sum();
        StatsSnapshot {
            creation_date: self.creation_date,
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            miss_rate: if total == 0 { 0.0 } else { misses as f64 / total as f64 },
            calls,
            operations,
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

struct StatsHook(Arc<StatsCollector>);

#[async_trait]
impl Hook for StatsHook {
    fn phase(&self) -> HookPhase {
        HookPhase::Post
    }

    fn delivery(&self) -> Delivery {
        Delivery::Sync
    }

    async fn on_event(&self, tag: ActionTag, result: i64) {
        self.0.record_call(tag);
        if matches!(tag, ActionTag::Get | ActionTag::Fetch) {
            // result carries 1 for a hit-shaped outcome, 0 for a miss, by
            // caller convention (see crate::cache).
            self.0.record_lookup(result != 0);
        }
    }
}

impl StatsCollector {
    /// Wrap this collector as an [`crate::hooks::Hook`] for registration
    /// with an [`crate::hooks::Informant`].
    pub fn as_hook(self: &Arc<Self>) -> Arc<dyn Hook> {
        Arc::new(StatsHook(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_computes_hit_and_miss_rate() {
        let collector = StatsCollector::new();
        collector.record_lookup(true);
        collector.record_lookup(true);
        collector.record_lookup(false);
        let snap = collector.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert!((snap.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn zero_calls_yields_zero_rates() {
        let snap = StatsCollector::new().snapshot();
        assert_eq!(snap.hit_rate, 0.0);
        assert_eq!(snap.miss_rate, 0.0);
    }

    #[test]
    fn record_call_tracks_writes_separately() {
        let collector = StatsCollector::new();
        collector.record_call(ActionTag::Put);
        collector.record_call(ActionTag::Get);
        let snap = collector.snapshot();
        assert_eq!(snap.writes, 1);
        assert_eq!(snap.operations, 2);
    }

    #[tokio::test]
    async fn registered_hook_updates_snapshot() {
        use crate::hooks::Informant;
        let collector = Arc::new(StatsCollector::new());
        let informant = Informant::new(Default::default());
        informant.subscribe(collector.as_hook()).await;
        informant.notify_post(ActionTag::Get, 1).await;
        informant.notify_post(ActionTag::Get, 0).await;
        let snap = collector.snapshot();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 1);
    }
}
