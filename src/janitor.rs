//! The Janitor: background expired-entry sweeper on a rolling schedule.
//!
//! Grounded on the reference codebase's `start_flush_task`/`maintenance`
//! background-loop shape (`strategy.rs`, `tier.rs`), but deliberately
//! built on `sleep`-then-work-then-`sleep` rather than `tokio::time::interval`:
//! the spec requires the next tick to be scheduled *relative to sweep
//! completion*, not at a fixed cadence that could let sweeps overlap.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::entry::now_millis;
use crate::hooks::{ActionTag, Informant};
use crate::table::EntryTable;

/// Snapshot of the Janitor's last completed sweep.
#[derive(Debug, Clone, Default)]
pub struct JanitorState {
    /// Number of entries purged in the last sweep.
    pub count_purged: u64,
    /// Wall-clock duration of the last sweep, milliseconds.
    pub duration_ms: u64,
    /// When the last sweep started, monotonic milliseconds.
    pub started_at: u64,
}

/// Handle to a running Janitor background task. Dropping this handle
/// does not stop the task; call [`Janitor::shutdown`] for that.
pub struct Janitor {
    state: Arc<(AtomicU64, AtomicU64, AtomicU64)>, // (count, duration_ms, started_at)
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl Janitor {
    /// Spawn a Janitor sweeping `table` every `interval`, broadcasting a
    /// `purge` post-event through `informant` whenever a sweep removes
    /// at least one entry. `interval = None` means the Janitor is
    /// disabled: this returns a handle that never sweeps.
    pub fn spawn<K, V>(table: EntryTable<K, V>, interval: Option<Duration>, informant: Informant) -> Self
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let state = Arc::new((AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)));
        let shutdown = Arc::new(Notify::new());

        let task = interval.map(|interval| {
            let state = state.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = shutdown.notified() => break,
                    }

                    let started_at = now_millis();
                    let sweep_start = Instant::now();
                    let now = started_at;
                    let count = table.delete_matching(|_, e| e.is_expired_at(now));
                    let duration = sweep_start.elapsed();

                    state.0.store(count as u64, Ordering::SeqCst);
                    state.1.store(duration.as_millis() as u64, Ordering::SeqCst);
                    state.2.store(started_at, Ordering::SeqCst);

                    if count > 0 {
                        debug!(count, "janitor sweep purged expired entries");
                        informant.notify_post(ActionTag::Purge, count).await;
                    }
                }
                info!("janitor task stopped");
            })
        });

        Self {
            state,
            shutdown,
            task,
        }
    }

    /// Current Janitor state snapshot.
    pub fn state(&self) -> JanitorState {
        JanitorState {
            count_purged: self.state.0.load(Ordering::SeqCst),
            duration_ms: self.state.1.load(Ordering::SeqCst),
            started_at: self.state.2.load(Ordering::SeqCst),
        }
    }

    /// Stop the background sweep task, if one is running.
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Run a single sweep synchronously against `table`, without the
    /// background loop. Used by the Limit engine, which must invoke the
    /// Janitor's purge routine inline before computing eviction excess.
    pub fn sweep_once<K, V>(table: &EntryTable<K, V>) -> usize
    where
        K: Eq + Hash + Clone,
        V: Clone,
    {
        let now = now_millis();
        table.delete_matching(|_, e| e.is_expired_at(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::hooks::Informant;

    #[test]
    fn sweep_once_removes_expired_entries_only() {
        let table: EntryTable<&str, i32> = EntryTable::new();
        table.put(
            "expired",
            Entry {
                modified: 1,
                ttl: Some(1),
                value: 1,
            },
        );
        table.put("alive", Entry::new(2, None));
        let removed = Janitor::sweep_once(&table);
        assert_eq!(removed, 1);
        assert_eq!(table.size(), 1);
        assert!(table.get(&"alive").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn background_sweep_purges_and_reports_state() {
        let table: EntryTable<&str, i32> = EntryTable::new();
        table.put(
            "a",
            Entry {
                modified: now_millis(),
                ttl: Some(10),
                value: 1,
            },
        );

        let informant = Informant::new(Default::default());
        let janitor = Janitor::spawn(table.clone(), Some(Duration::from_millis(30)), informant);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(table.size(), 0);
        assert!(janitor.state().count_purged >= 1);
        janitor.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_janitor_never_sweeps() {
        let table: EntryTable<&str, i32> = EntryTable::new();
        table.put(
            "a",
            Entry {
                modified: now_millis(),
                ttl: Some(1),
                value: 1,
            },
        );
        let informant = Informant::new(Default::default());
        let janitor = Janitor::spawn(table.clone(), None, informant);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(table.size(), 1);
        janitor.shutdown().await;
    }
}
