//! The Informant: ordered pre/post action hook bus.
//!
//! Grounded on the reference codebase's `PubSubInvalidator` subscriber
//! list in `invalidation.rs`, but delivery here is strictly sequential in
//! registration order rather than fan-out — the spec requires hook
//! ordering to bound tail latency and preserve causality for synchronous
//! hooks, which a `broadcast` channel's independent-receiver fan-out
//! cannot guarantee.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::warn;

use crate::config::HookConfig;

/// The canonical action tags flowing through the hook bus (`SPEC_FULL.md`
/// §11.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionTag {
    Get,
    Exists,
    Ttl,
    Put,
    PutMany,
    InsertNew,
    Update,
    Delete,
    Clear,
    Incr,
    Decr,
    Expire,
    Persist,
    Refresh,
    Touch,
    Fetch,
    /// Janitor-only: a sweep removed at least one expired entry.
    Purge,
    /// Limit-only: an LRW/LRU sweep evicted entries.
    ClearEvicted,
}

impl ActionTag {
    /// Whether this tag is one of the "LRW-growth" events that should
    /// trigger Evented Limit enforcement (§11.2).
    pub fn is_growth_event(self) -> bool {
        matches!(
            self,
            ActionTag::Put
                | ActionTag::PutMany
                | ActionTag::InsertNew
                | ActionTag::Update
                | ActionTag::Incr
                | ActionTag::Decr
                | ActionTag::Fetch
        )
    }

    /// Whether this tag is one of the "Accessed" events that should
    /// touch `modified` under the LRU extension (§11.2).
    pub fn is_touch_event(self) -> bool {
        matches!(
            self,
            ActionTag::Get
                | ActionTag::Exists
                | ActionTag::Ttl
                | ActionTag::Fetch
                | ActionTag::Incr
                | ActionTag::Decr
                | ActionTag::Update
        )
    }
}

/// Whether a hook fires before or after the action executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Pre,
    Post,
}

/// Whether hook delivery blocks the caller (with a timeout) or is
/// fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sync,
    Async,
}

/// A subscriber to the hook bus.
///
/// `args` is an opaque, already-serialized representation of the
/// action's arguments (the engine does not know or care about a
/// subscriber's internal shape); `result` carries a summary count/value
/// relevant to the tag (e.g. `purge`'s count of expired entries
/// removed).
#[async_trait]
pub trait Hook: Send + Sync {
    /// Tags this hook wants to observe, or `None` for "all".
    fn tags(&self) -> Option<&[ActionTag]> {
        None
    }

    /// Which phase this hook subscribes to.
    fn phase(&self) -> HookPhase {
        HookPhase::Post
    }

    /// Sync or async delivery.
    fn delivery(&self) -> Delivery {
        Delivery::Async
    }

    /// Invoked with the action tag and a result summary. Errors are
    /// swallowed by the Informant; a failing hook must never abort the
    /// originating action.
    async fn on_event(&self, tag: ActionTag, result: i64);

    fn wants(&self, tag: ActionTag) -> bool {
        self.tags().map(|ts| ts.contains(&tag)).unwrap_or(true)
    }
}

/// Ordered pre/post hook bus.
#[derive(Clone)]
pub struct Informant {
    subscribers: Arc<RwLock<Vec<Arc<dyn Hook>>>>,
    config: HookConfig,
}

impl Informant {
    /// Build an empty Informant.
    pub fn new(config: HookConfig) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
            config,
        }
    }

    /// Register a subscriber at the end of the delivery order.
    pub async fn subscribe(&self, hook: Arc<dyn Hook>) {
        self.subscribers.write().await.push(hook);
    }

    /// Deliver a pre-action notification (result is always a no-op
    /// placeholder of `0`, per the spec's "result = null" rule for
    /// pre-hooks).
    pub async fn notify_pre(&self, tag: ActionTag) {
        self.dispatch(tag, HookPhase::Pre, 0).await;
    }

    /// Deliver a post-action notification carrying a result summary.
    pub async fn notify_post(&self, tag: ActionTag, result: i64) {
        self.dispatch(tag, HookPhase::Post, result).await;
    }

    async fn dispatch(&self, tag: ActionTag, phase: HookPhase, result: i64) {
        // Sequential delivery in registration order: no per-hook
        // fan-out, so causality holds for synchronous subscribers.
        let subscribers = self.subscribers.read().await.clone();
        for hook in subscribers {
            if hook.phase() != phase || !hook.wants(tag) {
                continue;
            }
            match hook.delivery() {
                Delivery::Async => {
                    let hook = hook.clone();
                    tokio::spawn(async move {
                        hook.on_event(tag, result).await;
                    });
                }
                Delivery::Sync => {
                    if timeout(self.config.sync_timeout(), hook.on_event(tag, result))
                        .await
                        .is_err()
                    {
                        warn!(?tag, "synchronous hook timed out; delivery continues");
                    }
                }
            }
        }
    }
}
