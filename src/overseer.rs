//! The Overseer: a process-wide registry mapping cache name → descriptor.
//!
//! Grounded on the reference codebase's ubiquitous `Arc<DashMap<K, V>>`
//! handle-sharing pattern; per the design notes this replaces the
//! source's global ETS registry with a sharded concurrent map, giving
//! lock-free reads (clone the `Arc`) and per-name serialized updates
//! (DashMap's per-shard write lock via `entry`).

use dashmap::DashMap;
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::hooks::Informant;

/// A frozen, named cache configuration. Immutable between Overseer
/// updates; [`Overseer::update`] replaces the whole record atomically.
pub struct CacheDescriptor {
    /// The cache's registered name.
    pub name: String,
    /// Its configuration at the time this descriptor was materialized.
    pub config: CacheConfig,
    /// The hook bus provisioned with this descriptor.
    pub informant: Informant,
}

impl CacheDescriptor {
    /// Build a new descriptor, validating `config` first.
    pub fn new(name: impl Into<String>, config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            informant: Informant::new(config.hooks.clone()),
            config,
        })
    }
}

/// Process-wide registry of named cache descriptors.
#[derive(Clone, Default)]
pub struct Overseer {
    registry: Arc<DashMap<String, Arc<CacheDescriptor>>>,
}

impl Overseer {
    /// Build an empty Overseer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `desc` under `name`, replacing any prior descriptor.
    pub fn register(&self, name: impl Into<String>, desc: CacheDescriptor) {
        self.registry.insert(name.into(), Arc::new(desc));
    }

    /// Remove the descriptor registered under `name`.
    pub fn unregister(&self, name: &str) -> bool {
        self.registry.remove(name).is_some()
    }

    /// Look up a descriptor by name. Lock-free: clones the shared `Arc`.
    pub fn lookup(&self, name: &str) -> Option<Arc<CacheDescriptor>> {
        self.registry.get(name).map(|e| e.clone())
    }

    /// Atomically replace the descriptor registered under `name`. `f`
    /// receives the current descriptor and must return its replacement;
    /// returns [`CacheError::Missing`] if `name` is not registered.
    pub fn update<F>(&self, name: &str, f: F) -> CacheResult<()>
    where
        F: FnOnce(&CacheDescriptor) -> CacheResult<CacheDescriptor>,
    {
        match self.registry.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut e) => {
                let replacement = f(e.get())?;
                e.insert(Arc::new(replacement));
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(_) => Err(CacheError::Missing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_finds_descriptor() {
        let overseer = Overseer::new();
        let desc = CacheDescriptor::new("main", CacheConfig::default()).unwrap();
        overseer.register("main", desc);
        assert!(overseer.lookup("main").is_some());
        assert!(overseer.lookup("other").is_none());
    }

    #[test]
    fn unregister_removes_descriptor() {
        let overseer = Overseer::new();
        overseer.register("main", CacheDescriptor::new("main", CacheConfig::default()).unwrap());
        assert!(overseer.unregister("main"));
        assert!(overseer.lookup("main").is_none());
    }

    #[test]
    fn update_replaces_descriptor_atomically() {
        let overseer = Overseer::new();
        overseer.register("main", CacheDescriptor::new("main", CacheConfig::default()).unwrap());
        overseer
            .update("main", |current| {
                let mut config = current.config.clone();
                config.limit.max_size = Some(50);
                CacheDescriptor::new("main", config)
            })
            .unwrap();
        assert_eq!(overseer.lookup("main").unwrap().config.limit.max_size, Some(50));
    }

    #[test]
    fn update_on_unregistered_name_fails() {
        let overseer = Overseer::new();
        let result = overseer.update("missing", |d| Ok(CacheDescriptor::new("missing", d.config.clone()).unwrap()));
        assert!(matches!(result, Err(CacheError::Missing)));
    }
}
