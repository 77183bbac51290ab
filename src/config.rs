//! Cache configuration: expiration defaults, Janitor interval, Limit/Policy
//! settings, and hook timeouts.
//!
//! Mirrors the reference codebase's habit of a plain `Default`-able,
//! `serde`-round-trippable config struct per subsystem (see the
//! `LockConfig`/`TierConfig`/`StrategyConfig` family this was grounded on).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// How the Limit/Policy engine enforces `max_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitMode {
    /// Run the LRW algorithm on a fixed interval, independent of traffic.
    Scheduled,
    /// Run the LRW algorithm after every action that can grow the table.
    Evented,
}

impl Default for LimitMode {
    fn default() -> Self {
        LimitMode::Scheduled
    }
}

/// Bounded-size eviction configuration for the Limit/Policy engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Maximum number of entries before eviction kicks in. `None` disables
    /// the Limit engine entirely.
    pub max_size: Option<usize>,
    /// Fraction of `max_size` reclaimed once the limit is exceeded, in
    /// `(0, 1]`.
    pub reclaim: f64,
    /// Evented or Scheduled enforcement.
    pub mode: LimitMode,
    /// Interval between Scheduled sweeps, milliseconds. Ignored in Evented
    /// mode.
    pub interval_ms: u64,
    /// Whether reads (`get`, `exists`, `ttl`, `fetch`, `incr`, `decr`,
    /// `update`) touch `modified`, turning LRW into LRU.
    pub lru_touch: bool,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_size: None,
            reclaim: 0.1,
            mode: LimitMode::Scheduled,
            interval_ms: 1_000,
            lru_touch: false,
        }
    }
}

impl LimitConfig {
    /// Validate the fields an implementer can get wrong through config
    /// files or builder misuse.
    pub fn validate(&self) -> CacheResult<()> {
        if !(self.reclaim > 0.0 && self.reclaim <= 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "reclaim must be in (0, 1], got {}",
                self.reclaim
            )));
        }
        if self.mode == LimitMode::Scheduled && self.interval_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "scheduled limit interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Interval as a [`Duration`], for the scheduled enforcement task.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Expiration defaults and Janitor scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpirationConfig {
    /// Default TTL applied to writes that do not specify their own,
    /// milliseconds. `None` means entries never expire by default.
    pub default_ttl_ms: Option<u64>,
    /// Janitor sweep interval, milliseconds. `None` disables the Janitor.
    pub janitor_interval_ms: Option<u64>,
    /// Whether reads lazily evict expired entries on observation.
    pub lazy: bool,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: None,
            janitor_interval_ms: None,
            lazy: true,
        }
    }
}

impl ExpirationConfig {
    /// Janitor interval as a [`Duration`], if the Janitor is enabled.
    pub fn janitor_interval(&self) -> Option<Duration> {
        self.janitor_interval_ms.map(Duration::from_millis)
    }
}

/// Hook bus (Informant) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    /// Timeout applied to synchronous hook delivery, milliseconds.
    pub sync_timeout_ms: u64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 5_000,
        }
    }
}

impl HookConfig {
    /// Sync hook timeout as a [`Duration`].
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

/// Persistence (export/import) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// zlib-style compression level, 0 (none) through 9 (max).
    pub compression_level: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            compression_level: 1,
        }
    }
}

/// The full set of settings a cache is started with. Frozen into the
/// [`crate::overseer::CacheDescriptor`] at start time; reconfiguration
/// replaces it wholesale via the Overseer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// Expiration defaults and Janitor scheduling.
    pub expiration: ExpirationConfig,
    /// Limit/Policy engine settings.
    pub limit: LimitConfig,
    /// Hook bus settings.
    pub hooks: HookConfig,
    /// Persistence settings.
    pub persistence: PersistenceConfig,
}

impl CacheConfig {
    /// Validate the whole configuration tree.
    pub fn validate(&self) -> CacheResult<()> {
        self.limit.validate()?;
        if self.persistence.compression_level > 9 {
            return Err(CacheError::InvalidConfig(format!(
                "compression_level must be 0-9, got {}",
                self.persistence.compression_level
            )));
        }
        Ok(())
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &str) -> CacheResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CacheError::UnreachableFile(e.to_string()))?;
        let config: CacheConfig = serde_json::from_str(&contents)
            .map_err(|e| CacheError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> CacheResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::other(e))?;
        std::fs::write(path, json).map_err(|e| CacheError::UnreachableFile(e.to_string()))
    }
}
