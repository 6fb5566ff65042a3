//! Preprocessing configuration
//!
//! Every option has a serde default, so a partial JSON object (or none at
//! all) yields a usable configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounds of the preprocessing cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Entry-count bound; the least recently used entry goes first
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Approximate payload budget in megabytes
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    /// Entry lifetime, independent of use
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    /// Period of the background maintenance sweep
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

fn default_max_entries() -> usize {
    100
}

fn default_max_memory_mb() -> u64 {
    50
}

fn default_ttl_ms() -> u64 {
    30 * 60 * 1000
}

fn default_cleanup_interval_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_memory_mb: default_max_memory_mb(),
            ttl_ms: default_ttl_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

impl CacheConfig {
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize).saturating_mul(1024 * 1024)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// Connection debouncer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebounceConfig {
    /// Quiet period after the last change before an operation fires
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// New requests are dropped once this many are pending
    #[serde(default = "default_max_pending_operations")]
    pub max_pending_operations: usize,
    /// Operations per batch when flushing
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_max_pending_operations() -> usize {
    50
}

fn default_batch_size() -> usize {
    10
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_pending_operations: default_max_pending_operations(),
            batch_size: default_batch_size(),
        }
    }
}

impl DebounceConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Preprocessing state manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateManagerConfig {
    /// System-wide ceiling on simultaneously processing nodes
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,
    /// A node processing longer than this is considered stuck
    #[serde(default = "default_stuck_timeout_ms")]
    pub stuck_timeout_ms: u64,
}

fn default_max_concurrent_operations() -> usize {
    5
}

fn default_stuck_timeout_ms() -> u64 {
    2 * 60 * 1000
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: default_max_concurrent_operations(),
            stuck_timeout_ms: default_stuck_timeout_ms(),
        }
    }
}

impl StateManagerConfig {
    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_millis(self.stuck_timeout_ms)
    }
}

/// Automatic retry of `retry`-classified failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: `base * 2^retry`, capped at `max_delay_ms`
    ///
    /// `retry` counts from zero for the first retry.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// All preprocessing settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessingConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub state: StateManagerConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}
