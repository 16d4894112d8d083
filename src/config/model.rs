// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [scheduler]
/// small_batch_threshold = 256
/// default_chunk_size = 256
/// time_slice_ms = 8
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    /// Scheduler tunables from `[scheduler]`.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Validated configuration.
///
/// Only constructible through `TryFrom<RawConfigFile>` (see `validate.rs`)
/// or [`ConfigFile::default`], so holders can rely on the invariants.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    scheduler: SchedulerConfig,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(scheduler: SchedulerConfig) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &SchedulerConfig {
        &self.scheduler
    }
}

/// Process-wide scheduler tunables, injected into a `TaskManager` at
/// construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// Iteration counts below this always run as a single scope.
    #[serde(default = "default_small_batch_threshold")]
    pub small_batch_threshold: usize,

    /// Scope width used when a caller passes a chunk size of `0`.
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: usize,

    /// Budget for one main-thread pump, in milliseconds.
    #[serde(default = "default_time_slice_ms")]
    pub time_slice_ms: u64,
}

fn default_small_batch_threshold() -> usize {
    256
}

fn default_chunk_size() -> usize {
    256
}

fn default_time_slice_ms() -> u64 {
    8
}

impl SchedulerConfig {
    pub fn time_slice(&self) -> Duration {
        Duration::from_millis(self.time_slice_ms)
    }

    pub fn with_small_batch_threshold(mut self, threshold: usize) -> Self {
        self.small_batch_threshold = threshold;
        self
    }

    pub fn with_default_chunk_size(mut self, chunk_size: usize) -> Self {
        self.default_chunk_size = chunk_size;
        self
    }

    pub fn with_time_slice_ms(mut self, ms: u64) -> Self {
        self.time_slice_ms = ms;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            small_batch_threshold: default_small_batch_threshold(),
            default_chunk_size: default_chunk_size(),
            time_slice_ms: default_time_slice_ms(),
        }
    }
}
