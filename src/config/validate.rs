// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile, SchedulerConfig};
use crate::errors::{Result, SchedulerError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SchedulerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_scheduler(&raw.scheduler)?;
        Ok(ConfigFile::new_unchecked(raw.scheduler))
    }
}

fn validate_scheduler(cfg: &SchedulerConfig) -> Result<()> {
    if cfg.default_chunk_size == 0 {
        return Err(SchedulerError::ConfigError(
            "[scheduler].default_chunk_size must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.time_slice_ms == 0 {
        return Err(SchedulerError::ConfigError(
            "[scheduler].time_slice_ms must be >= 1 (got 0)".to_string(),
        ));
    }

    // A threshold of 0 is allowed: it disables the sequential fallback.

    Ok(())
}
