// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! Scheduling refusals are *not* errors: `start`, `launch` and
//! `try_create_token` report them through `bool` / `Option` returns. This
//! type covers the ambient failures around the scheduler (configuration,
//! IO, the main-thread channel).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Main thread queue closed before the callback ran")]
    MainThreadClosed,

    #[error("No worker pool available: {0}")]
    NoWorkerPool(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
