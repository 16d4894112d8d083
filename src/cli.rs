// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `scopetree`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scopetree",
    version,
    about = "Drive a sample workload through the hierarchical task scheduler.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Scopetree.toml` in the current working directory if it
    /// exists, otherwise built-in defaults.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Number of iterations in the parallel loop.
    #[arg(long, value_name = "N", default_value_t = 100_000)]
    pub iterations: usize,

    /// Scope width for the parallel loop (0 = configured default).
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub chunk_size: usize,

    /// Run every scope in order on the calling thread.
    #[arg(long)]
    pub single_threaded: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SCOPETREE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load config, print the scope plan, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
