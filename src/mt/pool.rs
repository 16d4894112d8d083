// src/mt/pool.rs

//! Worker pool abstraction.
//!
//! The manager only needs "run this job somewhere". Production uses the
//! tokio blocking pool; tests plug in a queue they drive by hand.

use tokio::runtime::Handle as RuntimeHandle;

use crate::errors::{Result, SchedulerError};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait WorkerPool: Send + Sync {
    /// Queue `job` for execution. A pool that discards the job must drop it.
    fn spawn(&self, job: Job);

    fn name(&self) -> &'static str {
        "pool"
    }
}

/// Runs jobs on tokio's blocking thread pool.
///
/// Payloads are synchronous and may block, so they go through
/// `spawn_blocking` rather than the async workers.
#[derive(Debug, Clone)]
pub struct TokioPool {
    handle: RuntimeHandle,
}

impl TokioPool {
    pub fn new(handle: RuntimeHandle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime of the calling context.
    pub fn current() -> Result<Self> {
        RuntimeHandle::try_current()
            .map(Self::new)
            .map_err(|e| SchedulerError::NoWorkerPool(e.to_string()))
    }
}

impl WorkerPool for TokioPool {
    fn spawn(&self, job: Job) {
        // Detached: completion is reported through the task lifecycle.
        drop(self.handle.spawn_blocking(job));
    }

    fn name(&self) -> &'static str {
        "tokio-blocking"
    }
}

/// Runs every job immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlinePool;

impl WorkerPool for InlinePool {
    fn spawn(&self, job: Job) {
        job();
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}
