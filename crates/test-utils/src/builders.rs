#![allow(dead_code)]

use std::sync::Arc;

use scopetree::config::SchedulerConfig;
use scopetree::mt::{InlinePool, TaskManager};

use crate::{ManualPool, RecordingContext};

/// A manager together with the context and pool it was built from.
///
/// The fixture owns the context: dropping it makes the manager unavailable.
pub struct ManagerFixture<P> {
    pub context: Arc<RecordingContext>,
    pub pool: Arc<P>,
    pub manager: Arc<TaskManager>,
}

/// Manager whose tasks only run when the test drives the [`ManualPool`].
pub fn manual_manager(config: SchedulerConfig) -> ManagerFixture<ManualPool> {
    let context = RecordingContext::new();
    let pool = ManualPool::new();
    let manager = TaskManager::new(&context, pool.clone(), config);
    ManagerFixture {
        context,
        pool,
        manager,
    }
}

/// Manager that runs every dispatched task immediately on the caller.
pub fn inline_manager(config: SchedulerConfig) -> ManagerFixture<InlinePool> {
    let context = RecordingContext::new();
    let pool = Arc::new(InlinePool);
    let manager = TaskManager::new(&context, pool.clone(), config);
    ManagerFixture {
        context,
        pool,
        manager,
    }
}

/// Default tunables with a custom sequential-fallback threshold.
pub fn config_with_threshold(threshold: usize) -> SchedulerConfig {
    SchedulerConfig::default().with_small_batch_threshold(threshold)
}
