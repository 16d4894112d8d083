// src/mt/mod.rs

//! Hierarchical task/group scheduler.
//!
//! - [`scope`] splits iteration counts into index ranges.
//! - [`handle`] holds the Idle → Running → Ended state machine shared by
//!   every schedulable unit.
//! - [`group`] tracks expected/started/completed children and fires
//!   completion exactly once.
//! - [`token`] provides manual completion tickets for non-task work.
//! - [`task`] defines the payload contract and the leaf handle.
//! - [`task_group`] fans iteration ranges and callback batches out as tasks.
//! - [`manager`] is the root group bound to one execution context.
//! - [`pool`] abstracts the worker pool tasks are dispatched to.
//! - [`main_thread`] runs callbacks on the coordinating thread.

pub mod group;
pub mod handle;
pub mod main_thread;
pub mod manager;
pub mod pool;
pub mod scope;
pub mod task;
pub mod task_group;
pub mod token;

pub use group::{CompletionCallback, Group, GroupCore, GroupCounts, RegistrationGuard};
pub use handle::{EndOutcome, Handle, HandleCore, HandleState};
pub use main_thread::{
    MainThreadAction, MainThreadQueue, MainThreadWork, TickBudget, TimeSlicedLoop,
    execute_on_main_thread,
};
pub use manager::{ExecutionContext, TaskManager};
pub use pool::{InlinePool, Job, TokioPool, WorkerPool};
pub use scope::{Scope, sanitized_batch_size, split_iterations, sub_loop_scopes};
pub use task::{FnTask, Task, TaskContext, TaskHandle};
pub use task_group::TaskGroup;
pub use token::{AsyncToken, SchedulingScope};

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// A panicking payload must not wedge the scheduler, so poisoned locks are
// recovered rather than propagated.

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
