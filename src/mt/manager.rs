// src/mt/manager.rs

//! Root of the scheduling hierarchy.
//!
//! The [`TaskManager`] is itself a group: every task group, token and
//! registered handle ultimately reports to it. When the last of them ends the
//! manager ends and notifies its [`ExecutionContext`]. Scheduling against an
//! ended manager restarts it for a new run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::mt::group::{Group, GroupCore, clear_group_registry};
use crate::mt::handle::{EndOutcome, Handle, HandleCore, HandleState};
use crate::mt::main_thread::MainThreadQueue;
use crate::mt::pool::WorkerPool;
use crate::mt::task::TaskHandle;
use crate::mt::task_group::TaskGroup;
use crate::mt::{read, write};

/// Receives lifecycle notifications from a [`TaskManager`].
///
/// The manager only holds a weak reference: once the context is dropped the
/// manager stops accepting work.
pub trait ExecutionContext: Send + Sync {
    /// The manager ended, either because all work completed or because it
    /// was cancelled. Called once per run.
    fn on_work_ended(&self, outcome: EndOutcome);

    fn on_work_started(&self) {}
}

pub struct TaskManager {
    core: HandleCore,
    group: GroupCore,
    this: Weak<TaskManager>,
    context: Weak<dyn ExecutionContext>,
    pool: Arc<dyn WorkerPool>,
    config: SchedulerConfig,
    main_thread: Arc<MainThreadQueue>,
    groups: RwLock<Vec<Arc<TaskGroup>>>,
    resetting: AtomicBool,
}

impl TaskManager {
    /// Create a manager bound to `context`.
    ///
    /// The calling thread becomes the main thread for
    /// [`main_thread`](Self::main_thread) dispatch.
    pub fn new<C>(context: &Arc<C>, pool: Arc<dyn WorkerPool>, config: SchedulerConfig) -> Arc<Self>
    where
        C: ExecutionContext + 'static,
    {
        let context = Arc::downgrade(context) as Weak<dyn ExecutionContext>;
        let main_thread = MainThreadQueue::new(config.time_slice());
        debug!(pool = pool.name(), ?config, "task manager created");

        Arc::new_cyclic(|this| Self {
            core: HandleCore::new(),
            group: GroupCore::new("TaskManager"),
            this: this.clone(),
            context,
            pool,
            config,
            main_thread,
            groups: RwLock::new(Vec::new()),
            resetting: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn main_thread(&self) -> &Arc<MainThreadQueue> {
        &self.main_thread
    }

    pub fn pool(&self) -> &Arc<dyn WorkerPool> {
        &self.pool
    }

    pub fn context(&self) -> Option<Arc<dyn ExecutionContext>> {
        self.context.upgrade()
    }

    /// Work has been scheduled and has not yet drained.
    pub fn is_waiting_for_tasks(&self) -> bool {
        self.state() == HandleState::Running
    }

    /// Number of groups created during the current run.
    pub fn group_count(&self) -> usize {
        read(&self.groups).len()
    }

    /// Create a task group owned by `parent`, or by the manager itself.
    ///
    /// The group is started immediately; it ends once the work later handed
    /// to it drains. `None` when scheduling is refused.
    pub fn try_create_task_group(
        &self,
        name: &str,
        parent: Option<&dyn Group>,
    ) -> Option<Arc<TaskGroup>> {
        if !self.can_schedule_work() {
            return None;
        }

        let group = TaskGroup::new(name, self.this.clone());
        let weak = Arc::downgrade(&group) as Weak<dyn Handle>;
        let adopted = match parent {
            Some(parent) => parent.adopt(weak),
            None => self.adopt(weak),
        };
        if !adopted {
            debug!(group = name, "task group refused by its parent");
            return None;
        }

        write(&self.groups).push(Arc::clone(&group));
        if !group.start() {
            return None;
        }
        debug!(group = name, nested = parent.is_some(), "task group created");
        Some(group)
    }

    /// Adopt an externally built handle and start it.
    pub fn try_register_handle<H>(&self, handle: &Arc<H>, parent: Option<&dyn Group>) -> bool
    where
        H: Handle + 'static,
    {
        if !self.can_schedule_work() {
            return false;
        }

        let weak = Arc::downgrade(handle) as Weak<dyn Handle>;
        let adopted = match parent {
            Some(parent) => parent.adopt(weak),
            None => self.adopt(weak),
        };
        adopted && handle.start()
    }

    /// Return an ended manager to `Idle` so it can run again.
    ///
    /// A cancelled manager stays cancelled.
    pub fn reset(&self) {
        if self.is_cancelled() {
            warn!("reset ignored on a cancelled task manager");
            return;
        }
        if self
            .resetting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        drop(self.group.take_tokens());
        drop(self.group.take_registry());
        drop(std::mem::take(&mut *write(&self.groups)));
        self.group.reset_counters();
        self.core.clear_cancelled();
        self.core.force_state(HandleState::Idle);

        self.resetting.store(false, Ordering::Release);
        debug!("task manager reset");
    }

    /// Hand `task` to the worker pool. Cancels it if the manager no longer
    /// accepts work.
    pub(crate) fn dispatch(&self, task: Arc<TaskHandle>) {
        if !self.is_available() {
            task.cancel();
            return;
        }

        let manager = self.this.clone();
        self.pool.spawn(Box::new(move || match manager.upgrade() {
            Some(manager) => task.run(&manager),
            None => task.cancel(),
        }));
    }

    /// Run `task` on the calling thread.
    pub(crate) fn run_inline(&self, task: &Arc<TaskHandle>) {
        match self.this.upgrade() {
            Some(manager) => task.run(&manager),
            None => task.cancel(),
        }
    }
}

impl Handle for TaskManager {
    fn core(&self) -> &HandleCore {
        &self.core
    }

    fn label(&self) -> &str {
        self.group.name()
    }

    fn manager(&self) -> Option<Arc<TaskManager>> {
        self.this.upgrade()
    }

    /// Idempotent: `true` while running, restarts an ended manager.
    fn start(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if self.state() == HandleState::Ended {
            self.reset();
        }

        if self
            .core
            .try_transition(HandleState::Idle, HandleState::Running)
        {
            debug!("task manager started");
            if let Some(context) = self.context() {
                context.on_work_started();
            }
            return true;
        }
        self.state() == HandleState::Running
    }

    fn cancel(&self) {
        if !self.core.mark_cancelled() {
            return;
        }

        info!(counts = ?self.counts(), "cancelling task manager");
        self.clear_registry(true);

        if self
            .core
            .try_transition(HandleState::Idle, HandleState::Ended)
        {
            self.on_end(true);
        } else {
            self.try_finish(true);
        }
    }

    fn on_end(&self, was_cancelled: bool) {
        let outcome = EndOutcome::from_cancelled(was_cancelled);
        debug!(?outcome, "task manager ended");

        self.clear_registry(false);
        if let Some(callback) = self.group.take_on_complete() {
            callback(outcome);
        }
        if let Some(context) = self.context() {
            context.on_work_ended(outcome);
        }
    }
}

impl Group for TaskManager {
    fn group_core(&self) -> &GroupCore {
        &self.group
    }

    fn this(&self) -> Weak<dyn Group> {
        self.this.clone()
    }

    /// The context is alive and the manager was not cancelled.
    fn is_available(&self) -> bool {
        !self.is_cancelled() && self.context.strong_count() > 0
    }

    fn can_schedule_work(&self) -> bool {
        self.start()
    }

    fn clear_registry(&self, cancel_children: bool) {
        let groups = std::mem::take(&mut *write(&self.groups));
        clear_group_registry(self, cancel_children);
        if cancel_children {
            for group in groups.iter().filter(|g| g.state() != HandleState::Ended) {
                group.cancel();
            }
        }
    }
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("core", &self.core)
            .field("group", &self.group)
            .field("pool", &self.pool.name())
            .finish()
    }
}
