// src/mt/task_group.rs

//! Groups that fan work out as tasks.
//!
//! A [`TaskGroup`] splits an iteration count into scopes and launches one
//! task per scope, or runs a batch of one-shot callbacks. Its completion
//! callback fires once, after every scope task and every nested child ended.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::{debug, trace, warn};

use crate::mt::group::{Group, GroupCore, cancel_group, group_on_end, register_batch};
use crate::mt::handle::{EndOutcome, Handle, HandleCore};
use crate::mt::manager::TaskManager;
use crate::mt::scope::{Scope, split_iterations};
use crate::mt::task::{Task, TaskContext, TaskHandle};
use crate::mt::{lock, read, write};

type IterationCallback = Arc<dyn Fn(usize, &Scope) + Send + Sync>;
type PrepareSubLoopsCallback = Arc<dyn Fn(&[Scope]) + Send + Sync>;
type SubLoopStartCallback = Arc<dyn Fn(&Scope) + Send + Sync>;
type SimpleCallback = Box<dyn FnOnce() + Send>;

pub struct TaskGroup {
    core: HandleCore,
    group: GroupCore,
    this: Weak<TaskGroup>,
    manager: Weak<TaskManager>,
    on_iteration: RwLock<Option<IterationCallback>>,
    on_prepare_sub_loops: RwLock<Option<PrepareSubLoopsCallback>>,
    on_sub_loop_start: RwLock<Option<SubLoopStartCallback>>,
    simple_callbacks: Mutex<Vec<SimpleCallback>>,
}

impl TaskGroup {
    pub(crate) fn new(name: &str, manager: Weak<TaskManager>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core: HandleCore::new(),
            group: GroupCore::new(name),
            this: this.clone(),
            manager,
            on_iteration: RwLock::new(None),
            on_prepare_sub_loops: RwLock::new(None),
            on_sub_loop_start: RwLock::new(None),
            simple_callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        self.group.name()
    }

    /// Called once per index, with the scope the index belongs to.
    pub fn on_iteration<F>(&self, f: F)
    where
        F: Fn(usize, &Scope) + Send + Sync + 'static,
    {
        *write(&self.on_iteration) = Some(Arc::new(f));
    }

    /// Called once with every scope, before any scope task is dispatched.
    pub fn on_prepare_sub_loops<F>(&self, f: F)
    where
        F: Fn(&[Scope]) + Send + Sync + 'static,
    {
        *write(&self.on_prepare_sub_loops) = Some(Arc::new(f));
    }

    /// Called at the start of each scope task, before its iterations.
    pub fn on_sub_loop_start<F>(&self, f: F)
    where
        F: Fn(&Scope) + Send + Sync + 'static,
    {
        *write(&self.on_sub_loop_start) = Some(Arc::new(f));
    }

    /// Called once when the group ends.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(EndOutcome) + Send + 'static,
    {
        self.group.set_on_complete(Box::new(f));
    }

    /// Split `num_iterations` into scopes and run one task per scope.
    ///
    /// - `chunk_size == 0` uses the configured default.
    /// - `force_single_threaded` runs every scope in order on the calling
    ///   thread before returning.
    /// - `preparation_only` invokes only the sub-loop-start callback per
    ///   scope, skipping per-index iteration.
    ///
    /// Zero iterations end the group immediately. Returns `false` when the
    /// group refused the work.
    pub fn start_iterations(
        &self,
        num_iterations: usize,
        chunk_size: usize,
        force_single_threaded: bool,
        preparation_only: bool,
    ) -> bool {
        if !self.is_available() {
            debug!(group = %self.name(), "start_iterations refused, group unavailable");
            return false;
        }
        if !preparation_only && read(&self.on_iteration).is_none() {
            warn!(group = %self.name(), "start_iterations called without an iteration callback");
            return false;
        }
        if num_iterations == 0 {
            trace!(group = %self.name(), "no iterations, ending group");
            self.try_finish(true);
            return true;
        }
        let Some(manager) = self.manager.upgrade() else {
            return false;
        };

        let scopes = split_iterations(num_iterations, chunk_size, manager.config());
        debug!(
            group = %self.name(),
            num_iterations,
            scopes = scopes.len(),
            force_single_threaded,
            preparation_only,
            "starting iterations"
        );
        self.prepare_sub_loops(&scopes);

        let tasks = self.scope_tasks(&scopes, preparation_only);
        if force_single_threaded {
            let accepted = register_batch(self, tasks);
            let ran = accepted.len();
            for task in &accepted {
                manager.run_inline(task);
            }
            ran > 0
        } else {
            self.start_tasks_batch(tasks) > 0
        }
    }

    /// Like [`start_iterations`](Self::start_iterations) in preparation-only
    /// mode: one sub-loop-start call per scope, no per-index work.
    pub fn start_sub_loops(
        &self,
        num_iterations: usize,
        chunk_size: usize,
        force_single_threaded: bool,
    ) -> bool {
        self.start_iterations(num_iterations, chunk_size, force_single_threaded, true)
    }

    /// Split `num_iterations` and dispatch one task built by `factory` per
    /// scope. Returns the number of tasks dispatched.
    pub fn start_ranges<T, F>(&self, num_iterations: usize, chunk_size: usize, mut factory: F) -> usize
    where
        T: Task,
        F: FnMut(Scope) -> T,
    {
        if !self.is_available() {
            return 0;
        }
        let Some(manager) = self.manager.upgrade() else {
            return 0;
        };

        let scopes = split_iterations(num_iterations, chunk_size, manager.config());
        self.prepare_sub_loops(&scopes);
        let tasks = scopes
            .into_iter()
            .map(|scope| TaskHandle::new(factory(scope)))
            .collect();
        self.start_tasks_batch(tasks)
    }

    /// Queue a one-shot callback for [`start_simple_callbacks`](Self::start_simple_callbacks).
    pub fn add_simple_callback<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        lock(&self.simple_callbacks).push(Box::new(f));
    }

    /// Dispatch every queued callback as its own task. With nothing queued
    /// the group ends immediately.
    pub fn start_simple_callbacks(&self) -> usize {
        let callbacks = std::mem::take(&mut *lock(&self.simple_callbacks));
        debug!(group = %self.name(), count = callbacks.len(), "starting simple callbacks");

        let tasks = callbacks
            .into_iter()
            .enumerate()
            .map(|(index, callback)| {
                TaskHandle::new(SimpleCallbackTask {
                    index,
                    callback: Mutex::new(Some(callback)),
                })
            })
            .collect();
        self.start_tasks_batch(tasks)
    }

    fn prepare_sub_loops(&self, scopes: &[Scope]) {
        let prepare = read(&self.on_prepare_sub_loops).clone();
        if let Some(prepare) = prepare {
            prepare(scopes);
        }
    }

    fn scope_tasks(&self, scopes: &[Scope], preparation_only: bool) -> Vec<Arc<TaskHandle>> {
        scopes
            .iter()
            .map(|scope| {
                TaskHandle::new(ScopeIterationTask {
                    group: self.this.clone(),
                    scope: *scope,
                    preparation_only,
                })
            })
            .collect()
    }

    fn exec_scope(&self, scope: &Scope, preparation_only: bool) {
        let sub_loop_start = read(&self.on_sub_loop_start).clone();
        if let Some(sub_loop_start) = sub_loop_start {
            sub_loop_start(scope);
        }
        if preparation_only {
            return;
        }

        let Some(on_iteration) = read(&self.on_iteration).clone() else {
            return;
        };
        for index in scope.indices() {
            if self.is_cancelled() {
                trace!(group = %self.name(), loop_index = scope.loop_index, index, "scope interrupted by cancellation");
                return;
            }
            on_iteration(index, scope);
        }
    }
}

impl Handle for TaskGroup {
    fn core(&self) -> &HandleCore {
        &self.core
    }

    fn label(&self) -> &str {
        self.group.name()
    }

    fn manager(&self) -> Option<Arc<TaskManager>> {
        self.manager.upgrade()
    }

    fn cancel(&self) {
        cancel_group(self);
    }

    fn on_end(&self, was_cancelled: bool) {
        group_on_end(self, was_cancelled);
    }
}

impl Group for TaskGroup {
    fn group_core(&self) -> &GroupCore {
        &self.group
    }

    fn this(&self) -> Weak<dyn Group> {
        self.this.clone()
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("core", &self.core)
            .field("group", &self.group)
            .finish()
    }
}

/// One scope of a [`TaskGroup::start_iterations`] call.
struct ScopeIterationTask {
    group: Weak<TaskGroup>,
    scope: Scope,
    preparation_only: bool,
}

impl Task for ScopeIterationTask {
    fn name(&self) -> &str {
        "scope-iteration"
    }

    fn execute(&self, _cx: &TaskContext<'_>) {
        let Some(group) = self.group.upgrade() else {
            return;
        };
        if !group.is_available() {
            return;
        }
        group.exec_scope(&self.scope, self.preparation_only);
    }
}

/// One entry of a [`TaskGroup::start_simple_callbacks`] batch.
struct SimpleCallbackTask {
    index: usize,
    callback: Mutex<Option<SimpleCallback>>,
}

impl Task for SimpleCallbackTask {
    fn name(&self) -> &str {
        "simple-callback"
    }

    fn execute(&self, cx: &TaskContext<'_>) {
        if cx.is_cancelled() {
            trace!(index = self.index, "simple callback skipped, cancelled");
            return;
        }
        let callback = lock(&self.callback).take();
        if let Some(callback) = callback {
            callback();
        }
    }
}
