// src/mt/task.rs

//! Leaf units of work.
//!
//! A [`Task`] is the payload; a [`TaskHandle`] wraps it with lifecycle state
//! so a group can track it. Payloads receive a [`TaskContext`] giving access
//! to the manager, the owning group and cooperative cancellation.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::mt::group::Group;
use crate::mt::handle::{Handle, HandleCore, HandleState};
use crate::mt::manager::TaskManager;

/// Work executed on a worker thread.
///
/// Long-running payloads should poll [`TaskContext::is_cancelled`] and return
/// early once it flips.
pub trait Task: Send + Sync + 'static {
    fn name(&self) -> &str {
        "task"
    }

    fn execute(&self, cx: &TaskContext<'_>);
}

/// Adapter turning a closure into a [`Task`].
pub struct FnTask<F> {
    name: &'static str,
    f: F,
}

impl<F> FnTask<F>
where
    F: Fn(&TaskContext<'_>) + Send + Sync + 'static,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn(&TaskContext<'_>) + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn execute(&self, cx: &TaskContext<'_>) {
        (self.f)(cx)
    }
}

/// Lifecycle wrapper around one task payload.
pub struct TaskHandle {
    core: HandleCore,
    payload: Box<dyn Task>,
}

impl TaskHandle {
    pub fn new(task: impl Task) -> Arc<Self> {
        Arc::new(Self {
            core: HandleCore::new(),
            payload: Box::new(task),
        })
    }

    pub fn from_fn<F>(name: &'static str, f: F) -> Arc<Self>
    where
        F: Fn(&TaskContext<'_>) + Send + Sync + 'static,
    {
        Self::new(FnTask::new(name, f))
    }

    /// Run the payload under the task lifecycle.
    ///
    /// The handle always ends up `Ended`: cancelled when the manager is
    /// gone or refuses work, completed once the payload returns.
    pub(crate) fn run(self: &Arc<Self>, manager: &Arc<TaskManager>) {
        let _complete = CompleteOnDrop(self.as_ref());

        if !manager.is_available() {
            trace!(task = %self.label(), "manager unavailable, cancelling task");
            self.cancel();
            return;
        }
        if !self.start() {
            return;
        }

        let cx = TaskContext {
            manager,
            handle: self,
        };
        self.payload.execute(&cx);
    }
}

impl Handle for TaskHandle {
    fn core(&self) -> &HandleCore {
        &self.core
    }

    fn label(&self) -> &str {
        self.payload.name()
    }
}

impl Drop for TaskHandle {
    // A task dropped before running (e.g. its job was discarded by the pool)
    // still has to report to its group.
    fn drop(&mut self) {
        if self.core.state() != HandleState::Ended {
            self.cancel();
            self.complete();
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.payload.name())
            .field("core", &self.core)
            .finish()
    }
}

struct CompleteOnDrop<'a>(&'a TaskHandle);

impl Drop for CompleteOnDrop<'_> {
    fn drop(&mut self) {
        self.0.complete();
    }
}

/// What a running payload can see.
pub struct TaskContext<'a> {
    manager: &'a Arc<TaskManager>,
    handle: &'a Arc<TaskHandle>,
}

impl<'a> TaskContext<'a> {
    pub fn manager(&self) -> &'a Arc<TaskManager> {
        self.manager
    }

    pub fn handle(&self) -> &'a Arc<TaskHandle> {
        self.handle
    }

    pub fn index(&self) -> Option<usize> {
        self.handle.index()
    }

    pub fn group(&self) -> Option<Arc<dyn Group>> {
        self.handle.group()
    }

    /// The task, its group, or the manager has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
            || self.group().is_some_and(|group| group.is_cancelled())
            || !self.manager.is_available()
    }

    /// Launch a follow-up task into this task's group, or into the manager
    /// when the task has no group.
    pub fn launch(&self, task: Arc<TaskHandle>) -> bool {
        match self.group() {
            Some(group) => group.launch(task),
            None => self.manager.launch(task),
        }
    }
}
