// src/mt/main_thread.rs

//! Main-thread dispatch.
//!
//! Some work must run on the coordinating thread. Workers post closures to a
//! [`MainThreadQueue`]; the coordinator drains it with
//! [`MainThreadQueue::pump`], giving each drained batch a shared
//! [`TickBudget`]. Long loops run as [`MainThreadAction`]s that yield when
//! the budget runs out and resume on the next pump.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::errors::{Result, SchedulerError};
use crate::mt::group::{CompletionCallback, Group};
use crate::mt::handle::{
    EndOutcome, Handle, HandleCore, HandleState, base_cancel, base_on_end, base_start,
};
use crate::mt::lock;
use crate::mt::scope::Scope;

type MainThreadJob = Box<dyn FnOnce(&TickBudget) + Send + 'static>;

/// Deadline shared by everything run during one pump.
#[derive(Debug, Clone, Copy)]
pub struct TickBudget {
    deadline: Instant,
}

impl TickBudget {
    pub fn new(slice: Duration) -> Self {
        Self {
            deadline: Instant::now() + slice,
        }
    }

    pub fn should_stop(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Queue of closures bound to the thread that created it.
pub struct MainThreadQueue {
    owner: ThreadId,
    time_slice: Duration,
    tx: mpsc::UnboundedSender<MainThreadJob>,
    rx: Mutex<mpsc::UnboundedReceiver<MainThreadJob>>,
}

impl MainThreadQueue {
    /// Create a queue owned by the calling thread.
    pub fn new(time_slice: Duration) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            owner: thread::current().id(),
            time_slice,
            tx,
            rx: Mutex::new(rx),
        })
    }

    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn time_slice(&self) -> Duration {
        self.time_slice
    }

    /// Queue a budget-aware job for the next pump.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce(&TickBudget) + Send + 'static,
    {
        if self.tx.send(Box::new(job)).is_err() {
            warn!("main thread queue closed, dropping job");
        }
    }

    /// Queue `f` for the next pump.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(move |_| f());
    }

    /// Run `f` on the main thread and block until it returns.
    ///
    /// Runs inline when already on the main thread. Must be called from a
    /// blocking context (a worker task or a plain thread), never from async
    /// code, and someone has to keep pumping or this never returns.
    pub fn execute_and_wait<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_main_thread() {
            return Ok(f());
        }

        let (tx, rx) = oneshot::channel();
        self.post(move |_| {
            let _ = tx.send(f());
        });
        rx.blocking_recv()
            .map_err(|_| SchedulerError::MainThreadClosed)
    }

    /// Run everything queued so far. Jobs posted while pumping wait for the
    /// next call. Returns how many jobs ran.
    pub fn pump(&self) -> usize {
        debug_assert!(
            self.is_main_thread(),
            "MainThreadQueue::pump called off the main thread"
        );

        let jobs: Vec<MainThreadJob> = {
            let mut rx = lock(&self.rx);
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        if jobs.is_empty() {
            return 0;
        }

        let budget = TickBudget::new(self.time_slice);
        let ran = jobs.len();
        for job in jobs {
            job(&budget);
        }
        trace!(ran, "main thread pump");
        ran
    }
}

impl fmt::Debug for MainThreadQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainThreadQueue")
            .field("owner", &self.owner)
            .field("time_slice", &self.time_slice)
            .finish()
    }
}

/// Run `f` on the main thread while holding a token on `parent`, so the
/// group stays open until the callback has run.
///
/// Runs inline when already on the main thread. The callback is skipped if
/// `parent` was cancelled in the meantime. Returns `false` when `parent`
/// refused the token.
pub fn execute_on_main_thread<F>(parent: &dyn Group, f: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    let Some(manager) = parent.manager() else {
        return false;
    };
    let queue = manager.main_thread();
    if queue.is_main_thread() {
        f();
        return true;
    }

    let Some(token) = parent.try_create_token("ExecuteOnMainThread") else {
        return false;
    };
    queue.post(move |_| {
        if token.is_group_available() {
            f();
        }
        token.release();
    });
    true
}

/// Budgeted work driven by a [`MainThreadAction`].
pub trait MainThreadWork: Send + 'static {
    /// Do as much as the budget allows. Return `true` once finished.
    fn execute(&mut self, budget: &TickBudget) -> bool;
}

struct OnceWork<F>(Option<F>);

impl<F: FnOnce() + Send + 'static> MainThreadWork for OnceWork<F> {
    fn execute(&mut self, _budget: &TickBudget) -> bool {
        if let Some(f) = self.0.take() {
            f();
        }
        true
    }
}

/// Iterates `[0, n)` on the main thread, yielding whenever the budget runs
/// out and resuming where it left off.
pub struct TimeSlicedLoop<F> {
    scope: Scope,
    callback: F,
}

impl<F> TimeSlicedLoop<F>
where
    F: FnMut(usize, &Scope) + Send + 'static,
{
    pub fn new(num_iterations: usize, callback: F) -> Self {
        Self {
            scope: Scope::new(0, num_iterations, 0),
            callback,
        }
    }
}

impl<F> MainThreadWork for TimeSlicedLoop<F>
where
    F: FnMut(usize, &Scope) + Send + 'static,
{
    fn execute(&mut self, budget: &TickBudget) -> bool {
        if !self.scope.is_valid() {
            return true;
        }

        for index in self.scope.indices() {
            (self.callback)(index, &self.scope);
            if budget.should_stop() {
                let next = index + 1;
                if next >= self.scope.end {
                    return true;
                }
                self.scope = Scope::new(next, self.scope.end - next, self.scope.loop_index + 1);
                return false;
            }
        }
        true
    }
}

/// A handle whose work runs on the main thread, one budgeted slice per pump.
pub struct MainThreadAction {
    core: HandleCore,
    label: String,
    this: Weak<MainThreadAction>,
    queue: Weak<MainThreadQueue>,
    work: Mutex<Box<dyn MainThreadWork>>,
    on_complete: Mutex<Option<CompletionCallback>>,
}

impl MainThreadAction {
    pub fn new(label: &str, queue: &Arc<MainThreadQueue>, work: impl MainThreadWork) -> Arc<Self> {
        let queue = Arc::downgrade(queue);
        Arc::new_cyclic(|this| Self {
            core: HandleCore::new(),
            label: label.to_string(),
            this: this.clone(),
            queue,
            work: Mutex::new(Box::new(work)),
            on_complete: Mutex::new(None),
        })
    }

    /// Run `f` once on the main thread.
    pub fn once<F>(label: &str, queue: &Arc<MainThreadQueue>, f: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(label, queue, OnceWork(Some(f)))
    }

    /// Run `f` for every index in `[0, num_iterations)` across as many pumps
    /// as the time slice requires.
    pub fn time_sliced<F>(
        label: &str,
        queue: &Arc<MainThreadQueue>,
        num_iterations: usize,
        f: F,
    ) -> Arc<Self>
    where
        F: FnMut(usize, &Scope) + Send + 'static,
    {
        Self::new(label, queue, TimeSlicedLoop::new(num_iterations, f))
    }

    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(EndOutcome) + Send + 'static,
    {
        *lock(&self.on_complete) = Some(Box::new(f));
    }

    fn schedule(&self) {
        let (Some(this), Some(queue)) = (self.this.upgrade(), self.queue.upgrade()) else {
            debug!(action = %self.label, "main thread queue gone, cancelling action");
            self.cancel();
            return;
        };
        queue.post(move |budget| this.tick(budget));
    }

    fn tick(&self, budget: &TickBudget) {
        if self.is_cancelled() || self.state() != HandleState::Running {
            self.complete();
            return;
        }
        if self.group().is_some_and(|group| !group.is_available()) {
            self.cancel();
            return;
        }

        let done = lock(&self.work).execute(budget);
        if done {
            self.complete();
        } else {
            trace!(action = %self.label, "main thread action yielded");
            self.schedule();
        }
    }
}

impl Handle for MainThreadAction {
    fn core(&self) -> &HandleCore {
        &self.core
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn start(&self) -> bool {
        if !base_start(self) {
            return false;
        }
        self.schedule();
        true
    }

    // A running action ends as soon as it is cancelled rather than on its
    // next slice.
    fn cancel(&self) {
        base_cancel(self);
        self.complete();
    }

    fn on_end(&self, was_cancelled: bool) {
        let callback = lock(&self.on_complete).take();
        if let Some(callback) = callback {
            callback(EndOutcome::from_cancelled(was_cancelled));
        }
        base_on_end(self, was_cancelled);
    }
}

impl Drop for MainThreadAction {
    fn drop(&mut self) {
        if self.core.state() != HandleState::Ended {
            self.cancel();
        }
    }
}

impl fmt::Debug for MainThreadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainThreadAction")
            .field("label", &self.label)
            .field("core", &self.core)
            .finish()
    }
}
