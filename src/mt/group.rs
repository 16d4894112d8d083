// src/mt/group.rs

//! Completion tracking for handles that own children.
//!
//! A group counts how many children it expects, how many started and how
//! many completed. It ends once `completed >= expected` while no
//! registration is in flight. Registrations are bracketed by a
//! [`RegistrationGuard`] so a child finishing mid-batch cannot end the group
//! before the rest of the batch is accounted for.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread;

use tracing::{debug, error, trace};

use crate::mt::handle::{EndOutcome, Handle, HandleState, base_on_end};
use crate::mt::task::TaskHandle;
use crate::mt::token::AsyncToken;
use crate::mt::{lock, read, write};

/// Invoked once when a group ends, with the reason it ended.
pub type CompletionCallback = Box<dyn FnOnce(EndOutcome) + Send + 'static>;

/// Snapshot of a group's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupCounts {
    pub expected: usize,
    pub started: usize,
    pub completed: usize,
    pub pending_registrations: usize,
}

/// Bookkeeping embedded in every group implementation.
pub struct GroupCore {
    name: String,
    registry: RwLock<Vec<Weak<dyn Handle>>>,
    tokens: RwLock<Vec<Weak<AsyncToken>>>,
    pending_registrations: AtomicUsize,
    expected: AtomicUsize,
    started: AtomicUsize,
    completed: AtomicUsize,
    // Set while one thread decides whether the group has ended.
    sealing: AtomicBool,
    on_complete: Mutex<Option<CompletionCallback>>,
}

impl GroupCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: RwLock::new(Vec::new()),
            tokens: RwLock::new(Vec::new()),
            pending_registrations: AtomicUsize::new(0),
            expected: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            sealing: AtomicBool::new(false),
            on_complete: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn counts(&self) -> GroupCounts {
        GroupCounts {
            expected: self.expected.load(Ordering::SeqCst),
            started: self.started.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            pending_registrations: self.pending_registrations.load(Ordering::SeqCst),
        }
    }

    /// Number of live entries in the registry.
    pub fn live_children(&self) -> usize {
        read(&self.registry)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub(crate) fn set_on_complete(&self, callback: CompletionCallback) {
        *lock(&self.on_complete) = Some(callback);
    }

    pub(crate) fn take_on_complete(&self) -> Option<CompletionCallback> {
        lock(&self.on_complete).take()
    }

    pub(crate) fn take_registry(&self) -> Vec<Weak<dyn Handle>> {
        std::mem::take(&mut *write(&self.registry))
    }

    /// Tokens issued by this group that are still held and unreleased.
    pub fn outstanding_tokens(&self) -> usize {
        read(&self.tokens)
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|token| !token.is_released())
            .count()
    }

    pub(crate) fn take_tokens(&self) -> Vec<Weak<AsyncToken>> {
        std::mem::take(&mut *write(&self.tokens))
    }

    pub(crate) fn reset_counters(&self) {
        self.expected.store(0, Ordering::SeqCst);
        self.started.store(0, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
    }

    fn rollback_expected(&self, count: usize) {
        self.expected.fetch_sub(count, Ordering::SeqCst);
    }

    fn try_seal(&self) -> bool {
        self.sealing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn unseal(&self) {
        self.sealing.store(false, Ordering::SeqCst);
    }

    /// Wait out a completion decision that may not have seen our pending
    /// registration.
    fn wait_unsealed(&self) {
        while self.sealing.load(Ordering::SeqCst) {
            thread::yield_now();
        }
    }

    /// Counters say the group is finished. Over-completion is reported here.
    fn counters_done(&self, label: &str, allow_empty: bool) -> bool {
        if self.pending_registrations.load(Ordering::SeqCst) > 0 {
            return false;
        }
        let expected = self.expected.load(Ordering::SeqCst);
        let completed = self.completed.load(Ordering::SeqCst);
        if completed > expected {
            error!(group = %label, expected, completed, "group completed more children than expected");
            debug_assert!(
                completed <= expected,
                "group `{label}` over-completed: {completed}/{expected}"
            );
        }
        completed >= expected && (expected > 0 || allow_empty)
    }
}

impl fmt::Debug for GroupCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupCore")
            .field("name", &self.name)
            .field("counts", &self.counts())
            .finish()
    }
}

/// Marks a registration as in flight for as long as it is alive.
///
/// While any guard exists the group cannot end. Dropping the last guard
/// re-checks completion.
pub struct RegistrationGuard<'a, G: Group + ?Sized> {
    group: &'a G,
}

impl<'a, G: Group + ?Sized> RegistrationGuard<'a, G> {
    pub fn new(group: &'a G) -> Self {
        let core = group.group_core();
        core.pending_registrations.fetch_add(1, Ordering::SeqCst);
        core.wait_unsealed();
        Self { group }
    }
}

impl<G: Group + ?Sized> Drop for RegistrationGuard<'_, G> {
    fn drop(&mut self) {
        let previous = self
            .group
            .group_core()
            .pending_registrations
            .fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.group.check_completion();
        }
    }
}

/// A handle that owns children and ends once they all have.
pub trait Group: Handle {
    fn group_core(&self) -> &GroupCore;

    /// Weak reference to this group, handed to children as their owner.
    fn this(&self) -> Weak<dyn Group>;

    fn counts(&self) -> GroupCounts {
        self.group_core().counts()
    }

    fn is_done(&self) -> bool {
        self.state() == HandleState::Ended
    }

    /// Not cancelled, not ended, and the manager still accepts work.
    fn is_available(&self) -> bool {
        if self.is_cancelled() || self.state() == HandleState::Ended {
            return false;
        }
        self.manager().is_some_and(|manager| manager.is_available())
    }

    fn can_schedule_work(&self) -> bool {
        self.is_available()
    }

    /// Announce `count` more children. Refused when unavailable.
    fn register_expected(&self, count: usize) -> bool {
        if !self.is_available() {
            return false;
        }
        let total = self
            .group_core()
            .expected
            .fetch_add(count, Ordering::SeqCst)
            + count;
        trace!(group = %self.label(), count, total, "registered expected children");
        true
    }

    fn notify_started(&self) {
        self.group_core().started.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_completed(&self) {
        self.group_core().completed.fetch_add(1, Ordering::SeqCst);
        self.check_completion();
    }

    fn check_completion(&self) {
        self.try_finish(false);
    }

    /// End the group if every expected child completed and no registration
    /// is in flight. `allow_empty` lets a group with zero children end.
    ///
    /// The decision is made under a seal: counters are read again after the
    /// seal is taken, and a registration started before that re-read is
    /// either seen here or waits for the seal and then sees `Ended`.
    fn try_finish(&self, allow_empty: bool) {
        let core = self.group_core();
        loop {
            if self.state() == HandleState::Ended
                || !core.counters_done(self.label(), allow_empty)
            {
                return;
            }
            if !core.try_seal() {
                // The sealing thread re-reads the counters itself.
                return;
            }

            let done = core.counters_done(self.label(), allow_empty);
            let ended = done
                && self
                    .core()
                    .try_transition(HandleState::Running, HandleState::Ended);
            core.unseal();

            if ended {
                let counts = core.counts();
                debug!(
                    group = %self.label(),
                    expected = counts.expected,
                    completed = counts.completed,
                    cancelled = self.is_cancelled(),
                    "group ended"
                );
                self.on_end(self.is_cancelled());
                return;
            }
            if done {
                return;
            }
        }
    }

    fn set_on_complete(&self, callback: CompletionCallback) {
        self.group_core().set_on_complete(callback);
    }

    /// Register an externally built handle as a child.
    ///
    /// The handle must not already belong to a group. It is counted as
    /// expected but not started; the caller starts it.
    fn adopt(&self, handle: Weak<dyn Handle>) -> bool {
        let Some(strong) = handle.upgrade() else {
            return false;
        };

        let _guard = RegistrationGuard::new(self);
        if !self.register_expected(1) {
            return false;
        }

        let core = strong.core();
        if !core.attach(self.this()) {
            error!(group = %self.label(), handle = %strong.label(), "handle already belongs to a group");
            self.group_core().rollback_expected(1);
            return false;
        }

        let mut registry = write(&self.group_core().registry);
        core.set_index(registry.len());
        registry.push(handle);
        true
    }

    /// Register and dispatch a batch of tasks.
    ///
    /// Returns how many were dispatched. An empty batch lets the group end.
    fn start_tasks_batch(&self, tasks: Vec<Arc<TaskHandle>>) -> usize {
        if !self.can_schedule_work() {
            return 0;
        }
        if tasks.is_empty() {
            self.try_finish(true);
            return 0;
        }
        let Some(manager) = self.manager() else {
            return 0;
        };

        let accepted = register_batch(self, tasks);
        let dispatched = accepted.len();
        for task in accepted {
            manager.dispatch(task);
        }
        dispatched
    }

    /// Register and dispatch a single task.
    fn launch(&self, task: Arc<TaskHandle>) -> bool {
        self.start_tasks_batch(vec![task]) == 1
    }

    /// Build up to `count` tasks with `factory` and dispatch them as one
    /// batch. `None` from the factory skips that index.
    fn launch_many(
        &self,
        count: usize,
        factory: &mut dyn FnMut(usize) -> Option<Arc<TaskHandle>>,
    ) -> usize {
        if !self.can_schedule_work() {
            return 0;
        }
        let tasks: Vec<_> = (0..count).filter_map(|idx| factory(idx)).collect();
        self.start_tasks_batch(tasks)
    }

    /// Create a manual completion ticket. The group cannot end until the
    /// token is released.
    fn try_create_token(&self, name: &str) -> Option<Arc<AsyncToken>> {
        if !self.can_schedule_work() {
            return None;
        }

        let _guard = RegistrationGuard::new(self);
        if !self.register_expected(1) {
            return None;
        }
        self.notify_started();

        let token = Arc::new(AsyncToken::new(name, self.this()));
        write(&self.group_core().tokens).push(Arc::downgrade(&token));
        trace!(group = %self.label(), token = name, "token created");
        Some(token)
    }

    /// Drop the registry and the token list, optionally cancelling every
    /// child that is still alive.
    fn clear_registry(&self, cancel_children: bool) {
        clear_group_registry(self, cancel_children);
    }
}

/// Attach and index each task under the registration guard.
///
/// Tasks that already belong to another group are rejected and left out of
/// the returned list.
pub(crate) fn register_batch<G: Group + ?Sized>(
    group: &G,
    tasks: Vec<Arc<TaskHandle>>,
) -> Vec<Arc<TaskHandle>> {
    let _guard = RegistrationGuard::new(group);
    if !group.register_expected(tasks.len()) {
        return Vec::new();
    }

    let owner = group.this();
    let mut accepted = Vec::with_capacity(tasks.len());
    let mut rejected = 0;
    {
        let mut registry = write(&group.group_core().registry);
        for task in tasks {
            if !task.core().attach(owner.clone()) {
                rejected += 1;
                continue;
            }
            task.core().set_index(registry.len());
            let weak = Arc::downgrade(&task) as Weak<dyn Handle>;
            registry.push(weak);
            accepted.push(task);
        }
    }

    if rejected > 0 {
        error!(group = %group.label(), rejected, "tasks already owned by another group were skipped");
        group.group_core().rollback_expected(rejected);
    }
    accepted
}

pub(crate) fn clear_group_registry<G: Group + ?Sized>(group: &G, cancel_children: bool) {
    let core = group.group_core();
    let tokens = core.take_tokens();
    let children = core.take_registry();

    if cancel_children {
        let live: Vec<_> = children
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|child| child.state() != HandleState::Ended)
            .collect();
        trace!(group = %group.label(), live = live.len(), "cancelling children");
        for child in live {
            child.cancel();
        }
    }

    // Held tokens still count until their holders release or drop them.
    let held = tokens
        .iter()
        .filter_map(Weak::upgrade)
        .filter(|token| !token.is_released())
        .count();
    if held > 0 {
        trace!(group = %group.label(), held, "tokens still outstanding");
    }
}

/// Shared cancel behaviour for groups.
pub fn cancel_group<G: Group + ?Sized>(group: &G) {
    if !group.core().mark_cancelled() {
        return;
    }

    debug!(group = %group.label(), counts = ?group.counts(), "cancelling group");
    group.clear_registry(true);

    if group
        .core()
        .try_transition(HandleState::Idle, HandleState::Ended)
    {
        group.on_end(true);
    } else {
        group.try_finish(true);
    }
}

/// Shared end behaviour for groups: clean up, run the completion callback,
/// then tell the owner.
pub fn group_on_end<G: Group + ?Sized>(group: &G, was_cancelled: bool) {
    group.clear_registry(false);
    if let Some(callback) = group.group_core().take_on_complete() {
        callback(EndOutcome::from_cancelled(was_cancelled));
    }
    base_on_end(group, was_cancelled);
}
