// src/mt/handle.rs

//! Base lifecycle shared by every schedulable unit.
//!
//! Every handle moves through `Idle → Running → Ended` (or straight
//! `Idle → Ended` when cancelled before it started). Each transition is a
//! single compare-and-exchange, so the end notification fires exactly once no
//! matter how many threads race to cancel or complete the same handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use tracing::trace;

use crate::mt::group::Group;
use crate::mt::manager::TaskManager;

/// Lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleState {
    Idle = 0,
    Running = 1,
    Ended = 2,
}

impl HandleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => HandleState::Idle,
            1 => HandleState::Running,
            _ => HandleState::Ended,
        }
    }
}

/// Why a handle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    Completed,
    Cancelled,
}

impl EndOutcome {
    pub fn from_cancelled(was_cancelled: bool) -> Self {
        if was_cancelled {
            EndOutcome::Cancelled
        } else {
            EndOutcome::Completed
        }
    }

    pub fn is_cancelled(self) -> bool {
        self == EndOutcome::Cancelled
    }
}

const NO_INDEX: usize = usize::MAX;

/// State embedded in every handle implementation.
pub struct HandleCore {
    state: AtomicU8,
    cancelled: AtomicBool,
    owner: OnceLock<Weak<dyn Group>>,
    index: AtomicUsize,
}

impl HandleCore {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(HandleState::Idle as u8),
            cancelled: AtomicBool::new(false),
            owner: OnceLock::new(),
            index: AtomicUsize::new(NO_INDEX),
        }
    }

    pub fn state(&self) -> HandleState {
        HandleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Position in the owning group's registry, once registered.
    pub fn index(&self) -> Option<usize> {
        match self.index.load(Ordering::Acquire) {
            NO_INDEX => None,
            idx => Some(idx),
        }
    }

    pub(crate) fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Release);
    }

    /// The owning group, if it was set and is still alive.
    pub fn owner(&self) -> Option<Arc<dyn Group>> {
        self.owner.get().and_then(Weak::upgrade)
    }

    pub fn has_owner(&self) -> bool {
        self.owner.get().is_some()
    }

    /// Bind this handle to its owning group. A handle has at most one owner.
    pub(crate) fn attach(&self, owner: Weak<dyn Group>) -> bool {
        self.owner.set(owner).is_ok()
    }

    /// Single atomic state transition; `false` if the state already moved.
    pub(crate) fn try_transition(&self, from: HandleState, to: HandleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn force_state(&self, state: HandleState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Raise the cancellation flag; `true` only for the first caller.
    pub(crate) fn mark_cancelled(&self) -> bool {
        self.cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn clear_cancelled(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

impl Default for HandleCore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandleCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleCore")
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .field("index", &self.index())
            .field("has_owner", &self.has_owner())
            .finish()
    }
}

/// A schedulable unit: single task, group or main-thread action.
///
/// `start`, `cancel`, `complete` and `on_end` are overridable; their shared
/// behaviour lives in [`base_start`], [`base_cancel`], [`base_complete`] and
/// [`base_on_end`] so overrides can delegate to it.
pub trait Handle: Send + Sync {
    fn core(&self) -> &HandleCore;

    /// Human-readable name used in logs.
    fn label(&self) -> &str {
        "handle"
    }

    fn state(&self) -> HandleState {
        self.core().state()
    }

    fn is_cancelled(&self) -> bool {
        self.core().is_cancelled()
    }

    fn index(&self) -> Option<usize> {
        self.core().index()
    }

    fn group(&self) -> Option<Arc<dyn Group>> {
        self.core().owner()
    }

    fn manager(&self) -> Option<Arc<TaskManager>> {
        self.group().and_then(|group| group.manager())
    }

    /// Attempt `Idle → Running`.
    ///
    /// `false` means "do not proceed": the handle has been ended and the
    /// caller owns any cleanup of its own state.
    fn start(&self) -> bool {
        base_start(self)
    }

    fn cancel(&self) {
        base_cancel(self)
    }

    fn complete(&self) {
        base_complete(self)
    }

    /// Invoked exactly once, at the transition into `Ended`.
    fn on_end(&self, was_cancelled: bool) {
        base_on_end(self, was_cancelled)
    }
}

pub fn base_start<H: Handle + ?Sized>(handle: &H) -> bool {
    let core = handle.core();
    if core.is_cancelled() || !core.try_transition(HandleState::Idle, HandleState::Running) {
        trace!(handle = %handle.label(), state = ?core.state(), "start refused");
        handle.cancel();
        handle.complete();
        return false;
    }

    trace!(handle = %handle.label(), index = ?core.index(), "handle started");
    if let Some(owner) = core.owner() {
        owner.notify_started();
    }
    true
}

pub fn base_cancel<H: Handle + ?Sized>(handle: &H) {
    let core = handle.core();
    if !core.mark_cancelled() {
        return;
    }

    // Never started: end right away. A running handle ends on `complete`.
    if core.try_transition(HandleState::Idle, HandleState::Ended) {
        trace!(handle = %handle.label(), "cancelled before start");
        handle.on_end(true);
    }
}

pub fn base_complete<H: Handle + ?Sized>(handle: &H) {
    let core = handle.core();
    if core.try_transition(HandleState::Running, HandleState::Ended) {
        trace!(handle = %handle.label(), cancelled = core.is_cancelled(), "handle completed");
        handle.on_end(core.is_cancelled());
    }
}

pub fn base_on_end<H: Handle + ?Sized>(handle: &H, _was_cancelled: bool) {
    if let Some(owner) = handle.core().owner() {
        owner.notify_completed();
    }
}
