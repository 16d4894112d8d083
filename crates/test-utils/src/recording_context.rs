use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use scopetree::mt::{EndOutcome, ExecutionContext};

/// An execution context that records every notification it receives.
#[derive(Default)]
pub struct RecordingContext {
    starts: AtomicUsize,
    ended: Mutex<Vec<EndOutcome>>,
    ended_cv: Condvar,
}

impl RecordingContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn outcomes(&self) -> Vec<EndOutcome> {
        self.ended.lock().unwrap().clone()
    }

    pub fn ended_count(&self) -> usize {
        self.ended.lock().unwrap().len()
    }

    pub fn last_outcome(&self) -> Option<EndOutcome> {
        self.ended.lock().unwrap().last().copied()
    }

    /// Block until at least `count` end notifications arrived. Returns the
    /// outcomes seen so far, or `None` on timeout.
    pub fn wait_for_ends(&self, count: usize, timeout: Duration) -> Option<Vec<EndOutcome>> {
        let guard = self.ended.lock().unwrap();
        let (guard, result) = self
            .ended_cv
            .wait_timeout_while(guard, timeout, |ended| ended.len() < count)
            .unwrap();
        if result.timed_out() {
            None
        } else {
            Some(guard.clone())
        }
    }
}

impl ExecutionContext for RecordingContext {
    fn on_work_started(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_work_ended(&self, outcome: EndOutcome) {
        self.ended.lock().unwrap().push(outcome);
        self.ended_cv.notify_all();
    }
}
