use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use scopetree::mt::{Job, WorkerPool};

/// A worker pool that only queues jobs.
///
/// Tests decide when, and in which order, each dispatched task runs. Jobs
/// run on the calling thread with the queue lock released, so a job may
/// dispatch more jobs.
#[derive(Default)]
pub struct ManualPool {
    jobs: Mutex<VecDeque<Job>>,
}

impl ManualPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the oldest queued job.
    pub fn run_next(&self) -> bool {
        let job = self.jobs.lock().unwrap().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run the most recently queued job.
    pub fn run_last(&self) -> bool {
        let job = self.jobs.lock().unwrap().pop_back();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run the job at `index` in queue order.
    pub fn run_at(&self, index: usize) -> bool {
        let job = self.jobs.lock().unwrap().remove(index);
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Drop the job at `index` without running it.
    pub fn discard_at(&self, index: usize) -> bool {
        let job = self.jobs.lock().unwrap().remove(index);
        job.is_some()
    }

    /// Run jobs until the queue stays empty, including jobs queued while
    /// running. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Discard every queued job without running it.
    pub fn drop_all(&self) -> usize {
        let jobs: Vec<Job> = self.jobs.lock().unwrap().drain(..).collect();
        let dropped = jobs.len();
        drop(jobs);
        dropped
    }
}

impl WorkerPool for ManualPool {
    fn spawn(&self, job: Job) {
        self.jobs.lock().unwrap().push_back(job);
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}
