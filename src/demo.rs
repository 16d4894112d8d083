// src/demo.rs

//! Sample workload for the `scopetree` binary.
//!
//! Builds a small hierarchy under one manager:
//! - `sum-of-squares`: parallel loop over `[0, n)`.
//! - `scope-census`: child of `sum-of-squares`, one sub-loop-start call per
//!   scope.
//! - `finalize`: a batch of one-shot callbacks.
//! - `main-thread-loop`: a time-sliced loop on the coordinating thread.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::mt::{
    EndOutcome, ExecutionContext, Group, MainThreadAction, SchedulingScope, TaskManager,
    execute_on_main_thread,
};

/// Execution context for one binary run. Publishes the manager's end
/// outcome on a watch channel.
#[derive(Debug)]
pub struct RunContext {
    starts: AtomicUsize,
    ended: watch::Sender<Option<EndOutcome>>,
}

impl RunContext {
    pub fn new() -> (Arc<Self>, watch::Receiver<Option<EndOutcome>>) {
        let (ended, rx) = watch::channel(None);
        let context = Arc::new(Self {
            starts: AtomicUsize::new(0),
            ended,
        });
        (context, rx)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl ExecutionContext for RunContext {
    fn on_work_started(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_work_ended(&self, outcome: EndOutcome) {
        info!(?outcome, "scheduled work ended");
        self.ended.send_replace(Some(outcome));
    }
}

/// Sizes of the sample workload.
#[derive(Debug, Clone, Copy)]
pub struct DemoPlan {
    pub iterations: usize,
    pub chunk_size: usize,
    pub single_threaded: bool,
    pub callbacks: usize,
    pub main_thread_iterations: usize,
}

impl DemoPlan {
    pub fn from_args(args: &CliArgs) -> Self {
        Self {
            iterations: args.iterations,
            chunk_size: args.chunk_size,
            single_threaded: args.single_threaded,
            callbacks: 8,
            main_thread_iterations: args.iterations.min(10_000),
        }
    }

    /// Sum of `i * i` for `i` in `[0, iterations)`, wrapped to `u64`.
    pub fn expected_sum_of_squares(&self) -> u64 {
        let n = self.iterations as u128;
        if n == 0 {
            return 0;
        }
        ((n - 1) * n * (2 * n - 1) / 6) as u64
    }
}

/// Counters filled in by the workload.
#[derive(Debug, Default)]
pub struct DemoReport {
    sum_of_squares: AtomicU64,
    scopes_visited: AtomicUsize,
    callbacks_run: AtomicUsize,
    main_thread_iterations: AtomicUsize,
    groups: Mutex<Vec<(String, EndOutcome)>>,
}

impl DemoReport {
    fn record_end(&self, name: &str, outcome: EndOutcome) {
        debug!(group = name, ?outcome, "demo group ended");
        crate::mt::lock(&self.groups).push((name.to_string(), outcome));
    }

    pub fn summary(&self, plan: &DemoPlan) -> DemoSummary {
        DemoSummary {
            sum_of_squares: self.sum_of_squares.load(Ordering::SeqCst),
            expected_sum_of_squares: plan.expected_sum_of_squares(),
            scopes_visited: self.scopes_visited.load(Ordering::SeqCst),
            callbacks_run: self.callbacks_run.load(Ordering::SeqCst),
            main_thread_iterations: self.main_thread_iterations.load(Ordering::SeqCst),
            groups: crate::mt::lock(&self.groups).clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoSummary {
    pub sum_of_squares: u64,
    pub expected_sum_of_squares: u64,
    pub scopes_visited: usize,
    pub callbacks_run: usize,
    pub main_thread_iterations: usize,
    pub groups: Vec<(String, EndOutcome)>,
}

impl DemoSummary {
    pub fn sum_matches(&self) -> bool {
        self.sum_of_squares == self.expected_sum_of_squares
    }
}

/// Schedule the whole workload on `manager`.
///
/// Everything is set up under one [`SchedulingScope`] so the manager cannot
/// end between two groups being created.
pub fn schedule(manager: &Arc<TaskManager>, plan: &DemoPlan, report: &Arc<DemoReport>) -> Result<()> {
    let scheduling = SchedulingScope::new(manager);
    if !scheduling.is_valid() {
        bail!("task manager refused to schedule work");
    }

    let sum = manager
        .try_create_task_group("sum-of-squares", None)
        .ok_or_else(|| anyhow!("could not create group `sum-of-squares`"))?;
    let census = manager
        .try_create_task_group("scope-census", Some(&*sum as &dyn Group))
        .ok_or_else(|| anyhow!("could not create group `scope-census`"))?;

    {
        let report = Arc::clone(report);
        census.on_sub_loop_start(move |_scope| {
            report.scopes_visited.fetch_add(1, Ordering::Relaxed);
        });
    }
    {
        let report = Arc::clone(report);
        census.on_complete(move |outcome| report.record_end("scope-census", outcome));
    }
    {
        let report = Arc::clone(report);
        sum.on_iteration(move |index, _scope| {
            let value = index as u64;
            report
                .sum_of_squares
                .fetch_add(value.wrapping_mul(value), Ordering::Relaxed);
        });
    }
    {
        let group = Arc::downgrade(&sum);
        sum.on_sub_loop_start(move |scope| {
            if scope.loop_index != 0 {
                return;
            }
            let Some(group) = group.upgrade() else {
                return;
            };
            let (start, end) = (scope.start, scope.end);
            execute_on_main_thread(&*group, move || {
                debug!(start, end, "first scope reported on the main thread");
            });
        });
    }
    {
        let report = Arc::clone(report);
        sum.on_complete(move |outcome| report.record_end("sum-of-squares", outcome));
    }
    // The census is a child of `sum`, so `sum` cannot end before it.
    sum.start_iterations(plan.iterations, plan.chunk_size, plan.single_threaded, false);
    census.start_sub_loops(plan.iterations, plan.chunk_size, false);

    let finalize = manager
        .try_create_task_group("finalize", None)
        .ok_or_else(|| anyhow!("could not create group `finalize`"))?;
    for _ in 0..plan.callbacks {
        let report = Arc::clone(report);
        finalize.add_simple_callback(move || {
            report.callbacks_run.fetch_add(1, Ordering::Relaxed);
        });
    }
    {
        let report = Arc::clone(report);
        finalize.on_complete(move |outcome| report.record_end("finalize", outcome));
    }
    finalize.start_simple_callbacks();

    let main_loop = {
        let report = Arc::clone(report);
        MainThreadAction::time_sliced(
            "main-thread-loop",
            manager.main_thread(),
            plan.main_thread_iterations,
            move |_index, _scope| {
                report.main_thread_iterations.fetch_add(1, Ordering::Relaxed);
            },
        )
    };
    {
        let report = Arc::clone(report);
        main_loop.on_complete(move |outcome| report.record_end("main-thread-loop", outcome));
    }
    if !manager.try_register_handle(&main_loop, None) {
        bail!("could not register the main-thread loop");
    }

    debug!(groups = manager.group_count(), "demo workload scheduled");
    Ok(())
}
