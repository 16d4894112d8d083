// src/lib.rs

pub mod cli;
pub mod config;
pub mod demo;
pub mod errors;
pub mod logging;
pub mod mt;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_or_default};
use crate::demo::{DemoPlan, DemoReport, DemoSummary, RunContext};
use crate::mt::{EndOutcome, Handle, TaskManager, TokioPool, split_iterations};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - a task manager on the tokio blocking pool
/// - the sample workload
/// - the main-thread pump
/// - Ctrl-C handling (cancels the manager)
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_or_default(args.config.as_deref().map(Path::new))?;
    let plan = DemoPlan::from_args(&args);

    if args.dry_run {
        print_dry_run(&cfg, &plan);
        return Ok(());
    }

    let (context, mut ended) = RunContext::new();
    let pool = TokioPool::current()?;
    let manager = TaskManager::new(&context, Arc::new(pool), *cfg.scheduler());
    let report = Arc::new(DemoReport::default());

    let started = Instant::now();
    demo::schedule(&manager, &plan, &report)?;
    info!(iterations = plan.iterations, "workload scheduled");

    let outcome = drive_main_thread(&manager, &mut ended).await;
    let summary = report.summary(&plan);
    debug!(starts = context.starts(), elapsed = ?started.elapsed(), "run finished");
    print_summary(outcome, &summary);

    if outcome == EndOutcome::Completed && !summary.sum_matches() {
        bail!(
            "sum of squares mismatch: got {}, expected {}",
            summary.sum_of_squares,
            summary.expected_sum_of_squares
        );
    }
    Ok(())
}

/// Pump the main-thread queue until the manager reports its end.
async fn drive_main_thread(
    manager: &Arc<TaskManager>,
    ended: &mut watch::Receiver<Option<EndOutcome>>,
) -> EndOutcome {
    let mut ticker = tokio::time::interval(manager.config().time_slice());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ctrl_c_armed = true;

    loop {
        let current = *ended.borrow_and_update();
        if let Some(outcome) = current {
            manager.main_thread().pump();
            return outcome;
        }

        tokio::select! {
            _ = ticker.tick() => {
                manager.main_thread().pump();
            }
            changed = ended.changed() => {
                if changed.is_err() {
                    warn!("execution context dropped before work ended");
                    return EndOutcome::Cancelled;
                }
            }
            res = &mut ctrl_c, if ctrl_c_armed => {
                ctrl_c_armed = false;
                match res {
                    Ok(()) => {
                        info!("Ctrl-C received, cancelling scheduled work");
                        manager.cancel();
                    }
                    Err(e) => warn!("failed to listen for Ctrl+C: {e}"),
                }
            }
        }
    }
}

fn print_summary(outcome: EndOutcome, summary: &DemoSummary) {
    println!("scopetree run: {outcome:?}");
    println!(
        "  sum_of_squares = {} (expected {}{})",
        summary.sum_of_squares,
        summary.expected_sum_of_squares,
        if summary.sum_matches() { ", ok" } else { "" }
    );
    println!("  scopes_visited = {}", summary.scopes_visited);
    println!("  callbacks_run = {}", summary.callbacks_run);
    println!("  main_thread_iterations = {}", summary.main_thread_iterations);
    println!("groups ({}):", summary.groups.len());
    for (name, group_outcome) in &summary.groups {
        println!("  - {name}: {group_outcome:?}");
    }
}

/// Dry-run output: print tunables and the scope plan.
fn print_dry_run(cfg: &ConfigFile, plan: &DemoPlan) {
    let scheduler = cfg.scheduler();
    println!("scopetree dry-run");
    println!("  scheduler.small_batch_threshold = {}", scheduler.small_batch_threshold);
    println!("  scheduler.default_chunk_size = {}", scheduler.default_chunk_size);
    println!("  scheduler.time_slice_ms = {}", scheduler.time_slice_ms);
    println!();

    let scopes = split_iterations(plan.iterations, plan.chunk_size, scheduler);
    println!(
        "plan: {} iterations in {} scope(s){}",
        plan.iterations,
        scopes.len(),
        if plan.single_threaded { ", single-threaded" } else { "" }
    );
    if let (Some(first), Some(last)) = (scopes.first(), scopes.last()) {
        println!("  first scope: [{}, {})", first.start, first.end);
        println!("  last scope:  [{}, {})", last.start, last.end);
    }
    println!("  simple callbacks: {}", plan.callbacks);
    println!("  main-thread iterations: {}", plan.main_thread_iterations);

    debug!("dry-run complete (no execution)");
}
