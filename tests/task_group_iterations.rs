// tests/task_group_iterations.rs

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use scopetree::config::SchedulerConfig;
use scopetree::mt::{EndOutcome, FnTask, Group, Handle, Scope, TaskManager, TokioPool};
use scopetree_test_utils::{RecordingContext, init_tracing, inline_manager, manual_manager};

#[test]
fn test_thousand_iterations_split_into_ten_scopes() {
    init_tracing();
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("loop", None).unwrap();

    let visited = Arc::new(Mutex::new(Vec::new()));
    let ends = Arc::new(AtomicUsize::new(0));
    let visited_at_end = Arc::new(AtomicUsize::new(0));
    {
        let visited = Arc::clone(&visited);
        group.on_iteration(move |index, scope| {
            assert!(scope.contains(index));
            visited.lock().unwrap().push(index);
        });
    }
    {
        let ends = Arc::clone(&ends);
        let visited = Arc::clone(&visited);
        let visited_at_end = Arc::clone(&visited_at_end);
        group.on_complete(move |outcome| {
            assert_eq!(outcome, EndOutcome::Completed);
            visited_at_end.store(visited.lock().unwrap().len(), Ordering::SeqCst);
            ends.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(group.start_iterations(1000, 100, false, false));
    assert_eq!(fx.pool.len(), 10);

    // Run scopes out of order; completion still waits for all ten.
    for _ in 0..9 {
        assert!(fx.pool.run_last());
        assert_eq!(ends.load(Ordering::SeqCst), 0);
    }
    assert!(fx.pool.run_last());

    assert_eq!(ends.load(Ordering::SeqCst), 1);
    assert_eq!(visited_at_end.load(Ordering::SeqCst), 1000);
    let unique: BTreeSet<_> = visited.lock().unwrap().iter().copied().collect();
    assert_eq!(unique.len(), 1000);
    assert_eq!(unique.iter().next_back(), Some(&999));
}

#[test]
fn test_small_loop_runs_as_one_scope() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("small", None).unwrap();

    let scopes = Arc::new(Mutex::new(Vec::new()));
    {
        let scopes = Arc::clone(&scopes);
        group.on_iteration(move |_index, scope| {
            let mut scopes = scopes.lock().unwrap();
            if !scopes.contains(scope) {
                scopes.push(*scope);
            }
        });
    }

    assert!(group.start_iterations(10, 100, false, false));
    assert_eq!(fx.pool.len(), 1);
    fx.pool.run_all();

    assert_eq!(*scopes.lock().unwrap(), vec![Scope::new(0, 10, 0)]);
    assert!(group.is_done());
}

#[test]
fn test_zero_iterations_end_group_immediately() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("none", None).unwrap();
    let outcome = Arc::new(Mutex::new(None));
    group.on_iteration(|_, _| panic!("no iterations expected"));
    {
        let outcome = Arc::clone(&outcome);
        group.on_complete(move |o| *outcome.lock().unwrap() = Some(o));
    }

    assert!(group.start_iterations(0, 16, false, false));
    assert!(group.is_done());
    assert!(fx.pool.is_empty());
    assert_eq!(*outcome.lock().unwrap(), Some(EndOutcome::Completed));
}

#[test]
fn test_missing_iteration_callback_is_refused() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("no-callback", None).unwrap();

    assert!(!group.start_iterations(1000, 100, false, false));
    assert!(fx.pool.is_empty());
    assert!(!group.is_done());
}

#[test]
fn test_single_threaded_runs_in_order_on_caller() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("inline", None).unwrap();
    let caller = thread::current().id();

    let order = Arc::new(Mutex::new(Vec::new()));
    {
        let order = Arc::clone(&order);
        group.on_iteration(move |index, _| {
            assert_eq!(thread::current().id(), caller);
            order.lock().unwrap().push(index);
        });
    }

    assert!(group.start_iterations(1000, 100, true, false));

    // Nothing went through the pool and the group already ended.
    assert!(fx.pool.is_empty());
    assert!(group.is_done());
    assert_eq!(*order.lock().unwrap(), (0..1000).collect::<Vec<_>>());
}

#[test]
fn test_prepare_and_sub_loop_callbacks() {
    let fx = inline_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("prep", None).unwrap();

    let prepared = Arc::new(Mutex::new(Vec::new()));
    let started = Arc::new(Mutex::new(Vec::new()));
    let iterations = Arc::new(AtomicUsize::new(0));
    {
        let prepared = Arc::clone(&prepared);
        group.on_prepare_sub_loops(move |scopes| {
            prepared.lock().unwrap().extend_from_slice(scopes);
        });
    }
    {
        let started = Arc::clone(&started);
        group.on_sub_loop_start(move |scope| started.lock().unwrap().push(scope.loop_index));
    }
    {
        let iterations = Arc::clone(&iterations);
        group.on_iteration(move |_, _| {
            iterations.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(group.start_sub_loops(600, 200, false));

    assert_eq!(prepared.lock().unwrap().len(), 3);
    let mut started = started.lock().unwrap().clone();
    started.sort();
    assert_eq!(started, vec![0, 1, 2]);
    // Preparation-only: no per-index work.
    assert_eq!(iterations.load(Ordering::SeqCst), 0);
    assert!(group.is_done());
}

#[test]
fn test_cancel_stops_remaining_iterations() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("stop", None).unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = Arc::clone(&seen);
        let weak = Arc::downgrade(&group);
        group.on_iteration(move |index, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            if index == 49 {
                if let Some(group) = weak.upgrade() {
                    group.cancel();
                }
            }
        });
    }

    assert!(group.start_iterations(1000, 100, false, false));
    fx.pool.run_all();

    // The running scope stops at its next index check; queued scopes never run.
    assert_eq!(seen.load(Ordering::SeqCst), 50);
    assert!(group.is_done());
}

#[test]
fn test_simple_callbacks_each_run_once() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("callbacks", None).unwrap();
    let hits = Arc::new(Mutex::new(Vec::new()));
    for i in 0..5 {
        let hits = Arc::clone(&hits);
        group.add_simple_callback(move || hits.lock().unwrap().push(i));
    }

    assert_eq!(group.start_simple_callbacks(), 5);
    fx.pool.run_all();

    let mut hits = hits.lock().unwrap().clone();
    hits.sort();
    assert_eq!(hits, vec![0, 1, 2, 3, 4]);
    assert!(group.is_done());
}

#[test]
fn test_no_simple_callbacks_ends_group() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("callbacks", None).unwrap();

    assert_eq!(group.start_simple_callbacks(), 0);
    assert!(group.is_done());
}

#[test]
fn test_start_ranges_builds_one_task_per_scope() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("ranges", None).unwrap();
    let total = Arc::new(AtomicUsize::new(0));

    let dispatched = group.start_ranges(1000, 250, |scope| {
        let total = Arc::clone(&total);
        FnTask::new("range", move |_| {
            total.fetch_add(scope.count, Ordering::SeqCst);
        })
    });
    assert_eq!(dispatched, 4);

    fx.pool.run_all();
    assert_eq!(total.load(Ordering::SeqCst), 1000);
    assert!(group.is_done());
}

#[test]
fn test_tasks_can_launch_follow_ups_into_their_group() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("chain", None).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    let first = {
        let ran = Arc::clone(&ran);
        scopetree::mt::TaskHandle::from_fn("first", move |cx| {
            ran.fetch_add(1, Ordering::SeqCst);
            let ran = Arc::clone(&ran);
            assert!(cx.launch(scopetree::mt::TaskHandle::from_fn("second", move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            })));
        })
    };
    assert!(group.launch(first));

    assert!(fx.pool.run_next());
    assert!(!group.is_done());
    assert!(fx.pool.run_next());
    assert!(group.is_done());
    assert_eq!(ran.load(Ordering::SeqCst), 2);
}

#[test]
fn test_parallel_loop_on_tokio_blocking_pool() {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .max_blocking_threads(4)
        .enable_all()
        .build()
        .unwrap();

    let context = RecordingContext::new();
    let pool = TokioPool::new(runtime.handle().clone());
    let manager = TaskManager::new(&context, Arc::new(pool), SchedulerConfig::default());
    let group = manager.try_create_task_group("parallel", None).unwrap();

    let sum = Arc::new(AtomicUsize::new(0));
    {
        let sum = Arc::clone(&sum);
        group.on_iteration(move |index, _| {
            sum.fetch_add(index, Ordering::Relaxed);
        });
    }
    assert!(group.start_iterations(10_000, 0, false, false));

    let outcomes = context
        .wait_for_ends(1, Duration::from_secs(10))
        .expect("manager did not finish in time");
    assert_eq!(outcomes, vec![EndOutcome::Completed]);
    assert_eq!(sum.load(Ordering::SeqCst), (0..10_000).sum::<usize>());
    assert!(group.is_done());
    assert!(!manager.is_waiting_for_tasks());
}
