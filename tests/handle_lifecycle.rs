// tests/handle_lifecycle.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use scopetree::config::SchedulerConfig;
use scopetree::mt::{EndOutcome, Group, Handle, HandleState, TaskHandle};
use scopetree_test_utils::{init_tracing, manual_manager};

#[test]
fn test_cancel_before_start_ends_immediately() {
    init_tracing();
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("g", None).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let task = {
        let ran = Arc::clone(&ran);
        TaskHandle::from_fn("t", move |_| {
            ran.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert!(group.launch(task.clone()));
    assert_eq!(task.state(), HandleState::Idle);

    task.cancel();
    assert_eq!(task.state(), HandleState::Ended);
    assert!(task.is_cancelled());

    // The queued job finds an ended handle and does not run the payload.
    fx.pool.run_all();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(group.is_done());
    assert_eq!(group.counts().completed, 1);
}

#[test]
fn test_start_after_cancel_is_refused() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("g", None).unwrap();
    group.cancel();

    assert!(!group.start());
    assert!(group.is_cancelled());
    assert_eq!(group.state(), HandleState::Ended);
}

#[test]
fn test_task_runs_once_and_records_index() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("g", None).unwrap();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut factory = |i: usize| {
        let seen = Arc::clone(&seen);
        Some(TaskHandle::from_fn("indexed", move |cx| {
            seen.lock().unwrap().push((i, cx.index()));
        }))
    };
    assert_eq!(group.launch_many(3, &mut factory), 3);
    assert_eq!(fx.pool.run_all(), 3);

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec![(0, Some(0)), (1, Some(1)), (2, Some(2))]);
    assert!(group.is_done());
}

#[test]
fn test_factory_can_skip_indices() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("g", None).unwrap();

    let mut factory = |i: usize| (i % 2 == 0).then(|| TaskHandle::from_fn("even", |_| {}));
    assert_eq!(group.launch_many(5, &mut factory), 3);
    assert_eq!(group.counts().expected, 3);

    fx.pool.run_all();
    assert!(group.is_done());
}

#[test]
fn test_task_dropped_by_pool_still_reports() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("g", None).unwrap();
    let outcome = Arc::new(std::sync::Mutex::new(None));
    {
        let outcome = Arc::clone(&outcome);
        group.on_complete(move |o| *outcome.lock().unwrap() = Some(o));
    }

    assert!(group.launch(TaskHandle::from_fn("lost", |_| {})));
    assert_eq!(fx.pool.drop_all(), 1);

    assert!(group.is_done());
    assert_eq!(*outcome.lock().unwrap(), Some(EndOutcome::Completed));
}

#[test]
fn test_concurrent_cancel_and_complete_fire_end_once() {
    init_tracing();

    for _ in 0..200 {
        let fx = manual_manager(SchedulerConfig::default());
        let group = fx.manager.try_create_task_group("race", None).unwrap();
        let ends = Arc::new(AtomicUsize::new(0));
        {
            let ends = Arc::clone(&ends);
            group.on_complete(move |_| {
                ends.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Hold a token so the group is running with one outstanding child.
        let token = group.try_create_token("hold").unwrap();
        let barrier = Arc::new(Barrier::new(3));

        let canceller = {
            let group = Arc::clone(&group);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                group.cancel();
            })
        };
        let releaser = {
            let token = Arc::clone(&token);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                token.release();
            })
        };
        barrier.wait();
        canceller.join().unwrap();
        releaser.join().unwrap();
        token.release();

        assert_eq!(group.state(), HandleState::Ended);
        assert_eq!(ends.load(Ordering::SeqCst), 1);
        let counts = group.counts();
        assert_eq!(counts.completed, counts.expected);
    }
}

#[test]
fn test_concurrent_cancels_on_idle_task_end_once() {
    for _ in 0..200 {
        let fx = manual_manager(SchedulerConfig::default());
        let group = fx.manager.try_create_task_group("race", None).unwrap();
        let task = TaskHandle::from_fn("idle", |_| {});
        assert!(group.launch(task.clone()));

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let task = Arc::clone(&task);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    task.cancel();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(task.state(), HandleState::Ended);
        assert_eq!(group.counts().completed, 1);
        assert!(group.is_done());
        fx.pool.run_all();
        assert_eq!(group.counts().completed, 1);
    }
}

#[test]
fn test_panicking_payload_still_completes_its_group() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("g", None).unwrap();
    let task = TaskHandle::from_fn("boom", |_| panic!("payload failure"));
    assert!(group.launch(Arc::clone(&task)));

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| fx.pool.run_next()));
    assert!(result.is_err());

    assert_eq!(task.state(), HandleState::Ended);
    assert!(group.is_done());
    assert_eq!(fx.context.outcomes(), vec![EndOutcome::Completed]);
}
