// tests/cancellation.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use scopetree::config::SchedulerConfig;
use scopetree::mt::{EndOutcome, Group, Handle, HandleState, TaskHandle};
use scopetree_test_utils::{init_tracing, manual_manager};

fn record_outcome(slot: &Arc<Mutex<Vec<EndOutcome>>>) -> impl FnOnce(EndOutcome) + Send + 'static {
    let slot = Arc::clone(slot);
    move |outcome| slot.lock().unwrap().push(outcome)
}

#[test]
fn test_cancel_group_with_live_ended_and_expired_children() {
    init_tracing();
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("mixed", None).unwrap();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    group.on_complete(record_outcome(&outcomes));

    let ran = Arc::new(AtomicUsize::new(0));
    let make = |name: &'static str| {
        let ran = Arc::clone(&ran);
        TaskHandle::from_fn(name, move |_| {
            ran.fetch_add(1, Ordering::SeqCst);
        })
    };

    let finished = make("finished");
    let live = make("live");
    assert!(group.launch(finished.clone()));
    assert!(group.launch(live.clone()));
    assert!(group.launch(make("expired")));

    // "finished" ends normally, "expired" is dropped without ever running.
    assert!(fx.pool.run_next());
    assert_eq!(finished.state(), HandleState::Ended);
    assert!(fx.pool.discard_at(1));
    assert_eq!(fx.pool.len(), 1);

    group.cancel();

    assert!(live.is_cancelled());
    assert_eq!(live.state(), HandleState::Ended);
    assert!(!finished.is_cancelled());
    assert!(group.is_done());
    assert_eq!(*outcomes.lock().unwrap(), vec![EndOutcome::Cancelled]);

    // Remaining jobs find ended handles.
    fx.pool.run_all();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    let counts = group.counts();
    assert_eq!(counts.completed, counts.expected);
    assert_eq!(counts.expected, 3);
}

#[test]
fn test_cancel_skips_children_that_no_longer_exist() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("weak", None).unwrap();
    let token = group.try_create_token("hold").unwrap();

    assert!(group.launch(TaskHandle::from_fn("gone", |_| {})));
    // The only strong reference lives in the queued job.
    assert_eq!(fx.pool.drop_all(), 1);
    assert!(!group.is_done());

    group.cancel();
    assert!(group.is_cancelled());
    assert!(!group.is_done(), "caller-held token still outstanding");

    token.release();
    assert!(group.is_done());
}

#[test]
fn test_cancelled_group_waits_for_running_task() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("running", None).unwrap();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    group.on_complete(record_outcome(&outcomes));

    let observed = Arc::new(Mutex::new(None));
    let task = {
        let group = Arc::clone(&group);
        let observed = Arc::clone(&observed);
        TaskHandle::from_fn("cooperative", move |cx| {
            // Cancel from inside the payload, then observe it.
            group.cancel();
            *observed.lock().unwrap() = Some((cx.is_cancelled(), group.is_done()));
        })
    };
    assert!(group.launch(task));
    fx.pool.run_all();

    assert_eq!(*observed.lock().unwrap(), Some((true, false)));
    assert!(group.is_done());
    assert_eq!(*outcomes.lock().unwrap(), vec![EndOutcome::Cancelled]);
}

#[test]
fn test_manager_cancel_cascades_through_nested_groups() {
    init_tracing();
    let fx = manual_manager(SchedulerConfig::default());
    let a = fx.manager.try_create_task_group("A", None).unwrap();
    let b = fx
        .manager
        .try_create_task_group("B", Some(&*a as &dyn Group))
        .unwrap();

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    a.on_complete({
        let outcomes = Arc::clone(&outcomes);
        move |o| outcomes.lock().unwrap().push(("A", o))
    });
    b.on_complete({
        let outcomes = Arc::clone(&outcomes);
        move |o| outcomes.lock().unwrap().push(("B", o))
    });

    let ran = Arc::new(AtomicUsize::new(0));
    for group in [&a, &b] {
        let ran = Arc::clone(&ran);
        let mut factory = move |_: usize| {
            let ran = Arc::clone(&ran);
            Some(TaskHandle::from_fn("queued", move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            }))
        };
        assert_eq!(group.launch_many(2, &mut factory), 2);
    }

    fx.manager.cancel();

    assert!(a.is_cancelled());
    assert!(b.is_cancelled());
    assert!(a.is_done() && b.is_done());
    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![("B", EndOutcome::Cancelled), ("A", EndOutcome::Cancelled)]
    );
    assert_eq!(fx.context.outcomes(), vec![EndOutcome::Cancelled]);

    fx.pool.run_all();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(fx.context.ended_count(), 1);
}

#[test]
fn test_group_cancel_reaches_grandchild_group() {
    let fx = manual_manager(SchedulerConfig::default());
    let a = fx.manager.try_create_task_group("A", None).unwrap();
    let b = fx
        .manager
        .try_create_task_group("B", Some(&*a as &dyn Group))
        .unwrap();
    assert!(b.launch(TaskHandle::from_fn("leaf", |_| {})));

    a.cancel();

    assert!(b.is_cancelled());
    assert!(b.is_done());
    assert!(a.is_done());
    // Manager was not cancelled, it simply ran out of work.
    assert!(!fx.manager.is_cancelled());
    assert_eq!(fx.context.outcomes(), vec![EndOutcome::Completed]);
}

#[test]
fn test_cancelled_manager_refuses_work() {
    let fx = manual_manager(SchedulerConfig::default());
    fx.manager.cancel();

    assert!(fx.manager.is_cancelled());
    assert!(!fx.manager.is_available());
    assert!(fx.manager.try_create_task_group("late", None).is_none());
    assert!(fx.manager.try_create_token("late").is_none());
    assert!(!fx.manager.launch(TaskHandle::from_fn("late", |_| {})));
    assert_eq!(fx.context.outcomes(), vec![EndOutcome::Cancelled]);
}

#[test]
fn test_cancel_is_idempotent() {
    let fx = manual_manager(SchedulerConfig::default());
    let group = fx.manager.try_create_task_group("g", None).unwrap();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    group.on_complete(record_outcome(&outcomes));

    group.cancel();
    group.cancel();
    fx.manager.cancel();
    fx.manager.cancel();

    assert_eq!(*outcomes.lock().unwrap(), vec![EndOutcome::Cancelled]);
    assert_eq!(fx.context.ended_count(), 1);
}

#[test]
fn test_manager_cancel_leaves_ended_groups_alone() {
    let fx = manual_manager(SchedulerConfig::default());
    let done = fx.manager.try_create_task_group("done", None).unwrap();
    let busy = fx.manager.try_create_task_group("busy", None).unwrap();

    assert_eq!(done.start_tasks_batch(Vec::new()), 0);
    assert_eq!(done.state(), HandleState::Ended);
    assert!(busy.launch(TaskHandle::from_fn("queued", |_| {})));

    fx.manager.cancel();

    assert!(!done.is_cancelled());
    assert!(busy.is_cancelled());
    assert!(busy.is_done());
    assert_eq!(fx.context.outcomes(), vec![EndOutcome::Cancelled]);
}
