use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use fanout_executor::{BoundedRunner, RunnerOptions, UnitOfWork, unit_of_work::Task};
use fanout_testkit::units::{ConcurrencyProbe, TestUnit};

fn available() -> usize {
    fanout_workflow::available_parallelism()
}

fn fast_options(max_workers: usize) -> RunnerOptions {
    RunnerOptions::new(max_workers).with_join_poll_interval(Duration::from_millis(10))
}

#[test]
fn test_worker_count_is_clamped() {
    assert_eq!(BoundedRunner::<TestUnit>::new(0).worker_count(), 1);
    assert_eq!(BoundedRunner::<TestUnit>::new(1).worker_count(), 1);
    assert_eq!(
        BoundedRunner::<TestUnit>::new(usize::MAX).worker_count(),
        available()
    );
    assert_eq!(
        BoundedRunner::<TestUnit>::new(available() + 10).worker_count(),
        available()
    );
}

#[test]
fn test_single_worker_delivers_every_unit_once() {
    const N: usize = 25;
    let runner = BoundedRunner::with_options(fast_options(1));
    for label in 0..N {
        assert!(runner.register(TestUnit::new(label)).is_accepted());
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let in_callback = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    {
        let seen = seen.clone();
        let in_callback = in_callback.clone();
        let overlaps = overlaps.clone();
        runner.set_completion_callback(move |unit: &TestUnit| {
            if in_callback.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(1));
            seen.lock().unwrap().push(unit.label);
            in_callback.store(false, Ordering::SeqCst);
        });
    }

    assert!(runner.start());
    runner.join();
    assert!(!runner.is_running());

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), N);
    // One worker pulls queued units FIFO, so finish order is registration order.
    assert_eq!(seen, (0..N).collect::<Vec<_>>());
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);

    let completed = runner.take_completed();
    assert_eq!(completed.len(), N);
    assert!(completed.iter().all(|u| u.executions == 1));
}

#[test]
fn test_callbacks_never_overlap_with_many_workers() {
    let runner = BoundedRunner::with_options(fast_options(available()));
    for label in 0..40 {
        runner.register(TestUnit::sleeping(label, (label % 4) as u64));
    }
    let in_callback = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let in_callback = in_callback.clone();
        let overlaps = overlaps.clone();
        let calls = calls.clone();
        runner.set_completion_callback(move |_: &TestUnit| {
            if in_callback.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_micros(200));
            in_callback.store(false, Ordering::SeqCst);
        });
    }
    assert!(runner.start());
    runner.join();
    assert_eq!(calls.load(Ordering::SeqCst), 40);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_notification_follows_finish_order() {
    let n = available().min(5);
    if n < 2 {
        return;
    }
    // Registered longest-first; each sleep is distinct and well separated.
    let sleeps: Vec<u64> = (0..n as u64).map(|i| (n as u64 - i) * 80).collect();

    let runner = BoundedRunner::with_options(fast_options(n));
    for (label, &ms) in sleeps.iter().enumerate() {
        runner.register(TestUnit::sleeping(label, ms));
    }
    let order = Arc::new(Mutex::new(Vec::new()));
    {
        let order = order.clone();
        runner.set_completion_callback(move |unit: &TestUnit| {
            order.lock().unwrap().push(unit.sleep);
        });
    }
    assert!(runner.start());
    runner.join();

    let order = order.lock().unwrap().clone();
    let mut ascending: Vec<Duration> = sleeps.iter().map(|&ms| Duration::from_millis(ms)).collect();
    ascending.sort();
    assert_eq!(order, ascending);

    let completed: Vec<Duration> = runner.take_completed().iter().map(|u| u.sleep).collect();
    assert_eq!(completed, ascending);
}

#[test]
fn test_concurrency_never_exceeds_pool_size() {
    let workers = available().min(3);
    let probe = ConcurrencyProbe::new();
    let runner = BoundedRunner::with_options(fast_options(workers));
    for label in 0..12 {
        runner.register(TestUnit::sleeping(label, 15).with_probe(probe.clone()));
    }
    assert!(runner.start());
    runner.join();
    assert_eq!(probe.total(), 12);
    assert!(probe.peak() <= workers);
    assert!(probe.peak() >= 1);
}

#[test]
fn test_start_returns_immediately() {
    let runner = BoundedRunner::with_options(fast_options(1));
    runner.register(TestUnit::sleeping(0, 300));
    let started = Instant::now();
    assert!(runner.start());
    assert!(started.elapsed() < Duration::from_millis(250));
    assert!(runner.is_running());
    runner.join();
    assert!(!runner.is_running());
}

#[test]
fn test_register_after_start_never_executes() {
    let runner = BoundedRunner::with_options(fast_options(2));
    runner.register(TestUnit::sleeping(0, 20));
    let calls = Arc::new(Mutex::new(Vec::new()));
    {
        let calls = calls.clone();
        runner.set_completion_callback(move |unit: &TestUnit| calls.lock().unwrap().push(unit.label));
    }
    assert!(runner.start());

    let late = runner.register(TestUnit::new(99));
    let late = late.into_ignored().expect("registration after start is ignored");
    assert_eq!(late.executions, 0);

    runner.join();
    assert_eq!(*calls.lock().unwrap(), vec![0]);
    assert_eq!(runner.registered_len(), 1);
}

#[test]
fn test_join_waits_for_running_flag() {
    let runner = BoundedRunner::with_options(fast_options(2));
    for label in 0..4 {
        runner.register(TestUnit::sleeping(label, 30));
    }
    runner.set_completion_callback(|_: &TestUnit| thread::sleep(Duration::from_millis(20)));
    assert!(runner.start());
    runner.join();
    assert!(!runner.is_running());
    assert_eq!(runner.completed_len(), 4);
}

#[test]
fn test_join_polls_through_slow_callbacks() {
    // Units finish at once; the callbacks outlast many poll intervals.
    let runner = BoundedRunner::with_options(fast_options(3));
    for label in 0..3 {
        runner.register(TestUnit::new(label));
    }
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    runner.set_completion_callback(move |_: &TestUnit| {
        thread::sleep(Duration::from_millis(60));
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(runner.start());
    let started = Instant::now();
    runner.join();
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(delivered.load(Ordering::SeqCst), 3);
    assert!(!runner.is_running());
}

#[test]
fn test_join_with_no_units_is_prompt() {
    let runner = BoundedRunner::<TestUnit>::new(2);
    assert!(runner.start());
    let started = Instant::now();
    runner.join();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!runner.is_running());
    assert!(runner.take_completed().is_empty());
}

#[test]
fn test_faulty_unit_does_not_stall_batch() {
    const N: usize = 6;
    let runner = BoundedRunner::with_options(fast_options(2));
    for label in 0..N {
        let unit = TestUnit::sleeping(label, 5);
        runner.register(if label == 2 { unit.panicking() } else { unit });
    }
    let delivered = Arc::new(Mutex::new(Vec::new()));
    {
        let delivered = delivered.clone();
        runner.set_completion_callback(move |unit: &TestUnit| delivered.lock().unwrap().push(unit.label));
    }
    assert!(runner.start());
    assert!(runner.join_timeout(Duration::from_secs(30)));
    assert!(!runner.is_running());

    let mut delivered = delivered.lock().unwrap().clone();
    delivered.sort();
    assert_eq!(delivered, vec![0, 1, 3, 4, 5]);

    let faults = runner.take_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].unit.label, 2);
    assert_eq!(faults[0].id.as_u64(), 2);
    assert!(faults[0].message.contains("failed on purpose"));
    assert_eq!(runner.take_completed().len(), N - 1);
}

#[test]
fn test_panicking_callback_does_not_stop_drain() {
    let runner = BoundedRunner::with_options(fast_options(1));
    for label in 0..5 {
        runner.register(TestUnit::new(label));
    }
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        runner.set_completion_callback(move |unit: &TestUnit| {
            calls.fetch_add(1, Ordering::SeqCst);
            if unit.label == 1 {
                panic!("callback failure");
            }
        });
    }
    assert!(runner.start());
    runner.join();
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(runner.take_completed().len(), 5);
}

#[test]
fn test_callback_replaced_while_running() {
    let runner = BoundedRunner::with_options(fast_options(1));
    for label in 0..6 {
        runner.register(TestUnit::sleeping(label, 40));
    }
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    {
        let first = first.clone();
        runner.set_completion_callback(move |_: &TestUnit| {
            first.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert!(runner.start());
    thread::sleep(Duration::from_millis(100));
    {
        let second = second.clone();
        runner.set_completion_callback(move |_: &TestUnit| {
            second.fetch_add(1, Ordering::SeqCst);
        });
    }
    runner.join();

    let first = first.load(Ordering::SeqCst);
    let second = second.load(Ordering::SeqCst);
    assert_eq!(first + second, 6);
    assert!(second >= 1);
}

#[test]
fn test_no_callback_drains_silently() {
    let runner = BoundedRunner::with_options(fast_options(2));
    for label in 0..8 {
        runner.register(TestUnit::new(label));
    }
    runner.clear_completion_callback();
    assert!(runner.start());
    runner.join();
    let mut labels: Vec<_> = runner.take_completed().into_iter().map(|u| u.label).collect();
    labels.sort();
    assert_eq!(labels, (0..8).collect::<Vec<_>>());
}

#[test]
fn test_wait_for_workers_then_idle() {
    let runner = BoundedRunner::with_options(fast_options(2));
    for label in 0..3 {
        runner.register(TestUnit::sleeping(label, 10));
    }
    assert!(runner.start());
    runner.wait_for_workers();
    // Workers are gone; the dispatcher may still be finishing the last callback.
    runner.join();
    assert!(!runner.is_running());
    assert_eq!(runner.completed_len(), 3);
}

#[test]
fn test_join_timeout_expires_on_slow_unit() {
    let runner = BoundedRunner::with_options(fast_options(1));
    runner.register(TestUnit::sleeping(0, 400));
    assert!(runner.start());
    assert!(!runner.join_timeout(Duration::from_millis(20)));
    assert!(runner.is_running());
    assert!(runner.join_timeout(Duration::from_secs(30)));
    assert!(!runner.is_running());
}

#[test]
fn test_caller_keeps_shared_handles() {
    let handles: Vec<_> = (0..4)
        .map(|label| Arc::new(Mutex::new(TestUnit::new(label))))
        .collect();
    let runner = BoundedRunner::with_options(fast_options(2));
    for handle in &handles {
        runner.register(handle.clone());
    }
    assert!(runner.start());
    runner.join();
    assert!(handles.iter().all(|h| h.lock().unwrap().executions == 1));
}

#[test]
fn test_closure_tasks() {
    let runner = BoundedRunner::with_options(fast_options(3));
    for i in 1..=10u64 {
        runner.register(Task::new(move || i * 10));
    }
    assert!(runner.start());
    runner.join();
    let total: u64 = runner
        .take_completed()
        .into_iter()
        .filter_map(|t| t.into_result())
        .sum();
    assert_eq!(total, 550);
}

#[test]
fn test_independent_runners() {
    let a = BoundedRunner::with_options(fast_options(1));
    let b = BoundedRunner::with_options(fast_options(1));
    for label in 0..3 {
        a.register(TestUnit::sleeping(label, 10));
        b.register(TestUnit::sleeping(label + 100, 10));
    }
    assert!(a.start());
    assert!(b.start());
    a.join();
    b.join();
    assert!(a.take_completed().iter().all(|u| u.label < 100));
    assert!(b.take_completed().iter().all(|u| u.label >= 100));
}

#[test]
fn test_units_are_boxed_trait_objects() {
    let runner: BoundedRunner<Box<dyn UnitOfWork>> = BoundedRunner::with_options(fast_options(2));
    runner.register(Box::new(TestUnit::new(0)));
    runner.register(Box::new(Task::new(|| "mixed")));
    assert!(runner.start());
    runner.join();
    assert_eq!(runner.take_completed().len(), 2);
}
