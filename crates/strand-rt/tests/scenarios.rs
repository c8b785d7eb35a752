// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! End-to-end scenarios across runners, clocks, gates and locked values.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::TimeDelta;
use strand_rt::{
    ClockExt, CurrentThreadRunner, Gate, Locked, ManualClock, Outcome, RunnerConfig, RunnerExt,
    ThreadPoolRunner,
};

fn pool(workers: usize) -> ThreadPoolRunner {
    ThreadPoolRunner::new(&RunnerConfig::default().workers(workers)).unwrap()
}

#[test]
fn scheduled_increment_is_visible_after_wait() {
    let runner = pool(2);
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    runner
        .schedule_run(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn gate_opened_within_virtual_timeout_releases_task() {
    let runner = pool(1);
    let clock = Arc::new(ManualClock::new());
    let gate = Arc::new(Gate::with_clock(clock.clone()));
    gate.close();

    let g = gate.clone();
    let task = runner
        .schedule_fallible(move || g.pass_through_for(TimeDelta::seconds(5))?.wait())
        .unwrap();

    // Wait (in real time) until the task has registered its timeout.
    let start = Instant::now();
    while clock.pending_count() == 0 {
        assert!(start.elapsed() < Duration::from_secs(5), "task never waited");
        std::thread::sleep(Duration::from_millis(1));
    }
    clock.advance(TimeDelta::seconds(4));
    assert!(!task.is_completed());
    assert!(gate.open());
    task.wait().unwrap();
}

#[test]
fn unbound_gate_times_out_after_real_second() {
    let gate = Gate::new();
    let start = Instant::now();
    let err = gate
        .pass_through_for(TimeDelta::seconds(1))
        .unwrap()
        .wait()
        .unwrap_err();
    assert!(err.is_timeout());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(950), "timed out early: {:?}", elapsed);
}

#[test]
fn locked_counter_under_parallel_increments() {
    let runner = pool(8);
    let locked = Arc::new(Locked::new(0u32));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let inside = Arc::new(AtomicUsize::new(0));

    let outcomes: Vec<Outcome<()>> = (0..1000)
        .map(|_| {
            let locked = locked.clone();
            let overlaps = overlaps.clone();
            let inside = inside.clone();
            runner
                .schedule_run(move || {
                    locked.unlock(|v| {
                        if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        assert!(locked.mutex().is_acquired_by_current_thread());
                        *v += 1;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
                .unwrap()
        })
        .collect();
    for o in outcomes {
        o.wait().unwrap();
    }

    assert!(!locked.mutex().is_acquired());
    assert_eq!(locked.unlock(|v| *v), 1000);
    assert!(!locked.mutex().is_acquired());
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn negative_delay_runs_immediately_on_any_clock() {
    let manual = ManualClock::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    manual
        .schedule_after(TimeDelta::seconds(-5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .wait()
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let real = strand_rt::RealClock::new();
    let c = counter.clone();
    let start = Instant::now();
    real.schedule_after(TimeDelta::seconds(-5), move || {
        c.fetch_add(1, Ordering::SeqCst);
    })
    .wait()
    .unwrap();
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn lazy_chain_across_runners() {
    let runner = CurrentThreadRunner::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let lazy = Outcome::lazy(move || {
        c.fetch_add(1, Ordering::SeqCst);
        21
    });
    let doubled = lazy.then(|v| v * 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let d = doubled.clone();
    let from_runner = runner.schedule(move || d.wait()).unwrap();
    assert_eq!(from_runner.wait().unwrap().unwrap(), 42);
    assert_eq!(doubled.wait().unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
