// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Preemption Tests
//!
//! Threads that never yield must still share the processor.

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{with_runtime, WATCHDOG};
use crate::preempt;

fn spin_until(stop: &AtomicBool, counter: &AtomicU64) {
    while !stop.load(Ordering::Relaxed) {
        counter.fetch_add(1, Ordering::Relaxed);
        hint::spin_loop();
    }
}

/// Test spinning threads are interleaved by the timer
#[test]
fn test_spinning_threads_are_preempted() {
    with_runtime(WATCHDOG, || {
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new([AtomicU64::new(0), AtomicU64::new(0)]);

        let threads: Vec<_> = (0..2)
            .map(|i| {
                let stop = stop.clone();
                let counters = counters.clone();
                crate::spawn(move || spin_until(&stop, &counters[i]), 0).unwrap()
            })
            .collect();

        // The first spinner never yields, so the second one only runs
        // after the timer cut the first one off
        while counters.iter().any(|c| c.load(Ordering::Relaxed) == 0) {
            crate::yield_now();
        }

        let stats = crate::stats().unwrap();
        assert!(stats.preemptions > 0);
        let involuntary: u64 = threads
            .iter()
            .map(|&t| crate::thread_stats(t).unwrap().involuntary_switches)
            .sum();
        assert!(involuntary > 0);

        stop.store(true, Ordering::Relaxed);
        for t in threads {
            crate::join(t).unwrap();
        }
    });
}

/// Spin on `poll` next to a thread that only has to run once
///
/// Returns whether the spinner saw the other thread run while it was
/// still spinning. An OS thread ends the spin after a few seconds either way.
fn other_runs_while_polling(poll: fn()) -> bool {
    let give_up = Arc::new(AtomicBool::new(false));
    let deadline = give_up.clone();
    // Started before any green thread exists, so it is never preempted
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(3));
        deadline.store(true, Ordering::SeqCst);
    });

    let other_ran = Arc::new(AtomicBool::new(false));
    let seen = Arc::new(AtomicBool::new(false));

    let (ran, saw) = (other_ran.clone(), seen.clone());
    let spinner = crate::spawn(
        move || {
            while !ran.load(Ordering::SeqCst) && !give_up.load(Ordering::SeqCst) {
                poll();
                hint::spin_loop();
            }
            saw.store(ran.load(Ordering::SeqCst), Ordering::SeqCst);
        },
        0,
    )
    .unwrap();
    let flag = other_ran.clone();
    let other = crate::spawn(move || flag.store(true, Ordering::SeqCst), 0).unwrap();

    crate::join(spinner).unwrap();
    crate::join(other).unwrap();
    seen.load(Ordering::SeqCst)
}

/// Test introspection calls in a loop do not restart the quantum
#[test]
fn test_polling_current_is_preempted() {
    with_runtime(WATCHDOG, || {
        assert!(other_runs_while_polling(|| {
            let _ = crate::current();
        }));
        assert!(crate::stats().unwrap().preemptions > 0);
    });
}

/// Test short masked sections in a loop do not restart the quantum
#[test]
fn test_polling_masked_sections_is_preempted() {
    with_runtime(WATCHDOG, || {
        assert!(other_runs_while_polling(|| {
            crate::without_preemption(hint::spin_loop);
            let _ = crate::thread_stats(crate::ThreadId::HOST);
        }));
    });
}

/// Test join keeps waiting while the target never exits
#[test]
fn test_join_blocks_on_running_thread() {
    let stop = Arc::new(AtomicBool::new(false));
    let (event_tx, event_rx) = mpsc::channel();

    let remote_stop = stop.clone();
    let host = thread::spawn(move || {
        crate::init(crate::Config::default().with_stack_size(super::TEST_STACK_SIZE)).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        let spinner = crate::spawn(move || spin_until(&remote_stop, &counter), 0).unwrap();

        preempt::without_preemption(|| event_tx.send("joining").unwrap());
        let result = crate::join(spinner);
        preempt::without_preemption(|| event_tx.send("joined").unwrap());
        result.unwrap();
    });

    assert_eq!(event_rx.recv_timeout(WATCHDOG), Ok("joining"));
    // The spinner ignores everything but the stop flag
    assert_eq!(
        event_rx.recv_timeout(Duration::from_millis(500)),
        Err(RecvTimeoutError::Timeout)
    );

    stop.store(true, Ordering::Relaxed);
    assert_eq!(event_rx.recv_timeout(WATCHDOG), Ok("joined"));
    host.join().unwrap();
}

/// Test a masked section is never interrupted by another thread
#[test]
fn test_without_preemption_holds_the_processor() {
    with_runtime(WATCHDOG, || {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let t = crate::spawn(move || flag.store(true, Ordering::SeqCst), 0).unwrap();

        crate::without_preemption(|| {
            assert!(preempt::is_masked());
            // Well past several quanta of CPU time
            let start = Instant::now();
            while start.elapsed() < Duration::from_millis(200) {
                hint::spin_loop();
            }
            assert!(!ran.load(Ordering::SeqCst));
            assert_eq!(crate::current(), Some(crate::ThreadId::HOST));
        });
        assert!(!preempt::is_masked());

        crate::join(t).unwrap();
        assert!(ran.load(Ordering::SeqCst));
    });
}
