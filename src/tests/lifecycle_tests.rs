// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread Lifecycle Tests
//!
//! Create, yield, exit and join, observed through the public API.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{with_runtime, WATCHDOG};
use crate::config::MAX_THREADS;
use crate::error::Error;
use crate::sched::{ThreadId, ThreadState};

const THREADS: usize = 8;
const YIELDS: usize = 50;

/// Test N threads yielding K times each, then exiting and being joined
#[test]
fn test_yield_round_trip() {
    with_runtime(WATCHDOG, || {
        let counters: Arc<[AtomicUsize; THREADS]> = Arc::new(Default::default());
        let baseline = crate::stats().unwrap().live_stacks;

        let threads: Vec<ThreadId> = (0..THREADS)
            .map(|i| {
                let counters = counters.clone();
                crate::spawn(
                    move || {
                        for _ in 0..YIELDS {
                            counters[i].fetch_add(1, Ordering::Relaxed);
                            crate::yield_now();
                        }
                        // Half exit explicitly, half fall off the end
                        if i % 2 == 0 {
                            crate::exit();
                        }
                    },
                    0,
                )
                .unwrap()
            })
            .collect();
        assert_eq!(crate::stats().unwrap().live_stacks, baseline + THREADS);

        // Let every thread run to completion before reaping any of them
        while !threads
            .iter()
            .all(|&t| crate::state(t) == Some(ThreadState::Terminated))
        {
            crate::yield_now();
        }

        for &t in &threads {
            let stats = crate::thread_stats(t).unwrap();
            assert!(stats.voluntary_switches >= YIELDS as u64 - 1);
            crate::join(t).unwrap();
            assert_eq!(crate::state(t), Some(ThreadState::Unset));
        }

        for counter in counters.iter() {
            assert_eq!(counter.load(Ordering::Relaxed), YIELDS);
        }
        let stats = crate::stats().unwrap();
        assert_eq!(stats.live_stacks, baseline);
        assert_eq!(stats.threads, 1);
        assert_eq!(stats.ready, 0);
    });
}

static ENTRY_ARG: AtomicUsize = AtomicUsize::new(0);

fn store_arg(arg: usize) {
    ENTRY_ARG.store(arg, Ordering::SeqCst);
}

/// Test a plain function thread receives its argument
#[test]
fn test_create_passes_argument() {
    with_runtime(WATCHDOG, || {
        let t = crate::create(store_arg, 0xC0FFEE, 0).unwrap();
        assert_eq!(crate::state(t), Some(ThreadState::Ready));
        crate::join(t).unwrap();
        assert_eq!(ENTRY_ARG.load(Ordering::SeqCst), 0xC0FFEE);
    });
}

/// Test threads returning one after another all reach the exit path
#[test]
fn test_repeated_returns() {
    with_runtime(WATCHDOG, || {
        let finished = Arc::new(AtomicUsize::new(0));

        // One at a time: every return enters the exit context afresh
        for _ in 0..8 {
            let f = finished.clone();
            let t = crate::spawn(
                move || {
                    f.fetch_add(1, Ordering::SeqCst);
                },
                0,
            )
            .unwrap();
            crate::join(t).unwrap();
        }
        assert_eq!(finished.load(Ordering::SeqCst), 8);

        // Back to back, without being joined in between
        let threads: Vec<ThreadId> = (0..8).map(|_| crate::create(|_| {}, 0, 0).unwrap()).collect();
        for t in threads {
            crate::join(t).unwrap();
        }
        assert_eq!(crate::stats().unwrap().live_stacks, 0);
    });
}

/// Test a joined slot is handed out again
#[test]
fn test_slot_reuse() {
    with_runtime(WATCHDOG, || {
        let first = crate::spawn(|| {}, 0).unwrap();
        assert_eq!(first, ThreadId::from_index(1));
        crate::join(first).unwrap();

        let second = crate::spawn(|| {}, 0).unwrap();
        assert_eq!(second, first);
        crate::join(second).unwrap();
    });
}

/// Test joining a slot that holds no thread
#[test]
fn test_join_invalid_handle() {
    with_runtime(WATCHDOG, || {
        let before = crate::stats().unwrap();

        let unset = ThreadId::from_index(5);
        assert!(matches!(crate::join(unset), Err(Error::InvalidHandle(t)) if t == unset));
        let out_of_range = ThreadId::from_index(MAX_THREADS + 3);
        assert!(matches!(crate::join(out_of_range), Err(Error::InvalidHandle(_))));

        // No side effects: nothing was switched or reclaimed
        let after = crate::stats().unwrap();
        assert_eq!(after.switches, before.switches);
        assert_eq!(after.threads, before.threads);
        assert_eq!(crate::state(unset), Some(ThreadState::Unset));
    });
}

/// Test joining an already reaped thread
#[test]
fn test_join_twice() {
    with_runtime(WATCHDOG, || {
        let t = crate::spawn(|| {}, 0).unwrap();
        crate::join(t).unwrap();
        assert!(matches!(crate::join(t), Err(Error::InvalidHandle(_))));
    });
}

/// Test a thread cannot join itself
#[test]
fn test_join_self() {
    with_runtime(WATCHDOG, || {
        assert!(matches!(
            crate::join(ThreadId::HOST),
            Err(Error::JoinSelf(ThreadId::HOST))
        ));

        let rejected = Arc::new(AtomicBool::new(false));
        let flag = rejected.clone();
        let t = crate::spawn(
            move || {
                if let Some(me) = crate::current() {
                    let result = crate::join(me);
                    flag.store(matches!(result, Err(Error::JoinSelf(_))), Ordering::SeqCst);
                }
            },
            0,
        )
        .unwrap();
        crate::join(t).unwrap();
        assert!(rejected.load(Ordering::SeqCst));
    });
}

/// Test explicit exit and returning both terminate the thread
#[test]
fn test_exit_and_return() {
    with_runtime(WATCHDOG, || {
        let reached = Arc::new(AtomicUsize::new(0));

        let r = reached.clone();
        let exits = crate::spawn(
            move || {
                r.fetch_add(1, Ordering::SeqCst);
                crate::exit();
            },
            0,
        )
        .unwrap();
        let r = reached.clone();
        let returns = crate::spawn(
            move || {
                r.fetch_add(1, Ordering::SeqCst);
            },
            0,
        )
        .unwrap();

        crate::join(exits).unwrap();
        crate::join(returns).unwrap();
        assert_eq!(reached.load(Ordering::SeqCst), 2);
        assert_eq!(crate::stats().unwrap().live_stacks, 0);
    });
}

/// Test a panicking thread is contained and reported by join
#[test]
fn test_panicking_thread() {
    with_runtime(WATCHDOG, || {
        let t = crate::spawn(|| panic!("green thread panic"), 0).unwrap();
        assert!(matches!(crate::join(t), Err(Error::Panicked(p)) if p == t));

        // The slot was reclaimed anyway
        assert_eq!(crate::state(t), Some(ThreadState::Unset));
        assert_eq!(crate::stats().unwrap().live_stacks, 0);
        let again = crate::spawn(|| {}, 0).unwrap();
        assert_eq!(again, t);
        crate::join(again).unwrap();
    });
}

/// Test creating threads until the table is full
#[test]
fn test_table_full() {
    with_runtime(WATCHDOG, || {
        let threads: Vec<ThreadId> = (1..MAX_THREADS)
            .map(|_| crate::spawn(|| {}, 0).unwrap())
            .collect();

        let err = crate::spawn(|| {}, 0).unwrap_err();
        assert!(matches!(err, Error::NoFreeSlot { capacity: MAX_THREADS }));
        assert_eq!(err.errno(), libc::EAGAIN);

        for t in threads {
            crate::join(t).unwrap();
        }
        assert_eq!(crate::stats().unwrap().threads, 1);
    });
}

static ORDER: [AtomicUsize; 3] = [const { AtomicUsize::new(usize::MAX) }; 3];
static SEQUENCE: AtomicUsize = AtomicUsize::new(0);

fn record_order(slot: usize) {
    ORDER[slot].store(SEQUENCE.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
}

/// Test higher priorities run first, whatever the creation order
#[test]
fn test_priority_order() {
    with_runtime(WATCHDOG, || {
        // Niceness 0 shares the host's level; the others run ahead of it
        let neutral = crate::create(record_order, 0, 0).unwrap();
        let nicer = crate::create(record_order, 1, -1).unwrap();
        let nicest = crate::create(record_order, 2, -2).unwrap();

        crate::join(neutral).unwrap();
        crate::join(nicer).unwrap();
        crate::join(nicest).unwrap();

        let order: Vec<usize> = ORDER.iter().map(|o| o.load(Ordering::SeqCst)).collect();
        assert_eq!(order, vec![2, 1, 0]);
    });
}

/// Test threads can create other threads
#[test]
fn test_create_from_green_thread() {
    with_runtime(WATCHDOG, || {
        let child = Arc::new(AtomicUsize::new(usize::MAX));
        let slot = child.clone();
        let parent = crate::spawn(
            move || {
                let t = crate::create(|_| {}, 7, 0);
                if let Ok(t) = t {
                    slot.store(t.index(), Ordering::SeqCst);
                    let _ = crate::join(t);
                }
            },
            0,
        )
        .unwrap();
        crate::join(parent).unwrap();
        assert_eq!(child.load(Ordering::SeqCst), 2);
    });
}
