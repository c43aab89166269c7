// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Starvation Tests
//!
//! Strict priority has no aging: while the neutral level always has a
//! ready thread, a thread one level below it never runs.

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{with_runtime, WATCHDOG};

const SPINNERS: usize = 9;
const OBSERVATION: Duration = Duration::from_secs(2);

/// Shared between the host and the green threads
struct Board {
    stop: AtomicBool,
    epoch: Instant,
    /// Nanoseconds since `epoch` when the low thread last ran, 0 if never
    low_seen: AtomicU64,
    spins: AtomicU64,
}

/// Test a lower-priority thread is starved by busy neutral threads
#[test]
fn test_lower_priority_starves() {
    with_runtime(WATCHDOG, || {
        let board = Arc::new(Board {
            stop: AtomicBool::new(false),
            epoch: Instant::now(),
            low_seen: AtomicU64::new(0),
            spins: AtomicU64::new(0),
        });

        let spinners: Vec<_> = (0..SPINNERS)
            .map(|_| {
                let board = board.clone();
                crate::spawn(
                    move || {
                        while !board.stop.load(Ordering::Relaxed) {
                            board.spins.fetch_add(1, Ordering::Relaxed);
                            hint::spin_loop();
                        }
                    },
                    0,
                )
                .unwrap()
            })
            .collect();

        let low_board = board.clone();
        let low = crate::spawn(
            move || {
                while !low_board.stop.load(Ordering::Relaxed) {
                    let now = low_board.epoch.elapsed().as_nanos() as u64;
                    low_board.low_seen.store(now.max(1), Ordering::Relaxed);
                    hint::spin_loop();
                }
            },
            1,
        )
        .unwrap();

        // The host shares the neutral level with the spinners
        while board.epoch.elapsed() < OBSERVATION {
            crate::yield_now();
        }

        assert!(board.spins.load(Ordering::Relaxed) > 0);
        assert_eq!(board.low_seen.load(Ordering::Relaxed), 0);
        assert_eq!(crate::state(low), Some(crate::ThreadState::Ready));
        assert_eq!(crate::thread_stats(low).unwrap().schedule_count, 0);

        board.stop.store(true, Ordering::Relaxed);
        for t in spinners {
            crate::join(t).unwrap();
        }
        // `low` is never joined: from the neutral level it would never be
        // scheduled. It is reclaimed with the runtime.
    });
}
