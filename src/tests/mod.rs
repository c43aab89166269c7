// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Integration Tests
//!
//! Scenario tests that drive complete runtimes. Every test hosts its own
//! runtime on a dedicated OS thread and is bounded by a watchdog, so a
//! scheduling bug shows up as a failure instead of a hung test run.
//!
//! Green thread bodies in these tests avoid allocation and printing:
//! a thread can be preempted at any instruction, and neither the
//! allocator nor the test output capture is reentrant across green
//! threads of one OS thread.

mod lifecycle_tests;
mod preemption_tests;
mod starvation_tests;

use std::panic;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::config::Config;

/// Stack size used by test runtimes; leaves room for debug-build frames
/// and signal frames
pub(crate) const TEST_STACK_SIZE: usize = 128 * 1024;

/// Default watchdog limit
pub(crate) const WATCHDOG: Duration = Duration::from_secs(20);

/// Run `f` as thread #0 of a fresh runtime on its own OS thread
///
/// Fails the calling test if `f` panics or does not finish within `limit`.
pub(crate) fn with_runtime<F>(limit: Duration, f: F)
where
    F: FnOnce() + Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    let host = thread::spawn(move || {
        crate::init(Config::default().with_stack_size(TEST_STACK_SIZE)).unwrap();
        f();
        let _ = done_tx.send(());
    });

    match done_rx.recv_timeout(limit) {
        Ok(()) => host.join().unwrap(),
        Err(RecvTimeoutError::Disconnected) => {
            if let Err(payload) = host.join() {
                panic::resume_unwind(payload);
            }
        }
        Err(RecvTimeoutError::Timeout) => panic!("runtime did not finish within {:?}", limit),
    }
}
