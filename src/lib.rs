// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! # Strand - Preemptive Green Threads for Linux
//!
//! Strand multiplexes many user-level threads onto the OS thread that
//! creates them:
//!
//! - **Preemptive**: a CPU-time timer interrupts threads that run past
//!   their quantum
//! - **Priority scheduled**: strict priority between levels, round-robin
//!   inside a level
//! - **Explicit lifecycle**: threads are created, may yield, exit, and are
//!   reclaimed by `join`
//!
//! ## Architecture
//!
//! ```text
//! src/
//! ├── arch/              # Register files and naked context switches
//! │   ├── amd64/         # x86_64 System V
//! │   └── arm64/         # AArch64 AAPCS64
//! ├── dispatch/          # Contexts, stacks, resumable and terminal switches
//! ├── sched/             # Thread table, run queues, policy, runtime
//! ├── preempt/           # Quantum timer, signal handler, critical sections
//! ├── config.rs          # Tunables
//! ├── error.rs           # Error type
//! └── lib.rs             # This file
//! ```
//!
//! ## Runtimes
//!
//! Each OS thread that calls into strand gets its own runtime the first
//! time it creates a thread (or explicitly through [`init`]). The calling
//! OS thread becomes thread `#0` at the neutral priority. Runtimes on
//! different OS threads are fully independent.
//!
//! ## Priorities
//!
//! A thread's priority is fixed at creation: the neutral level plus its
//! niceness, clamped to `0..PRIORITY_LEVELS`. The lowest-numbered
//! non-empty level always runs first; there is no aging, so a busy
//! higher level starves every lower one.
//!
//! ## Reentrancy
//!
//! A thread can be preempted at any instruction. Code that is not
//! reentrant with respect to other green threads on the same OS thread
//! (the allocator, stdio locks, loggers) should run inside
//! [`without_preemption`].
//!
//! ## Example
//!
//! ```no_run
//! fn worker(n: usize) {
//!     for _ in 0..n {
//!         strand::yield_now();
//!     }
//! }
//!
//! let a = strand::create(worker, 10, 0).unwrap();
//! let b = strand::spawn(|| worker(5), 0).unwrap();
//! strand::join(a).unwrap();
//! strand::join(b).unwrap();
//! ```

// Architecture-specific modules
pub mod arch;

// Tunables and configuration
pub mod config;

// Context dispatch
pub mod dispatch;

// Error types
pub mod error;

// Preemption timer and critical sections
pub mod preempt;

// Scheduler and thread management
pub mod sched;

#[cfg(test)]
mod tests;

pub use config::{Config, MAX_THREADS, PRIORITY_LEVELS, QUANTUM, STACK_SIZE};
pub use error::{Error, Result};
pub use preempt::without_preemption;
pub use sched::{
    EntryPoint, RuntimeStats, SchedulingPolicy, StrictPriority, ThreadId, ThreadState, ThreadStats,
};

use sched::{runtime, Start};

/// Create the runtime of the calling OS thread with a custom configuration
///
/// Optional: the first [`create`] or [`spawn`] initializes a default
/// runtime. Fails with [`Error::AlreadyInitialized`] if one exists.
pub fn init(config: Config) -> Result<()> {
    init_with_policy(config, Box::new(StrictPriority))
}

/// Create the runtime of the calling OS thread with a custom policy
pub fn init_with_policy(config: Config, policy: Box<dyn SchedulingPolicy>) -> Result<()> {
    runtime::init(config, policy).map(|_| ())
}

/// Create a thread running `entry(arg)`
///
/// The thread's priority is the neutral level plus `niceness`; larger
/// values run later. The thread is queued and runs once the scheduler
/// selects it. Returns [`Error::NoFreeSlot`] when all [`MAX_THREADS`]
/// slots are in use.
pub fn create(entry: EntryPoint, arg: usize, niceness: i32) -> Result<ThreadId> {
    runtime::create(niceness, || Start::Entry { entry, arg })
}

/// Create a thread running a closure
///
/// Like [`create`], with the closure boxed while preemption is masked.
pub fn spawn<F>(f: F, niceness: i32) -> Result<ThreadId>
where
    F: FnOnce() + Send + 'static,
{
    runtime::create(niceness, move || Start::closure(f))
}

/// Let another ready thread of equal or higher priority run
///
/// Does nothing on an OS thread without a runtime.
pub fn yield_now() {
    runtime::yield_now()
}

/// Terminate the calling thread
///
/// The thread's stack is kept until it is joined. Returning from a
/// thread's start routine has the same effect.
///
/// # Panics
///
/// Panics if the calling OS thread has no runtime. Aborts the process if
/// no other thread is ready to run.
pub fn exit() -> ! {
    runtime::exit()
}

/// Wait for a thread to terminate, then reclaim its slot and stack
///
/// Waits by yielding, so the caller keeps being scheduled while the
/// target runs. Returns [`Error::InvalidHandle`] if `id` names no thread,
/// [`Error::JoinSelf`] if it names the caller, and [`Error::Panicked`]
/// (after reclaiming the slot) if the thread's start routine panicked.
pub fn join(id: ThreadId) -> Result<()> {
    runtime::join(id)
}

/// The calling thread, or `None` without a runtime
pub fn current() -> Option<ThreadId> {
    runtime::current()
}

/// State of a thread slot, or `None` without a runtime or out of range
pub fn state(id: ThreadId) -> Option<ThreadState> {
    runtime::state(id)
}

/// Statistics of a live thread
pub fn thread_stats(id: ThreadId) -> Option<ThreadStats> {
    runtime::thread_stats(id)
}

/// Counters of the calling OS thread's runtime
pub fn stats() -> Option<RuntimeStats> {
    runtime::stats()
}
