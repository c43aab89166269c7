// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler tunables
//!
//! Table and queue sizes are compile-time constants because the thread
//! table and the run queues are fixed-size arrays. Stack size and the
//! scheduling quantum can be chosen per runtime through [`Config`].

use core::time::Duration;

use crate::error::{Error, Result};

/// Maximum number of concurrently existing threads per runtime
/// (including the host thread in slot 0)
pub const MAX_THREADS: usize = 64;

/// Number of priority levels (0 is the highest priority)
pub const PRIORITY_LEVELS: usize = 32;

/// Priority given to the host thread and to threads created with niceness 0
pub const NEUTRAL_PRIORITY: usize = PRIORITY_LEVELS / 2;

/// Default usable stack size per thread (32KB)
pub const STACK_SIZE: usize = 32 * 1024;

/// Smallest stack size accepted by [`Config::validate`]
pub const MIN_STACK_SIZE: usize = 8 * 1024;

/// Largest stack size accepted by [`Config::validate`] (256MB)
pub const MAX_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Size of the inaccessible guard region below every stack
pub const GUARD_SIZE: usize = 4096;

/// Default scheduling quantum (20ms of host CPU time)
pub const QUANTUM: Duration = Duration::from_millis(20);

/// Runtime configuration
///
/// Applied once, when the runtime of the calling OS thread is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Usable stack size of every thread context, in bytes
    pub stack_size: usize,
    /// CPU time a thread may run before it is preempted
    pub quantum: Duration,
}

impl Config {
    /// Create a configuration with the default tunables
    pub const fn new() -> Self {
        Self {
            stack_size: STACK_SIZE,
            quantum: QUANTUM,
        }
    }

    /// Set the per-thread stack size
    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Set the scheduling quantum
    pub const fn with_quantum(mut self, quantum: Duration) -> Self {
        self.quantum = quantum;
        self
    }

    /// Check that the configuration can be used to build a runtime
    ///
    /// The stack size is rounded up to whole pages when stacks are mapped,
    /// so any value from [`MIN_STACK_SIZE`] to [`MAX_STACK_SIZE`] is accepted.
    pub fn validate(&self) -> Result<()> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(Error::InvalidConfig("stack size below minimum"));
        }
        if self.stack_size > MAX_STACK_SIZE {
            return Err(Error::InvalidConfig("stack size above maximum"));
        }
        if self.quantum.is_zero() {
            return Err(Error::InvalidConfig("quantum must be non-zero"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
