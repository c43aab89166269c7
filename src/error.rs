// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Error types
//!
//! Every failure is reported synchronously by the call that caused it and
//! is never retried. Corruption of the run queues or a double release of a
//! stack are contract violations, not errors; they are prevented by the
//! scheduler invariants and by [`Dispatcher::teardown`](crate::dispatch::Dispatcher::teardown)
//! consuming its context.

use std::io;

use thiserror::Error;

use crate::sched::ThreadId;

/// The error type for all runtime operations
#[derive(Debug, Error)]
pub enum Error {
    /// Every slot of the thread table is in use
    #[error("thread table is full ({capacity} slots in use)")]
    NoFreeSlot {
        /// Capacity of the thread table
        capacity: usize,
    },

    /// The memory for a thread stack could not be mapped
    #[error("failed to allocate a {size}-byte thread stack")]
    StackAllocation {
        /// Requested usable stack size
        size: usize,
        /// Error reported by the OS
        #[source]
        source: io::Error,
    },

    /// The handle does not name a live thread
    #[error("invalid thread handle {0}")]
    InvalidHandle(ThreadId),

    /// A thread tried to join itself, which can never complete
    #[error("thread {0} cannot join itself")]
    JoinSelf(ThreadId),

    /// The joined thread's start routine panicked; its slot was reclaimed
    #[error("thread {0} panicked")]
    Panicked(ThreadId),

    /// An OS primitive needed by the runtime failed
    #[error("{call} failed")]
    Primitive {
        /// Name of the failing call
        call: &'static str,
        /// Error reported by the OS
        #[source]
        source: io::Error,
    },

    /// The calling OS thread already hosts a runtime
    #[error("runtime already initialized on this thread")]
    AlreadyInitialized,

    /// The configuration was rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl Error {
    /// Build a [`Error::Primitive`] from the calling thread's `errno`
    pub(crate) fn last_os_error(call: &'static str) -> Self {
        Self::Primitive {
            call,
            source: io::Error::last_os_error(),
        }
    }

    /// The closest POSIX error number for this error
    ///
    /// Mirrors the codes a C threading API would set: `EAGAIN` when no
    /// thread slot is free, `EINVAL` for bad handles and `ENOMEM` when a
    /// stack cannot be allocated.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoFreeSlot { .. } => libc::EAGAIN,
            Self::StackAllocation { .. } => libc::ENOMEM,
            Self::InvalidHandle(_) | Self::InvalidConfig(_) => libc::EINVAL,
            Self::JoinSelf(_) => libc::EDEADLK,
            Self::AlreadyInitialized => libc::EBUSY,
            Self::Panicked(_) => libc::ECANCELED,
            Self::Primitive { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Result type used throughout the crate
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::NoFreeSlot { capacity: 64 }.errno(), libc::EAGAIN);
        assert_eq!(Error::InvalidHandle(ThreadId::from_index(3)).errno(), libc::EINVAL);
        let err = Error::StackAllocation {
            size: 4096,
            source: io::Error::from_raw_os_error(libc::ENOMEM),
        };
        assert_eq!(err.errno(), libc::ENOMEM);
    }

    #[test]
    fn test_primitive_keeps_os_code() {
        let err = Error::Primitive {
            call: "timer_create",
            source: io::Error::from_raw_os_error(libc::EPERM),
        };
        assert_eq!(err.errno(), libc::EPERM);
        assert_eq!(err.to_string(), "timer_create failed");
    }

    #[test]
    fn test_display_names_thread() {
        let err = Error::InvalidHandle(ThreadId::from_index(7));
        assert_eq!(err.to_string(), "invalid thread handle #7");
    }
}
