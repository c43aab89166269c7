// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread representation
//!
//! Defines the thread control block and related types.

use core::fmt;

use bitflags::bitflags;

use super::state::{Priority, ThreadState};
use crate::dispatch::Context;

/// Thread handle
///
/// An index into the thread table of one runtime. Slot 0 is always the
/// host thread. Handles are reused once a terminated thread is joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(usize);

impl ThreadId {
    /// The host thread
    pub const HOST: Self = Self(0);

    /// Handle for a table index
    pub const fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Table index of this handle
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Function entry point type
pub type EntryPoint = fn(usize);

/// What a thread runs when it is first scheduled
pub enum Start {
    /// Plain function with a word-sized argument
    Entry {
        /// Function to call
        entry: EntryPoint,
        /// Argument passed to `entry`
        arg: usize,
    },
    /// Boxed closure
    ///
    /// `FnMut` so the box can be called through a reference and freed
    /// later, when preemption is masked.
    Closure(Box<dyn FnMut() + Send>),
}

impl Start {
    /// Wrap a one-shot closure
    pub fn closure<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let mut f = Some(f);
        Self::Closure(Box::new(move || {
            if let Some(f) = f.take() {
                f()
            }
        }))
    }

    /// Run the start routine
    pub fn run(&mut self) {
        match self {
            Self::Entry { entry, arg } => entry(*arg),
            Self::Closure(f) => f(),
        }
    }
}

impl fmt::Debug for Start {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry { entry, arg } => f
                .debug_struct("Entry")
                .field("entry", &(*entry as usize as *const ()))
                .field("arg", arg)
                .finish(),
            Self::Closure(_) => f.write_str("Closure(..)"),
        }
    }
}

bitflags! {
    /// Thread control block flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TcbFlags: u8 {
        /// Runs on the OS thread's own stack
        const HOST = 1 << 0;
        /// The start routine panicked
        const PANICKED = 1 << 1;
    }
}

/// Thread statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadStats {
    /// Number of times this thread has been scheduled
    pub schedule_count: u64,
    /// Number of voluntary context switches
    pub voluntary_switches: u64,
    /// Number of involuntary context switches
    pub involuntary_switches: u64,
}

/// Thread control block
///
/// Scheduler bookkeeping for one slot of the thread table.
#[derive(Debug)]
pub struct Tcb {
    /// Execution context; `None` while the slot is unset
    pub context: Option<Context>,
    /// Thread state
    pub state: ThreadState,
    /// Base priority, fixed at creation
    pub priority: Priority,
    /// Start routine, taken when the thread first runs
    pub start: Option<Start>,
    /// Flags
    pub flags: TcbFlags,
    /// Statistics
    pub stats: ThreadStats,
}

impl Tcb {
    /// An unset slot
    pub const fn empty() -> Self {
        Self {
            context: None,
            state: ThreadState::Unset,
            priority: Priority::NEUTRAL,
            start: None,
            flags: TcbFlags::empty(),
            stats: ThreadStats {
                schedule_count: 0,
                voluntary_switches: 0,
                involuntary_switches: 0,
            },
        }
    }

    /// Check if this slot holds the host thread
    pub fn is_host(&self) -> bool {
        self.flags.contains(TcbFlags::HOST)
    }

    /// Check if the start routine panicked
    pub fn panicked(&self) -> bool {
        self.flags.contains(TcbFlags::PANICKED)
    }
}

impl Default for Tcb {
    fn default() -> Self {
        Self::empty()
    }
}
