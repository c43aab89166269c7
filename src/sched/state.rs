// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread state and run queues
//!
//! Defines thread states, priorities and the per-priority run queues.

use core::fmt;

use super::thread::ThreadId;
use crate::config::{MAX_THREADS, NEUTRAL_PRIORITY, PRIORITY_LEVELS};

/// Thread states
///
/// `Unset -> Ready -> Running -> Terminated`, plus `Running -> Ready` when
/// a thread yields or is preempted. `Terminated -> Unset` happens only when
/// the thread is joined.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadState {
    /// Slot is free
    #[default]
    Unset,
    /// Thread is waiting in a run queue
    Ready,
    /// Thread is currently running
    Running,
    /// Thread has exited but has not been joined yet
    Terminated,
}

impl ThreadState {
    /// Check if the slot holds a thread that has not been reaped
    pub const fn is_live(&self) -> bool {
        !matches!(self, Self::Unset)
    }

    /// Check if the thread can still be scheduled
    pub const fn is_runnable(&self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

/// Thread priority level
///
/// Lower values are scheduled first; 0 is the highest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    /// Highest priority
    pub const HIGHEST: Self = Self(0);

    /// Lowest priority
    pub const LOWEST: Self = Self((PRIORITY_LEVELS - 1) as u8);

    /// Priority of the host thread and of threads created with niceness 0
    pub const NEUTRAL: Self = Self(NEUTRAL_PRIORITY as u8);

    /// Priority for a given creation-time niceness, clamped to the valid range
    pub fn from_niceness(niceness: i32) -> Self {
        let level = (NEUTRAL_PRIORITY as i64 + niceness as i64).clamp(0, PRIORITY_LEVELS as i64 - 1);
        Self(level as u8)
    }

    /// Priority at an explicit level, if it is in range
    pub const fn new(level: usize) -> Option<Self> {
        if level < PRIORITY_LEVELS {
            Some(Self(level as u8))
        } else {
            None
        }
    }

    /// Queue index of this priority
    pub const fn level(self) -> usize {
        self.0 as usize
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// FIFO ring buffer of thread ids
///
/// Capacity equals the thread table size, so it cannot overflow while
/// every thread is queued at most once.
#[derive(Debug, Clone)]
pub struct RingQueue {
    slots: [ThreadId; MAX_THREADS],
    head: usize,
    len: usize,
}

impl RingQueue {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            slots: [ThreadId::from_index(0); MAX_THREADS],
            head: 0,
            len: 0,
        }
    }

    /// Append a thread; returns false if the queue is full
    pub fn push(&mut self, tid: ThreadId) -> bool {
        if self.len == MAX_THREADS {
            return false;
        }
        self.slots[(self.head + self.len) % MAX_THREADS] = tid;
        self.len += 1;
        true
    }

    /// Remove the oldest thread
    pub fn pop(&mut self) -> Option<ThreadId> {
        if self.len == 0 {
            return None;
        }
        let tid = self.slots[self.head];
        self.head = (self.head + 1) % MAX_THREADS;
        self.len -= 1;
        Some(tid)
    }

    /// Oldest thread, without removing it
    pub fn peek(&self) -> Option<ThreadId> {
        (self.len > 0).then(|| self.slots[self.head])
    }

    /// Number of queued threads
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        (0..self.len).map(move |i| self.slots[(self.head + i) % MAX_THREADS])
    }
}

impl Default for RingQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Run queue set
///
/// One [`RingQueue`] per priority level. Which queue is served next is
/// decided by a [`SchedulingPolicy`](super::policy::SchedulingPolicy).
#[derive(Debug, Clone)]
pub struct RunQueueSet {
    queues: [RingQueue; PRIORITY_LEVELS],
    total: usize,
}

impl RunQueueSet {
    /// Create an empty run queue set
    pub const fn new() -> Self {
        Self {
            queues: [const { RingQueue::new() }; PRIORITY_LEVELS],
            total: 0,
        }
    }

    /// Append a thread to the queue of `priority`
    pub fn enqueue(&mut self, priority: Priority, tid: ThreadId) -> bool {
        let pushed = self.queues[priority.level()].push(tid);
        if pushed {
            self.total += 1;
        }
        pushed
    }

    /// Remove the oldest thread of one priority level
    pub fn dequeue_at(&mut self, priority: Priority) -> Option<ThreadId> {
        let tid = self.queues[priority.level()].pop()?;
        self.total -= 1;
        Some(tid)
    }

    /// Highest non-empty priority level
    pub fn highest_ready(&self) -> Option<Priority> {
        self.queues
            .iter()
            .position(|q| !q.is_empty())
            .map(|level| Priority(level as u8))
    }

    /// The queue of one priority level
    pub fn queue(&self, priority: Priority) -> &RingQueue {
        &self.queues[priority.level()]
    }

    /// Number of times `tid` appears across all queues
    pub fn occurrences(&self, tid: ThreadId) -> usize {
        self.queues
            .iter()
            .map(|q| q.iter().filter(|&queued| queued == tid).count())
            .sum()
    }

    /// Total number of queued threads
    pub fn len(&self) -> usize {
        self.total
    }

    /// Check if no thread is queued
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl Default for RunQueueSet {
    fn default() -> Self {
        Self::new()
    }
}
