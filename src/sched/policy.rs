// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduling policies
//!
//! A policy decides which queued thread runs next. The run queues
//! themselves are owned by the scheduler; a policy only picks from them.

use super::state::{Priority, RunQueueSet};
use super::thread::ThreadId;

/// Selection strategy over the per-priority run queues
///
/// Implementations must be async-signal-safe: [`select`](Self::select) is
/// called from the preemption handler, so it must not allocate, lock or
/// log.
pub trait SchedulingPolicy: Send {
    /// Short name, used in log messages
    fn name(&self) -> &'static str;

    /// Queue a thread that became ready
    fn enqueue(&mut self, queues: &mut RunQueueSet, priority: Priority, tid: ThreadId) -> bool {
        queues.enqueue(priority, tid)
    }

    /// Remove and return the next thread to run
    fn select(&mut self, queues: &mut RunQueueSet) -> Option<ThreadId>;
}

/// Strict priority with FIFO order inside each level
///
/// Always serves the lowest-numbered non-empty queue. There is no aging:
/// while a higher-priority queue stays non-empty, lower levels never run.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictPriority;

impl SchedulingPolicy for StrictPriority {
    fn name(&self) -> &'static str {
        "strict-priority"
    }

    fn select(&mut self, queues: &mut RunQueueSet) -> Option<ThreadId> {
        let priority = queues.highest_ready()?;
        queues.dequeue_at(priority)
    }
}
