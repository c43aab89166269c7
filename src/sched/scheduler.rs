// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler core
//!
//! Pure bookkeeping over the thread table and the run queues. Nothing in
//! this module switches stacks or touches signals: every operation returns
//! what the caller has to do, and the runtime performs the switch after
//! the scheduler borrow has ended.
//!
//! Every method here may run inside the preemption handler, so none of
//! them allocate or log.

use super::policy::SchedulingPolicy;
use super::state::{Priority, RunQueueSet, ThreadState};
use super::thread::{Start, Tcb, TcbFlags, ThreadId, ThreadStats};
use crate::config::MAX_THREADS;
use crate::dispatch::Context;
use crate::error::{Error, Result};

/// Why the running thread gives up the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// The thread called `yield_now` or is polling in `join`
    Yield,
    /// The scheduling quantum expired
    Preempt,
}

/// A context switch decided by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    /// Thread that stops running
    pub prev: ThreadId,
    /// Thread that runs next
    pub next: ThreadId,
}

/// A thread removed from the table by [`Scheduler::reap`]
#[derive(Debug)]
pub struct Reaped {
    /// Context to tear down
    pub context: Option<Context>,
    /// Whether the start routine panicked
    pub panicked: bool,
}

/// Scheduler-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Context switches performed
    pub switches: u64,
    /// Preemption signals handled, whether or not they switched
    pub preemptions: u64,
}

/// Scheduler
///
/// Owns the thread table and the run queues of one runtime.
pub struct Scheduler {
    /// Thread table, indexed by [`ThreadId`]
    threads: [Tcb; MAX_THREADS],
    /// Currently running thread
    current: Option<ThreadId>,
    /// Ready threads, one queue per priority
    queues: RunQueueSet,
    /// Selection strategy
    policy: Box<dyn SchedulingPolicy>,
    /// Counters
    stats: SchedulerStats,
}

impl Scheduler {
    /// Create a scheduler with an empty table
    pub fn new(policy: Box<dyn SchedulingPolicy>) -> Self {
        Self {
            threads: [const { Tcb::empty() }; MAX_THREADS],
            current: None,
            queues: RunQueueSet::new(),
            policy,
            stats: SchedulerStats::default(),
        }
    }

    /// Register the calling OS thread as thread #0
    ///
    /// The host runs at the neutral priority and is `Running` immediately.
    pub fn adopt_host(&mut self, context: Context) -> ThreadId {
        let tid = ThreadId::HOST;
        let tcb = &mut self.threads[tid.index()];
        debug_assert_eq!(tcb.state, ThreadState::Unset);

        tcb.context = Some(context);
        tcb.state = ThreadState::Running;
        tcb.priority = Priority::NEUTRAL;
        tcb.flags = TcbFlags::HOST;
        tcb.stats.schedule_count = 1;
        self.current = Some(tid);
        tid
    }

    /// Find the first free slot
    ///
    /// The slot stays `Unset` until [`admit`](Self::admit) fills it.
    pub fn allocate_slot(&self) -> Result<ThreadId> {
        self.threads
            .iter()
            .position(|tcb| tcb.state == ThreadState::Unset)
            .map(ThreadId::from_index)
            .ok_or(Error::NoFreeSlot {
                capacity: MAX_THREADS,
            })
    }

    /// Fill a free slot and queue the new thread
    pub fn admit(&mut self, tid: ThreadId, context: Context, start: Start, priority: Priority) {
        let tcb = &mut self.threads[tid.index()];
        debug_assert_eq!(tcb.state, ThreadState::Unset);

        *tcb = Tcb {
            context: Some(context),
            state: ThreadState::Ready,
            priority,
            start: Some(start),
            flags: TcbFlags::empty(),
            stats: ThreadStats::default(),
        };
        let queued = self.policy.enqueue(&mut self.queues, priority, tid);
        debug_assert!(queued, "run queue overflow");
    }

    /// Requeue the running thread and pick the next one
    ///
    /// Returns `None` when the running thread was selected again, in which
    /// case nothing has to be switched.
    pub fn reschedule(&mut self, reason: SwitchReason) -> Option<Switch> {
        if reason == SwitchReason::Preempt {
            self.stats.preemptions += 1;
        }

        let prev = self.current?;
        let tcb = &mut self.threads[prev.index()];
        debug_assert_eq!(tcb.state, ThreadState::Running);
        tcb.state = ThreadState::Ready;
        let priority = tcb.priority;
        self.policy.enqueue(&mut self.queues, priority, prev);

        let Some(next) = self.policy.select(&mut self.queues) else {
            // Unreachable with a well-behaved policy: `prev` was just queued
            self.threads[prev.index()].state = ThreadState::Running;
            return None;
        };
        self.threads[next.index()].state = ThreadState::Running;
        self.current = Some(next);
        if next == prev {
            return None;
        }

        let stats = &mut self.threads[prev.index()].stats;
        match reason {
            SwitchReason::Yield => stats.voluntary_switches += 1,
            SwitchReason::Preempt => stats.involuntary_switches += 1,
        }
        self.threads[next.index()].stats.schedule_count += 1;
        self.stats.switches += 1;

        Some(Switch { prev, next })
    }

    /// Terminate the running thread and pick the next one
    ///
    /// The terminated thread is not queued again. Returns `None` when no
    /// thread is ready to run.
    pub fn retire_current(&mut self) -> Option<Switch> {
        let prev = self.current?;
        let next = self.policy.select(&mut self.queues)?;

        self.threads[prev.index()].state = ThreadState::Terminated;
        let tcb = &mut self.threads[next.index()];
        tcb.state = ThreadState::Running;
        tcb.stats.schedule_count += 1;
        self.current = Some(next);
        self.stats.switches += 1;

        Some(Switch { prev, next })
    }

    /// Release the slot of a terminated thread
    ///
    /// Returns `None`, leaving the table untouched, unless `tid` is
    /// `Terminated`.
    pub fn reap(&mut self, tid: ThreadId) -> Option<Reaped> {
        let tcb = self.threads.get_mut(tid.index())?;
        if tcb.state != ThreadState::Terminated {
            return None;
        }

        let tcb = core::mem::take(tcb);
        Some(Reaped {
            panicked: tcb.panicked(),
            context: tcb.context,
        })
    }

    /// Take the start routine of a thread that is about to run it
    pub fn take_start(&mut self, tid: ThreadId) -> Option<Start> {
        self.threads.get_mut(tid.index())?.start.take()
    }

    /// Record that a thread's start routine panicked
    pub fn mark_panicked(&mut self, tid: ThreadId) {
        if let Some(tcb) = self.threads.get_mut(tid.index()) {
            tcb.flags.insert(TcbFlags::PANICKED);
        }
    }

    /// Raw pointer to a thread's context, for handing to dispatch
    ///
    /// The pointer stays valid until the slot is reaped.
    pub fn context_ptr(&mut self, tid: ThreadId) -> Option<*mut Context> {
        self.threads
            .get_mut(tid.index())?
            .context
            .as_mut()
            .map(|ctx| ctx as *mut Context)
    }

    /// Get the currently running thread
    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    /// State of a slot, or `None` if `tid` is out of range
    pub fn state(&self, tid: ThreadId) -> Option<ThreadState> {
        self.threads.get(tid.index()).map(|tcb| tcb.state)
    }

    /// Statistics of a live thread
    pub fn thread_stats(&self, tid: ThreadId) -> Option<ThreadStats> {
        self.threads
            .get(tid.index())
            .filter(|tcb| tcb.state.is_live())
            .map(|tcb| tcb.stats)
    }

    /// Get the thread control block of a slot
    pub fn tcb(&self, tid: ThreadId) -> Option<&Tcb> {
        self.threads.get(tid.index())
    }

    /// Number of slots in use, including terminated threads not yet joined
    pub fn thread_count(&self) -> usize {
        self.threads.iter().filter(|tcb| tcb.state.is_live()).count()
    }

    /// Get the number of threads in the run queues
    pub fn run_queue_len(&self) -> usize {
        self.queues.len()
    }

    /// Scheduler-wide counters
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Name of the active policy
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Every thread drained from the table, for runtime shutdown
    pub fn drain(&mut self) -> impl Iterator<Item = (ThreadId, Tcb)> + '_ {
        self.current = None;
        self.queues = RunQueueSet::new();
        self.threads
            .iter_mut()
            .enumerate()
            .filter(|(_, tcb)| tcb.state.is_live())
            .map(|(index, tcb)| (ThreadId::from_index(index), core::mem::take(tcb)))
    }

    /// Verify the table and queue invariants
    pub fn check_invariants(&self) -> core::result::Result<(), &'static str> {
        let mut running = 0;
        let mut ready = 0;

        for (index, tcb) in self.threads.iter().enumerate() {
            let tid = ThreadId::from_index(index);
            let queued = self.queues.occurrences(tid);
            match tcb.state {
                ThreadState::Running => {
                    running += 1;
                    if self.current != Some(tid) {
                        return Err("running thread is not current");
                    }
                    if queued != 0 {
                        return Err("running thread is queued");
                    }
                }
                ThreadState::Ready => {
                    ready += 1;
                    if queued != 1 {
                        return Err("ready thread not queued exactly once");
                    }
                }
                ThreadState::Terminated | ThreadState::Unset => {
                    if queued != 0 {
                        return Err("inactive thread is queued");
                    }
                    if self.current == Some(tid) {
                        return Err("inactive thread is current");
                    }
                }
            }
        }

        if running > 1 {
            return Err("more than one running thread");
        }
        if ready != self.queues.len() {
            return Err("run queue length mismatch");
        }
        Ok(())
    }
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("current", &self.current)
            .field("threads", &self.thread_count())
            .field("ready", &self.queues.len())
            .field("policy", &self.policy.name())
            .field("stats", &self.stats)
            .finish()
    }
}
