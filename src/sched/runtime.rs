// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Per-host runtime
//!
//! A [`Runtime`] ties the scheduler to the dispatch layer and the quantum
//! timer of one host OS thread. It is created on first use, reachable
//! through a thread-local pointer (which the signal handler reads as
//! well), and torn down when the host OS thread exits.
//!
//! All scheduler access happens under a [`PreemptGuard`]. Logging is done
//! only while a guard is held, so a logger's lock is never held across a
//! context switch.

use core::cell::{Cell, RefCell, UnsafeCell};
use core::mem;
use core::ptr;
use std::panic::{self, AssertUnwindSafe};
use std::process;

use log::{debug, error, trace};

use super::policy::{SchedulingPolicy, StrictPriority};
use super::scheduler::{Scheduler, SchedulerStats, Switch, SwitchReason};
use super::state::{Priority, ThreadState};
use super::thread::{Start, ThreadId, ThreadStats};
use crate::config::Config;
use crate::dispatch::{switch_to, Context, Dispatcher, Transfer};
use crate::error::{Error, Result};
use crate::preempt::{self, PreemptGuard, PreemptTimer};

thread_local! {
    /// Runtime of this OS thread; null until initialized
    static RUNTIME: Cell<*const Runtime> = const { Cell::new(ptr::null()) };
    /// Owning handle, dropped when the OS thread exits
    static OWNER: RefCell<Option<Box<Runtime>>> = const { RefCell::new(None) };
}

/// Snapshot of runtime-wide counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Thread stacks allocated and not yet released
    pub live_stacks: usize,
    /// Slots in use, including the host and unjoined terminated threads
    pub threads: usize,
    /// Threads waiting in the run queues
    pub ready: usize,
    /// Context switches performed
    pub switches: u64,
    /// Preemption signals handled
    pub preemptions: u64,
}

/// Scheduler, dispatcher and timer of one host OS thread
pub struct Runtime {
    sched: UnsafeCell<Scheduler>,
    dispatcher: Dispatcher,
    timer: PreemptTimer,
}

impl Runtime {
    fn new(config: Config, policy: Box<dyn SchedulingPolicy>) -> Result<Box<Self>> {
        config.validate()?;
        preempt::install_handler()?;

        let (dispatcher, host) = Dispatcher::init_main(exit_trampoline, config.stack_size)?;
        let timer = PreemptTimer::new(config.quantum)?;

        let mut sched = Scheduler::new(policy);
        sched.adopt_host(host);

        Ok(Box::new(Self {
            sched: UnsafeCell::new(sched),
            dispatcher,
            timer,
        }))
    }

    /// Enter a preemption-free critical section
    pub fn mask(&self) -> PreemptGuard<'_> {
        PreemptGuard::new(&self.timer)
    }

    /// The scheduler, borrowed for the lifetime of a critical section
    ///
    /// # Safety
    ///
    /// No other reference obtained from this method may be alive. The
    /// returned borrow must end before any context switch.
    #[allow(clippy::mut_from_ref)]
    unsafe fn sched<'g>(&self, _masked: &'g PreemptGuard<'_>) -> &'g mut Scheduler {
        // SAFETY: the guard blocks the only asynchronous accessor, and the
        // caller guarantees exclusivity otherwise
        unsafe { &mut *self.sched.get() }
    }

    /// Perform a switch decided by the scheduler
    ///
    /// Returns once `prev` is resumed.
    ///
    /// # Safety
    ///
    /// Must be called with the guard held and no scheduler borrow alive.
    unsafe fn perform(&self, prev: *mut Context, next: *mut Context) {
        // SAFETY: both contexts live in distinct slots of the table until
        // reaped, and neither can be reaped while one of them is running
        unsafe { switch_to(next, Transfer::Resume { prev }) };
    }

    /// Give up the processor
    fn reschedule(&self, reason: SwitchReason) {
        let guard = match reason {
            SwitchReason::Yield => self.mask(),
            SwitchReason::Preempt => PreemptGuard::interrupted(&self.timer),
        };
        let contexts = {
            // SAFETY: guard held, borrow ends before the switch
            let sched = unsafe { self.sched(&guard) };
            sched.reschedule(reason).and_then(|Switch { prev, next }| {
                if reason == SwitchReason::Yield {
                    trace!("sched: {} yields to {}", prev, next);
                }
                Some((sched.context_ptr(prev)?, sched.context_ptr(next)?))
            })
        };
        if let Some((prev, next)) = contexts {
            // `next` gets a full quantum when it releases its section
            self.timer.restart();
            // SAFETY: guard held, scheduler borrow ended above
            unsafe { self.perform(prev, next) };
        }
        drop(guard);
    }

    fn create(&self, niceness: i32, start: impl FnOnce() -> Start) -> Result<ThreadId> {
        let guard = self.mask();
        // SAFETY: guard held, no switch in this section
        let sched = unsafe { self.sched(&guard) };

        let tid = sched.allocate_slot()?;
        let context = self.dispatcher.init_thread(thread_start, tid.index())?;
        let priority = Priority::from_niceness(niceness);
        sched.admit(tid, context, start(), priority);
        debug_assert!(sched.check_invariants().is_ok());

        debug!("sched: created thread {} at {}", tid, priority);
        Ok(tid)
    }

    fn join(&self, tid: ThreadId) -> Result<()> {
        loop {
            {
                let guard = self.mask();
                // SAFETY: guard held, no switch in this section
                let sched = unsafe { self.sched(&guard) };
                match sched.state(tid) {
                    None | Some(ThreadState::Unset) => return Err(Error::InvalidHandle(tid)),
                    _ if sched.current() == Some(tid) => return Err(Error::JoinSelf(tid)),
                    Some(ThreadState::Terminated) => {
                        let reaped = sched.reap(tid).ok_or(Error::InvalidHandle(tid))?;
                        if let Some(context) = reaped.context {
                            // SAFETY: a terminated thread is never resumed
                            unsafe { self.dispatcher.teardown(context) };
                        }
                        debug!("sched: joined thread {}", tid);
                        return if reaped.panicked {
                            Err(Error::Panicked(tid))
                        } else {
                            Ok(())
                        };
                    }
                    Some(ThreadState::Ready | ThreadState::Running) => {}
                }
            }
            self.reschedule(SwitchReason::Yield);
        }
    }

    fn exit(&self) -> ! {
        let guard = self.mask();
        let target = {
            // SAFETY: guard held, borrow ends before the switch
            let sched = unsafe { self.sched(&guard) };
            let prev = sched.current();
            match sched.retire_current() {
                Some(Switch { prev, next }) => {
                    debug!("sched: thread {} exited, switching to {}", prev, next);
                    sched.context_ptr(next)
                }
                None => {
                    error!("sched: thread {:?} exited with no runnable thread left", prev);
                    None
                }
            }
        };

        let Some(next) = target else {
            process::abort();
        };
        // The resumed side releases the critical section
        self.timer.restart();
        mem::forget(guard);
        // SAFETY: `next` is a live context in the table; the exiting
        // thread's stack stays mapped until it is joined
        unsafe { switch_to(next, Transfer::Terminate) };
        unreachable!("terminated thread resumed");
    }

    fn stats(&self) -> RuntimeStats {
        let guard = self.mask();
        // SAFETY: guard held, no switch in this section
        let sched = unsafe { self.sched(&guard) };
        let SchedulerStats {
            switches,
            preemptions,
        } = sched.stats();
        RuntimeStats {
            live_stacks: self.dispatcher.live_stacks(),
            threads: sched.thread_count(),
            ready: sched.run_queue_len(),
            switches,
            preemptions,
        }
    }

    fn inspect<R>(&self, f: impl FnOnce(&Scheduler) -> R) -> R {
        let guard = self.mask();
        // SAFETY: guard held, no switch in this section
        let sched: &Scheduler = unsafe { self.sched(&guard) };
        f(sched)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Stop the handler from finding a half-destroyed runtime
        RUNTIME.set(ptr::null());
        let _ = self.timer.disarm();

        let sched = self.sched.get_mut();
        debug!(
            "sched: shutting down ({} threads, policy {})",
            sched.thread_count(),
            sched.policy_name()
        );
        for (_, tcb) in sched.drain() {
            // The running context is the one executing this destructor
            if tcb.state == ThreadState::Running {
                continue;
            }
            if let Some(context) = tcb.context {
                // SAFETY: the runtime is gone, nothing can resume it
                unsafe { self.dispatcher.teardown(context) };
            }
        }
    }
}

/// Runtime of the calling OS thread, if any
pub(crate) fn current_runtime() -> Option<&'static Runtime> {
    let rt = RUNTIME.get();
    // SAFETY: the pointer is set only while OWNER keeps the box alive, and
    // is cleared before the box is dropped. Runtime is !Send and !Sync, so
    // the reference never leaves this OS thread.
    unsafe { rt.as_ref() }
}

/// Create the runtime of the calling OS thread
pub(crate) fn init(config: Config, policy: Box<dyn SchedulingPolicy>) -> Result<&'static Runtime> {
    if current_runtime().is_some() {
        return Err(Error::AlreadyInitialized);
    }

    let rt = Runtime::new(config, policy)?;
    let ptr: *const Runtime = &*rt;
    OWNER.with_borrow_mut(|owner| *owner = Some(rt));
    RUNTIME.set(ptr);

    debug!(
        "sched: runtime ready ({} byte stacks, {:?} quantum)",
        config.stack_size, config.quantum
    );

    // SAFETY: just handed to OWNER, which keeps it alive; see current_runtime
    let rt = unsafe { &*ptr };
    // Start the host's first quantum
    drop(rt.mask());
    Ok(rt)
}

fn get_or_init() -> Result<&'static Runtime> {
    match current_runtime() {
        Some(rt) => Ok(rt),
        None => init(Config::default(), Box::new(StrictPriority)),
    }
}

/// Create a thread running `start`
pub(crate) fn create(niceness: i32, start: impl FnOnce() -> Start) -> Result<ThreadId> {
    get_or_init()?.create(niceness, start)
}

/// Voluntary yield; no-op without a runtime
pub(crate) fn yield_now() {
    if let Some(rt) = current_runtime() {
        rt.reschedule(SwitchReason::Yield);
    }
}

/// Involuntary yield, called from the signal handler
pub(crate) fn preempt() {
    if let Some(rt) = current_runtime() {
        rt.reschedule(SwitchReason::Preempt);
    }
}

/// Terminate the calling thread
pub(crate) fn exit() -> ! {
    match current_runtime() {
        Some(rt) => rt.exit(),
        None => panic!("strand::exit called on an OS thread without a runtime"),
    }
}

/// Wait for a thread to terminate and reclaim it
pub(crate) fn join(tid: ThreadId) -> Result<()> {
    match current_runtime() {
        Some(rt) => rt.join(tid),
        None => Err(Error::InvalidHandle(tid)),
    }
}

pub(crate) fn current() -> Option<ThreadId> {
    current_runtime()?.inspect(Scheduler::current)
}

pub(crate) fn state(tid: ThreadId) -> Option<ThreadState> {
    current_runtime()?.inspect(|sched| sched.state(tid))
}

pub(crate) fn thread_stats(tid: ThreadId) -> Option<ThreadStats> {
    current_runtime()?.inspect(|sched| sched.thread_stats(tid))
}

pub(crate) fn stats() -> Option<RuntimeStats> {
    current_runtime().map(Runtime::stats)
}

/// Start routine of every thread context
///
/// Entered by the first switch to the thread, with preemption masked.
extern "C" fn thread_start(slot: usize) {
    let tid = ThreadId::from_index(slot);
    let Some(rt) = current_runtime() else {
        process::abort();
    };

    let guard = PreemptGuard::inherit(&rt.timer);
    // SAFETY: guard held, no switch in this section
    let mut start = unsafe { rt.sched(&guard) }.take_start(tid);
    drop(guard);

    let outcome = start
        .as_mut()
        .map(|start| panic::catch_unwind(AssertUnwindSafe(|| start.run())));

    // Stays masked until the thread is off this stack for good
    let guard = rt.mask();
    if let Some(Err(_)) = outcome {
        // SAFETY: guard held, no switch in this section
        unsafe { rt.sched(&guard) }.mark_panicked(tid);
        debug!("sched: thread {} panicked", tid);
    }
    drop(outcome);
    drop(start);
    mem::forget(guard);
}

/// Entry of the exit context, reached when a start routine returns
extern "C" fn exit_trampoline(_arg: usize) {
    exit();
}
