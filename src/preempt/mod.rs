// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Preemption
//!
//! Time slicing is driven by `SIGALRM` from a per-host [`PreemptTimer`].
//! The handler performs an involuntary yield from inside the signal frame:
//! the interrupted context is suspended with its signal frame still on its
//! own stack, and resuming it later returns through `sigreturn` as if the
//! signal had just been handled.
//!
//! # Critical sections
//!
//! Scheduler state may only be touched while a [`PreemptGuard`] is held.
//! A guard is held across every context switch and is released by
//! whichever side resumes:
//!
//! - a thread resumed inside `yield_now` or `join` drops its own guard
//! - a thread resumed inside the handler drops the handler's guard, then
//!   returns from the signal
//! - a thread that runs for the first time releases the switcher's guard
//!   through [`PreemptGuard::inherit`]

mod timer;

use core::mem;
use core::ptr;

use spin::Once;

use crate::error::{Error, Result};
use crate::sched::runtime;

pub use timer::PreemptTimer;

/// Signal raised by the quantum timer
pub const PREEMPT_SIGNAL: libc::c_int = libc::SIGALRM;

/// Process-wide handler installation, done once; holds the failing errno
static HANDLER: Once<core::result::Result<(), i32>> = Once::new();

/// Install the preemption handler for the whole process
///
/// Safe to call any number of times; only the first call installs.
pub fn install_handler() -> Result<()> {
    let installed = HANDLER.call_once(|| {
        // SAFETY: sigaction is a plain C struct; all-zero is a valid value
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = on_preempt as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        // SAFETY: `action` is fully initialized and the handler is
        // async-signal-safe
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(PREEMPT_SIGNAL, &action, ptr::null_mut()) != 0 {
                return Err(*libc::__errno_location());
            }
        }
        Ok(())
    });

    match *installed {
        Ok(()) => Ok(()),
        Err(code) => Err(Error::Primitive {
            call: "sigaction",
            source: std::io::Error::from_raw_os_error(code),
        }),
    }
}

/// Signal handler: involuntary yield
///
/// Runs on the interrupted thread's stack with the signal blocked.
extern "C" fn on_preempt(_signal: libc::c_int) {
    // SAFETY: errno is thread-local and always addressable
    let errno = unsafe { libc::__errno_location() };
    let saved = unsafe { *errno };

    runtime::preempt();

    // SAFETY: as above
    unsafe { *errno = saved };
}

fn signal_set() -> libc::sigset_t {
    // SAFETY: sigset_t is plain data, initialized by sigemptyset
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, PREEMPT_SIGNAL);
        set
    }
}

/// Scoped preemption-free critical section
///
/// Acquiring blocks the preemption signal and, for the outermost section
/// only, suspends the timer. Dropping restores the previous signal mask;
/// the outermost section also resumes the timer, continuing the suspended
/// quantum unless a switch asked for a fresh one.
#[must_use = "preemption is re-enabled as soon as the guard is dropped"]
pub struct PreemptGuard<'a> {
    timer: &'a PreemptTimer,
    saved_mask: libc::sigset_t,
    outermost: bool,
}

impl<'a> PreemptGuard<'a> {
    /// Enter a critical section
    pub fn new(timer: &'a PreemptTimer) -> Self {
        let block = signal_set();
        // SAFETY: sigset_t is plain data, filled in by pthread_sigmask
        let mut saved_mask: libc::sigset_t = unsafe { mem::zeroed() };
        // SAFETY: both sets are valid; SIG_BLOCK cannot fail with them
        unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &block, &mut saved_mask) };
        // SAFETY: `saved_mask` was filled in above
        let outermost = unsafe { libc::sigismember(&saved_mask, PREEMPT_SIGNAL) } != 1;
        if outermost {
            let _ = timer.suspend();
        }
        Self {
            timer,
            saved_mask,
            outermost,
        }
    }

    /// Enter a critical section from the preemption handler
    ///
    /// The kernel already blocked the signal for the handler and restores
    /// the interrupted mask on return, so only the timer is handled here.
    /// The quantum that raised the signal has expired.
    pub fn interrupted(timer: &'a PreemptTimer) -> Self {
        let _ = timer.suspend();
        Self {
            timer,
            saved_mask: current_mask(),
            outermost: true,
        }
    }

    /// Take over a critical section entered on another stack
    ///
    /// Used by a thread running for the first time: the switch that
    /// started it left the signal blocked and the timer stopped. Dropping
    /// the returned guard unblocks the one and resumes the other.
    pub fn inherit(timer: &'a PreemptTimer) -> Self {
        let mut saved_mask = current_mask();
        // SAFETY: `saved_mask` is a valid set
        unsafe { libc::sigdelset(&mut saved_mask, PREEMPT_SIGNAL) };
        Self {
            timer,
            saved_mask,
            outermost: true,
        }
    }

    /// Whether dropping this guard ends masking for the thread
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for PreemptGuard<'_> {
    fn drop(&mut self) {
        if self.outermost {
            let _ = self.timer.resume();
        }
        // SAFETY: `saved_mask` came from pthread_sigmask
        unsafe { libc::pthread_sigmask(libc::SIG_SETMASK, &self.saved_mask, ptr::null_mut()) };
    }
}

fn current_mask() -> libc::sigset_t {
    // SAFETY: sigset_t is plain data; a null `set` only queries the mask
    unsafe {
        let mut current: libc::sigset_t = mem::zeroed();
        libc::pthread_sigmask(libc::SIG_BLOCK, ptr::null(), &mut current);
        current
    }
}

/// Run `f` with preemption disabled
///
/// Use this around code that must not be interleaved with other green
/// threads of the same runtime, such as calls into the allocator or
/// buffered I/O. Without a runtime on the calling OS thread, `f` simply
/// runs.
pub fn without_preemption<R>(f: impl FnOnce() -> R) -> R {
    match runtime::current_runtime() {
        Some(rt) => {
            let _guard = rt.mask();
            f()
        }
        None => f(),
    }
}

/// Check whether the preemption signal is blocked on this OS thread
pub fn is_masked() -> bool {
    let current = current_mask();
    // SAFETY: `current` is a valid set
    unsafe { libc::sigismember(&current, PREEMPT_SIGNAL) == 1 }
}
