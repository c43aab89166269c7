// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Quantum timer
//!
//! A POSIX timer on the CPU-time clock of the host OS thread. It only
//! advances while the host actually runs, and its signal is directed at
//! the host thread alone, so several runtimes in one process never see
//! each other's ticks.

use core::cell::Cell;
use core::mem;
use core::ptr;
use core::time::Duration;

use crate::error::{Error, Result};

use super::PREEMPT_SIGNAL;

/// One-shot CPU-time timer that raises the preemption signal
///
/// The timer is stopped while preemption is masked. [`suspend`] keeps what
/// was left of the running quantum and [`resume`] continues it, unless a
/// context switch asked for a fresh one through [`restart`].
///
/// [`suspend`]: PreemptTimer::suspend
/// [`resume`]: PreemptTimer::resume
/// [`restart`]: PreemptTimer::restart
pub struct PreemptTimer {
    id: libc::timer_t,
    quantum: libc::timespec,
    /// Unused part of the suspended quantum; `None` starts a full one
    remaining: Cell<Option<libc::timespec>>,
}

impl PreemptTimer {
    /// Create a disarmed timer aimed at the calling OS thread
    pub fn new(quantum: Duration) -> Result<Self> {
        // SAFETY: gettid has no preconditions
        let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::c_int;

        // SAFETY: sigevent is a plain C struct; all-zero is a valid value
        let mut event: libc::sigevent = unsafe { mem::zeroed() };
        event.sigev_notify = libc::SIGEV_THREAD_ID;
        event.sigev_signo = PREEMPT_SIGNAL;
        event.sigev_notify_thread_id = tid;

        let mut id: libc::timer_t = ptr::null_mut();
        // SAFETY: both pointers are valid for the duration of the call
        let rc = unsafe { libc::timer_create(libc::CLOCK_THREAD_CPUTIME_ID, &mut event, &mut id) };
        if rc != 0 {
            return Err(Error::last_os_error("timer_create"));
        }

        Ok(Self {
            id,
            quantum: timespec(quantum),
            remaining: Cell::new(None),
        })
    }

    /// Stop the timer, keeping the unused part of the current quantum
    ///
    /// An expired or never started quantum leaves nothing to keep.
    pub fn suspend(&self) -> Result<()> {
        let left = self.set(timespec(Duration::ZERO))?;
        self.remaining.set(is_set(&left).then_some(left));
        Ok(())
    }

    /// Make the next [`resume`](PreemptTimer::resume) start a full quantum
    pub fn restart(&self) {
        self.remaining.set(None);
    }

    /// Start the timer again with what [`suspend`](PreemptTimer::suspend)
    /// kept, or with a full quantum
    pub fn resume(&self) -> Result<()> {
        let value = self.remaining.take().unwrap_or(self.quantum);
        self.set(value).map(|_| ())
    }

    /// Stop the timer and forget the current quantum
    pub fn disarm(&self) -> Result<()> {
        self.restart();
        self.set(timespec(Duration::ZERO)).map(|_| ())
    }

    /// CPU time left before the timer fires; zero when stopped
    pub fn time_left(&self) -> Result<Duration> {
        // SAFETY: itimerspec is plain data, filled in by timer_gettime
        let mut spec: libc::itimerspec = unsafe { mem::zeroed() };
        // SAFETY: `id` is a live timer owned by `self`
        if unsafe { libc::timer_gettime(self.id, &mut spec) } != 0 {
            return Err(Error::last_os_error("timer_gettime"));
        }
        Ok(duration(&spec.it_value))
    }

    /// Length of one quantum
    pub fn quantum(&self) -> Duration {
        duration(&self.quantum)
    }

    /// Program the timer; returns the time that was left on it
    fn set(&self, value: libc::timespec) -> Result<libc::timespec> {
        let spec = libc::itimerspec {
            it_interval: timespec(Duration::ZERO),
            it_value: value,
        };
        // SAFETY: itimerspec is plain data, filled in by timer_settime
        let mut old: libc::itimerspec = unsafe { mem::zeroed() };
        // SAFETY: `id` is a live timer owned by `self`
        let rc = unsafe { libc::timer_settime(self.id, 0, &spec, &mut old) };
        if rc != 0 {
            return Err(Error::last_os_error("timer_settime"));
        }
        Ok(old.it_value)
    }
}

impl core::fmt::Debug for PreemptTimer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PreemptTimer")
            .field("id", &self.id)
            .field("quantum", &self.quantum())
            .finish()
    }
}

impl Drop for PreemptTimer {
    fn drop(&mut self) {
        // SAFETY: `id` was created by timer_create and is deleted only here
        unsafe { libc::timer_delete(self.id) };
    }
}

fn timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

fn duration(ts: &libc::timespec) -> Duration {
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

fn is_set(ts: &libc::timespec) -> bool {
    ts.tv_sec != 0 || ts.tv_nsec != 0
}
