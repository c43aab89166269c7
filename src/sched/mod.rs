// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler and thread management
//!
//! Preemptive priority scheduling of green threads on one host OS thread.
//!
//! # Example
//! ```
//! use strand::dispatch::Context;
//! use strand::sched::{Scheduler, StrictPriority, SwitchReason, ThreadId};
//!
//! let mut scheduler = Scheduler::new(Box::new(StrictPriority));
//! let host = scheduler.adopt_host(Context::host());
//! assert_eq!(host, ThreadId::HOST);
//!
//! // Nothing else is ready, so the host keeps the processor
//! assert!(scheduler.reschedule(SwitchReason::Yield).is_none());
//! assert_eq!(scheduler.current(), Some(ThreadId::HOST));
//! ```

pub mod policy;
pub(crate) mod runtime;
pub mod scheduler;
pub mod state;
pub mod thread;

pub use policy::{SchedulingPolicy, StrictPriority};
pub use runtime::RuntimeStats;
pub use scheduler::{Scheduler, SchedulerStats, Switch, SwitchReason};
pub use state::{Priority, RingQueue, RunQueueSet, ThreadState};
pub use thread::{EntryPoint, Start, Tcb, TcbFlags, ThreadId, ThreadStats};
