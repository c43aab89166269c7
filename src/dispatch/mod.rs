// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Context Dispatch
//!
//! Creates, switches and destroys raw execution contexts. This layer knows
//! nothing about threads or scheduling; the scheduler owns every
//! [`Context`] and hands dispatch pointers to them.
//!
//! # Exit path
//!
//! [`Dispatcher::init_main`] builds one private *exit context* whose entry
//! is the scheduler's exit handler. Every context created afterwards by
//! [`Dispatcher::init_thread`] names it as its successor, so a start
//! routine that returns normally lands in the exit handler instead of
//! running off the top of its stack. The exit context is only ever loaded,
//! never saved into, so every entry into it starts the handler afresh.

mod stack;

use core::cell::Cell;
use core::ptr;

use log::debug;

use crate::arch::{self, SavedRegisters};
use crate::error::Result;

pub use crate::arch::StartRoutine;
pub use stack::Stack;

/// An execution context: saved register state plus the stack it runs on
///
/// The host context runs on the OS thread's own stack and owns none.
#[derive(Debug)]
pub struct Context {
    regs: SavedRegisters,
    stack: Option<Stack>,
}

impl Context {
    /// The context of the OS thread that hosts the runtime
    ///
    /// Its registers are captured by the first switch away from it.
    pub const fn host() -> Self {
        Self {
            regs: SavedRegisters::zeroed(),
            stack: None,
        }
    }

    /// Whether this context runs on a borrowed (OS thread) stack
    pub fn is_host(&self) -> bool {
        self.stack.is_none()
    }

    /// The owned stack, if any
    pub fn stack(&self) -> Option<&Stack> {
        self.stack.as_ref()
    }

    /// Saved register state
    pub fn registers(&self) -> &SavedRegisters {
        &self.regs
    }

    fn prepared(stack: Stack, start: StartRoutine, arg: usize, successor: *const SavedRegisters) -> Self {
        let mut regs = SavedRegisters::zeroed();
        // SAFETY: `stack` is a fresh writable mapping and is moved into the
        // returned context, which keeps it alive while it can run
        unsafe { arch::prepare(&mut regs, stack.top(), start, arg, successor) };
        Self {
            regs,
            stack: Some(stack),
        }
    }
}

/// How the current context is treated by [`switch_to`]
#[derive(Debug)]
pub enum Transfer {
    /// Save the current state into `prev`; a later switch to `prev`
    /// returns from this call
    Resume {
        /// Where to save the current state
        prev: *mut Context,
    },
    /// Discard the current state; the current context is never resumed
    Terminate,
}

/// Transfer execution to `next`
///
/// With [`Transfer::Resume`] this returns when `prev` is resumed. With
/// [`Transfer::Terminate`] it never returns.
///
/// # Safety
///
/// `next` must be a context that was prepared by a [`Dispatcher`] or saved
/// by an earlier `Resume`, and has not been torn down. `prev` must be
/// valid for writes and must not alias `next`.
pub unsafe fn switch_to(next: *const Context, transfer: Transfer) {
    // SAFETY: forwarded from the caller
    unsafe {
        let next_regs = ptr::addr_of!((*next).regs);
        match transfer {
            Transfer::Resume { prev } => {
                arch::context_switch(ptr::addr_of_mut!((*prev).regs), next_regs)
            }
            Transfer::Terminate => arch::context_load(next_regs),
        }
    }
}

/// Factory and owner of the shared exit context
#[derive(Debug)]
pub struct Dispatcher {
    /// Successor of every thread context; boxed so its address is stable
    exit: Box<Context>,
    /// Usable size of every thread stack
    stack_size: usize,
    /// Thread stacks created and not yet torn down
    live_stacks: Cell<usize>,
}

impl Dispatcher {
    /// Build the dispatcher and the host context
    ///
    /// `exit_handler` is run, with argument 0, every time a thread's start
    /// routine returns. It must never return itself.
    pub fn init_main(exit_handler: StartRoutine, stack_size: usize) -> Result<(Self, Context)> {
        let stack = Stack::new(stack_size)?;
        let exit = Box::new(Context::prepared(stack, exit_handler, 0, ptr::null()));

        debug!("dispatch: exit context ready ({} byte stacks)", stack_size);

        let dispatcher = Self {
            exit,
            stack_size,
            live_stacks: Cell::new(0),
        };
        Ok((dispatcher, Context::host()))
    }

    /// Build a context that runs `start(arg)` on a fresh stack
    ///
    /// The context does not run until it is switched to.
    pub fn init_thread(&self, start: StartRoutine, arg: usize) -> Result<Context> {
        let stack = Stack::new(self.stack_size)?;
        let ctx = Context::prepared(stack, start, arg, &self.exit.regs);
        self.live_stacks.set(self.live_stacks.get() + 1);
        Ok(ctx)
    }

    /// Release a context's stack
    ///
    /// Consumes the context, so a stack is released at most once. Host
    /// contexts own no stack and are simply dropped.
    ///
    /// # Safety
    ///
    /// The context must not be running and must never be resumed.
    pub unsafe fn teardown(&self, ctx: Context) {
        if let Some(stack) = ctx.stack {
            // SAFETY: the caller guarantees nothing runs on this stack
            unsafe { stack.release() };
            self.live_stacks.set(self.live_stacks.get() - 1);
        }
    }

    /// Number of thread stacks currently allocated
    pub fn live_stacks(&self) -> usize {
        self.live_stacks.get()
    }

    /// Usable size of every thread stack
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(stack) = self.exit.stack.take() {
            // SAFETY: a dispatcher is only dropped when no context it
            // created can run any more, so nothing executes on the exit stack
            unsafe { stack.release() };
        }
    }
}
