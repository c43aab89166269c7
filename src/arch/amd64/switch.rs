// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! x86-64 Context Switch
//!
//! Only callee-saved state is kept in a [`SavedRegisters`]: everything
//! else is already spilled by the compiler around the call to
//! [`context_switch`], or by the kernel's signal frame when the switch
//! happens inside the preemption handler.
//!
//! A suspended context's stack holds the return address of its
//! `context_switch` call at `rsp`, so resuming is a register reload
//! followed by `ret`. A fresh context is given a stack whose top slot holds
//! the address of [`context_start`], which calls the start routine and then
//! loads the successor context.

use core::arch::naked_asm;

use crate::arch::StartRoutine;

/// Default MXCSR value (all exceptions masked, round to nearest)
const DEFAULT_MXCSR: u32 = 0x1F80;

/// Default x87 control word (all exceptions masked, 64-bit precision)
const DEFAULT_FPU_CW: u16 = 0x037F;

/// Saved callee-saved registers
///
/// The field offsets are hard-coded in the assembly below.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedRegisters {
    /// Stack pointer (0x00)
    pub rsp: u64,
    /// Frame pointer (0x08)
    pub rbp: u64,
    /// 0x10; holds the start routine of a fresh context
    pub rbx: u64,
    /// 0x18; holds the start argument of a fresh context
    pub r12: u64,
    /// 0x20; holds the successor register file of a fresh context
    pub r13: u64,
    /// 0x28
    pub r14: u64,
    /// 0x30
    pub r15: u64,
    /// SSE control/status (0x38)
    pub mxcsr: u32,
    /// x87 control word (0x3C)
    pub fpu_cw: u16,
    _pad: u16,
}

impl SavedRegisters {
    /// An empty register file, filled in by the first switch away from it
    pub const fn zeroed() -> Self {
        Self {
            rsp: 0,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            mxcsr: 0,
            fpu_cw: 0,
            _pad: 0,
        }
    }

    /// Stack pointer recorded in this register file
    pub const fn stack_pointer(&self) -> usize {
        self.rsp as usize
    }
}

impl Default for SavedRegisters {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Save the current context into `prev` and resume `next`
///
/// Returns when some other context resumes `prev`.
///
/// # Safety
///
/// `prev` must be writable and `next` must hold either a register file
/// saved by this function or one built by [`prepare`] whose stack is still
/// mapped.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(prev: *mut SavedRegisters, next: *const SavedRegisters) {
    naked_asm!(
        // rdi = prev, rsi = next
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "stmxcsr dword ptr [rdi + 0x38]",
        "fnstcw word ptr [rdi + 0x3c]",
        "mov rdi, rsi",
        "jmp {load}",
        load = sym context_load,
    );
}

/// Resume `next` without saving the current context
///
/// # Safety
///
/// Same requirements on `next` as [`context_switch`]. Whatever was running
/// is abandoned; its stack must not be released while still executing on
/// it.
#[unsafe(naked)]
pub unsafe extern "C" fn context_load(next: *const SavedRegisters) -> ! {
    naked_asm!(
        // rdi = next
        "mov rsp, [rdi + 0x00]",
        "mov rbp, [rdi + 0x08]",
        "mov rbx, [rdi + 0x10]",
        "mov r12, [rdi + 0x18]",
        "mov r13, [rdi + 0x20]",
        "mov r14, [rdi + 0x28]",
        "mov r15, [rdi + 0x30]",
        "ldmxcsr dword ptr [rdi + 0x38]",
        "fldcw word ptr [rdi + 0x3c]",
        "ret",
    );
}

/// First code run by a fresh context
///
/// Entered by the `ret` of [`context_load`] with `rsp` 16-byte aligned.
/// The entry slot just above `rsp` must survive, because the exit context
/// is loaded from the same prepared registers every time.
#[unsafe(naked)]
unsafe extern "C" fn context_start() -> ! {
    naked_asm!(
        // Keep calls below the entry slot, 16-byte aligned
        "sub rsp, 16",
        // start(arg)
        "mov rdi, r12",
        "call rbx",
        // start returned: fall through to the successor, if any
        "mov rdi, r13",
        "test rdi, rdi",
        "jz 2f",
        "call {load}",
        "2:",
        "ud2",
        load = sym context_load,
    );
}

/// Build the initial register file for a fresh context
///
/// `stack_top` is the exclusive upper end of the stack. `successor` may be
/// null, in which case returning from `start` traps.
///
/// # Safety
///
/// `stack_top` must be the end of a writable region at least 32 bytes
/// deep, and `successor`, when non-null, must stay valid for as long as
/// this context can run.
pub unsafe fn prepare(
    regs: &mut SavedRegisters,
    stack_top: usize,
    start: StartRoutine,
    arg: usize,
    successor: *const SavedRegisters,
) {
    let top = stack_top & !0xF;
    let entry_slot = (top - 8) as *mut u64;
    // SAFETY: the caller guarantees the slot below `top` is writable
    unsafe { entry_slot.write(context_start as *const () as usize as u64) };

    *regs = SavedRegisters {
        rsp: (top - 8) as u64,
        rbp: 0,
        rbx: start as usize as u64,
        r12: arg as u64,
        r13: successor as u64,
        r14: 0,
        r15: 0,
        mxcsr: DEFAULT_MXCSR,
        fpu_cw: DEFAULT_FPU_CW,
        _pad: 0,
    };
}
