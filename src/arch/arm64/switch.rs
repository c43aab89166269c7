// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! ARM64 Context Switch
//!
//! Saves the AAPCS64 callee-saved set: `sp`, `x19`-`x28`, the frame
//! pointer, the link register and the low halves of `v8`-`v15`. Resuming
//! reloads them and returns through the saved link register, so a fresh
//! context simply starts with `lr` pointing at [`context_start`].

use core::arch::naked_asm;

use crate::arch::StartRoutine;

/// Saved callee-saved registers
///
/// The field offsets are hard-coded in the assembly below.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedRegisters {
    /// Stack pointer (0)
    pub sp: u64,
    /// x19..x28 (8..88); x19-x21 carry start, arg and successor of a fresh context
    pub x: [u64; 10],
    /// Frame pointer x29 (88)
    pub fp: u64,
    /// Link register x30 (96)
    pub lr: u64,
    /// d8..d15 (104..168)
    pub d: [u64; 8],
}

impl SavedRegisters {
    /// An empty register file, filled in by the first switch away from it
    pub const fn zeroed() -> Self {
        Self {
            sp: 0,
            x: [0; 10],
            fp: 0,
            lr: 0,
            d: [0; 8],
        }
    }

    /// Stack pointer recorded in this register file
    pub const fn stack_pointer(&self) -> usize {
        self.sp as usize
    }
}

impl Default for SavedRegisters {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Save the current context into `prev` and resume `next`
///
/// # Safety
///
/// `prev` must be writable and `next` must hold either a register file
/// saved by this function or one built by [`prepare`] whose stack is still
/// mapped.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(prev: *mut SavedRegisters, next: *const SavedRegisters) {
    naked_asm!(
        // x0 = prev, x1 = next
        "mov x9, sp",
        "str x9, [x0, #0]",
        "stp x19, x20, [x0, #8]",
        "stp x21, x22, [x0, #24]",
        "stp x23, x24, [x0, #40]",
        "stp x25, x26, [x0, #56]",
        "stp x27, x28, [x0, #72]",
        "stp x29, x30, [x0, #88]",
        "stp d8, d9, [x0, #104]",
        "stp d10, d11, [x0, #120]",
        "stp d12, d13, [x0, #136]",
        "stp d14, d15, [x0, #152]",
        "mov x0, x1",
        "b {load}",
        load = sym context_load,
    );
}

/// Resume `next` without saving the current context
///
/// # Safety
///
/// Same requirements on `next` as [`context_switch`].
#[unsafe(naked)]
pub unsafe extern "C" fn context_load(next: *const SavedRegisters) -> ! {
    naked_asm!(
        // x0 = next
        "ldr x9, [x0, #0]",
        "mov sp, x9",
        "ldp x19, x20, [x0, #8]",
        "ldp x21, x22, [x0, #24]",
        "ldp x23, x24, [x0, #40]",
        "ldp x25, x26, [x0, #56]",
        "ldp x27, x28, [x0, #72]",
        "ldp x29, x30, [x0, #88]",
        "ldp d8, d9, [x0, #104]",
        "ldp d10, d11, [x0, #120]",
        "ldp d12, d13, [x0, #136]",
        "ldp d14, d15, [x0, #152]",
        "ret",
    );
}

/// First code run by a fresh context
#[unsafe(naked)]
unsafe extern "C" fn context_start() -> ! {
    naked_asm!(
        // start(arg)
        "mov x0, x20",
        "blr x19",
        // start returned: fall through to the successor, if any
        "mov x0, x21",
        "cbz x0, 2f",
        "bl {load}",
        "2:",
        "brk #0x1",
        load = sym context_load,
    );
}

/// Build the initial register file for a fresh context
///
/// # Safety
///
/// `stack_top` must be the end of a writable, 16-byte alignable region,
/// and `successor`, when non-null, must stay valid for as long as this
/// context can run.
pub unsafe fn prepare(
    regs: &mut SavedRegisters,
    stack_top: usize,
    start: StartRoutine,
    arg: usize,
    successor: *const SavedRegisters,
) {
    let mut x = [0u64; 10];
    x[0] = start as usize as u64;
    x[1] = arg as u64;
    x[2] = successor as u64;

    *regs = SavedRegisters {
        sp: (stack_top & !0xF) as u64,
        x,
        fp: 0,
        lr: context_start as *const () as usize as u64,
        d: [0; 8],
    };
}
