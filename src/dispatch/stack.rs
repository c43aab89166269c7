// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread stacks
//!
//! Stacks are private anonymous mappings with an inaccessible guard region
//! at the low end, so running off the bottom of a stack faults instead of
//! silently overwriting a neighbouring allocation.

use core::ptr::NonNull;

use crate::config::GUARD_SIZE;
use crate::error::{Error, Result};

/// A mapped thread stack
///
/// Layout, from low to high addresses: `[guard | usable]`. The stack grows
/// down from [`Stack::top`]. A `Stack` is released only by
/// [`Stack::release`]; dropping it leaks the mapping.
#[derive(Debug)]
pub struct Stack {
    /// Base of the whole mapping (start of the guard region)
    base: NonNull<u8>,
    /// Total mapping length
    len: usize,
    /// Length of the guard region
    guard_size: usize,
}

impl Stack {
    /// Map a stack with at least `size` usable bytes
    pub fn new(size: usize) -> Result<Self> {
        let page = page_size();
        let guard_size = GUARD_SIZE.div_ceil(page) * page;
        let len = size
            .div_ceil(page)
            .checked_mul(page)
            .and_then(|usable| usable.checked_add(guard_size))
            .ok_or(Error::InvalidConfig("stack size overflows the address space"))?;

        // SAFETY: anonymous private mapping, no existing memory is touched
        let raw = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(Error::StackAllocation {
                size,
                source: std::io::Error::last_os_error(),
            });
        }

        // SAFETY: the guard region is the first `guard_size` bytes of the
        // mapping created above
        if unsafe { libc::mprotect(raw, guard_size, libc::PROT_NONE) } != 0 {
            let err = Error::last_os_error("mprotect");
            // SAFETY: unmapping the region we just mapped
            unsafe { libc::munmap(raw, len) };
            return Err(err);
        }

        let base = NonNull::new(raw.cast::<u8>()).ok_or(Error::StackAllocation {
            size,
            source: std::io::Error::from_raw_os_error(libc::ENOMEM),
        })?;

        Ok(Self {
            base,
            len,
            guard_size,
        })
    }

    /// Exclusive upper end of the stack (page aligned)
    pub fn top(&self) -> usize {
        self.base.as_ptr() as usize + self.len
    }

    /// Lowest usable address (just above the guard region)
    pub fn bottom(&self) -> usize {
        self.base.as_ptr() as usize + self.guard_size
    }

    /// Usable size in bytes
    pub fn size(&self) -> usize {
        self.len - self.guard_size
    }

    /// Check whether `addr` lies in the usable part of this stack
    pub fn contains(&self, addr: usize) -> bool {
        (self.bottom()..self.top()).contains(&addr)
    }

    /// Unmap the stack
    ///
    /// # Safety
    ///
    /// Nothing may be executing on, or hold references into, this stack.
    pub unsafe fn release(self) {
        // SAFETY: `base`/`len` describe the mapping created in `new`, and
        // the caller guarantees it is no longer in use
        unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
    }
}

/// System page size
fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 {
        page as usize
    } else {
        4096
    }
}
