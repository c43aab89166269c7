// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Architecture-specific modules
//!
//! Each architecture provides the same small interface to the dispatch
//! layer:
//!
//! - `SavedRegisters`: the callee-saved register file of a suspended context
//! - `context_switch`: save into one register file, resume another
//! - `context_load`: resume a register file without saving (never returns)
//! - `prepare`: lay out a fresh stack so the first resume enters a start
//!   routine and falls through to a successor context when it returns

#[cfg(target_arch = "x86_64")]
pub mod amd64;
#[cfg(target_arch = "x86_64")]
pub use amd64::{context_load, context_switch, prepare, SavedRegisters};

#[cfg(target_arch = "aarch64")]
pub mod arm64;
#[cfg(target_arch = "aarch64")]
pub use arm64::{context_load, context_switch, prepare, SavedRegisters};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("strand supports only x86_64 and aarch64 targets");

#[cfg(not(target_os = "linux"))]
compile_error!("strand requires Linux (thread-directed POSIX timers)");

/// Entry point of a context built by [`prepare`]
///
/// The single argument is passed through unchanged. Returning from it
/// resumes the successor context.
pub type StartRoutine = extern "C" fn(usize);
