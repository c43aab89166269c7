// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! ARM64 (aarch64) architecture-specific code
//!
//! Context switching for the AAPCS64 procedure call standard.

pub mod switch;

pub use switch::{context_load, context_switch, prepare, SavedRegisters};
