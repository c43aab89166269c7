// Copyright 2025 The Strand Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! x86_64 (amd64) architecture-specific code
//!
//! Context switching for the System V AMD64 ABI.

pub mod switch;

pub use switch::{context_load, context_switch, prepare, SavedRegisters};
