// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI module for relay
//!
//! Argument parsing plus the command implementations the binary calls.

pub mod args;
pub mod commands;

pub use args::*;
