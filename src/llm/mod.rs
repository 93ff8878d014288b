// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for relay
//!
//! Provides the chat backend abstraction, the concrete backends, and the
//! helpers the fallback chain and sessions build on.

pub mod circuit_breaker;
pub mod factory;
pub mod mock_provider;
pub mod provider;
pub mod providers;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use factory::BackendFactory;
pub use provider::*;
