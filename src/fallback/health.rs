// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Per-service health shared across chain runs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::llm::circuit_breaker::{CircuitBreaker, CircuitState};

/// One circuit breaker per service id.
///
/// Chains are rebuilt for every request, so health lives outside them and is
/// shared by the dispatcher.
#[derive(Debug)]
pub struct ServiceHealth {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    max_failures: u32,
    cooldown_ms: u64,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self::new(3, 30_000)
    }
}

impl ServiceHealth {
    pub fn new(max_failures: u32, cooldown_ms: u64) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            max_failures,
            cooldown_ms,
        }
    }

    fn breaker(&self, service_id: &str) -> Arc<CircuitBreaker> {
        let mut breakers = match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "relay.fallback", "Service health lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        Arc::clone(
            breakers
                .entry(service_id.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.max_failures, self.cooldown_ms))),
        )
    }

    pub fn state(&self, service_id: &str) -> CircuitState {
        self.breaker(service_id).state()
    }

    /// Open breakers are tried after healthy services; half-open ones get
    /// their normal slot back.
    pub fn is_demoted(&self, service_id: &str) -> bool {
        self.state(service_id) == CircuitState::Open
    }

    pub fn record_success(&self, service_id: &str) {
        self.breaker(service_id).record_success();
    }

    pub fn record_failure(&self, service_id: &str) {
        self.breaker(service_id).record_failure();
    }
}
