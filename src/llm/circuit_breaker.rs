// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Circuit breaker for service health tracking
//!
//! Fallback chains consult a breaker per service to move services that keep
//! failing behind healthy ones. A breaker never removes a service.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Too many consecutive failures, service is demoted
    Open,
    /// Cooldown expired, the next call decides
    HalfOpen,
}

/// Consecutive-failure breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Consecutive failure count
    failure_count: AtomicU32,
    /// When the circuit opened (milliseconds since epoch)
    opened_at_ms: AtomicU64,
    /// Consecutive failures before opening
    max_failures: u32,
    /// Cooldown before half-open
    cooldown_ms: u64,
}

impl Default for CircuitBreaker {
    /// 3 failures, 30 second cooldown
    fn default() -> Self {
        Self::new(3, 30_000)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, cooldown_ms: u64) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            max_failures: max_failures.max(1),
            cooldown_ms,
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        if self.failure_count.load(Ordering::Relaxed) < self.max_failures {
            return CircuitState::Closed;
        }
        let opened_at = self.opened_at_ms.load(Ordering::Relaxed);
        if now_ms().saturating_sub(opened_at) >= self.cooldown_ms {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        self.opened_at_ms.store(0, Ordering::Relaxed);
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.max_failures {
            self.opened_at_ms.store(now_ms(), Ordering::Relaxed);
            if failures == self.max_failures {
                tracing::warn!(
                    target: "relay.fallback",
                    failures,
                    cooldown_ms = self.cooldown_ms,
                    "circuit opened"
                );
            }
        }
    }

    /// Get current failure count
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.record_success();
    }
}
