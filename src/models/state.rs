// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Per-model download state machine
//!
//! `checking → starting → downloading* → verifying → completed`, with `error`
//! reachable from any non-terminal phase. Transitions never go backward; a
//! terminal state only leaves by resetting to `idle`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a model availability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadPhase {
    Idle,
    Checking,
    Starting,
    Downloading,
    Verifying,
    Completed,
    Error,
}

impl DownloadPhase {
    fn rank(&self) -> u8 {
        match self {
            DownloadPhase::Idle => 0,
            DownloadPhase::Checking => 1,
            DownloadPhase::Starting => 2,
            DownloadPhase::Downloading => 3,
            DownloadPhase::Verifying => 4,
            DownloadPhase::Completed | DownloadPhase::Error => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadPhase::Completed | DownloadPhase::Error)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: DownloadPhase) -> bool {
        match (self, next) {
            (current, DownloadPhase::Idle) => current.is_terminal(),
            (current, DownloadPhase::Error) => !current.is_terminal(),
            (DownloadPhase::Downloading, DownloadPhase::Downloading) => true,
            (current, _) if current.is_terminal() => false,
            (current, next) => next.rank() > current.rank(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadPhase::Idle => "idle",
            DownloadPhase::Checking => "checking",
            DownloadPhase::Starting => "starting",
            DownloadPhase::Downloading => "downloading",
            DownloadPhase::Verifying => "verifying",
            DownloadPhase::Completed => "completed",
            DownloadPhase::Error => "error",
        }
    }
}

impl fmt::Display for DownloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a model's availability check, as reported to progress sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDownloadState {
    pub model_id: String,
    pub phase: DownloadPhase,
    /// In [0, 1]
    pub progress_fraction: f32,
    pub bytes_downloaded: u64,
    /// Unknown until the server reports a size
    pub bytes_total: Option<u64>,
    /// Failure description when `phase` is `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModelDownloadState {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            phase: DownloadPhase::Checking,
            progress_fraction: 0.0,
            bytes_downloaded: 0,
            bytes_total: None,
            error: None,
        }
    }

    /// Move to `next` if legal. Returns false (and leaves the state untouched)
    /// for backward or post-terminal transitions.
    pub fn advance(&mut self, next: DownloadPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            tracing::debug!(
                target: "relay.models",
                model = %self.model_id,
                from = %self.phase,
                to = %next,
                "ignored phase transition"
            );
            return false;
        }
        self.phase = next;
        if next == DownloadPhase::Completed {
            self.progress_fraction = 1.0;
        }
        true
    }

    /// Record transfer progress. Byte counts never decrease.
    pub fn record_bytes(&mut self, downloaded: u64, total: Option<u64>) {
        self.bytes_downloaded = self.bytes_downloaded.max(downloaded);
        if let Some(total) = total.filter(|t| *t > 0) {
            self.bytes_total = Some(total.max(self.bytes_downloaded));
        }
        if let Some(total) = self.bytes_total {
            let fraction = self.bytes_downloaded as f64 / total as f64;
            self.progress_fraction = (fraction as f32).clamp(self.progress_fraction, 1.0);
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.advance(DownloadPhase::Error) {
            self.error = Some(message.into());
            true
        } else {
            false
        }
    }
}
