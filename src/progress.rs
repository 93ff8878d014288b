// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Progress reporting
//!
//! The model lifecycle manager and generation sessions report through the same
//! [`ProgressSink`] interface. [`ProgressHub`] fans events out over a
//! broadcast channel so logging, CLI progress bars and tests can subscribe
//! without the producers knowing about any of them.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::ModelDownloadState;
use crate::session::SessionStatus;

/// Capacity of the broadcast channel; slow subscribers see `Lagged`
const HUB_CAPACITY: usize = 256;

/// A progress notification
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Model availability / download progress
    Model(ModelDownloadState),
    /// Generation session status change
    Generation {
        session_id: Uuid,
        status: SessionStatus,
        accumulated_chars: usize,
    },
}

impl ProgressEvent {
    /// Model id for model events
    pub fn model_id(&self) -> Option<&str> {
        match self {
            ProgressEvent::Model(state) => Some(&state.model_id),
            ProgressEvent::Generation { .. } => None,
        }
    }
}

/// Consumer of progress events
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Multi-subscriber progress fan-out
#[derive(Debug, Clone)]
pub struct ProgressHub {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, event: ProgressEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

impl ProgressSink for ProgressHub {
    fn on_progress(&self, event: &ProgressEvent) {
        self.publish(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DownloadPhase;
    use std::sync::{Arc, Mutex};

    fn model_event(phase: DownloadPhase) -> ProgressEvent {
        let mut state = ModelDownloadState::new("llama3.2");
        state.phase = phase;
        ProgressEvent::Model(state)
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = move |event: &ProgressEvent| {
            seen_clone.lock().unwrap().push(event.clone());
        };
        sink.on_progress(&model_event(DownloadPhase::Checking));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hub_fans_out_to_all_subscribers() {
        let hub = ProgressHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.on_progress(&model_event(DownloadPhase::Starting));

        assert_eq!(a.recv().await.unwrap().model_id(), Some("llama3.2"));
        assert_eq!(b.recv().await.unwrap().model_id(), Some("llama3.2"));
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let hub = ProgressHub::new();
        hub.publish(model_event(DownloadPhase::Completed));
    }
}
