// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Generation sessions
//!
//! A [`GenerationSession`] opens one streamed response from a chat backend and
//! owns its lifecycle: chunks are folded into an accumulated output in arrival
//! order, subscribers are notified only when that output actually changes, the
//! caller can cancel cooperatively at any point, and a response that never
//! produced anything meaningful resolves as [`SessionOutcome::Empty`].
//!
//! ```text
//! pending -> streaming -> completed | cancelled | error
//! ```

mod accumulator;

pub use accumulator::{is_meaningless, is_sentinel, OutputAccumulator};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{ApiError, RelayError, Result};
use crate::llm::provider::{ChatBackend, ChatPrompt, ChunkStream, ProviderConfig};
use crate::progress::{NoopSink, ProgressEvent, ProgressSink};

/// Default time to wait for the next chunk
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

/// Lifecycle status of a generation session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Streaming,
    Completed,
    Cancelled,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session ended, when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Final accumulated output
    Completed(String),
    /// The backend produced nothing meaningful; the caller drops its placeholder
    Empty,
    /// Cancelled by the user; partial output was discarded
    Cancelled,
}

impl SessionOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            SessionOutcome::Completed(text) => Some(text),
            SessionOutcome::Empty | SessionOutcome::Cancelled => None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(target: "relay.session", "Session state lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

#[derive(Debug)]
struct SharedState {
    status: Mutex<SessionStatus>,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
}

/// Cloneable control for a running session (cancel, observe status)
#[derive(Debug, Clone)]
pub struct SessionControl {
    id: Uuid,
    shared: Arc<SharedState>,
}

impl SessionControl {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        *lock(&self.shared.status)
    }

    /// Ask the session to stop. The transport is dropped at the next await point.
    pub fn cancel(&self) {
        if !self.shared.cancel_requested.swap(true, Ordering::SeqCst) {
            tracing::debug!(target: "relay.session", session_id = %self.id, "cancel requested");
        }
        self.shared.cancel_notify.notify_one();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::SeqCst)
    }
}

/// Factory for generation sessions against one backend
#[derive(Clone)]
pub struct GenerationSession {
    backend: Arc<dyn ChatBackend>,
    sink: Arc<dyn ProgressSink>,
    chunk_timeout: Duration,
}

impl GenerationSession {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            sink: Arc::new(NoopSink),
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }

    /// Build with the chunk timeout from settings
    pub fn from_settings(backend: Arc<dyn ChatBackend>, settings: &Settings) -> Self {
        Self::new(backend)
            .with_chunk_timeout(Duration::from_secs(settings.timeouts.chunk_timeout_secs))
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Create a pending session; nothing is sent until [`SessionHandle::wait`]
    pub fn start(&self, config: ProviderConfig, prompt: ChatPrompt) -> SessionHandle {
        let id = Uuid::new_v4();
        tracing::debug!(
            target: "relay.session",
            session_id = %id,
            provider = %config.provider_id,
            model = %config.model_id,
            backend = self.backend.name(),
            "session created"
        );
        SessionHandle {
            control: SessionControl {
                id,
                shared: Arc::new(SharedState {
                    status: Mutex::new(SessionStatus::Pending),
                    cancel_requested: AtomicBool::new(false),
                    cancel_notify: Notify::new(),
                }),
            },
            backend: Arc::clone(&self.backend),
            sink: Arc::clone(&self.sink),
            chunk_timeout: self.chunk_timeout,
            config,
            prompt,
            subscribers: Vec::new(),
        }
    }
}

type ChunkCallback = Box<dyn FnMut(&str) + Send + Sync>;

/// One in-flight generation
pub struct SessionHandle {
    control: SessionControl,
    backend: Arc<dyn ChatBackend>,
    sink: Arc<dyn ProgressSink>,
    chunk_timeout: Duration,
    config: ProviderConfig,
    prompt: ChatPrompt,
    subscribers: Vec<ChunkCallback>,
}

enum Step<T> {
    Cancelled,
    Ready(T),
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.control.id
    }

    pub fn status(&self) -> SessionStatus {
        self.control.status()
    }

    /// Subscribe to accumulated-output updates, called in arrival order
    pub fn on_chunk<F>(&mut self, callback: F)
    where
        F: FnMut(&str) + Send + Sync + 'static,
    {
        self.subscribers.push(Box::new(callback));
    }

    /// Control usable from other tasks while `wait` runs
    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    fn set_status(&self, status: SessionStatus, accumulated_chars: usize) {
        *lock(&self.control.shared.status) = status;
        self.sink.on_progress(&ProgressEvent::Generation {
            session_id: self.control.id,
            status,
            accumulated_chars,
        });
    }

    /// Race `fut` against cancellation and the chunk timeout
    async fn guarded<F, T>(&self, fut: F) -> Result<Step<T>>
    where
        F: std::future::Future<Output = T>,
    {
        if self.control.is_cancel_requested() {
            return Ok(Step::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.control.shared.cancel_notify.notified() => Ok(Step::Cancelled),
            result = tokio::time::timeout(self.chunk_timeout, fut) => match result {
                Ok(value) => Ok(Step::Ready(value)),
                Err(_) => Err(RelayError::Api(ApiError::Timeout)),
            },
        }
    }

    /// Drive the session to a terminal state
    pub async fn wait(mut self) -> Result<SessionOutcome> {
        let mut accumulator = OutputAccumulator::new();
        let mut subscribers = std::mem::take(&mut self.subscribers);
        let result = self.pump(&mut accumulator, &mut subscribers).await;

        match &result {
            Ok(SessionOutcome::Completed(text)) => {
                self.set_status(SessionStatus::Completed, text.chars().count());
                tracing::info!(
                    target: "relay.session",
                    session_id = %self.id(),
                    chars = text.chars().count(),
                    "session completed"
                );
            }
            Ok(SessionOutcome::Empty) => {
                self.set_status(SessionStatus::Completed, 0);
                tracing::info!(
                    target: "relay.session",
                    session_id = %self.id(),
                    "session produced no output"
                );
            }
            Ok(SessionOutcome::Cancelled) => {
                self.set_status(SessionStatus::Cancelled, 0);
                tracing::info!(
                    target: "relay.session",
                    session_id = %self.id(),
                    discarded_chars = accumulator.text().chars().count(),
                    "session cancelled"
                );
            }
            Err(e) => {
                self.set_status(SessionStatus::Error, accumulator.text().chars().count());
                tracing::warn!(
                    target: "relay.session",
                    session_id = %self.id(),
                    error = %e,
                    "session failed"
                );
            }
        }
        result
    }

    async fn pump(
        &self,
        accumulator: &mut OutputAccumulator,
        subscribers: &mut [ChunkCallback],
    ) -> Result<SessionOutcome> {
        let backend = Arc::clone(&self.backend);
        let opened = self
            .guarded(backend.stream_chat(&self.config, &self.prompt))
            .await?;
        let mut stream: ChunkStream = match opened {
            Step::Cancelled => return Ok(SessionOutcome::Cancelled),
            Step::Ready(stream) => stream?,
        };
        self.set_status(SessionStatus::Streaming, 0);

        loop {
            let next = match self.guarded(stream.next()).await? {
                Step::Cancelled => {
                    // Dropping the stream aborts the transport.
                    drop(stream);
                    return Ok(SessionOutcome::Cancelled);
                }
                Step::Ready(next) => next,
            };
            let chunk = match next {
                None => break,
                Some(chunk) => chunk?,
            };
            if let Some(updated) = accumulator.push(chunk) {
                tracing::trace!(
                    target: "relay.session",
                    session_id = %self.control.id,
                    chars = updated.chars().count(),
                    "chunk"
                );
                for subscriber in subscribers.iter_mut() {
                    subscriber(updated);
                }
            }
        }

        // A cancel that raced the final chunk still wins.
        if self.control.is_cancel_requested() {
            return Ok(SessionOutcome::Cancelled);
        }
        Ok(accumulator.finish())
    }
}
