// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock chat backend for testing
//!
//! Plays back scripted chunk streams without making real API calls. Scripts
//! can pause, fail mid-stream or hang forever, which is what cancellation and
//! timeout tests need.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ApiError, RelayError, Result};
use crate::llm::provider::{ChatBackend, ChatPrompt, ChunkStream, ProviderConfig, StreamChunk};

/// Scriptable failure (errors themselves are not `Clone`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockFailure {
    QuotaExceeded,
    RateLimited,
    AuthenticationFailed,
    Timeout,
    Network,
    InvalidResponse,
}

impl MockFailure {
    pub fn to_error(&self) -> RelayError {
        let api = match self {
            MockFailure::QuotaExceeded => ApiError::QuotaExceeded("mock quota".to_string()),
            MockFailure::RateLimited => ApiError::RateLimited(1),
            MockFailure::AuthenticationFailed => ApiError::AuthenticationFailed,
            MockFailure::Timeout => ApiError::Timeout,
            MockFailure::Network => ApiError::Network("mock connection reset".to_string()),
            MockFailure::InvalidResponse => {
                ApiError::InvalidResponse("mock malformed body".to_string())
            }
        };
        RelayError::Api(api)
    }
}

/// One step of a scripted stream
#[derive(Clone, Debug)]
pub enum MockStep {
    Chunk(StreamChunk),
    Pause(Duration),
    Fail(MockFailure),
    /// Never yield again
    Hang,
}

/// Script for one call
#[derive(Clone, Debug, Default)]
pub struct MockScript {
    /// Fail before any stream is opened
    pub open_error: Option<MockFailure>,
    pub steps: Vec<MockStep>,
}

impl MockScript {
    pub fn deltas(chunks: &[&str]) -> Self {
        Self {
            open_error: None,
            steps: chunks
                .iter()
                .map(|c| MockStep::Chunk(StreamChunk::Delta(c.to_string())))
                .collect(),
        }
    }

    pub fn snapshots(chunks: &[&str]) -> Self {
        Self {
            open_error: None,
            steps: chunks
                .iter()
                .map(|c| MockStep::Chunk(StreamChunk::Snapshot(c.to_string())))
                .collect(),
        }
    }

    pub fn failing(failure: MockFailure) -> Self {
        Self {
            open_error: Some(failure),
            steps: Vec::new(),
        }
    }

    pub fn then(mut self, step: MockStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn then_hang(self) -> Self {
        self.then(MockStep::Hang)
    }
}

/// Increments a counter when the stream is dropped, finished or not
struct CloseGuard(Arc<AtomicUsize>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A mock chat backend for testing
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    /// Scripts played in order; the last one repeats
    scripts: Arc<Mutex<Vec<MockScript>>>,
    call_count: Arc<AtomicUsize>,
    streams_closed: Arc<AtomicUsize>,
    recorded_prompts: Arc<Mutex<Vec<ChatPrompt>>>,
    recorded_models: Arc<Mutex<Vec<String>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Mock backend lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            scripts: Arc::new(Mutex::new(vec![MockScript::deltas(&["Mock response"])])),
            call_count: Arc::new(AtomicUsize::new(0)),
            streams_closed: Arc::new(AtomicUsize::new(0)),
            recorded_prompts: Arc::new(Mutex::new(Vec::new())),
            recorded_models: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the script with a single one
    pub fn with_script(self, script: MockScript) -> Self {
        self.with_scripts(vec![script])
    }

    /// Queue scripts (returned in order, last one repeats)
    pub fn with_scripts(self, scripts: Vec<MockScript>) -> Self {
        *lock(&self.scripts) = scripts;
        self
    }

    /// Single response streamed as deltas
    pub fn with_response(self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.with_script(MockScript::deltas(&[text.as_str()]))
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Streams that have been dropped or ran to completion
    pub fn streams_closed(&self) -> usize {
        self.streams_closed.load(Ordering::SeqCst)
    }

    pub fn recorded_prompts(&self) -> Vec<ChatPrompt> {
        lock(&self.recorded_prompts).clone()
    }

    pub fn recorded_models(&self) -> Vec<String> {
        lock(&self.recorded_models).clone()
    }

    fn next_script(&self) -> MockScript {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst);
        let scripts = lock(&self.scripts);
        if scripts.is_empty() {
            MockScript::default()
        } else {
            scripts[count.min(scripts.len() - 1)].clone()
        }
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_chat(
        &self,
        config: &ProviderConfig,
        prompt: &ChatPrompt,
    ) -> Result<ChunkStream> {
        lock(&self.recorded_prompts).push(prompt.clone());
        lock(&self.recorded_models).push(config.model_id.clone());

        let script = self.next_script();
        if let Some(failure) = &script.open_error {
            return Err(failure.to_error());
        }

        let guard = CloseGuard(Arc::clone(&self.streams_closed));
        let stream = async_stream::stream! {
            let _guard = guard;
            for step in script.steps {
                match step {
                    MockStep::Chunk(chunk) => {
                        yield Ok(chunk);
                    }
                    MockStep::Pause(duration) => tokio::time::sleep(duration).await,
                    MockStep::Fail(failure) => {
                        yield Err(failure.to_error());
                        break;
                    }
                    MockStep::Hang => futures::future::pending::<()>().await,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
