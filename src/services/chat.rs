// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat chain entries
//!
//! Each entry runs a full [`GenerationSession`] so chat keeps streaming and
//! cancellation while sharing the chain algorithm with the other modalities.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RelayError, Result};
use crate::fallback::{ChainService, ModalityOutput, ModalityRequest, Payload};
use crate::llm::provider::{ChatBackend, ProviderConfig};
use crate::progress::{NoopSink, ProgressSink};
use crate::registry::Modality;
use crate::session::{GenerationSession, SessionControl, SessionOutcome, DEFAULT_CHUNK_TIMEOUT};

type ChunkHook = Arc<dyn Fn(&str) + Send + Sync>;
type SessionHook = Arc<dyn Fn(SessionControl) + Send + Sync>;

/// Observers attached to every session a chat chain opens
#[derive(Clone, Default)]
pub struct ChatHooks {
    on_chunk: Option<ChunkHook>,
    on_session: Option<SessionHook>,
}

impl ChatHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives the accumulated output of whichever service is streaming.
    /// A later service starts over, so its first update replaces the text.
    pub fn with_chunk<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_chunk = Some(Arc::new(f));
        self
    }

    /// Receives the control of each session as it opens
    pub fn with_session<F>(mut self, f: F) -> Self
    where
        F: Fn(SessionControl) + Send + Sync + 'static,
    {
        self.on_session = Some(Arc::new(f));
        self
    }
}

/// A chat provider as a chain entry
pub struct ChatService {
    id: String,
    /// Resolution failure (e.g. missing credential) makes the entry unavailable
    config: std::result::Result<ProviderConfig, String>,
    backend: Arc<dyn ChatBackend>,
    simulation: bool,
    hooks: ChatHooks,
    sink: Arc<dyn ProgressSink>,
    chunk_timeout: Duration,
}

impl ChatService {
    pub fn new(
        id: impl Into<String>,
        config: std::result::Result<ProviderConfig, String>,
        backend: Arc<dyn ChatBackend>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            backend,
            simulation: false,
            hooks: ChatHooks::default(),
            sink: Arc::new(NoopSink),
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }

    pub fn with_hooks(mut self, hooks: ChatHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub fn as_simulation(mut self) -> Self {
        self.simulation = true;
        self
    }
}

#[async_trait]
impl ChainService for ChatService {
    fn service_id(&self) -> &str {
        &self.id
    }

    fn availability(&self, request: &ModalityRequest) -> std::result::Result<(), String> {
        if request.modality != Modality::Chat {
            return Err(format!("{} only serves chat", self.id));
        }
        self.config.as_ref().map(|_| ()).map_err(Clone::clone)
    }

    fn is_simulation(&self) -> bool {
        self.simulation
    }

    async fn invoke(&self, request: &ModalityRequest) -> Result<ModalityOutput> {
        let config = self
            .config
            .as_ref()
            .map_err(|reason| RelayError::Configuration(reason.clone()))?
            .clone();
        let model = config.model_id.clone();

        let mut handle = GenerationSession::new(Arc::clone(&self.backend))
            .with_sink(Arc::clone(&self.sink))
            .with_chunk_timeout(self.chunk_timeout)
            .start(config, request.prompt.clone());
        if let Some(hook) = &self.hooks.on_chunk {
            let hook = Arc::clone(hook);
            handle.on_chunk(move |text| hook(text));
        }
        if let Some(hook) = &self.hooks.on_session {
            hook(handle.control());
        }

        let payload = match handle.wait().await? {
            SessionOutcome::Completed(text) => Payload::Text(text),
            SessionOutcome::Empty => Payload::Empty,
            SessionOutcome::Cancelled => return Err(RelayError::Cancelled),
        };
        Ok(ModalityOutput::new(payload)
            .with_metadata("provider", self.id.clone())
            .with_metadata("model", model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock_provider::{MockBackend, MockFailure, MockScript};
    use crate::llm::provider::{ProviderKind, SamplingParams};
    use std::sync::Mutex;

    fn config() -> ProviderConfig {
        ProviderConfig {
            provider_id: "openai".to_string(),
            model_id: "gpt-test".to_string(),
            credential: Some("sk".to_string()),
            endpoint_override: None,
            sampling: SamplingParams::default(),
            kind: ProviderKind::Cloud,
        }
    }

    fn chat_request() -> ModalityRequest {
        ModalityRequest::text(Modality::Chat, "hello")
    }

    #[tokio::test]
    async fn test_invoke_streams_through_hooks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let backend = MockBackend::new().with_script(MockScript::deltas(&["Hi", " there"]));
        let service = ChatService::new("openai", Ok(config()), Arc::new(backend)).with_hooks(
            ChatHooks::new().with_chunk(move |t| captured.lock().unwrap().push(t.to_string())),
        );

        let output = service.invoke(&chat_request()).await.unwrap();
        assert_eq!(output.payload, Payload::Text("Hi there".to_string()));
        assert_eq!(output.metadata.get("model").map(String::as_str), Some("gpt-test"));
        assert_eq!(*seen.lock().unwrap(), vec!["Hi", "Hi there"]);
    }

    #[tokio::test]
    async fn test_unresolved_config_is_unavailable() {
        let service = ChatService::new(
            "anthropic",
            Err("No API key for Anthropic (set ANTHROPIC_API_KEY or add it in settings)".to_string()),
            Arc::new(MockBackend::new()),
        );
        let reason = service.availability(&chat_request()).unwrap_err();
        assert!(reason.contains("ANTHROPIC_API_KEY"));
    }

    #[tokio::test]
    async fn test_wrong_modality_is_unavailable() {
        let service = ChatService::new("openai", Ok(config()), Arc::new(MockBackend::new()));
        assert!(service
            .availability(&ModalityRequest::text(Modality::Image, "cat"))
            .is_err());
    }

    #[tokio::test]
    async fn test_cancelled_session_maps_to_cancelled_error() {
        let backend = MockBackend::new().with_script(MockScript::deltas(&["part"]).then_hang());
        let service = ChatService::new("openai", Ok(config()), Arc::new(backend)).with_hooks(
            ChatHooks::new().with_session(|control| control.cancel()),
        );
        let err = service.invoke(&chat_request()).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_quota_error_propagates_for_chain() {
        let backend = MockBackend::new().with_script(MockScript::failing(MockFailure::QuotaExceeded));
        let service = ChatService::new("openai", Ok(config()), Arc::new(backend));
        let err = service.invoke(&chat_request()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.advances_chain());
    }
}
