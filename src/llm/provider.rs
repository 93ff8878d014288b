// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat backend trait and provider configuration
//!
//! Defines the narrow interface the core uses to talk to any chat backend,
//! and [`ProviderConfig`], the fully resolved selection of provider, model,
//! credential and sampling parameters for one request.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::{CredentialStore, Settings};
use crate::error::{RelayError, Result};
use crate::registry::{self, Hosting, Modality};
use crate::request::{MediaKind, Request};

/// One frame of a streamed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Text to append to what has been received so far
    Delta(String),
    /// The full response so far, replacing what was received before
    Snapshot(String),
}

/// Stream of chunks from a backend
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// What a chat backend is asked to answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatPrompt {
    /// System instructions
    pub system: Option<String>,
    /// User turn, including inlined text attachments
    pub user: String,
}

impl ChatPrompt {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Build the user turn from a request.
    ///
    /// Text attachments are inlined; other media is referenced by name.
    pub fn from_request(request: &Request) -> Self {
        let mut user = request.raw_text.clone();
        for attachment in &request.attachments {
            if attachment.kind == MediaKind::Text {
                user.push_str(&format!(
                    "\n\n[{}]\n{}",
                    attachment.name,
                    String::from_utf8_lossy(&attachment.data)
                ));
            } else {
                user.push_str(&format!("\n\n[attached {:?}: {}]", attachment.kind, attachment.name));
            }
        }
        if !request.context_annotations.is_empty() {
            let refs: Vec<&str> = request.context_annotations.iter().map(String::as_str).collect();
            user.push_str(&format!("\n\nContext: {}", refs.join(", ")));
        }
        Self { system: None, user }
    }
}

/// Local runtime of a self-hosted provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalRuntime {
    /// Served by an Ollama daemon
    Ollama,
    /// Weights downloaded as files and served by a local process
    Artifact,
}

/// Capability tag resolved once when a [`ProviderConfig`] is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Cloud,
    SelfHosted(LocalRuntime),
    Simulation,
}

impl ProviderKind {
    pub fn from_hosting(hosting: Hosting) -> Self {
        match hosting {
            Hosting::Cloud => ProviderKind::Cloud,
            Hosting::Ollama => ProviderKind::SelfHosted(LocalRuntime::Ollama),
            Hosting::LocalArtifact => ProviderKind::SelfHosted(LocalRuntime::Artifact),
            Hosting::Simulation => ProviderKind::Simulation,
        }
    }

    pub fn is_self_hosted(&self) -> bool {
        matches!(self, ProviderKind::SelfHosted(_))
    }
}

/// Sampling parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 4096,
        }
    }
}

/// Resolved backend selection. Replaced wholesale on reselection, never
/// partially mutated, so credential and model always belong together.
#[derive(Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub model_id: String,
    /// Absent for no-auth local backends
    pub credential: Option<String>,
    pub endpoint_override: Option<String>,
    pub sampling: SamplingParams,
    pub kind: ProviderKind,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider_id", &self.provider_id)
            .field("model_id", &self.model_id)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("endpoint_override", &self.endpoint_override)
            .field("sampling", &self.sampling)
            .field("kind", &self.kind)
            .finish()
    }
}

impl ProviderConfig {
    /// Resolve a provider/model pair against the catalogue, settings and
    /// credential store.
    ///
    /// Fails with a configuration error for an unknown provider or a cloud
    /// provider with no credential; the error names the variable to set.
    pub fn resolve(
        settings: &Settings,
        credentials: &dyn CredentialStore,
        provider_id: &str,
        model_id: Option<&str>,
    ) -> Result<Self> {
        let info = registry::find(provider_id).ok_or_else(|| {
            RelayError::Configuration(format!("Unknown provider: {}", provider_id))
        })?;

        let kind = ProviderKind::from_hosting(info.hosting);
        let credential = credentials.credential_for(provider_id);
        if info.requires_credential() && credential.is_none() {
            let env = settings
                .credential_env_for(provider_id)
                .unwrap_or_else(|| format!("{}_API_KEY", provider_id.to_uppercase()));
            return Err(RelayError::Configuration(format!(
                "No API key for {} (set {} or add it in settings)",
                info.display_name, env
            )));
        }

        let model_id = model_id
            .map(str::to_string)
            .or_else(|| settings.provider(provider_id).and_then(|p| p.default_model.clone()))
            .or_else(|| {
                (provider_id != settings.defaults.provider)
                    .then(|| registry::default_model(provider_id, Modality::Chat))
                    .flatten()
                    .map(str::to_string)
            })
            .unwrap_or_else(|| settings.defaults.model.clone());

        let endpoint_override = match kind {
            ProviderKind::SelfHosted(LocalRuntime::Ollama) => settings
                .base_url_for(provider_id)
                .or_else(|| Some(settings.models.ollama_base_url.clone())),
            _ => settings.base_url_for(provider_id),
        };

        Ok(Self {
            provider_id: provider_id.to_string(),
            model_id,
            credential,
            endpoint_override,
            sampling: SamplingParams {
                temperature: settings.defaults.temperature,
                max_output_tokens: settings.defaults.max_output_tokens,
            },
            kind,
        })
    }

    /// Resolve the configured default provider and model
    pub fn from_defaults(settings: &Settings, credentials: &dyn CredentialStore) -> Result<Self> {
        Self::resolve(
            settings,
            credentials,
            &settings.defaults.provider,
            Some(&settings.defaults.model),
        )
    }

    /// Endpoint to call: the override if set, else the catalogue default
    pub fn endpoint(&self) -> String {
        self.endpoint_override
            .clone()
            .or_else(|| registry::find(&self.provider_id).map(|p| p.base_url.to_string()))
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string()
    }

    pub fn is_self_hosted(&self) -> bool {
        self.kind.is_self_hosted()
    }
}

/// Backend that can answer a chat prompt as a stream of chunks
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logs (e.g. "openai-compatible", "ollama")
    fn name(&self) -> &str;

    /// Open a streamed response. Dropping the stream aborts the transport.
    async fn stream_chat(&self, config: &ProviderConfig, prompt: &ChatPrompt)
        -> Result<ChunkStream>;

    /// Non-streaming answer, built by draining the stream
    async fn complete(&self, config: &ProviderConfig, prompt: &ChatPrompt) -> Result<String> {
        let mut stream = self.stream_chat(config, prompt).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::Delta(delta) => text.push_str(&delta),
                StreamChunk::Snapshot(snapshot) => text = snapshot,
            }
        }
        Ok(text)
    }
}
