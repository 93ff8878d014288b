// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Backend factory
//!
//! Maps a resolved [`ProviderConfig`] to the chat backend that speaks its
//! protocol. The decision is made from the capability tag on the config, not
//! from string comparisons scattered across call sites.

use std::sync::Arc;

use crate::config::{CredentialStore, Settings};
use crate::error::{RelayError, Result};
use crate::llm::provider::{ChatBackend, LocalRuntime, ProviderConfig, ProviderKind};
use crate::llm::providers::{
    AnthropicBackend, OllamaBackend, OpenAiCompatibleBackend, SimulationBackend,
};
use crate::registry::{self, Modality};

/// Factory for chat backends
pub struct BackendFactory;

impl BackendFactory {
    /// Chat backend for a resolved provider config
    pub fn chat_backend(config: &ProviderConfig) -> Result<Arc<dyn ChatBackend>> {
        let supports_chat = registry::find(&config.provider_id)
            .map(|info| info.supports(Modality::Chat))
            .unwrap_or(false);
        if !supports_chat {
            return Err(RelayError::Configuration(format!(
                "{} does not provide chat completions",
                config.provider_id
            )));
        }

        match config.kind {
            ProviderKind::Simulation => Ok(Arc::new(SimulationBackend)),
            ProviderKind::SelfHosted(LocalRuntime::Ollama) => Ok(Arc::new(OllamaBackend::new())),
            ProviderKind::SelfHosted(LocalRuntime::Artifact) => Err(RelayError::Configuration(
                format!("{} has no chat runtime", config.provider_id),
            )),
            ProviderKind::Cloud if config.provider_id == "anthropic" => {
                Ok(Arc::new(AnthropicBackend::new()))
            }
            ProviderKind::Cloud => Ok(Arc::new(OpenAiCompatibleBackend::new())),
        }
    }

    /// Get the provider name from settings, with fallback to default
    pub fn resolve_provider_name(requested: Option<&str>, settings: &Settings) -> String {
        requested
            .map(|s| s.to_string())
            .unwrap_or_else(|| settings.defaults.provider.clone())
    }

    /// Check if a provider is configured (has required credentials)
    pub fn is_configured(provider_id: &str, credentials: &dyn CredentialStore) -> bool {
        match registry::find(provider_id) {
            Some(info) if info.requires_credential() => {
                credentials.credential_for(provider_id).is_some()
            }
            Some(_) => true,
            None => false,
        }
    }
}
