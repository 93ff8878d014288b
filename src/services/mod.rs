// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Concrete chain services and chain construction
//!
//! [`ChainBuilder`] turns the configured chain of a modality into a
//! [`FallbackChain`] of live services. Chains are built fresh for every
//! request from the current settings snapshot and credential store, so a key
//! added between requests takes effect on the next one.

pub mod chat;
pub mod image;
pub mod simulation;
pub mod speech;

pub use chat::{ChatHooks, ChatService};
pub use image::{FalGeneration, OpenAiImages};
pub use simulation::SimulationService;
pub use speech::{GoogleSpeech, LocalSpeech, OpenAiSpeech};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ChainEntry, ConfigSnapshot, CredentialStore};
use crate::error::{RelayError, Result};
use crate::fallback::{ChainService, FallbackChain, ModalityOutput, ModalityRequest, ServiceHealth};
use crate::llm::factory::BackendFactory;
use crate::llm::provider::{ChatBackend, ProviderConfig};
use crate::llm::providers::SimulationBackend;
use crate::models::ModelLifecycleManager;
use crate::progress::{NoopSink, ProgressSink};
use crate::registry::{self, Modality};

/// Where and how to call one provider for one modality
#[derive(Clone)]
pub struct ServiceTarget {
    pub id: String,
    pub endpoint: String,
    pub credential: Option<String>,
    /// Env var that should hold the credential, when one is required
    pub required_credential: Option<String>,
    pub model: String,
}

impl std::fmt::Debug for ServiceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTarget")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .finish()
    }
}

impl ServiceTarget {
    pub fn availability(
        &self,
        request: &ModalityRequest,
        modality: Modality,
    ) -> std::result::Result<(), String> {
        if request.modality != modality {
            return Err(format!("{} is not configured for {}", self.id, request.modality));
        }
        match (&self.required_credential, &self.credential) {
            (Some(env), None) => Err(format!("no API key (set {} or add it in settings)", env)),
            _ => Ok(()),
        }
    }
}

/// Chain entry that can never run; keeps the reason for diagnostics
pub struct UnavailableService {
    id: String,
    reason: String,
}

impl UnavailableService {
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChainService for UnavailableService {
    fn service_id(&self) -> &str {
        &self.id
    }

    fn availability(&self, _request: &ModalityRequest) -> std::result::Result<(), String> {
        Err(self.reason.clone())
    }

    async fn invoke(&self, _request: &ModalityRequest) -> Result<ModalityOutput> {
        Err(RelayError::Configuration(self.reason.clone()))
    }
}

/// Builds fallback chains from a settings snapshot
#[derive(Clone)]
pub struct ChainBuilder {
    settings: ConfigSnapshot,
    credentials: Arc<dyn CredentialStore>,
    health: Option<Arc<ServiceHealth>>,
    lifecycle: Option<Arc<ModelLifecycleManager>>,
    sink: Arc<dyn ProgressSink>,
    chat_backend: Option<Arc<dyn ChatBackend>>,
}

impl ChainBuilder {
    pub fn new(settings: ConfigSnapshot, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            settings,
            credentials,
            health: None,
            lifecycle: None,
            sink: Arc::new(NoopSink),
            chat_backend: None,
        }
    }

    pub fn with_health(mut self, health: Arc<ServiceHealth>) -> Self {
        self.health = Some(health);
        self
    }

    /// Used by local speech services to install their voice models
    pub fn with_lifecycle(mut self, lifecycle: Arc<ModelLifecycleManager>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Use one backend for every real chat provider instead of the factory
    pub fn with_chat_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.chat_backend = Some(backend);
        self
    }

    pub fn settings(&self) -> &ConfigSnapshot {
        &self.settings
    }

    fn target(&self, entry: &ChainEntry, modality: Modality, default_endpoint: &str) -> ServiceTarget {
        let id = entry.service.as_str();
        let requires_credential = registry::find(id)
            .map(|info| info.requires_credential())
            .unwrap_or(false);
        // Google speech is a separate API; its chat base URL does not apply.
        let chat_base = match (id, modality) {
            ("google", Modality::Speech) => None,
            _ => self.settings.base_url_for(id),
        };
        let endpoint = self
            .settings
            .media_url_for(id)
            .or(chat_base)
            .unwrap_or_else(|| default_endpoint.to_string());

        ServiceTarget {
            id: id.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credential: self.credentials.credential_for(id),
            required_credential: requires_credential
                .then(|| self.settings.credential_env_for(id))
                .flatten(),
            model: entry
                .model
                .clone()
                .or_else(|| registry::default_model(id, modality).map(str::to_string))
                .unwrap_or_else(|| "default".to_string()),
        }
    }

    fn chat_service(&self, entry: &ChainEntry, hooks: &ChatHooks) -> Arc<dyn ChainService> {
        let id = entry.service.as_str();
        let config = match ProviderConfig::resolve(
            &self.settings,
            self.credentials.as_ref(),
            id,
            entry.model.as_deref(),
        ) {
            Ok(config) => config,
            Err(e) => return Arc::new(UnavailableService::new(id, e.to_string())),
        };
        self.chat_service_for(config, hooks)
    }

    fn chat_service_for(&self, config: ProviderConfig, hooks: &ChatHooks) -> Arc<dyn ChainService> {
        let id = config.provider_id.clone();
        let simulation = id == "simulation";
        let backend: Arc<dyn ChatBackend> = if simulation {
            Arc::new(SimulationBackend)
        } else if let Some(backend) = &self.chat_backend {
            Arc::clone(backend)
        } else {
            match BackendFactory::chat_backend(&config) {
                Ok(backend) => backend,
                Err(e) => return Arc::new(UnavailableService::new(id, e.to_string())),
            }
        };

        let service = ChatService::new(id, Ok(config), backend)
            .with_hooks(hooks.clone())
            .with_sink(Arc::clone(&self.sink))
            .with_chunk_timeout(Duration::from_secs(self.settings.timeouts.chunk_timeout_secs));
        if simulation {
            Arc::new(service.as_simulation())
        } else {
            Arc::new(service)
        }
    }

    fn media_service(&self, entry: &ChainEntry, modality: Modality) -> Arc<dyn ChainService> {
        let id = entry.service.as_str();
        let base_url = registry::find(id).map(|info| info.base_url).unwrap_or("");
        match (modality, id) {
            (_, "simulation") => Arc::new(SimulationService::new()),
            (Modality::Speech, "openai" | "azure-openai") => {
                Arc::new(OpenAiSpeech::new(self.target(entry, modality, base_url)))
            }
            (Modality::Speech, "google") => {
                Arc::new(GoogleSpeech::new(self.target(entry, modality, speech::GOOGLE_TTS_URL)))
            }
            (Modality::Speech, "coqui-xtts" | "inworld-local") => {
                let target = self.target(entry, modality, base_url);
                let mut service = LocalSpeech::new(target.clone());
                if let Some(lifecycle) = &self.lifecycle {
                    if self.settings.artifact(&target.model).is_some() {
                        service = service.with_lifecycle(Arc::clone(lifecycle));
                    }
                }
                Arc::new(service)
            }
            (
                Modality::Image,
                "openai" | "azure-openai" | "google" | "xai" | "deepinfra" | "together",
            ) => Arc::new(OpenAiImages::new(self.target(entry, modality, base_url))),
            (Modality::Image | Modality::Video, "fal") => {
                Arc::new(FalGeneration::new(self.target(entry, modality, base_url), modality))
            }
            _ => Arc::new(UnavailableService::new(
                id,
                format!("no {} client for {}", modality, id),
            )),
        }
    }

    fn service(&self, entry: &ChainEntry, modality: Modality, hooks: &ChatHooks) -> Arc<dyn ChainService> {
        let id = entry.service.as_str();
        match registry::find(id) {
            None => Arc::new(UnavailableService::new(id, format!("Unknown provider: {}", id))),
            Some(info) if !info.supports(modality) => Arc::new(UnavailableService::new(
                id,
                format!("{} does not support {}", info.display_name, modality),
            )),
            Some(_) if modality == Modality::Chat => self.chat_service(entry, hooks),
            Some(_) => self.media_service(entry, modality),
        }
    }

    fn assemble(
        &self,
        modality: Modality,
        first: Option<Arc<dyn ChainService>>,
        hooks: &ChatHooks,
    ) -> Result<FallbackChain> {
        let mut chain = FallbackChain::new(modality);
        if let Some(health) = &self.health {
            chain = chain.with_health(Arc::clone(health));
        }
        if modality != Modality::Chat {
            chain = chain.with_service_timeout(Duration::from_secs(
                self.settings.timeouts.service_timeout_secs,
            ));
        }
        if let Some(first) = first {
            chain.push(first, i32::MIN)?;
        }

        for entry in self.settings.chain_for(modality) {
            // The explicitly selected provider already leads the chat chain.
            if chain.contains(&entry.service) && modality == Modality::Chat {
                continue;
            }
            chain.push(self.service(entry, modality, hooks), entry.priority)?;
        }

        if self.settings.chains.simulation_fallback && !chain.contains("simulation") {
            let simulation = ChainEntry::new("simulation", i32::MAX);
            chain.push(self.service(&simulation, modality, hooks), i32::MAX)?;
        }

        tracing::debug!(
            target: "relay.fallback",
            modality = %modality,
            services = ?chain.service_ids(),
            "chain built"
        );
        Ok(chain)
    }

    /// Chain for speech, image or video
    pub fn build(&self, modality: Modality) -> Result<FallbackChain> {
        self.assemble(modality, None, &ChatHooks::default())
    }

    /// Chat chain led by the selected provider, then the configured chat chain
    pub fn build_chat(&self, primary: Option<ProviderConfig>, hooks: ChatHooks) -> Result<FallbackChain> {
        let first = primary.map(|config| self.chat_service_for(config, &hooks));
        self.assemble(Modality::Chat, first, &hooks)
    }
}
