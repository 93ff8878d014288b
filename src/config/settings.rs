// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for relay
//!
//! Handles loading and saving settings from ~/.relay/settings.json. Settings
//! are read once at startup and passed around as an immutable
//! [`ConfigSnapshot`](super::ConfigSnapshot); nothing in the core writes to
//! them mid-request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

mod credentials;
mod io;

/// Main settings structure, stored in ~/.relay/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Per-provider credentials and endpoint overrides, keyed by provider id
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,

    /// Default provider/model and sampling parameters
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Input analysis and routing policy
    #[serde(default)]
    pub router: RouterConfig,

    /// Fallback chains per modality
    #[serde(default)]
    pub chains: ChainsConfig,

    /// Self-hosted model management
    #[serde(default)]
    pub models: ModelsConfig,

    /// Timeout policy for streaming and service calls
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

/// Credentials and endpoint override for a single provider
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderSettings {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for API key (defaults to the registry's)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Base URL for API (for custom endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Default model for this provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Base URL for speech/image/video calls when it differs from the chat endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_base_url: Option<String>,
}

/// Default settings for new requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default provider to use
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Default model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// Default temperature for LLM
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens for response
    #[serde(default = "default_max_tokens")]
    pub max_output_tokens: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_tokens(),
        }
    }
}

/// Input analysis and routing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Confidence below which requests go to plain chat
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Estimated token count above which a request is complex
    #[serde(default = "default_complex_token_threshold")]
    pub complex_token_threshold: u32,

    /// When audio output is engaged, never classify into text-only agents
    #[serde(default = "default_true")]
    pub suppress_text_when_audio_active: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            complex_token_threshold: default_complex_token_threshold(),
            suppress_text_when_audio_active: true,
        }
    }
}

/// One entry of a configured fallback chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainEntry {
    /// Service (provider) id
    pub service: String,

    /// Lower runs first; equal priorities keep listed order
    #[serde(default)]
    pub priority: i32,

    /// Model override for this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ChainEntry {
    pub fn new(service: impl Into<String>, priority: i32) -> Self {
        Self {
            service: service.into(),
            priority,
            model: None,
        }
    }
}

/// Fallback chains per modality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainsConfig {
    #[serde(default = "default_chat_chain")]
    pub chat: Vec<ChainEntry>,

    #[serde(default = "default_speech_chain")]
    pub speech: Vec<ChainEntry>,

    #[serde(default = "default_image_chain")]
    pub image: Vec<ChainEntry>,

    #[serde(default = "default_video_chain")]
    pub video: Vec<ChainEntry>,

    /// Append the simulation backend as the terminal entry of every chain
    #[serde(default = "default_true")]
    pub simulation_fallback: bool,
}

impl Default for ChainsConfig {
    fn default() -> Self {
        Self {
            chat: default_chat_chain(),
            speech: default_speech_chain(),
            image: default_image_chain(),
            video: default_video_chain(),
            simulation_fallback: true,
        }
    }
}

/// A downloadable weight file for a locally hosted model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactSpec {
    /// Model id this artifact installs
    pub id: String,

    /// Download URL (typically HuggingFace)
    pub url: String,

    /// Expected SHA256; verification is skipped when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Expected size, used when the server sends no Content-Length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Self-hosted model management settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Where downloaded artifacts are stored
    #[serde(default = "default_models_dir")]
    pub storage_dir: PathBuf,

    /// Ollama server URL
    #[serde(default = "default_ollama_url")]
    pub ollama_base_url: String,

    /// How long a completed/error download state stays visible
    #[serde(default = "default_reset_delay_ms")]
    pub reset_delay_ms: u64,

    /// Minimum interval between downloading progress events
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Artifact-based models (local TTS weights, etc.)
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,

    /// Models the user has enabled for selection
    #[serde(default)]
    pub enabled: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_models_dir(),
            ollama_base_url: default_ollama_url(),
            reset_delay_ms: default_reset_delay_ms(),
            progress_interval_ms: default_progress_interval_ms(),
            artifacts: Vec::new(),
            enabled: Vec::new(),
        }
    }
}

/// Timeout policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Maximum silence between stream chunks or download progress events
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,

    /// Maximum time for a single fallback-chain service call
    #[serde(default = "default_service_timeout_secs")]
    pub service_timeout_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            chunk_timeout_secs: default_chunk_timeout_secs(),
            service_timeout_secs: default_service_timeout_secs(),
        }
    }
}

impl Settings {
    /// Settings for a provider, if any were stored
    pub fn provider(&self, id: &str) -> Option<&ProviderSettings> {
        self.providers.get(id)
    }

    /// Endpoint override for a provider
    pub fn base_url_for(&self, id: &str) -> Option<String> {
        self.provider(id).and_then(|p| p.base_url.clone())
    }

    /// Configured chain for a modality
    pub fn chain_for(&self, modality: crate::registry::Modality) -> &[ChainEntry] {
        use crate::registry::Modality;
        match modality {
            Modality::Chat => &self.chains.chat,
            Modality::Speech => &self.chains.speech,
            Modality::Image => &self.chains.image,
            Modality::Video => &self.chains.video,
            Modality::Transcription => &[],
        }
    }

    /// Endpoint override for media (speech/image/video) calls
    pub fn media_url_for(&self, id: &str) -> Option<String> {
        self.provider(id).and_then(|p| p.media_base_url.clone())
    }

    /// Look up an artifact spec by model id
    pub fn artifact(&self, model_id: &str) -> Option<&ArtifactSpec> {
        self.models.artifacts.iter().find(|a| a.id == model_id)
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_true() -> bool {
    true
}

fn default_confidence_threshold() -> f32 {
    0.6
}

fn default_complex_token_threshold() -> u32 {
    800
}

fn default_chat_chain() -> Vec<ChainEntry> {
    vec![
        ChainEntry::new("openai", 0),
        ChainEntry::new("anthropic", 1),
        ChainEntry::new("groq", 2),
    ]
}

fn default_speech_chain() -> Vec<ChainEntry> {
    vec![ChainEntry::new("google", 0), ChainEntry::new("openai", 1)]
}

fn default_image_chain() -> Vec<ChainEntry> {
    vec![ChainEntry::new("openai", 0), ChainEntry::new("fal", 1)]
}

fn default_video_chain() -> Vec<ChainEntry> {
    vec![ChainEntry::new("fal", 0)]
}

fn default_models_dir() -> PathBuf {
    Settings::relay_home().join("models")
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_reset_delay_ms() -> u64 {
    3000
}

fn default_progress_interval_ms() -> u64 {
    250
}

fn default_chunk_timeout_secs() -> u64 {
    60
}

fn default_service_timeout_secs() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Modality;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.defaults.provider, "openai");
        assert!((settings.router.confidence_threshold - 0.6).abs() < f32::EPSILON);
        assert!(settings.router.suppress_text_when_audio_active);
        assert!(settings.chains.simulation_fallback);
        assert_eq!(settings.models.reset_delay_ms, 3000);
        assert_eq!(settings.timeouts.chunk_timeout_secs, 60);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.chains.speech.len(), 2);
        assert_eq!(settings.chains.speech[0].service, "google");
        assert_eq!(settings.models.ollama_base_url, "http://localhost:11434");
    }

    #[test]
    fn test_partial_json_overrides() {
        let json = r#"{
            "defaults": { "provider": "ollama", "model": "llama3.2" },
            "router": { "confidence_threshold": 0.8 },
            "chains": { "video": [] , "simulation_fallback": false },
            "providers": { "openai": { "api_key": "sk-test" } }
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.defaults.provider, "ollama");
        assert!((settings.defaults.temperature - 0.7).abs() < f32::EPSILON);
        assert!((settings.router.confidence_threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(settings.router.complex_token_threshold, 800);
        assert!(settings.chains.video.is_empty());
        assert!(!settings.chains.simulation_fallback);
        assert_eq!(
            settings.provider("openai").unwrap().api_key.as_deref(),
            Some("sk-test")
        );
    }

    #[test]
    fn test_chain_for() {
        let settings = Settings::default();
        assert_eq!(settings.chain_for(Modality::Chat)[0].service, "openai");
        assert_eq!(settings.chain_for(Modality::Video)[0].service, "fal");
        assert!(settings.chain_for(Modality::Transcription).is_empty());
    }

    #[test]
    fn test_artifact_lookup() {
        let mut settings = Settings::default();
        settings.models.artifacts.push(ArtifactSpec {
            id: "xtts-v2".to_string(),
            url: "https://huggingface.co/coqui/XTTS-v2/resolve/main/model.pth".to_string(),
            sha256: None,
            size_bytes: Some(1_800_000_000),
        });
        assert!(settings.artifact("xtts-v2").is_some());
        assert!(settings.artifact("missing").is_none());
    }
}
