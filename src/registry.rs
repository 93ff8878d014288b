// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider registry
//!
//! Static catalogue of every backend relay knows how to talk to: the
//! credential it needs, where it lives by default, and which modalities it
//! can serve. Pure data; nothing here performs I/O.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Generation modality a backend can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Chat,
    Speech,
    Image,
    Video,
    Transcription,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Chat => "chat",
            Modality::Speech => "speech",
            Modality::Image => "image",
            Modality::Video => "video",
            Modality::Transcription => "transcription",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chat" | "text" => Ok(Modality::Chat),
            "speech" | "tts" => Ok(Modality::Speech),
            "image" => Ok(Modality::Image),
            "video" => Ok(Modality::Video),
            "transcription" | "stt" => Ok(Modality::Transcription),
            _ => Err(format!("Unknown modality: {}", s)),
        }
    }
}

/// Where a backend runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hosting {
    /// Remote API, needs a credential
    Cloud,
    /// Runs on this machine through Ollama
    Ollama,
    /// Runs on this machine from downloaded weight files
    LocalArtifact,
    /// Terminal always-succeeding entry
    Simulation,
}

impl Hosting {
    /// Whether models must be installed locally before use
    pub fn is_self_hosted(&self) -> bool {
        matches!(self, Hosting::Ollama | Hosting::LocalArtifact)
    }
}

/// A catalogue entry
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    /// Stable identifier used in settings and chains
    pub id: &'static str,
    /// Human-readable name
    pub display_name: &'static str,
    /// Environment variable holding the credential, if one is required
    pub credential_env: Option<&'static str>,
    /// Default API endpoint
    pub base_url: &'static str,
    /// Hosting model
    pub hosting: Hosting,
    /// Declared capabilities
    pub capabilities: &'static [Modality],
}

impl ProviderInfo {
    /// Whether the provider can serve the given modality
    pub fn supports(&self, modality: Modality) -> bool {
        self.capabilities.contains(&modality)
    }

    /// Whether a credential must be present before invoking this provider
    pub fn requires_credential(&self) -> bool {
        self.credential_env.is_some()
    }
}

static CATALOGUE: OnceLock<Vec<ProviderInfo>> = OnceLock::new();
static BY_ID: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();

/// The full provider catalogue, in registration order
pub fn all() -> &'static [ProviderInfo] {
    CATALOGUE.get_or_init(|| {
        use Modality::*;
        vec![
            ProviderInfo {
                id: "openai",
                display_name: "OpenAI",
                credential_env: Some("OPENAI_API_KEY"),
                base_url: "https://api.openai.com/v1",
                hosting: Hosting::Cloud,
                capabilities: &[Chat, Speech, Image, Transcription],
            },
            ProviderInfo {
                id: "anthropic",
                display_name: "Anthropic",
                credential_env: Some("ANTHROPIC_API_KEY"),
                base_url: "https://api.anthropic.com/v1",
                hosting: Hosting::Cloud,
                capabilities: &[Chat],
            },
            ProviderInfo {
                id: "google",
                display_name: "Google Generative AI",
                credential_env: Some("GOOGLE_API_KEY"),
                base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
                hosting: Hosting::Cloud,
                capabilities: &[Chat, Speech, Image],
            },
            ProviderInfo {
                id: "google-vertex",
                display_name: "Google Vertex AI",
                credential_env: Some("GOOGLE_VERTEX_API_KEY"),
                base_url: "https://aiplatform.googleapis.com/v1",
                hosting: Hosting::Cloud,
                capabilities: &[Chat, Image, Video],
            },
            ProviderInfo {
                id: "azure-openai",
                display_name: "Azure OpenAI",
                credential_env: Some("AZURE_OPENAI_API_KEY"),
                base_url: "https://models.inference.ai.azure.com",
                hosting: Hosting::Cloud,
                capabilities: &[Chat, Speech, Image],
            },
            ProviderInfo {
                id: "amazon-bedrock",
                display_name: "Amazon Bedrock",
                credential_env: Some("AWS_BEARER_TOKEN_BEDROCK"),
                base_url: "https://bedrock-runtime.us-east-1.amazonaws.com/openai/v1",
                hosting: Hosting::Cloud,
                capabilities: &[Chat, Image],
            },
            ProviderInfo {
                id: "xai",
                display_name: "xAI Grok",
                credential_env: Some("XAI_API_KEY"),
                base_url: "https://api.x.ai/v1",
                hosting: Hosting::Cloud,
                capabilities: &[Chat, Image],
            },
            ProviderInfo {
                id: "groq",
                display_name: "Groq",
                credential_env: Some("GROQ_API_KEY"),
                base_url: "https://api.groq.com/openai/v1",
                hosting: Hosting::Cloud,
                capabilities: &[Chat, Transcription],
            },
            ProviderInfo {
                id: "mistral",
                display_name: "Mistral AI",
                credential_env: Some("MISTRAL_API_KEY"),
                base_url: "https://api.mistral.ai/v1",
                hosting: Hosting::Cloud,
                capabilities: &[Chat],
            },
            ProviderInfo {
                id: "deepinfra",
                display_name: "DeepInfra",
                credential_env: Some("DEEPINFRA_API_KEY"),
                base_url: "https://api.deepinfra.com/v1/openai",
                hosting: Hosting::Cloud,
                capabilities: &[Chat, Image],
            },
            ProviderInfo {
                id: "together",
                display_name: "Together.ai",
                credential_env: Some("TOGETHER_API_KEY"),
                base_url: "https://api.together.xyz/v1",
                hosting: Hosting::Cloud,
                capabilities: &[Chat, Image],
            },
            ProviderInfo {
                id: "fal",
                display_name: "Fal AI",
                credential_env: Some("FAL_KEY"),
                base_url: "https://fal.run",
                hosting: Hosting::Cloud,
                capabilities: &[Image, Video],
            },
            ProviderInfo {
                id: "ollama",
                display_name: "Ollama",
                credential_env: None,
                base_url: "http://localhost:11434",
                hosting: Hosting::Ollama,
                capabilities: &[Chat],
            },
            ProviderInfo {
                id: "coqui-xtts",
                display_name: "Coqui XTTS (local)",
                credential_env: None,
                base_url: "http://localhost:8020",
                hosting: Hosting::LocalArtifact,
                capabilities: &[Speech],
            },
            ProviderInfo {
                id: "inworld-local",
                display_name: "Inworld TTS (local)",
                credential_env: None,
                base_url: "http://localhost:8021",
                hosting: Hosting::LocalArtifact,
                capabilities: &[Speech],
            },
            ProviderInfo {
                id: "simulation",
                display_name: "Simulation",
                credential_env: None,
                base_url: "",
                hosting: Hosting::Simulation,
                capabilities: &[Chat, Speech, Image, Video],
            },
        ]
    })
}

/// Look up a provider by id
pub fn find(id: &str) -> Option<&'static ProviderInfo> {
    let index = BY_ID.get_or_init(|| all().iter().enumerate().map(|(i, p)| (p.id, i)).collect());
    index.get(id).map(|&i| &all()[i])
}

/// Default model a provider is asked for when nothing else is configured
pub fn default_model(provider_id: &str, modality: Modality) -> Option<&'static str> {
    use Modality::*;
    let model = match (provider_id, modality) {
        ("openai" | "azure-openai", Chat) => "gpt-4o-mini",
        ("openai" | "azure-openai", Speech) => "gpt-4o-mini-tts",
        ("openai" | "azure-openai", Image) => "gpt-image-1",
        ("openai", Transcription) => "whisper-1",
        ("anthropic", Chat) => "claude-sonnet-4-20250514",
        ("google", Chat) => "gemini-2.0-flash",
        ("google", Speech) => "en-US-Neural2-F",
        ("google", Image) => "imagen-3.0-generate-002",
        ("google-vertex", Chat) => "gemini-2.0-flash",
        ("google-vertex", Image) => "imagen-3.0-generate-002",
        ("google-vertex", Video) => "veo-2.0-generate-001",
        ("amazon-bedrock", Chat) => "anthropic.claude-3-5-sonnet-20241022-v2:0",
        ("amazon-bedrock", Image) => "amazon.nova-canvas-v1:0",
        ("xai", Chat) => "grok-3-mini",
        ("xai", Image) => "grok-2-image",
        ("groq", Chat) => "llama-3.3-70b-versatile",
        ("groq", Transcription) => "whisper-large-v3",
        ("mistral", Chat) => "mistral-small-latest",
        ("deepinfra", Chat) => "meta-llama/Meta-Llama-3.1-8B-Instruct",
        ("deepinfra", Image) => "black-forest-labs/FLUX-1-schnell",
        ("together", Chat) => "meta-llama/Llama-3.3-70B-Instruct-Turbo",
        ("together", Image) => "black-forest-labs/FLUX.1-schnell",
        ("fal", Image) => "fal-ai/flux/schnell",
        ("fal", Video) => "fal-ai/ltx-video",
        ("ollama", Chat) => "llama3.2",
        ("coqui-xtts", Speech) => "xtts-v2",
        ("inworld-local", Speech) => "inworld-tts-1",
        ("simulation", _) => "simulation",
        _ => return None,
    };
    Some(model)
}

/// Providers able to serve a modality, in registration order
pub fn supporting(modality: Modality) -> Vec<&'static ProviderInfo> {
    all().iter().filter(|p| p.supports(modality)).collect()
}
