// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Speech synthesis services

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use super::ServiceTarget;
use crate::error::{ApiError, RelayError, Result};
use crate::fallback::{ChainService, ModalityOutput, ModalityRequest, Payload};
use crate::llm::providers::{request_error, status_error};
use crate::models::ModelLifecycleManager;
use crate::registry::Modality;

/// Default endpoint of Google Cloud Text-to-Speech
pub const GOOGLE_TTS_URL: &str = "https://texttospeech.googleapis.com/v1";

fn decode_audio(encoded: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| RelayError::Api(ApiError::InvalidResponse(format!("bad audio encoding: {}", e))))
}

async fn check(provider: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(target: "relay.fallback", provider, status, "speech request rejected");
    Err(status_error(status, &headers, &body))
}

/// OpenAI `/audio/speech` (also served by Azure OpenAI)
pub struct OpenAiSpeech {
    target: ServiceTarget,
    client: Client,
}

impl OpenAiSpeech {
    pub fn new(target: ServiceTarget) -> Self {
        Self {
            target,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChainService for OpenAiSpeech {
    fn service_id(&self) -> &str {
        &self.target.id
    }

    fn availability(&self, request: &ModalityRequest) -> std::result::Result<(), String> {
        self.target.availability(request, Modality::Speech)
    }

    async fn invoke(&self, request: &ModalityRequest) -> Result<ModalityOutput> {
        let voice = request.option("voice").unwrap_or("alloy");
        let body = serde_json::json!({
            "model": self.target.model,
            "input": request.prompt.user,
            "voice": voice,
            "response_format": "mp3",
        });
        let mut req = self
            .client
            .post(format!("{}/audio/speech", self.target.endpoint))
            .json(&body);
        if let Some(key) = &self.target.credential {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| request_error(&self.target.id, e))?;
        let response = check(&self.target.id, response).await?;
        let data = response.bytes().await.map_err(|e| request_error(&self.target.id, e))?;
        if data.is_empty() {
            return Err(RelayError::Api(ApiError::InvalidResponse(
                "empty audio response".to_string(),
            )));
        }

        Ok(ModalityOutput::new(Payload::Binary {
            mime_type: "audio/mpeg".to_string(),
            data: data.to_vec(),
        })
        .with_metadata("model", self.target.model.clone())
        .with_metadata("voice", voice))
    }
}

/// Google Cloud `text:synthesize`
pub struct GoogleSpeech {
    target: ServiceTarget,
    client: Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleSynthesizeResponse {
    #[serde(default)]
    audio_content: Option<String>,
}

impl GoogleSpeech {
    pub fn new(target: ServiceTarget) -> Self {
        Self {
            target,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChainService for GoogleSpeech {
    fn service_id(&self) -> &str {
        &self.target.id
    }

    fn availability(&self, request: &ModalityRequest) -> std::result::Result<(), String> {
        self.target.availability(request, Modality::Speech)
    }

    async fn invoke(&self, request: &ModalityRequest) -> Result<ModalityOutput> {
        let language = request.option("language").unwrap_or("en-US");
        let voice = request.option("voice").unwrap_or(&self.target.model);
        let body = serde_json::json!({
            "input": { "text": request.prompt.user },
            "voice": { "languageCode": language, "name": voice },
            "audioConfig": { "audioEncoding": "MP3" },
        });
        let mut req = self
            .client
            .post(format!("{}/text:synthesize", self.target.endpoint))
            .json(&body);
        if let Some(key) = &self.target.credential {
            req = req.query(&[("key", key)]);
        }
        let response = req
            .send()
            .await
            .map_err(|e| request_error(&self.target.id, e))?;
        let response = check(&self.target.id, response).await?;
        let parsed: GoogleSynthesizeResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Api(ApiError::InvalidResponse(e.to_string())))?;
        let encoded = parsed.audio_content.ok_or_else(|| {
            RelayError::Api(ApiError::InvalidResponse("missing audioContent".to_string()))
        })?;

        Ok(ModalityOutput::new(Payload::Binary {
            mime_type: "audio/mpeg".to_string(),
            data: decode_audio(&encoded)?,
        })
        .with_metadata("voice", voice)
        .with_metadata("language", language))
    }
}

#[derive(Debug, Deserialize)]
struct LocalSynthesizeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    sample_rate: Option<u32>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

/// Locally hosted TTS server (Coqui XTTS, Inworld) that answers
/// `POST /synthesize` with base64 audio
pub struct LocalSpeech {
    target: ServiceTarget,
    client: Client,
    lifecycle: Option<Arc<ModelLifecycleManager>>,
}

impl LocalSpeech {
    pub fn new(target: ServiceTarget) -> Self {
        Self {
            target,
            client: Client::new(),
            lifecycle: None,
        }
    }

    /// Make sure the voice model is installed before the first call
    pub fn with_lifecycle(mut self, lifecycle: Arc<ModelLifecycleManager>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }
}

#[async_trait]
impl ChainService for LocalSpeech {
    fn service_id(&self) -> &str {
        &self.target.id
    }

    fn availability(&self, request: &ModalityRequest) -> std::result::Result<(), String> {
        self.target.availability(request, Modality::Speech)
    }

    async fn invoke(&self, request: &ModalityRequest) -> Result<ModalityOutput> {
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.ensure_available(&self.target.model).await?;
        }

        let body = serde_json::json!({
            "text": request.prompt.user,
            "voice": request.option("voice"),
            "language": request.option("language").unwrap_or("en"),
            "model": self.target.model,
            "format": "wav",
        });
        let response = self
            .client
            .post(format!("{}/synthesize", self.target.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    RelayError::Api(ApiError::Network(format!(
                        "{} speech server is not running at {}",
                        self.target.id, self.target.endpoint
                    )))
                } else {
                    request_error(&self.target.id, e)
                }
            })?;
        let response = check(&self.target.id, response).await?;
        let parsed: LocalSynthesizeResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Api(ApiError::InvalidResponse(e.to_string())))?;

        let audio = match (parsed.success, parsed.audio) {
            (true, Some(audio)) => audio,
            (_, _) => {
                return Err(RelayError::Api(ApiError::ServerError {
                    status: 500,
                    message: parsed
                        .error
                        .unwrap_or_else(|| "synthesis failed".to_string()),
                }))
            }
        };
        let format = parsed.format.unwrap_or_else(|| "wav".to_string());

        let mut output = ModalityOutput::new(Payload::Binary {
            mime_type: format!("audio/{}", format),
            data: decode_audio(&audio)?,
        })
        .with_metadata("model", self.target.model.clone());
        if let Some(rate) = parsed.sample_rate {
            output = output.with_metadata("sample_rate", rate.to_string());
        }
        if let Some(duration) = parsed.duration {
            output = output.with_metadata("duration_secs", format!("{:.2}", duration));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(id: &str, endpoint: &str, credential: Option<&str>, model: &str) -> ServiceTarget {
        ServiceTarget {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
            credential: credential.map(str::to_string),
            required_credential: None,
            model: model.to_string(),
        }
    }

    fn speech_request() -> ModalityRequest {
        ModalityRequest::text(Modality::Speech, "Hello there")
    }

    #[tokio::test]
    async fn test_openai_speech_returns_audio_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({ "input": "Hello there" })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let service = OpenAiSpeech::new(target("openai", &server.uri(), Some("sk-test"), "tts-1"));
        let output = service.invoke(&speech_request()).await.unwrap();
        assert_eq!(
            output.payload,
            Payload::Binary {
                mime_type: "audio/mpeg".to_string(),
                data: vec![1, 2, 3]
            }
        );
    }

    #[tokio::test]
    async fn test_openai_speech_quota_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "You exceeded your current quota" }
            })))
            .mount(&server)
            .await;

        let service = OpenAiSpeech::new(target("openai", &server.uri(), Some("sk"), "tts-1"));
        let err = service.invoke(&speech_request()).await.unwrap_err();
        assert!(matches!(err, RelayError::Api(ApiError::QuotaExceeded(_))));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_google_speech_decodes_audio_content() {
        let server = MockServer::start().await;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"mp3-bytes");
        Mock::given(method("POST"))
            .and(path("/text:synthesize"))
            .and(query_param("key", "g-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "audioContent": encoded })),
            )
            .mount(&server)
            .await;

        let service = GoogleSpeech::new(target("google", &server.uri(), Some("g-key"), "en-US-Neural2-F"));
        let output = service.invoke(&speech_request()).await.unwrap();
        match output.payload {
            Payload::Binary { data, .. } => assert_eq!(data, b"mp3-bytes"),
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(output.metadata.get("voice").map(String::as_str), Some("en-US-Neural2-F"));
    }

    #[tokio::test]
    async fn test_google_missing_audio_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/text:synthesize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let service = GoogleSpeech::new(target("google", &server.uri(), Some("k"), "v"));
        let err = service.invoke(&speech_request()).await.unwrap_err();
        assert!(matches!(err, RelayError::Api(ApiError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_local_speech_success_and_failure() {
        let server = MockServer::start().await;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"RIFF....WAVE");
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .and(body_partial_json(serde_json::json!({ "text": "Hello there" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "audio": encoded,
                "format": "wav",
                "sample_rate": 24000,
                "duration": 1.5
            })))
            .mount(&server)
            .await;

        let service = LocalSpeech::new(target("coqui-xtts", &server.uri(), None, "xtts-v2"));
        let output = service.invoke(&speech_request()).await.unwrap();
        assert_eq!(output.payload.mime_type(), Some("audio/wav"));
        assert_eq!(output.metadata.get("sample_rate").map(String::as_str), Some("24000"));

        let failing = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "error": "Model not loaded"
            })))
            .mount(&failing)
            .await;
        let service = LocalSpeech::new(target("coqui-xtts", &failing.uri(), None, "xtts-v2"));
        let err = service.invoke(&speech_request()).await.unwrap_err();
        assert!(err.to_string().contains("Model not loaded"));
    }
}
