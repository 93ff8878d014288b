// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Ollama chat backend
//!
//! Streams `/api/chat` NDJSON responses from a local Ollama server.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;

use super::common::lines;
use crate::error::{ApiError, RelayError, Result};
use crate::llm::provider::{ChatBackend, ChatPrompt, ChunkStream, ProviderConfig, StreamChunk};

/// Local Ollama chat backend
pub struct OllamaBackend {
    client: Client,
}

impl OllamaBackend {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn build_request(config: &ProviderConfig, prompt: &ChatPrompt) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &prompt.system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": prompt.user }));
        serde_json::json!({
            "model": config.model_id,
            "messages": messages,
            "stream": true,
            "options": {
                "temperature": config.sampling.temperature,
                "num_predict": config.sampling.max_output_tokens,
            },
        })
    }

    /// Parse an error response
    fn parse_error(status: u16, body: &str) -> RelayError {
        if let Ok(error_response) = serde_json::from_str::<OllamaError>(body) {
            let message = error_response.error;
            if message.contains("model") && message.contains("not found") {
                RelayError::Api(ApiError::ModelNotFound(message))
            } else {
                RelayError::Api(ApiError::ServerError { status, message })
            }
        } else {
            RelayError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn stream_chat(
        &self,
        config: &ProviderConfig,
        prompt: &ChatPrompt,
    ) -> Result<ChunkStream> {
        let url = format!("{}/api/chat", config.endpoint());
        let response = self
            .client
            .post(&url)
            .json(&Self::build_request(config, prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    RelayError::Api(ApiError::Network(
                        "Ollama is not running. Start the Ollama app or run 'ollama serve'"
                            .to_string(),
                    ))
                } else {
                    RelayError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error(status, &body));
        }

        let line_stream = lines(response.bytes_stream());
        let chunks = async_stream::try_stream! {
            futures::pin_mut!(line_stream);
            while let Some(line) = line_stream.next().await {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let frame: StreamFrame = serde_json::from_str(&line).map_err(|e| {
                    RelayError::Api(ApiError::InvalidResponse(format!("bad stream frame: {}", e)))
                })?;
                if let Some(error) = frame.error {
                    Err::<(), _>(RelayError::Api(ApiError::StreamError(error)))?;
                }
                if let Some(message) = frame.message {
                    if !message.content.is_empty() {
                        yield StreamChunk::Delta(message.content);
                    }
                }
                if frame.done {
                    break;
                }
            }
        };
        Ok(Box::pin(chunks))
    }
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    message: Option<FrameMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{LocalRuntime, ProviderKind, SamplingParams};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> ProviderConfig {
        ProviderConfig {
            provider_id: "ollama".to_string(),
            model_id: "llama3.2".to_string(),
            credential: None,
            endpoint_override: Some(server.uri()),
            sampling: SamplingParams::default(),
            kind: ProviderKind::SelfHosted(LocalRuntime::Ollama),
        }
    }

    #[test]
    fn test_build_request_options() {
        let config = ProviderConfig {
            provider_id: "ollama".to_string(),
            model_id: "llama3.2".to_string(),
            credential: None,
            endpoint_override: None,
            sampling: SamplingParams {
                temperature: 0.1,
                max_output_tokens: 64,
            },
            kind: ProviderKind::SelfHosted(LocalRuntime::Ollama),
        };
        let body = OllamaBackend::build_request(&config, &ChatPrompt::new("hi"));
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["options"]["num_predict"], 64);
    }

    #[test]
    fn test_parse_error_model_not_found() {
        let err = OllamaBackend::parse_error(404, r#"{"error":"model 'nope' not found"}"#);
        assert!(matches!(err, RelayError::Api(ApiError::ModelNotFound(_))));
        let err = OllamaBackend::parse_error(500, "plain failure");
        assert!(err.to_string().contains("plain failure"));
    }

    #[tokio::test]
    async fn test_stream_ndjson() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let text = OllamaBackend::new()
            .complete(&config(&server), &ChatPrompt::new("hi"))
            .await
            .unwrap();
        assert_eq!(text, "Hello");
    }
}
