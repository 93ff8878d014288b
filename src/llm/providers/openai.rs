// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI-compatible chat backend
//!
//! Speaks the `/chat/completions` SSE protocol used by OpenAI and by the
//! compatible endpoints of Groq, xAI, Mistral, DeepInfra, Together, Azure,
//! Bedrock and Google.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;

use super::common::{lines, request_error, sse_data, status_error};
use crate::error::{ApiError, RelayError, Result};
use crate::llm::provider::{ChatBackend, ChatPrompt, ChunkStream, ProviderConfig, StreamChunk};

/// Chat backend for any OpenAI-compatible API
pub struct OpenAiCompatibleBackend {
    client: Client,
}

impl OpenAiCompatibleBackend {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
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
            "temperature": config.sampling.temperature,
            "max_tokens": config.sampling.max_output_tokens,
            "stream": true,
        })
    }
}

impl Default for OpenAiCompatibleBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn stream_chat(
        &self,
        config: &ProviderConfig,
        prompt: &ChatPrompt,
    ) -> Result<ChunkStream> {
        let url = format!("{}/chat/completions", config.endpoint());
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &config.credential {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .json(&Self::build_request(config, prompt))
            .send()
            .await
            .map_err(|e| request_error(&config.provider_id, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &headers, &body));
        }

        let line_stream = lines(response.bytes_stream());
        let chunks = async_stream::try_stream! {
            futures::pin_mut!(line_stream);
            while let Some(line) = line_stream.next().await {
                let line = line?;
                let Some(data) = sse_data(&line) else { continue };
                if data == "[DONE]" {
                    break;
                }
                let chunk: StreamFrame = serde_json::from_str(data).map_err(|e| {
                    RelayError::Api(ApiError::InvalidResponse(format!("bad stream frame: {}", e)))
                })?;
                if let Some(error) = chunk.error {
                    Err::<(), _>(RelayError::Api(ApiError::StreamError(error.message)))?;
                }
                if let Some(text) = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                {
                    yield StreamChunk::Delta(text);
                }
            }
        };
        Ok(Box::pin(chunks))
    }
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<FrameError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{ProviderKind, SamplingParams};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> ProviderConfig {
        ProviderConfig {
            provider_id: "openai".to_string(),
            model_id: "gpt-4o-mini".to_string(),
            credential: Some("sk-test".to_string()),
            endpoint_override: Some(server.uri()),
            sampling: SamplingParams::default(),
            kind: ProviderKind::Cloud,
        }
    }

    #[test]
    fn test_build_request_includes_system() {
        let config = ProviderConfig {
            provider_id: "groq".to_string(),
            model_id: "llama-3.1-8b-instant".to_string(),
            credential: None,
            endpoint_override: None,
            sampling: SamplingParams {
                temperature: 0.2,
                max_output_tokens: 128,
            },
            kind: ProviderKind::Cloud,
        };
        let prompt = ChatPrompt::new("hi").with_system("be brief");
        let body = OpenAiCompatibleBackend::build_request(&config, &prompt);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 128);
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn test_stream_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let backend = OpenAiCompatibleBackend::new();
        let text = backend
            .complete(&config(&server), &ChatPrompt::new("hi"))
            .await
            .unwrap();
        assert_eq!(text, "Hello, world");
    }

    #[tokio::test]
    async fn test_quota_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string(
                r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#,
            ))
            .mount(&server)
            .await;

        let backend = OpenAiCompatibleBackend::new();
        let err = match backend
            .stream_chat(&config(&server), &ChatPrompt::new("hi"))
            .await
        {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, RelayError::Api(ApiError::QuotaExceeded(_))));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("data: {not json}\n\n"))
            .mount(&server)
            .await;

        let backend = OpenAiCompatibleBackend::new();
        let err = backend
            .complete(&config(&server), &ChatPrompt::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Api(ApiError::InvalidResponse(_))));
    }
}
