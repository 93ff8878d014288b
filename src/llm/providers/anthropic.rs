// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anthropic Messages API backend

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;

use super::common::{lines, parse_retry_after_seconds, request_error, status_error};
use crate::error::{ApiError, RelayError, Result};
use crate::llm::provider::{ChatBackend, ChatPrompt, ChunkStream, ProviderConfig, StreamChunk};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude backend
pub struct AnthropicBackend {
    client: Client,
}

impl AnthropicBackend {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn build_request(config: &ProviderConfig, prompt: &ChatPrompt) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": config.model_id,
            "max_tokens": config.sampling.max_output_tokens,
            "temperature": config.sampling.temperature,
            "messages": [{ "role": "user", "content": prompt.user }],
            "stream": true,
        });
        if let Some(system) = &prompt.system {
            body["system"] = serde_json::json!(system);
        }
        body
    }

    /// Map an error response; Anthropic reports its own error type names
    fn parse_error(status: u16, headers: &reqwest::header::HeaderMap, body: &str) -> RelayError {
        let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
        let error_type = parsed
            .as_ref()
            .and_then(|v| v["error"]["type"].as_str())
            .unwrap_or("");
        match error_type {
            "authentication_error" | "permission_error" => {
                RelayError::Api(ApiError::AuthenticationFailed)
            }
            "rate_limit_error" => {
                let secs = parse_retry_after_seconds(headers).unwrap_or(10);
                RelayError::Api(ApiError::RateLimited(secs as u32))
            }
            "overloaded_error" => RelayError::Api(ApiError::ServerError {
                status: 529,
                message: "Anthropic is overloaded".to_string(),
            }),
            _ => status_error(status, headers, body),
        }
    }
}

impl Default for AnthropicBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Event type and data of one SSE line pair
enum SseLine {
    Event(String),
    Data(String),
}

fn classify(line: &str) -> Option<SseLine> {
    if let Some(rest) = line.strip_prefix("event:") {
        Some(SseLine::Event(rest.trim().to_string()))
    } else {
        line.strip_prefix("data:")
            .map(|rest| SseLine::Data(rest.trim().to_string()))
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream_chat(
        &self,
        config: &ProviderConfig,
        prompt: &ChatPrompt,
    ) -> Result<ChunkStream> {
        let url = format!("{}/messages", config.endpoint());
        let key = config.credential.clone().unwrap_or_default();

        let response = self
            .client
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&Self::build_request(config, prompt))
            .send()
            .await
            .map_err(|e| request_error("anthropic", e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error(status, &headers, &body));
        }

        let line_stream = lines(response.bytes_stream());
        let chunks = async_stream::try_stream! {
            futures::pin_mut!(line_stream);
            let mut event = String::new();
            while let Some(line) = line_stream.next().await {
                match classify(&line?) {
                    Some(SseLine::Event(name)) => event = name,
                    Some(SseLine::Data(data)) => match event.as_str() {
                        "content_block_delta" => {
                            let parsed: serde_json::Value = serde_json::from_str(&data).map_err(|e| {
                                RelayError::Api(ApiError::InvalidResponse(format!("bad stream frame: {}", e)))
                            })?;
                            if let Some(text) = parsed["delta"]["text"].as_str() {
                                yield StreamChunk::Delta(text.to_string());
                            }
                        }
                        "error" => {
                            let parsed: serde_json::Value =
                                serde_json::from_str(&data).unwrap_or_default();
                            let message = parsed["error"]["message"]
                                .as_str()
                                .unwrap_or("stream error")
                                .to_string();
                            Err::<(), _>(RelayError::Api(ApiError::StreamError(message)))?;
                        }
                        "message_stop" => break,
                        _ => {}
                    },
                    None => {}
                }
            }
        };
        Ok(Box::pin(chunks))
    }
}
