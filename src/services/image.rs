// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Image and video generation services

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use super::ServiceTarget;
use crate::error::{ApiError, RelayError, Result};
use crate::fallback::{ChainService, ModalityOutput, ModalityRequest, Payload};
use crate::llm::providers::{request_error, status_error};
use crate::registry::Modality;

async fn post_json(
    client: &Client,
    target: &ServiceTarget,
    url: String,
    auth: Option<(&str, String)>,
    body: &serde_json::Value,
) -> Result<reqwest::Response> {
    let mut req = client.post(url).json(body);
    if let Some((name, value)) = auth {
        req = req.header(name, value);
    }
    let response = req.send().await.map_err(|e| request_error(&target.id, e))?;
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let text = response.text().await.unwrap_or_default();
    Err(status_error(status, &headers, &text))
}

fn invalid(message: impl Into<String>) -> RelayError {
    RelayError::Api(ApiError::InvalidResponse(message.into()))
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

/// `/images/generations` on any OpenAI-compatible API
pub struct OpenAiImages {
    target: ServiceTarget,
    client: Client,
}

impl OpenAiImages {
    pub fn new(target: ServiceTarget) -> Self {
        Self {
            target,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChainService for OpenAiImages {
    fn service_id(&self) -> &str {
        &self.target.id
    }

    fn availability(&self, request: &ModalityRequest) -> std::result::Result<(), String> {
        self.target.availability(request, Modality::Image)
    }

    async fn invoke(&self, request: &ModalityRequest) -> Result<ModalityOutput> {
        let size = request.option("size").unwrap_or("1024x1024");
        let body = serde_json::json!({
            "model": self.target.model,
            "prompt": request.prompt.user,
            "n": 1,
            "size": size,
        });
        let auth = self
            .target
            .credential
            .as_ref()
            .map(|key| ("Authorization", format!("Bearer {}", key)));
        let response = post_json(
            &self.client,
            &self.target,
            format!("{}/images/generations", self.target.endpoint),
            auth,
            &body,
        )
        .await?;
        let parsed: ImagesResponse = response.json().await.map_err(|e| invalid(e.to_string()))?;
        let datum = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| invalid("no image in response"))?;

        let payload = match (datum.b64_json, datum.url) {
            (Some(encoded), _) => Payload::Binary {
                mime_type: "image/png".to_string(),
                data: base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| invalid(format!("bad image encoding: {}", e)))?,
            },
            (None, Some(url)) => Payload::Url {
                mime_type: "image/png".to_string(),
                url,
            },
            (None, None) => return Err(invalid("image has neither data nor url")),
        };
        let mut output = ModalityOutput::new(payload)
            .with_metadata("model", self.target.model.clone())
            .with_metadata("size", size);
        if let Some(revised) = datum.revised_prompt {
            output = output.with_metadata("revised_prompt", revised);
        }
        Ok(output)
    }
}

#[derive(Debug, Deserialize)]
struct FalMedia {
    url: String,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FalResponse {
    #[serde(default)]
    images: Vec<FalMedia>,
    #[serde(default)]
    video: Option<FalMedia>,
    #[serde(default)]
    seed: Option<u64>,
}

/// Fal synchronous endpoint (`POST {base}/{model}`), image or video
pub struct FalGeneration {
    target: ServiceTarget,
    modality: Modality,
    client: Client,
}

impl FalGeneration {
    pub fn new(target: ServiceTarget, modality: Modality) -> Self {
        Self {
            target,
            modality,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChainService for FalGeneration {
    fn service_id(&self) -> &str {
        &self.target.id
    }

    fn availability(&self, request: &ModalityRequest) -> std::result::Result<(), String> {
        self.target.availability(request, self.modality)
    }

    async fn invoke(&self, request: &ModalityRequest) -> Result<ModalityOutput> {
        let mut body = serde_json::json!({ "prompt": request.prompt.user });
        if let Some(size) = request.option("size") {
            body["image_size"] = serde_json::Value::String(size.to_string());
        }
        let auth = self
            .target
            .credential
            .as_ref()
            .map(|key| ("Authorization", format!("Key {}", key)));
        let response = post_json(
            &self.client,
            &self.target,
            format!("{}/{}", self.target.endpoint, self.target.model),
            auth,
            &body,
        )
        .await?;
        let parsed: FalResponse = response.json().await.map_err(|e| invalid(e.to_string()))?;

        let (media, default_mime) = match self.modality {
            Modality::Video => (parsed.video, "video/mp4"),
            _ => (parsed.images.into_iter().next(), "image/jpeg"),
        };
        let media = media.ok_or_else(|| invalid(format!("no {} in response", self.modality)))?;

        let mut output = ModalityOutput::new(Payload::Url {
            mime_type: media.content_type.unwrap_or_else(|| default_mime.to_string()),
            url: media.url,
        })
        .with_metadata("model", self.target.model.clone());
        if let Some(seed) = parsed.seed {
            output = output.with_metadata("seed", seed.to_string());
        }
        Ok(output)
    }
}
