// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Ollama model installer
//!
//! Probes with `/api/show`, pulls with the streaming `/api/pull` endpoint and
//! lists with `/api/tags`.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;

use super::installer::{report, InstallEvent, InstallReporter, ModelInstaller};
use crate::error::{ApiError, RelayError, Result};

const NOT_RUNNING: &str = "Ollama is not running. Start the Ollama app or run 'ollama serve'";

/// Installer backed by a local Ollama server
pub struct OllamaInstaller {
    client: Client,
    base_url: String,
}

impl OllamaInstaller {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn connect_error(e: reqwest::Error) -> RelayError {
        if e.is_connect() {
            RelayError::Api(ApiError::Network(NOT_RUNNING.to_string()))
        } else if e.is_timeout() {
            RelayError::Api(ApiError::Timeout)
        } else {
            RelayError::Http(e)
        }
    }

    /// Map an error message from a pull to the error taxonomy
    fn pull_error(model_id: &str, message: &str) -> RelayError {
        let lower = message.to_lowercase();
        if lower.contains("file does not exist")
            || lower.contains("not found")
            || lower.contains("manifest unknown")
        {
            RelayError::Configuration(format!("Unknown model: {} ({})", model_id, message))
        } else if lower.contains("digest mismatch") || lower.contains("verification") {
            RelayError::Integrity(message.to_string())
        } else {
            RelayError::Api(ApiError::StreamError(message.to_string()))
        }
    }
}

/// Accumulates per-layer progress into one cumulative figure
#[derive(Debug, Default)]
struct PullProgress {
    layers: HashMap<String, (u64, u64)>,
}

impl PullProgress {
    fn update(&mut self, digest: String, completed: u64, total: u64) -> (u64, Option<u64>) {
        let entry = self.layers.entry(digest).or_default();
        entry.0 = entry.0.max(completed);
        entry.1 = entry.1.max(total);
        let downloaded = self.layers.values().map(|(c, _)| c).sum();
        let total: u64 = self.layers.values().map(|(_, t)| t).sum();
        (downloaded, (total > 0).then_some(total))
    }
}

#[async_trait]
impl ModelInstaller for OllamaInstaller {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn handles(&self, _model_id: &str) -> bool {
        true
    }

    async fn probe(&self, model_id: &str) -> Result<bool> {
        let url = format!("{}/api/show", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "model": model_id }))
            .send()
            .await
            .map_err(Self::connect_error)?;

        match response.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(RelayError::Api(ApiError::ServerError {
                    status,
                    message: body,
                }))
            }
        }
    }

    async fn install(&self, model_id: &str, reporter: InstallReporter) -> Result<()> {
        let url = format!("{}/api/pull", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "model": model_id, "stream": true }))
            .send()
            .await
            .map_err(Self::connect_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<PullLine>(&body)
                .ok()
                .and_then(|l| l.error)
                .unwrap_or(body);
            if status == 404 {
                return Err(Self::pull_error(model_id, &message));
            }
            return Err(RelayError::Api(ApiError::ServerError { status, message }));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut progress = PullProgress::default();
        let mut verifying = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| RelayError::Api(ApiError::Network(e.to_string())))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // NDJSON: one status object per line
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].to_string();
                buffer = buffer[pos + 1..].to_string();
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(line) = serde_json::from_str::<PullLine>(&line) else {
                    tracing::debug!(target: "relay.models", line = %line, "unparseable pull line");
                    continue;
                };

                if let Some(error) = line.error {
                    return Err(Self::pull_error(model_id, &error));
                }

                let status = line.status.unwrap_or_default();
                if let (Some(digest), Some(total)) = (line.digest, line.total) {
                    let (downloaded, total) =
                        progress.update(digest, line.completed.unwrap_or(0), total);
                    report(&reporter, InstallEvent::Progress { downloaded, total });
                } else if status.starts_with("verifying") && !verifying {
                    verifying = true;
                    report(&reporter, InstallEvent::Verifying);
                } else if status == "success" {
                    if !verifying {
                        report(&reporter, InstallEvent::Verifying);
                    }
                    tracing::info!(target: "relay.models", model = %model_id, "ollama pull complete");
                    return Ok(());
                }
            }
        }

        Err(RelayError::Api(ApiError::StreamError(
            "pull ended before completion".to_string(),
        )))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::connect_error)?;

        if !response.status().is_success() {
            return Err(RelayError::Api(ApiError::ServerError {
                status: response.status().as_u16(),
                message: "Failed to list models".to_string(),
            }));
        }

        let body: TagsResponse = response.json().await?;
        Ok(body.models.into_iter().map(|m| m.name).collect())
    }
}

#[derive(Debug, Deserialize)]
struct PullLine {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagsModel>,
}

#[derive(Debug, Deserialize)]
struct TagsModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ndjson(lines: &[&str]) -> String {
        lines.iter().map(|l| format!("{}\n", l)).collect()
    }

    #[tokio::test]
    async fn test_probe_installed_and_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/show"))
            .and(body_partial_json(serde_json::json!({ "model": "llama3.2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/show"))
            .and(body_partial_json(serde_json::json!({ "model": "missing" })))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let installer = OllamaInstaller::new(server.uri());
        assert!(installer.probe("llama3.2").await.unwrap());
        assert!(!installer.probe("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_pull_reports_cumulative_progress() {
        let server = MockServer::start().await;
        let body = ndjson(&[
            r#"{"status":"pulling manifest"}"#,
            r#"{"status":"pulling abc","digest":"sha256:abc","total":100,"completed":40}"#,
            r#"{"status":"pulling def","digest":"sha256:def","total":50,"completed":50}"#,
            r#"{"status":"pulling abc","digest":"sha256:abc","total":100,"completed":100}"#,
            r#"{"status":"verifying sha256 digest"}"#,
            r#"{"status":"writing manifest"}"#,
            r#"{"status":"success"}"#,
        ]);
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let installer = OllamaInstaller::new(server.uri());
        let (tx, mut rx) = mpsc::unbounded_channel();
        installer.install("llama3.2", tx).await.unwrap();

        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        assert_eq!(
            events,
            vec![
                InstallEvent::Progress { downloaded: 40, total: Some(100) },
                InstallEvent::Progress { downloaded: 90, total: Some(150) },
                InstallEvent::Progress { downloaded: 150, total: Some(150) },
                InstallEvent::Verifying,
            ]
        );
    }

    #[tokio::test]
    async fn test_pull_unknown_model_is_configuration_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
                r#"{"status":"pulling manifest"}"#,
                r#"{"error":"pull model manifest: file does not exist"}"#,
            ])))
            .mount(&server)
            .await;

        let installer = OllamaInstaller::new(server.uri());
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = installer.install("nope", tx).await.unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_pull_digest_mismatch_is_integrity_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
                r#"{"status":"verifying sha256 digest"}"#,
                r#"{"error":"digest mismatch, file must be downloaded again"}"#,
            ])))
            .mount(&server)
            .await;

        let installer = OllamaInstaller::new(server.uri());
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = installer.install("llama3.2", tx).await.unwrap_err();
        assert!(matches!(err, RelayError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_pull_truncated_stream_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
                r#"{"status":"pulling abc","digest":"sha256:abc","total":100,"completed":10}"#,
            ])))
            .mount(&server)
            .await;

        let installer = OllamaInstaller::new(server.uri());
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = installer.install("llama3.2", tx).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{ "name": "llama3.2:latest" }, { "name": "qwen2.5-coder:7b" }]
            })))
            .mount(&server)
            .await;

        let installer = OllamaInstaller::new(server.uri());
        assert_eq!(
            installer.list().await.unwrap(),
            vec!["llama3.2:latest".to_string(), "qwen2.5-coder:7b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let installer = OllamaInstaller::new("http://127.0.0.1:1");
        let err = installer.probe("llama3.2").await.unwrap_err();
        assert!(err.to_string().contains("Ollama is not running"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(
            OllamaInstaller::new("http://localhost:11434/").base_url(),
            "http://localhost:11434"
        );
    }
}
