// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! HTTP artifact installer
//!
//! Downloads model weights (local TTS checkpoints and the like) to a `.part`
//! file, resuming an intact partial with an HTTP `Range` request, then
//! verifies size and SHA256 before moving the file into place. A partial that
//! fails verification is deleted so the next attempt starts clean.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::installer::{report, InstallEvent, InstallReporter, ModelInstaller};
use crate::config::ArtifactSpec;
use crate::error::{ApiError, RelayError, Result};

/// Installer for models distributed as downloadable files
pub struct HttpArtifactInstaller {
    /// HTTP client
    client: Client,
    /// Root directory, one subdirectory per model id
    storage_dir: PathBuf,
    /// Known artifacts
    artifacts: Vec<ArtifactSpec>,
}

impl HttpArtifactInstaller {
    pub fn new(storage_dir: PathBuf, artifacts: Vec<ArtifactSpec>) -> Self {
        Self {
            client: Client::new(),
            storage_dir,
            artifacts,
        }
    }

    /// Use a preconfigured client
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn spec(&self, model_id: &str) -> Result<&ArtifactSpec> {
        self.artifacts
            .iter()
            .find(|a| a.id == model_id)
            .ok_or_else(|| RelayError::Configuration(format!("Unknown model: {}", model_id)))
    }

    /// Where a model's artifact is stored once installed
    pub fn artifact_path(&self, spec: &ArtifactSpec) -> PathBuf {
        let file_name = spec
            .url
            .split('?')
            .next()
            .and_then(|u| u.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("model.bin");
        self.storage_dir.join(sanitize(&spec.id)).join(file_name)
    }

    /// In-progress download path
    pub fn partial_path(&self, spec: &ArtifactSpec) -> PathBuf {
        let final_path = self.artifact_path(spec);
        let mut name = final_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".part");
        final_path.with_file_name(name)
    }

    async fn is_installed(&self, spec: &ArtifactSpec) -> Result<bool> {
        let path = self.artifact_path(spec);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if metadata.len() == 0 {
            return Ok(false);
        }
        if let Some(expected) = spec.size_bytes {
            if metadata.len() != expected {
                return Ok(false);
            }
        }
        match &spec.sha256 {
            Some(expected) => Ok(hash_file(path).await? == expected.to_lowercase()),
            None => Ok(true),
        }
    }

    async fn download(&self, spec: &ArtifactSpec, reporter: &InstallReporter) -> Result<()> {
        let final_path = self.artifact_path(spec);
        let part_path = self.partial_path(spec);
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let resume_from = match tokio::fs::metadata(&part_path).await {
            Ok(m) if m.len() > 0 => m.len(),
            _ => 0,
        };

        let mut request = self.client.get(&spec.url);
        if resume_from > 0 {
            tracing::info!(
                target: "relay.models",
                model = %spec.id,
                offset = resume_from,
                "resuming partial download"
            );
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", resume_from));
        }

        let response = request.send().await.map_err(network_error)?;
        let status = response.status();

        let (mut downloaded, append) = match status {
            StatusCode::PARTIAL_CONTENT if resume_from > 0 => (resume_from, true),
            StatusCode::RANGE_NOT_SATISFIABLE if resume_from > 0 => {
                // Partial is at least as long as the artifact; verify what we have.
                (resume_from, true)
            }
            s if s.is_success() => (0, false),
            s => return Err(status_error(s.as_u16(), &spec.id)),
        };

        let total = response
            .content_length()
            .filter(|_| status != StatusCode::RANGE_NOT_SATISFIABLE)
            .map(|len| len + if append { resume_from } else { 0 })
            .or(spec.size_bytes);

        let mut hasher = Sha256::new();
        if append {
            hasher = hash_prefix(part_path.clone(), hasher).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&part_path)
            .await?;

        report(reporter, InstallEvent::Progress { downloaded, total });

        if status != StatusCode::RANGE_NOT_SATISFIABLE {
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                // Keep the partial on transport errors so the next attempt resumes.
                let chunk = chunk.map_err(network_error)?;
                file.write_all(&chunk).await?;
                hasher.update(&chunk);
                downloaded += chunk.len() as u64;
                report(reporter, InstallEvent::Progress { downloaded, total });
            }
        }
        file.flush().await?;
        drop(file);

        report(reporter, InstallEvent::Verifying);

        if let Some(expected) = spec.size_bytes {
            if downloaded != expected {
                tokio::fs::remove_file(&part_path).await.ok();
                return Err(RelayError::Integrity(format!(
                    "Size mismatch for {}. Expected: {} bytes, Got: {} bytes",
                    spec.id, expected, downloaded
                )));
            }
        }

        let hash = format!("{:x}", hasher.finalize());
        match &spec.sha256 {
            Some(expected) if hash != expected.to_lowercase() => {
                tokio::fs::remove_file(&part_path).await.ok();
                return Err(RelayError::Integrity(format!(
                    "SHA256 verification failed. Expected: {}, Got: {}",
                    expected, hash
                )));
            }
            Some(_) => {}
            None => {
                tracing::warn!(
                    target: "relay.models",
                    model = %spec.id,
                    "no SHA256 configured, skipping checksum verification"
                );
            }
        }

        tokio::fs::rename(&part_path, &final_path).await?;
        tracing::info!(target: "relay.models", model = %spec.id, path = %final_path.display(), "download complete");
        Ok(())
    }
}

#[async_trait]
impl ModelInstaller for HttpArtifactInstaller {
    fn name(&self) -> &'static str {
        "artifact"
    }

    fn handles(&self, model_id: &str) -> bool {
        self.artifacts.iter().any(|a| a.id == model_id)
    }

    async fn probe(&self, model_id: &str) -> Result<bool> {
        let spec = self.spec(model_id)?;
        self.is_installed(spec).await
    }

    async fn install(&self, model_id: &str, reporter: InstallReporter) -> Result<()> {
        let spec = self.spec(model_id)?;
        self.download(spec, &reporter).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut installed = Vec::new();
        for spec in &self.artifacts {
            if self.artifact_path(spec).exists() {
                installed.push(spec.id.clone());
            }
        }
        Ok(installed)
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' { c } else { '_' })
        .collect()
}

async fn hash_file(path: PathBuf) -> Result<String> {
    let hasher = hash_prefix(path, Sha256::new()).await?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Feed an existing file into `hasher` on the blocking pool; weights run to gigabytes.
async fn hash_prefix(path: PathBuf, mut hasher: Sha256) -> Result<Sha256> {
    tokio::task::spawn_blocking(move || -> Result<Sha256> {
        let mut file = std::fs::File::open(&path)?;
        std::io::copy(&mut file, &mut hasher)?;
        Ok(hasher)
    })
    .await
    .map_err(|e| RelayError::Io(std::io::Error::other(e)))?
}

fn network_error(e: reqwest::Error) -> RelayError {
    if e.is_timeout() {
        RelayError::Api(ApiError::Timeout)
    } else {
        RelayError::Api(ApiError::Network(format!("Download failed: {}", e)))
    }
}

fn status_error(status: u16, model_id: &str) -> RelayError {
    match status {
        401 | 403 => RelayError::Api(ApiError::AuthenticationFailed),
        404 => RelayError::Api(ApiError::ModelNotFound(model_id.to_string())),
        429 => RelayError::Api(ApiError::RateLimited(60)),
        _ => RelayError::Api(ApiError::ServerError {
            status,
            message: format!("Download failed with status: {}", status),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sha_of(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }

    fn spec(server: &MockServer, sha256: Option<String>) -> ArtifactSpec {
        ArtifactSpec {
            id: "xtts-v2".to_string(),
            url: format!("{}/weights/model.pth", server.uri()),
            sha256,
            size_bytes: None,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<InstallEvent>) -> Vec<InstallEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_unknown_model_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let installer = HttpArtifactInstaller::new(temp_dir.path().to_path_buf(), vec![]);
        let err = installer.probe("nope").await.unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
        assert!(!installer.handles("nope"));
    }

    #[tokio::test]
    async fn test_download_success_verifies_and_moves() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weights/model.pth"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let spec = spec(&server, Some(sha_of(b"hello")));
        let installer =
            HttpArtifactInstaller::new(temp_dir.path().to_path_buf(), vec![spec.clone()]);

        assert!(!installer.probe("xtts-v2").await.unwrap());

        let (tx, mut rx) = mpsc::unbounded_channel();
        installer.install("xtts-v2", tx).await.unwrap();

        let path = installer.artifact_path(&spec);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert!(!installer.partial_path(&spec).exists());
        assert!(installer.probe("xtts-v2").await.unwrap());
        assert_eq!(installer.list().await.unwrap(), vec!["xtts-v2".to_string()]);

        let events = drain(&mut rx);
        assert_eq!(events.last(), Some(&InstallEvent::Verifying));
        assert!(events.contains(&InstallEvent::Progress {
            downloaded: 5,
            total: Some(5)
        }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_probe_rehashes_installed_artifact() {
        let server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();
        let spec = spec(&server, Some(sha_of(b"weights")));
        let installer =
            HttpArtifactInstaller::new(temp_dir.path().to_path_buf(), vec![spec.clone()]);

        let path = installer.artifact_path(&spec);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"weights").unwrap();
        assert!(installer.probe("xtts-v2").await.unwrap());

        std::fs::write(&path, b"tampered").unwrap();
        assert!(!installer.probe("xtts-v2").await.unwrap());
    }

    #[tokio::test]
    async fn test_sha_mismatch_removes_partial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weights/model.pth"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let spec = spec(
            &server,
            Some("ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff".to_string()),
        );
        let installer =
            HttpArtifactInstaller::new(temp_dir.path().to_path_buf(), vec![spec.clone()]);

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = installer.install("xtts-v2", tx).await.unwrap_err();
        assert!(matches!(err, RelayError::Integrity(_)));
        assert!(err.to_string().contains("SHA256 verification failed"));
        assert!(!installer.partial_path(&spec).exists());
        assert!(!installer.artifact_path(&spec).exists());
    }

    #[tokio::test]
    async fn test_size_mismatch_is_integrity_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weights/model.pth"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let mut spec = spec(&server, None);
        spec.size_bytes = Some(10);
        let installer =
            HttpArtifactInstaller::new(temp_dir.path().to_path_buf(), vec![spec.clone()]);

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = installer.install("xtts-v2", tx).await.unwrap_err();
        assert!(matches!(err, RelayError::Integrity(_)));
        assert!(!installer.partial_path(&spec).exists());
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weights/model.pth"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let installer =
            HttpArtifactInstaller::new(temp_dir.path().to_path_buf(), vec![spec(&server, None)]);

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = installer.install("xtts-v2", tx).await.unwrap_err();
        assert!(err.to_string().contains("Download failed with status"));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_resumes_intact_partial_with_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weights/model.pth"))
            .and(header("range", "bytes=5-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b", world".to_vec()))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let spec = spec(&server, Some(sha_of(b"hello, world")));
        let installer =
            HttpArtifactInstaller::new(temp_dir.path().to_path_buf(), vec![spec.clone()]);

        let part = installer.partial_path(&spec);
        std::fs::create_dir_all(part.parent().unwrap()).unwrap();
        std::fs::write(&part, b"hello").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        installer.install("xtts-v2", tx).await.unwrap();

        assert_eq!(
            std::fs::read(installer.artifact_path(&spec)).unwrap(),
            b"hello, world"
        );
        let events = drain(&mut rx);
        assert_eq!(
            events.first(),
            Some(&InstallEvent::Progress {
                downloaded: 5,
                total: Some(12)
            })
        );
    }

    #[tokio::test]
    async fn test_server_ignoring_range_restarts_from_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weights/model.pth"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let spec = spec(&server, Some(sha_of(b"fresh")));
        let installer =
            HttpArtifactInstaller::new(temp_dir.path().to_path_buf(), vec![spec.clone()]);

        let part = installer.partial_path(&spec);
        std::fs::create_dir_all(part.parent().unwrap()).unwrap();
        std::fs::write(&part, b"stale-bytes").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        installer.install("xtts-v2", tx).await.unwrap();
        assert_eq!(std::fs::read(installer.artifact_path(&spec)).unwrap(), b"fresh");
    }

    #[test]
    fn test_artifact_path_uses_url_file_name() {
        let installer = HttpArtifactInstaller::new(PathBuf::from("/models"), vec![]);
        let spec = ArtifactSpec {
            id: "coqui/xtts v2".to_string(),
            url: "https://huggingface.co/coqui/XTTS-v2/resolve/main/model.pth?download=true"
                .to_string(),
            sha256: None,
            size_bytes: None,
        };
        assert_eq!(
            installer.artifact_path(&spec),
            PathBuf::from("/models/coqui_xtts_v2/model.pth")
        );
        assert_eq!(
            installer.partial_path(&spec),
            PathBuf::from("/models/coqui_xtts_v2/model.pth.part")
        );
    }
}
