// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relay::config::{ArtifactSpec, Settings};
use relay::models::{DownloadPhase, ModelLifecycleManager};
use relay::progress::{ProgressEvent, ProgressHub};

const WEIGHTS: &[u8] = b"pretend these are voice model weights";

fn settings_for(server: &MockServer, storage: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.models.storage_dir = storage.path().to_path_buf();
    settings.models.ollama_base_url = server.uri();
    settings.models.progress_interval_ms = 0;
    settings.models.reset_delay_ms = 60_000;
    settings.models.artifacts = vec![ArtifactSpec {
        id: "coqui-xtts-v2".to_string(),
        url: format!("{}/weights/model.pth", server.uri()),
        sha256: Some(format!("{:x}", Sha256::digest(WEIGHTS))),
        size_bytes: Some(WEIGHTS.len() as u64),
    }];
    settings
}

fn drain_phases(rx: &mut tokio::sync::broadcast::Receiver<ProgressEvent>) -> Vec<DownloadPhase> {
    let mut phases: Vec<DownloadPhase> = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ProgressEvent::Model(state) = event {
            if phases.last() != Some(&state.phase) {
                phases.push(state.phase);
            }
        }
    }
    phases
}

#[tokio::test]
async fn test_artifact_download_through_settings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weights/model.pth"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WEIGHTS))
        .expect(1)
        .mount(&server)
        .await;

    let storage = TempDir::new().unwrap();
    let settings = settings_for(&server, &storage);
    let hub = ProgressHub::new();
    let mut rx = hub.subscribe();
    let manager = ModelLifecycleManager::from_settings(&settings, Arc::new(hub.clone()));

    manager.ensure_available("coqui-xtts-v2").await.unwrap();

    assert_eq!(
        drain_phases(&mut rx),
        vec![
            DownloadPhase::Checking,
            DownloadPhase::Starting,
            DownloadPhase::Downloading,
            DownloadPhase::Verifying,
            DownloadPhase::Completed,
        ]
    );
    let state = manager.state("coqui-xtts-v2").unwrap();
    assert_eq!(state.bytes_downloaded, WEIGHTS.len() as u64);

    let stored = storage.path().join("coqui-xtts-v2").join("model.pth");
    assert_eq!(std::fs::read(stored).unwrap(), WEIGHTS);

    // Already installed: a probe only, no second GET.
    manager.ensure_available("coqui-xtts-v2").await.unwrap();
    let phases = drain_phases(&mut rx);
    assert!(!phases.contains(&DownloadPhase::Downloading));
    assert_eq!(phases.last(), Some(&DownloadPhase::Completed));
}

#[tokio::test]
async fn test_switch_to_artifact_model_sets_active() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weights/model.pth"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WEIGHTS))
        .mount(&server)
        .await;

    let storage = TempDir::new().unwrap();
    let settings = settings_for(&server, &storage);
    let manager = ModelLifecycleManager::from_settings(&settings, Arc::new(ProgressHub::new()));

    manager.switch_active("coqui-xtts-v2").await.unwrap();
    assert_eq!(manager.active_model().as_deref(), Some("coqui-xtts-v2"));
    assert_eq!(manager.list_installed().await.unwrap(), vec!["coqui-xtts-v2".to_string()]);
}
