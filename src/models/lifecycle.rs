// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Model lifecycle manager
//!
//! Ensures self-hosted models are installed before use, reports download
//! progress, and swaps the active model only after the new one is verified.
//! Lifecycle operations for the same model id are serialized; different ids
//! proceed concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::download::HttpArtifactInstaller;
use super::installer::{InstallEvent, ModelInstaller};
use super::ollama::OllamaInstaller;
use super::state::{DownloadPhase, ModelDownloadState};
use crate::config::Settings;
use crate::error::{ApiError, RelayError, Result};
use crate::progress::{ProgressEvent, ProgressSink};

#[derive(Debug, Clone)]
struct TrackedState {
    epoch: u64,
    state: ModelDownloadState,
}

type StateMap = Arc<Mutex<HashMap<String, TrackedState>>>;

/// Manages availability of self-hosted models
pub struct ModelLifecycleManager {
    installers: Vec<Arc<dyn ModelInstaller>>,
    sink: Arc<dyn ProgressSink>,
    /// One async lock per model id
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Latest reported state per model, cleared after the reset delay
    states: StateMap,
    epoch: AtomicU64,
    active: RwLock<Option<String>>,
    reset_delay: Duration,
    progress_interval: Duration,
    stall_timeout: Duration,
}

impl ModelLifecycleManager {
    pub fn new(installers: Vec<Arc<dyn ModelInstaller>>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            installers,
            sink,
            locks: Mutex::new(HashMap::new()),
            states: Arc::new(Mutex::new(HashMap::new())),
            epoch: AtomicU64::new(0),
            active: RwLock::new(None),
            reset_delay: Duration::from_millis(3000),
            progress_interval: Duration::from_millis(250),
            stall_timeout: Duration::from_secs(60),
        }
    }

    /// Build the standard installers (artifacts first, then Ollama) from settings
    pub fn from_settings(settings: &Settings, sink: Arc<dyn ProgressSink>) -> Self {
        let installers: Vec<Arc<dyn ModelInstaller>> = vec![
            Arc::new(HttpArtifactInstaller::new(
                settings.models.storage_dir.clone(),
                settings.models.artifacts.clone(),
            )),
            Arc::new(OllamaInstaller::new(settings.models.ollama_base_url.clone())),
        ];
        Self::new(installers, sink)
            .with_reset_delay(Duration::from_millis(settings.models.reset_delay_ms))
            .with_progress_interval(Duration::from_millis(settings.models.progress_interval_ms))
            .with_stall_timeout(Duration::from_secs(settings.timeouts.chunk_timeout_secs))
    }

    /// How long a terminal state stays visible before resetting to idle
    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    /// Minimum spacing between downloading events
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Fail an install when no progress arrives for this long
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Start with a model already marked active
    pub fn with_active(self, model_id: impl Into<String>) -> Self {
        *write_lock(&self.active) = Some(model_id.into());
        self
    }

    /// Currently active model
    pub fn active_model(&self) -> Option<String> {
        read_lock(&self.active).clone()
    }

    /// Latest reported state for a model, if one is still displayed
    pub fn state(&self, model_id: &str) -> Option<ModelDownloadState> {
        lock(&self.states).get(model_id).map(|t| t.state.clone())
    }

    fn installer_for(&self, model_id: &str) -> Option<Arc<dyn ModelInstaller>> {
        self.installers
            .iter()
            .find(|i| i.handles(model_id))
            .cloned()
    }

    fn model_lock(&self, model_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.locks)
            .entry(model_id.to_string())
            .or_default()
            .clone()
    }

    /// Make sure a model is installed, downloading it if needed.
    ///
    /// A model that is already present costs a single probe.
    pub async fn ensure_available(&self, model_id: &str) -> Result<()> {
        let guard = self.model_lock(model_id);
        let _guard = guard.lock().await;

        let mut tracker = Tracker::new(self, model_id);
        tracker.publish();

        let Some(installer) = self.installer_for(model_id) else {
            let err = RelayError::Configuration(format!("Unknown model: {}", model_id));
            tracker.fail(&err);
            return Err(err);
        };

        match installer.probe(model_id).await {
            Ok(true) => {
                tracing::debug!(target: "relay.models", model = %model_id, installer = installer.name(), "model already installed");
                tracker.transition(DownloadPhase::Completed);
                return Ok(());
            }
            Ok(false) => {}
            Err(err) => {
                tracker.fail(&err);
                return Err(err);
            }
        }

        tracing::info!(target: "relay.models", model = %model_id, installer = installer.name(), "installing model");
        tracker.transition(DownloadPhase::Starting);

        let result = self.run_install(installer.as_ref(), model_id, &mut tracker).await;
        let result = match result {
            Ok(()) => {
                tracker.flush();
                tracker.transition(DownloadPhase::Verifying);
                match installer.probe(model_id).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(RelayError::Integrity(format!(
                        "{} is still missing after installation",
                        model_id
                    ))),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                tracker.transition(DownloadPhase::Completed);
                tracing::info!(target: "relay.models", model = %model_id, "model ready");
                Ok(())
            }
            Err(err) => {
                tracker.flush();
                tracker.fail(&err);
                tracing::warn!(target: "relay.models", model = %model_id, error = %err, "model install failed");
                Err(err)
            }
        }
    }

    async fn run_install(
        &self,
        installer: &dyn ModelInstaller,
        model_id: &str,
        tracker: &mut Tracker<'_>,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let install = installer.install(model_id, tx);
        tokio::pin!(install);

        let mut events_open = true;
        let result = loop {
            if !events_open {
                break (&mut install).await;
            }
            tokio::select! {
                biased;
                event = tokio::time::timeout(self.stall_timeout, rx.recv()) => match event {
                    Ok(Some(event)) => tracker.apply(event),
                    Ok(None) => events_open = false,
                    Err(_) => {
                        tracing::warn!(target: "relay.models", model = %model_id, "no download progress, giving up");
                        break Err(RelayError::Api(ApiError::Timeout));
                    }
                },
                result = &mut install => break result,
            }
        };

        while let Ok(event) = rx.try_recv() {
            tracker.apply(event);
        }
        result
    }

    /// Ensure `model_id` is available, then make it the active model.
    ///
    /// The previous active model stays current if anything fails.
    pub async fn switch_active(&self, model_id: &str) -> Result<()> {
        self.ensure_available(model_id).await?;
        let previous = write_lock(&self.active).replace(model_id.to_string());
        tracing::info!(
            target: "relay.models",
            model = %model_id,
            previous = previous.as_deref().unwrap_or("none"),
            "active model switched"
        );
        Ok(())
    }

    /// Installed models across all installers.
    ///
    /// Installers that cannot be reached are skipped.
    pub async fn list_installed(&self) -> Result<Vec<String>> {
        let mut models = Vec::new();
        for installer in &self.installers {
            match installer.list().await {
                Ok(list) => {
                    for id in list {
                        if !models.contains(&id) {
                            models.push(id);
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(target: "relay.models", installer = installer.name(), error = %e, "listing failed");
                }
            }
        }
        Ok(models)
    }

    fn publish(&self, epoch: u64, state: &ModelDownloadState) {
        lock(&self.states).insert(
            state.model_id.clone(),
            TrackedState {
                epoch,
                state: state.clone(),
            },
        );
        self.sink.on_progress(&ProgressEvent::Model(state.clone()));
    }

    /// Reset a terminal state to idle after the display delay, unless a newer
    /// operation has replaced it in the meantime.
    fn schedule_reset(&self, epoch: u64, model_id: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // No runtime left to wait on; clear the state right away.
            let mut map = lock(&self.states);
            if map.get(model_id).is_some_and(|t| t.epoch == epoch) {
                map.remove(model_id);
            }
            return;
        };
        let states = Arc::clone(&self.states);
        let sink = Arc::clone(&self.sink);
        let delay = self.reset_delay;
        let model_id = model_id.to_string();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let idle = {
                let mut map = lock(&states);
                match map.get(&model_id) {
                    Some(tracked) if tracked.epoch == epoch => {
                        let mut state = tracked.state.clone();
                        map.remove(&model_id);
                        state.advance(DownloadPhase::Idle).then_some(state)
                    }
                    _ => None,
                }
            };
            if let Some(state) = idle {
                sink.on_progress(&ProgressEvent::Model(state));
            }
        });
    }
}

/// Phase bookkeeping for one `ensure_available` call
struct Tracker<'a> {
    manager: &'a ModelLifecycleManager,
    epoch: u64,
    state: ModelDownloadState,
    last_emit: Option<Instant>,
    pending: bool,
}

impl<'a> Tracker<'a> {
    fn new(manager: &'a ModelLifecycleManager, model_id: &str) -> Self {
        Self {
            manager,
            epoch: manager.epoch.fetch_add(1, Ordering::Relaxed) + 1,
            state: ModelDownloadState::new(model_id),
            last_emit: None,
            pending: false,
        }
    }

    fn publish(&mut self) {
        self.manager.publish(self.epoch, &self.state);
        self.last_emit = Some(Instant::now());
        self.pending = false;
        if self.state.phase.is_terminal() {
            self.manager.schedule_reset(self.epoch, &self.state.model_id);
        }
    }

    fn transition(&mut self, phase: DownloadPhase) {
        if self.state.advance(phase) {
            self.publish();
        }
    }

    fn fail(&mut self, err: &RelayError) {
        if self.state.fail(err.to_string()) {
            self.publish();
        }
    }

    /// Emit a throttled downloading update that was held back
    fn flush(&mut self) {
        if self.pending {
            self.publish();
        }
    }

    fn apply(&mut self, event: InstallEvent) {
        match event {
            InstallEvent::Progress { downloaded, total } => {
                let first = self.state.phase != DownloadPhase::Downloading;
                if !self.state.advance(DownloadPhase::Downloading) {
                    return;
                }
                self.state.record_bytes(downloaded, total);
                let due = first
                    || self
                        .last_emit
                        .map(|t| t.elapsed() >= self.manager.progress_interval)
                        .unwrap_or(true);
                if due {
                    self.publish();
                } else {
                    self.pending = true;
                }
            }
            InstallEvent::Verifying => {
                self.flush();
                self.transition(DownloadPhase::Verifying);
            }
        }
    }
}

impl Drop for Tracker<'_> {
    /// A caller that stops awaiting mid-install still leaves a terminal state
    fn drop(&mut self) {
        if !self.state.phase.is_terminal() {
            tracing::info!(
                target: "relay.models",
                model = %self.state.model_id,
                phase = %self.state.phase,
                "availability check abandoned"
            );
            self.fail(&RelayError::Cancelled);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(target: "relay.models", "lifecycle lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
