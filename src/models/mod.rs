// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Self-hosted model management
//!
//! Models that run locally must be present before a session can use them.
//! This module provides:
//!
//! - [`ModelDownloadState`] / [`DownloadPhase`]: the per-model state machine
//! - [`ModelInstaller`]: how a model is probed, fetched and listed
//! - [`OllamaInstaller`] and [`HttpArtifactInstaller`]: the two installers
//! - [`ModelLifecycleManager`]: serialized `ensure_available` / `switch_active`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay::models::ModelLifecycleManager;
//!
//! let manager = ModelLifecycleManager::from_settings(&settings, hub.clone());
//! manager.switch_active("llama3.2").await?;
//! ```

pub mod download;
pub mod installer;
pub mod lifecycle;
pub mod ollama;
pub mod state;

pub use download::HttpArtifactInstaller;
pub use installer::{InstallEvent, InstallReporter, ModelInstaller};
pub use lifecycle::ModelLifecycleManager;
pub use ollama::OllamaInstaller;
pub use state::{DownloadPhase, ModelDownloadState};
