// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Model installer abstraction
//!
//! An installer knows how to tell whether a model is present locally, how to
//! fetch it, and which models it already has. The lifecycle manager drives
//! installers and owns all phase bookkeeping; installers only report raw
//! transfer events.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Raw event emitted by an installer while fetching a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    /// Bytes transferred so far (cumulative) and the expected total if known
    Progress { downloaded: u64, total: Option<u64> },
    /// Transfer finished, artifact is being verified
    Verifying,
}

/// Channel the installer reports on
pub type InstallReporter = mpsc::UnboundedSender<InstallEvent>;

/// Backend capable of installing self-hosted models
#[async_trait]
pub trait ModelInstaller: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Whether this installer is responsible for `model_id`
    fn handles(&self, model_id: &str) -> bool;

    /// Single existence probe. `Ok(false)` means known but not installed.
    async fn probe(&self, model_id: &str) -> Result<bool>;

    /// Fetch and verify the model, reporting through `reporter`
    async fn install(&self, model_id: &str, reporter: InstallReporter) -> Result<()>;

    /// Models currently installed
    async fn list(&self) -> Result<Vec<String>>;
}

/// Send an event, ignoring a receiver that already went away
pub(crate) fn report(reporter: &InstallReporter, event: InstallEvent) {
    let _ = reporter.send(event);
}
