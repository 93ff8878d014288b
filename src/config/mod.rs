// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Configuration module for relay
//!
//! Handles loading settings and exposing them to the core as an immutable
//! snapshot plus a read-only credential lookup.

pub mod settings;

use std::collections::HashMap;
use std::sync::Arc;

pub use settings::*;

/// Immutable view of settings handed to the dispatcher for one request.
///
/// The caller refreshes it between requests; the core never mutates it.
pub type ConfigSnapshot = Arc<Settings>;

/// Read-only credential lookup
pub trait CredentialStore: Send + Sync {
    /// Secret for a provider, or `None` when absent
    fn credential_for(&self, provider_id: &str) -> Option<String>;
}

impl CredentialStore for Settings {
    fn credential_for(&self, provider_id: &str) -> Option<String> {
        self.api_key_for(provider_id)
    }
}

/// Fixed in-memory credentials, handy for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(provider_id.into(), key.into());
        self
    }
}

impl CredentialStore for StaticCredentials {
    fn credential_for(&self, provider_id: &str) -> Option<String> {
        self.keys.get(provider_id).cloned()
    }
}
