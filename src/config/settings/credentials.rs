// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::registry;

use super::Settings;

impl Settings {
    /// Environment variable consulted for a provider's credential.
    ///
    /// A per-provider `api_key_env` override wins over the registry default.
    pub fn credential_env_for(&self, provider_id: &str) -> Option<String> {
        self.provider(provider_id)
            .and_then(|p| p.api_key_env.clone())
            .or_else(|| {
                registry::find(provider_id)
                    .and_then(|info| info.credential_env)
                    .map(str::to_string)
            })
    }

    /// Get the API key for a provider, checking env var first.
    pub fn api_key_for(&self, provider_id: &str) -> Option<String> {
        // Priority: env var > config file.
        self.credential_env_for(provider_id)
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                self.provider(provider_id)
                    .and_then(|p| p.api_key.clone())
                    .filter(|key| !key.trim().is_empty())
            })
    }
}
