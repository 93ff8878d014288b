// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Simulated chat backend
//!
//! Always answers, without any network access, with an approximate reply
//! that says so. Used as the terminal entry of the chat fallback chain.

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::provider::{ChatBackend, ChatPrompt, ChunkStream, ProviderConfig, StreamChunk};

pub const SIMULATION_NOTICE: &str =
    "[Simulated response: all configured providers are unavailable right now.]";

/// Offline chat backend
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulationBackend;

impl SimulationBackend {
    pub fn reply_for(prompt: &ChatPrompt) -> String {
        let topic: String = prompt.user.split_whitespace().take(12).collect::<Vec<_>>().join(" ");
        if topic.is_empty() {
            SIMULATION_NOTICE.to_string()
        } else {
            format!(
                "{} Your request was: \"{}\". Please retry once a provider is available.",
                SIMULATION_NOTICE, topic
            )
        }
    }
}

#[async_trait]
impl ChatBackend for SimulationBackend {
    fn name(&self) -> &str {
        "simulation"
    }

    async fn stream_chat(
        &self,
        _config: &ProviderConfig,
        prompt: &ChatPrompt,
    ) -> Result<ChunkStream> {
        let reply = Self::reply_for(prompt);
        Ok(Box::pin(futures::stream::iter(vec![Ok(StreamChunk::Snapshot(reply))])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_mentions_notice_and_topic() {
        let reply = SimulationBackend::reply_for(&ChatPrompt::new("explain borrow checking"));
        assert!(reply.starts_with(SIMULATION_NOTICE));
        assert!(reply.contains("explain borrow checking"));
    }

    #[test]
    fn test_reply_for_empty_prompt() {
        assert_eq!(SimulationBackend::reply_for(&ChatPrompt::new("  ")), SIMULATION_NOTICE);
    }
}
