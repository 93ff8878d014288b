// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::time::Instant;

use async_trait::async_trait;

use super::builtin::agent_definition;
use super::{AgentExecutor, AgentResponse};
use crate::analyzer::AgentType;
use crate::error::Result;
use crate::fallback::ModalityRequest;
use crate::llm::provider::{ChatPrompt, ProviderConfig};
use crate::registry::Modality;
use crate::request::Request;
use crate::services::{ChainBuilder, ChatHooks};

/// Confidence reported for an answer the simulation fallback produced
const SIMULATED_CONFIDENCE: f32 = 0.0;

/// Agent executor that runs one chat completion per request under the
/// agent's system prompt, falling back along the chat chain.
pub struct PromptedAgentExecutor {
    chains: ChainBuilder,
    primary: Option<ProviderConfig>,
    hooks: ChatHooks,
}

impl PromptedAgentExecutor {
    pub fn new(chains: ChainBuilder, primary: Option<ProviderConfig>) -> Self {
        Self {
            chains,
            primary,
            hooks: ChatHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: ChatHooks) -> Self {
        self.hooks = hooks;
        self
    }

    fn prompt_for(agent_type: AgentType, request: &Request) -> ChatPrompt {
        let definition = agent_definition(agent_type);
        ChatPrompt::from_request(request).with_system(definition.system_prompt.trim())
    }
}

#[async_trait]
impl AgentExecutor for PromptedAgentExecutor {
    async fn execute(&self, agent_type: AgentType, request: &Request) -> Result<AgentResponse> {
        let started = Instant::now();
        let definition = agent_definition(agent_type);

        let primary = self.primary.clone().map(|mut config| {
            if let Some(temperature) = definition.temperature {
                config.sampling.temperature = temperature;
            }
            config
        });
        let chain = self.chains.build_chat(primary, self.hooks.clone())?;
        let outcome = chain
            .run(&ModalityRequest::new(
                Modality::Chat,
                Self::prompt_for(agent_type, request),
            ))
            .await?;

        let is_simulation = outcome.output.is_simulation;
        let response = AgentResponse {
            content: outcome.output.payload.as_text().unwrap_or_default().to_string(),
            agent_type,
            confidence: if is_simulation { SIMULATED_CONFIDENCE } else { 1.0 },
            execution_time: started.elapsed(),
            is_simulation,
        };
        tracing::info!(
            target: "relay.router",
            agent = %agent_type,
            service = %outcome.service_id,
            elapsed_ms = response.execution_time.as_millis() as u64,
            "agent finished"
        );
        Ok(response)
    }
}
