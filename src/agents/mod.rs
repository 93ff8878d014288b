// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Specialized agents
//!
//! The router hands requests that warrant a specialized handler to an
//! [`AgentExecutor`]. How an executor plans or uses tools is its own
//! business; the router only sees the final [`AgentResponse`].
//!
//! ## Built-in executor
//!
//! [`PromptedAgentExecutor`] runs the request through the chat fallback
//! chain under the system prompt of the selected agent type:
//!
//! ```rust,ignore
//! use relay::agents::{AgentExecutor, PromptedAgentExecutor};
//! use relay::analyzer::AgentType;
//!
//! let executor = PromptedAgentExecutor::new(chains, primary);
//! let response = executor.execute(AgentType::CodeAssistant, &request).await?;
//! println!("{} ({:?})", response.content, response.execution_time);
//! ```

pub mod builtin;
pub mod prompted;

pub use builtin::{agent_definition, builtin_agents, AgentDefinition};
pub use prompted::PromptedAgentExecutor;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analyzer::AgentType;
use crate::error::Result;
use crate::request::Request;

/// Final answer of a specialized agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub agent_type: AgentType,
    /// Executor's confidence in its answer, in [0, 1]
    pub confidence: f32,
    pub execution_time: Duration,
    /// Set when the answer came from the simulation fallback
    #[serde(default)]
    pub is_simulation: bool,
}

/// Handler for requests routed to a specialized agent
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, agent_type: AgentType, request: &Request) -> Result<AgentResponse>;
}
