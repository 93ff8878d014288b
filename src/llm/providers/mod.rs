// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat backend implementations

pub mod anthropic;
mod common;
pub mod ollama;
pub mod openai;
pub mod simulation;

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiCompatibleBackend;
pub use simulation::SimulationBackend;

pub(crate) use common::{request_error, status_error};
