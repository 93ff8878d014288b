// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Relay - routing, model lifecycle and provider fallback for AI backends.
//!
//! This crate exposes the orchestration core used by the `relay` CLI
//! (`src/main.rs`) and by embedders.
//!
//! Architecture highlights:
//! - `analyzer`: classifies a request into an agent type and complexity
//! - `router`: decides between a specialized agent and plain chat, owns the busy flag
//! - `session`: one cancellable streamed chat response with chunk filtering
//! - `fallback`, `services`: one chain algorithm for chat, speech, image and video
//! - `models`: install, verify and hot-swap self-hosted models
//! - `llm`, `registry`: provider catalogue and chat backends
//! - `config`, `progress`: settings snapshots, credentials and progress fan-out

pub mod agents;
pub mod analyzer;
pub mod cli;
pub mod config;
pub mod error;
pub mod fallback;
pub mod llm;
pub mod models;
pub mod progress;
pub mod registry;
pub mod request;
pub mod router;
pub mod services;
pub mod session;

pub use error::{RelayError, Result};
