// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for relay
//!
//! This module defines all error types used throughout the crate, grouped the
//! way the dispatcher needs to treat them: configuration problems are fatal,
//! transient service failures advance a fallback chain, integrity failures
//! abort a download attempt, and cancellation is a normal terminal state.

use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Provider/service errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Missing credential, unknown provider or model
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Downloaded artifact failed verification
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// The user cancelled the operation
    #[error("Cancelled by user")]
    Cancelled,

    /// Another request is already in flight for this conversation
    #[error("A generation is already in progress")]
    Busy,

    /// Every entry of a fallback chain failed
    #[error("All {} services failed: {}", .0.len(), summarize_failures(.0))]
    ChainExhausted(Vec<ServiceFailure>),

    /// The specialized agent collaborator failed
    #[error("Agent error: {0}")]
    Agent(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// API-specific error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Rate limited by the API
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// Account quota or credits exhausted
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Requested model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

/// One recorded failure from a fallback chain attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFailure {
    /// Service that failed
    pub service_id: String,
    /// Human-readable reason
    pub reason: String,
    /// Whether the failure was transient (rate limit, quota, timeout)
    pub transient: bool,
}

impl ServiceFailure {
    pub fn new(service_id: impl Into<String>, error: &RelayError) -> Self {
        Self {
            service_id: service_id.into(),
            reason: error.to_string(),
            transient: error.is_transient(),
        }
    }

    /// Failure for a service that was skipped without being invoked
    pub fn unavailable(service_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            reason: reason.into(),
            transient: false,
        }
    }
}

fn summarize_failures(failures: &[ServiceFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.service_id, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl ApiError {
    /// Rate limits, quota, timeouts, dropped connections and 5xx responses
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::RateLimited(_)
            | ApiError::QuotaExceeded(_)
            | ApiError::Timeout
            | ApiError::Network(_)
            | ApiError::StreamError(_) => true,
            ApiError::ServerError { status, .. } => *status >= 500 && *status < 600,
            ApiError::AuthenticationFailed
            | ApiError::ModelNotFound(_)
            | ApiError::InvalidResponse(_) => false,
        }
    }
}

impl RelayError {
    /// Whether this error should advance a fallback chain rather than fail the request
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Api(api) => api.is_transient(),
            RelayError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether a fallback chain may move past this error to the next service.
    ///
    /// Transient and hard service failures (auth, malformed response) both
    /// advance. Integrity failures, cancellation and busy never do.
    pub fn advances_chain(&self) -> bool {
        matches!(
            self,
            RelayError::Api(_)
                | RelayError::Http(_)
                | RelayError::Json(_)
                | RelayError::Configuration(_)
        )
    }

    /// Whether this is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RelayError::Cancelled)
    }

    /// Single user-facing message with remediation advice
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Configuration(detail) => {
                format!("Configuration problem: {}", detail)
            }
            RelayError::Integrity(detail) => format!(
                "The model download could not be verified ({}). Please re-attempt the download.",
                detail
            ),
            RelayError::Cancelled => "Generation cancelled.".to_string(),
            RelayError::Busy => {
                "Another response is still being generated. Wait for it to finish or cancel it."
                    .to_string()
            }
            RelayError::ChainExhausted(failures) => {
                if failures.iter().any(|f| f.transient) {
                    format!(
                        "All providers are currently unavailable ({}). Try again later or switch provider.",
                        summarize_failures(failures)
                    )
                } else {
                    format!(
                        "No provider could handle this request ({}). Check your provider settings.",
                        summarize_failures(failures)
                    )
                }
            }
            RelayError::Api(ApiError::AuthenticationFailed) => {
                "The provider rejected the API key. Check the credential in settings.".to_string()
            }
            err if err.is_transient() => format!(
                "The provider is temporarily unavailable ({}). Try again later or switch provider.",
                err
            ),
            other => other.to_string(),
        }
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for RelayError {
    fn from(err: toml::ser::Error) -> Self {
        RelayError::Toml(err.to_string())
    }
}
