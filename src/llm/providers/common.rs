// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::{ApiError, RelayError, Result};

/// Parse numeric Retry-After header (seconds).
pub(crate) fn parse_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

/// Map a transport failure before any response arrived.
pub(crate) fn request_error(provider: &str, e: reqwest::Error) -> RelayError {
    if e.is_timeout() {
        RelayError::Api(ApiError::Timeout)
    } else if e.is_connect() {
        RelayError::Api(ApiError::Network(format!("Could not reach {}: {}", provider, e)))
    } else {
        RelayError::Http(e)
    }
}

/// Map a non-success HTTP status to the error taxonomy.
///
/// 429 bodies mentioning quota, credits or billing are quota exhaustion;
/// other 429s are plain rate limits.
pub(crate) fn status_error(status: u16, headers: &HeaderMap, body: &str) -> RelayError {
    let message = extract_message(body);
    let lower = message.to_lowercase();
    match status {
        401 | 403 => RelayError::Api(ApiError::AuthenticationFailed),
        402 => RelayError::Api(ApiError::QuotaExceeded(message)),
        404 => RelayError::Api(ApiError::ModelNotFound(message)),
        429 if lower.contains("quota") || lower.contains("credit") || lower.contains("billing") => {
            RelayError::Api(ApiError::QuotaExceeded(message))
        }
        429 => {
            let secs = parse_retry_after_seconds(headers).unwrap_or(60);
            RelayError::Api(ApiError::RateLimited(secs.min(u32::MAX as u64) as u32))
        }
        _ => RelayError::Api(ApiError::ServerError { status, message }),
    }
}

/// Pull a human-readable message out of the common JSON error shapes.
pub(crate) fn extract_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    let candidates = [
        value.pointer("/error/message"),
        value.pointer("/error"),
        value.pointer("/message"),
        value.pointer("/detail"),
    ];
    let message = candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    message
}

/// Split a byte stream into lines, tolerating frames that cut lines in half.
pub(crate) fn lines<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    async_stream::try_stream! {
        let mut buffer = String::new();
        futures::pin_mut!(bytes);
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| RelayError::Api(ApiError::StreamError(e.to_string())))?;
            buffer.push_str(&String::from_utf8_lossy(chunk.as_ref()));
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer = buffer[pos + 1..].to_string();
                yield line;
            }
        }
        if !buffer.trim().is_empty() {
            yield buffer;
        }
    }
}

/// Extract the payload of an SSE `data:` line
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}
