// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chunk accumulation
//!
//! Upstream SDKs emit heartbeat frames that carry no content: empty strings,
//! bare whitespace, or serialized non-values such as `{}` or `null`. These are
//! dropped before they can touch the accumulated output.

use super::SessionOutcome;
use crate::llm::provider::StreamChunk;

const SENTINELS: &[&str] = &["{}", "[]", "null", "undefined", "\"\"", "''"];

/// Whether `text` is a serialized non-value, ignoring surrounding whitespace
pub fn is_sentinel(text: &str) -> bool {
    SENTINELS.contains(&text.trim())
}

/// Whether finished output carries nothing worth showing
pub fn is_meaningless(text: &str) -> bool {
    text.trim().is_empty() || is_sentinel(text)
}

/// Heartbeat deltas match a sentinel exactly. `" null"` is a real token.
fn is_heartbeat(delta: &str) -> bool {
    delta.is_empty() || SENTINELS.contains(&delta)
}

/// Folds chunks into the accumulated output and decides when to notify
#[derive(Debug, Default)]
pub struct OutputAccumulator {
    text: String,
    /// Whitespace-only deltas held back until real content follows them
    pending_whitespace: String,
    last_emitted: Option<String>,
}

impl OutputAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Apply one chunk. Returns the new accumulated output when it changed
    /// since the last notification.
    pub fn push(&mut self, chunk: StreamChunk) -> Option<&str> {
        match chunk {
            StreamChunk::Delta(delta) => {
                if is_heartbeat(&delta) {
                    return None;
                }
                if delta.trim().is_empty() {
                    // Inner spacing survives; standalone whitespace never does.
                    if !self.text.is_empty() {
                        self.pending_whitespace.push_str(&delta);
                    }
                    return None;
                }
                self.text.push_str(&self.pending_whitespace);
                self.pending_whitespace.clear();
                self.text.push_str(&delta);
            }
            StreamChunk::Snapshot(snapshot) => {
                if is_meaningless(&snapshot) {
                    return None;
                }
                self.pending_whitespace.clear();
                self.text = snapshot;
            }
        }

        if self.last_emitted.as_deref() == Some(self.text.as_str()) {
            return None;
        }
        self.last_emitted = Some(self.text.clone());
        Some(&self.text)
    }

    /// Terminal outcome for the accumulated output
    pub fn finish(&self) -> SessionOutcome {
        if is_meaningless(&self.text) {
            SessionOutcome::Empty
        } else {
            SessionOutcome::Completed(self.text.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn snap(s: &str) -> StreamChunk {
        StreamChunk::Snapshot(s.to_string())
    }

    fn delta(s: &str) -> StreamChunk {
        StreamChunk::Delta(s.to_string())
    }

    #[test]
    fn test_sentinels() {
        for s in ["{}", "[]", "null", " null ", "undefined", "\"\""] {
            assert!(is_sentinel(s), "{s}");
        }
        assert!(!is_sentinel("nullable"));
        assert!(!is_sentinel("{\"a\":1}"));
    }

    #[test]
    fn test_token_deltas_that_look_like_sentinels_are_kept() {
        let mut acc = OutputAccumulator::new();
        acc.push(delta("The value is"));
        assert_eq!(acc.push(delta(" null")), Some("The value is null"));
        acc.push(delta(", so return early."));
        acc.push(delta(" []"));
        assert_eq!(acc.push(delta("null")), None);
        assert_eq!(acc.text(), "The value is null, so return early. []");
    }

    #[test]
    fn test_meaningless_output() {
        for s in ["", "  \n", "{}", " null "] {
            assert!(is_meaningless(s), "{s:?}");
        }
        assert!(!is_meaningless("ok"));
    }

    #[test]
    fn test_duplicate_snapshot_not_emitted() {
        let mut acc = OutputAccumulator::new();
        assert_eq!(acc.push(snap("")), None);
        assert_eq!(acc.push(snap("Hello")), Some("Hello"));
        assert_eq!(acc.push(snap("Hello")), None);
        assert_eq!(acc.push(snap("Hello, world")), Some("Hello, world"));
    }

    #[test]
    fn test_whitespace_delta_held_until_content() {
        let mut acc = OutputAccumulator::new();
        assert_eq!(acc.push(delta("  ")), None);
        assert_eq!(acc.text(), "");
        acc.push(delta("first"));
        assert_eq!(acc.push(delta("\n\n")), None);
        assert_eq!(acc.text(), "first");
        assert_eq!(acc.push(delta("second")), Some("first\n\nsecond"));
        acc.push(delta("  "));
        assert_eq!(acc.finish(), SessionOutcome::Completed("first\n\nsecond".to_string()));
    }

    #[test]
    fn test_sentinel_snapshot_does_not_clear() {
        let mut acc = OutputAccumulator::new();
        acc.push(snap("answer"));
        assert_eq!(acc.push(snap("null")), None);
        assert_eq!(acc.text(), "answer");
    }

    #[test]
    fn test_finish_empty() {
        assert_eq!(OutputAccumulator::new().finish(), SessionOutcome::Empty);
    }

    proptest! {
        #[test]
        fn prop_notifications_never_repeat_or_blank(
            chunks in proptest::collection::vec(
                prop_oneof![
                    Just(String::new()),
                    Just("   ".to_string()),
                    Just("{}".to_string()),
                    Just("null".to_string()),
                    "[a-c ]{1,4}",
                ],
                0..24,
            ),
            as_snapshots in any::<bool>(),
        ) {
            let mut acc = OutputAccumulator::new();
            let mut emitted: Vec<String> = Vec::new();
            for c in chunks {
                let chunk = if as_snapshots { StreamChunk::Snapshot(c) } else { StreamChunk::Delta(c) };
                if let Some(text) = acc.push(chunk) {
                    emitted.push(text.to_string());
                }
            }
            for pair in emitted.windows(2) {
                prop_assert_ne!(&pair[0], &pair[1]);
            }
            for text in &emitted {
                prop_assert!(!text.trim().is_empty());
                prop_assert!(!is_sentinel(text));
            }
            if let Some(last) = emitted.last() {
                prop_assert_eq!(acc.text(), last.as_str());
            }
        }
    }
}
