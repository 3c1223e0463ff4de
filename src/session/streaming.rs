//! Chunk batching for streamed replies
//!
//! Providers stream replies a token at a time. Redrawing the display for every
//! token is noisy, so deltas are accumulated and a new snapshot is released
//! only once it has grown by at least `min_chunk` characters. The final text
//! is always released once the stream ends.

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use std::sync::Arc;

use crate::transport::{CompletionRequest, CompletionTransport, TransportError};

/// Shown in place of a reply when the provider rejects the request as overloaded
pub const OVERLOADED_MESSAGE: &str = "(Sorry, that model is currently overloaded. Try later)";

/// One text update released to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// All text generated so far
    pub text: String,
    /// The reply was cut short by a rate limit and carries the apology
    pub degraded: bool,
}

/// Accumulation state of one in-flight reply
#[derive(Debug)]
pub struct StreamState {
    collected_text: String,
    last_emitted_text: String,
    last_emitted_chars: usize,
    min_chunk: usize,
}

impl StreamState {
    pub fn new(min_chunk: usize) -> Self {
        Self {
            collected_text: String::new(),
            last_emitted_text: String::new(),
            last_emitted_chars: 0,
            min_chunk,
        }
    }

    /// Add a delta; returns a snapshot if enough text accumulated
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.collected_text.push_str(delta);
        let text = self.collected_text.trim();
        let chars = text.chars().count();

        if chars.saturating_sub(self.last_emitted_chars) < self.min_chunk {
            return None;
        }
        self.emit(chars)
    }

    /// Release whatever is left once the stream ended
    pub fn finish(&mut self) -> Option<String> {
        let chars = self.collected_text.trim().chars().count();
        self.emit(chars)
    }

    /// Terminal snapshot for a rate-limited reply
    ///
    /// Text already shown stays a prefix of the result.
    pub fn overloaded(&mut self) -> String {
        let text = self.collected_text.trim();
        let snapshot = if text.is_empty() {
            OVERLOADED_MESSAGE.to_string()
        } else {
            format!("{text}\n\n{OVERLOADED_MESSAGE}")
        };
        self.last_emitted_chars = snapshot.chars().count();
        self.last_emitted_text = snapshot.clone();
        snapshot
    }

    /// Last text handed to the consumer
    pub fn last_emitted(&self) -> &str {
        &self.last_emitted_text
    }

    fn emit(&mut self, chars: usize) -> Option<String> {
        let text = self.collected_text.trim();
        if text.is_empty() || text == self.last_emitted_text {
            return None;
        }
        self.last_emitted_text = text.to_string();
        self.last_emitted_chars = chars;
        Some(self.last_emitted_text.clone())
    }
}

/// Drive one completion and release batched snapshots
///
/// A rate limit, whether on connect or mid-stream, ends the stream normally
/// with a degraded snapshot. Every other transport failure is returned as an
/// error item.
pub fn reply_snapshots(
    transport: Arc<dyn CompletionTransport>,
    request: CompletionRequest,
    min_chunk: usize,
) -> impl Stream<Item = Result<Snapshot, TransportError>> + Send {
    try_stream! {
        let mut state = StreamState::new(min_chunk);
        let mut rate_limited = false;

        let deltas = match transport.stream(request).await {
            Err(TransportError::RateLimited) => None,
            other => Some(other?),
        };

        match deltas {
            None => rate_limited = true,
            Some(mut deltas) => {
                while let Some(delta) = deltas.next().await {
                    let delta = match delta {
                        Err(TransportError::RateLimited) => {
                            rate_limited = true;
                            break;
                        }
                        other => other?,
                    };
                    if let Some(text) = state.push(&delta) {
                        yield Snapshot { text, degraded: false };
                    }
                }
            }
        }

        if rate_limited {
            yield Snapshot { text: state.overloaded(), degraded: true };
        } else if let Some(text) = state.finish() {
            yield Snapshot { text, degraded: false };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::ScriptedTransport;
    use crate::transport::SamplingOptions;
    use futures::TryStreamExt;

    fn feed(deltas: &[&str], min_chunk: usize) -> Vec<String> {
        let mut state = StreamState::new(min_chunk);
        let mut out: Vec<String> = deltas.iter().filter_map(|d| state.push(d)).collect();
        out.extend(state.finish());
        out
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4".to_string(),
            messages: Vec::new(),
            max_output_tokens: 10,
            options: SamplingOptions::default(),
        }
    }

    #[test]
    fn test_end_of_stream_emits_once() {
        assert_eq!(feed(&["He", "llo", " world"], 100), vec!["Hello world"]);
    }

    #[test]
    fn test_batches_by_min_chunk() {
        let out = feed(&["abc", "de", "fgh", "ij", "k"], 5);
        assert_eq!(out, vec!["abcde", "abcdefghij", "abcdefghijk"]);
    }

    #[test]
    fn test_final_not_repeated_when_already_emitted() {
        let out = feed(&["abcde", "fghij"], 5);
        assert_eq!(out, vec!["abcde", "abcdefghij"]);
    }

    #[test]
    fn test_whitespace_is_trimmed_and_not_reemitted() {
        let out = feed(&["  hi", " there", "   ", "\n"], 1);
        assert_eq!(out, vec!["hi", "hi there"]);
    }

    #[test]
    fn test_zero_min_chunk_never_emits_empty_or_duplicates() {
        let out = feed(&["", " ", "a", "", "b"], 0);
        assert_eq!(out, vec!["a", "ab"]);
    }

    #[test]
    fn test_growth_counts_characters_not_bytes() {
        // five two-byte characters
        let out = feed(&["ééééé", "é"], 5);
        assert_eq!(out, vec!["ééééé", "éééééé"]);
    }

    #[test]
    fn test_snapshots_are_prefix_monotonic() {
        let deltas = ["The ", "quick", " brown ", "fox", " jumps", "\n", "over ", "it."];
        for min_chunk in [1, 3, 7, 50] {
            let out = feed(&deltas, min_chunk);
            for pair in out.windows(2) {
                assert!(pair[1].starts_with(&pair[0]), "{:?}", pair);
                assert_ne!(pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn test_overloaded_keeps_prefix() {
        let mut state = StreamState::new(1);
        let first = state.push("partial").unwrap();
        let last = state.overloaded();
        assert!(last.starts_with(&first));
        assert!(last.ends_with(OVERLOADED_MESSAGE));
    }

    #[tokio::test]
    async fn test_reply_snapshots_from_transport() {
        let transport = Arc::new(ScriptedTransport::new(["He", "llo", " world"]));
        let snapshots: Vec<Snapshot> = reply_snapshots(transport, request(), 100)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            snapshots,
            vec![Snapshot {
                text: "Hello world".to_string(),
                degraded: false
            }]
        );
    }

    #[tokio::test]
    async fn test_rate_limit_on_connect_yields_apology() {
        let transport = Arc::new(ScriptedTransport::new(["ignored"]).rate_limited_on_connect());
        let snapshots: Vec<Snapshot> = reply_snapshots(transport, request(), 10)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].text, OVERLOADED_MESSAGE);
        assert!(snapshots[0].degraded);
    }

    #[tokio::test]
    async fn test_transport_error_is_surfaced() {
        let transport = Arc::new(ScriptedTransport::new(["a"]).ending_with_error("boom"));
        let result: Result<Vec<Snapshot>, _> =
            reply_snapshots(transport, request(), 100).try_collect().await;
        assert!(matches!(result, Err(TransportError::Api(msg)) if msg == "boom"));
    }
}
