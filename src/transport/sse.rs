//! Server-sent event framing for streamed completions

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use std::fmt::Display;

use super::TransportError;

/// One dispatched SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name from the `event:` field
    pub event: String,
    pub data: String,
}

/// Decode SSE events from a stream of byte chunks
///
/// Events with an empty data buffer are skipped
pub fn sse_events<S, B, E>(bytes: S) -> impl Stream<Item = Result<SseEvent, TransportError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    bytes.eventsource().filter_map(|event| async move {
        match event {
            Ok(event) if event.data.is_empty() => None,
            Ok(event) => Some(Ok(SseEvent {
                event: event.event,
                data: event.data,
            })),
            Err(e) => Some(Err(TransportError::Network(e.to_string()))),
        }
    })
}

/// SSE events carried by an HTTP response body
pub fn response_events(
    response: reqwest::Response,
) -> impl Stream<Item = Result<SseEvent, TransportError>> + Send {
    sse_events(response.bytes_stream())
}
