//! Streaming chat sessions
//!
//! A session owns one conversation, checks every request against the token
//! budget, and streams replies as batched text snapshots.

pub mod manager;
pub mod streaming;

pub use manager::{Regeneration, ReplyStream, SessionSettings, StreamingSession, DEFAULT_MIN_CHUNK};
pub use streaming::{Snapshot, StreamState, OVERLOADED_MESSAGE};
