//! Token-budgeted streaming dialogue engine
//!
//! Keeps a multi-turn conversation with an LLM, checks every request against
//! the model's context window, and streams replies as batched text snapshots:
//! - `context`: messages, history and token accounting
//! - `session`: streaming sessions, regeneration and multi-reply sampling
//! - `transport`: the completion provider boundary and an OpenAI client
//! - `dialog`: a line-oriented dialog loop over a session

pub mod config;
pub mod context;
pub mod dialog;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod session;
pub mod transport;

pub use config::Config;
pub use context::{Message, Role, TokenAccountant, TokenBudget};
pub use error::{DialogueError, Result};
pub use session::{Regeneration, ReplyStream, SessionSettings, StreamingSession};
pub use transport::{CompletionRequest, CompletionTransport, OpenAiTransport, TransportError};
