//! Completion transport boundary
//!
//! A transport turns a chat request into a stream of raw text deltas. The
//! session never talks to the network directly; it only sees this trait.

pub mod openai;
pub mod scripted;
pub mod sse;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

use crate::context::Message;

pub use openai::{OpenAiConfig, OpenAiTransport};
pub use scripted::ScriptedTransport;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Lazy sequence of raw text deltas
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Sampling parameters passed through to the provider unchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
}

fn default_temperature() -> f32 {
    0.3
}

fn default_top_p() -> f32 {
    1.0
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

/// A fully assembled completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_output_tokens: usize,
    pub options: SamplingOptions,
}

/// Streams completions from an LLM provider
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Start a completion and return its deltas as they arrive
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, TransportError>;
}
