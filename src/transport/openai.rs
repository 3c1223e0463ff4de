//! OpenAI-compatible streaming chat completions client

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::sse::response_events;
use super::{CompletionRequest, CompletionTransport, DeltaStream, SamplingOptions, TransportError};
use crate::context::Message;

/// Marker sent as the final SSE payload
const DONE_MARKER: &str = "[DONE]";

/// Connection settings for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL without the `/chat/completions` suffix
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Streaming transport for OpenAI-compatible chat completion APIs
pub struct OpenAiTransport {
    http: Client,
    config: OpenAiConfig,
}

impl OpenAiTransport {
    /// Create a new transport
    pub fn new(config: OpenAiConfig) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionTransport for OpenAiTransport {
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, TransportError> {
        let body = ChatCompletionRequest::from(&request);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            max_tokens = request.max_output_tokens,
            "Chat completion streaming request"
        );

        let mut req = self.http.post(self.endpoint()).json(&body);
        if let Some(api_key) = &self.config.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Network(format!("timeout: {}", e))
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Provider rate limit hit");
            return Err(TransportError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text = text.chars().take(200).collect::<String>();
            return Err(TransportError::Api(format!("HTTP {status}: {text}")));
        }

        let mut events = Box::pin(response_events(response));
        let deltas = try_stream! {
            while let Some(event) = events.next().await {
                let event = event?;
                if event.data.trim() == DONE_MARKER {
                    break;
                }
                if let Some(delta) = parse_chunk(&event.data)? {
                    yield delta;
                }
            }
        };

        Ok(Box::pin(deltas))
    }
}

/// Extract the text delta from one streamed chunk
fn parse_chunk(data: &str) -> Result<Option<String>, TransportError> {
    let chunk: ChatCompletionChunk =
        serde_json::from_str(data).map_err(|e| TransportError::Parse(e.to_string()))?;

    if let Some(error) = chunk.error {
        let is_rate_limit = error
            .kind
            .as_deref()
            .or(error.code.as_deref())
            .is_some_and(|kind| kind.starts_with("rate_limit"));
        if is_rate_limit {
            return Err(TransportError::RateLimited);
        }
        return Err(TransportError::Api(error.message));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: usize,
    stream: bool,
    #[serde(flatten)]
    options: &'a SamplingOptions,
}

impl<'a> From<&'a CompletionRequest> for ChatCompletionRequest<'a> {
    fn from(request: &'a CompletionRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_output_tokens,
            stream: true,
            options: &request.options,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"},"index":0}]}"#;
        assert_eq!(parse_chunk(data).unwrap(), Some("Hel".to_string()));
    }

    #[test]
    fn test_parse_role_only_delta() {
        let data = r#"{"choices":[{"delta":{"role":"assistant"},"index":0}]}"#;
        assert_eq!(parse_chunk(data).unwrap(), None);
    }

    #[test]
    fn test_parse_rate_limit_error_object() {
        let data = r#"{"error":{"message":"slow down","type":"rate_limit_exceeded"}}"#;
        assert!(matches!(parse_chunk(data), Err(TransportError::RateLimited)));
    }

    #[test]
    fn test_parse_other_error_object() {
        let data = r#"{"error":{"message":"bad key","type":"invalid_request_error"}}"#;
        match parse_chunk(data) {
            Err(TransportError::Api(msg)) => assert_eq!(msg, "bad key"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse_chunk("not json"), Err(TransportError::Parse(_))));
    }

    #[test]
    fn test_request_body_shape() {
        let request = CompletionRequest {
            model: "gpt-4".to_string(),
            messages: vec![Message::system("sys"), Message::user("hi")],
            max_output_tokens: 42,
            options: SamplingOptions::default(),
        };
        let body = serde_json::to_value(ChatCompletionRequest::from(&request)).unwrap();
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["max_tokens"], 42);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["top_p"], 1.0);
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let transport = OpenAiTransport::new(OpenAiConfig {
            base_url: "http://localhost:1234/v1/".to_string(),
            ..OpenAiConfig::default()
        })
        .unwrap();
        assert_eq!(transport.endpoint(), "http://localhost:1234/v1/chat/completions");
    }
}
