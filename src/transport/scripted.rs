//! In-memory transport replaying a fixed script of deltas
//!
//! Every call replays the same script and records its request.

use async_stream::try_stream;
use async_trait::async_trait;
use std::sync::Mutex;

use super::{CompletionRequest, CompletionTransport, DeltaStream, TransportError};

#[derive(Debug, Clone)]
enum Ending {
    Complete,
    RateLimited,
    Error(String),
}

/// Transport that streams a fixed list of deltas
#[derive(Debug)]
pub struct ScriptedTransport {
    deltas: Vec<String>,
    rate_limit_on_connect: bool,
    ending: Ending,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedTransport {
    pub fn new<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deltas: deltas.into_iter().map(Into::into).collect(),
            rate_limit_on_connect: false,
            ending: Ending::Complete,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reject every request with a rate limit before streaming anything
    pub fn rate_limited_on_connect(mut self) -> Self {
        self.rate_limit_on_connect = true;
        self
    }

    /// Stream the deltas, then fail with a rate limit
    pub fn ending_with_rate_limit(mut self) -> Self {
        self.ending = Ending::RateLimited;
        self
    }

    /// Stream the deltas, then fail with an API error
    pub fn ending_with_error(mut self, message: impl Into<String>) -> Self {
        self.ending = Ending::Error(message.into());
        self
    }

    /// Requests received so far, in arrival order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Number of requests received so far
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|requests| requests.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        if self.rate_limit_on_connect {
            return Err(TransportError::RateLimited);
        }

        let deltas = self.deltas.clone();
        let ending = self.ending.clone();
        let stream = try_stream! {
            for delta in deltas {
                // give concurrent replies a chance to interleave
                tokio::task::yield_now().await;
                yield delta;
            }
            let failure = match ending {
                Ending::Complete => None,
                Ending::RateLimited => Some(TransportError::RateLimited),
                Ending::Error(message) => Some(TransportError::Api(message)),
            };
            if let Some(error) = failure {
                Err::<(), TransportError>(error)?;
            }
        };

        Ok(Box::pin(stream))
    }
}
