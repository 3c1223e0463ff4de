//! Token accounting and output budget enforcement
//!
//! Message counting follows the chat-completions accounting rules:
//! - every message costs 4 tokens of framing plus the tokens of each field value
//! - a `name` field replaces the role on the wire, so it saves one token
//! - every reply is primed with 2 tokens for the assistant turn

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::models::Message;
use super::token_estimator::{TiktokenEstimator, TokenEstimator};

/// Framing tokens added for every message
pub const TOKENS_PER_MESSAGE: usize = 4;

/// Tokens priming the upcoming assistant reply
pub const REPLY_PRIMING_TOKENS: usize = 2;

/// Context windows of models with a known limit
const KNOWN_CONTEXT_WINDOWS: &[(&str, usize)] = &[("gpt-4", 8000), ("gpt-3.5-turbo", 4000)];

/// Token budget for one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Context window; `None` disables the pre-flight context check
    pub max_context_tokens: Option<usize>,
    pub max_output_tokens: usize,
}

impl TokenBudget {
    pub fn new(max_context_tokens: Option<usize>, max_output_tokens: usize) -> Self {
        Self {
            max_context_tokens,
            max_output_tokens,
        }
    }

    /// Budget using the known context window of `model`, unbounded otherwise
    pub fn for_model(model: &str, max_output_tokens: usize) -> Self {
        Self::new(known_context_window(model), max_output_tokens)
    }

    /// Whether the model has no context cap
    pub fn is_unbounded(&self) -> bool {
        self.max_context_tokens.is_none()
    }
}

/// Context window for models with a known limit
pub fn known_context_window(model: &str) -> Option<usize> {
    KNOWN_CONTEXT_WINDOWS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, window)| *window)
}

/// Token budget errors
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Budget exceeded: {used} tokens used, {max} tokens allowed")]
    BudgetExceeded { used: usize, max: usize },

    #[error("Token estimation failed: {0}")]
    EstimationFailed(String),
}

/// Counts tokens for a model and decides how much output fits
#[derive(Clone)]
pub struct TokenAccountant {
    estimator: Arc<dyn TokenEstimator>,
}

impl TokenAccountant {
    /// Create an accountant with the tiktoken encoding of `model`
    pub fn for_model(model: &str) -> Result<Self, BudgetError> {
        let estimator = TiktokenEstimator::for_model(model)?;
        Ok(Self::with_estimator(Arc::new(estimator)))
    }

    /// Create an accountant with a custom estimator
    pub fn with_estimator(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { estimator }
    }

    /// Count tokens in plain text
    pub fn count_text(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }

    /// Count tokens for a request made of `messages`, including reply priming
    pub fn count_messages(&self, messages: &[Message]) -> usize {
        let body: usize = messages
            .iter()
            .map(|message| {
                let values: Vec<&str> = message.field_values().collect();
                let fields: usize = self.estimator.estimate_batch(&values).into_iter().sum();
                // name replaces role, which is always a single token
                let name_discount = usize::from(message.name.is_some());
                TOKENS_PER_MESSAGE + fields - name_discount
            })
            .sum();

        body + REPLY_PRIMING_TOKENS
    }

    /// Output tokens available for a reply to `messages`
    pub fn remaining_output_tokens(
        &self,
        messages: &[Message],
        budget: &TokenBudget,
    ) -> Result<usize, BudgetError> {
        let Some(max_context) = budget.max_context_tokens else {
            return Ok(budget.max_output_tokens);
        };

        let used = self.count_messages(messages);
        let remaining = max_context
            .saturating_sub(used)
            .min(budget.max_output_tokens);

        if remaining == 0 {
            return Err(BudgetError::BudgetExceeded {
                used,
                max: max_context,
            });
        }

        Ok(remaining)
    }
}

impl std::fmt::Debug for TokenAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAccountant").finish_non_exhaustive()
    }
}
