//! Token estimation using tiktoken

use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};
use std::sync::Arc;
use tracing::debug;

use super::token_budget::BudgetError;

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate tokens for multiple texts
    fn estimate_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }
}

/// Tiktoken-based token estimator
///
/// Uses the encoding registered for the model, or `cl100k_base` when the
/// model is unknown to tiktoken.
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    /// Create an estimator with the encoding used by `model`
    pub fn for_model(model: &str) -> Result<Self, BudgetError> {
        let bpe = match get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => {
                debug!("No encoding registered for model '{}', using cl100k_base", model);
                cl100k_base().map_err(|e| BudgetError::EstimationFailed(e.to_string()))?
            }
        };
        Ok(Self { bpe: Arc::new(bpe) })
    }

    /// Create an estimator with the default encoding (cl100k_base)
    pub fn new() -> Result<Self, BudgetError> {
        let bpe = cl100k_base().map_err(|e| BudgetError::EstimationFailed(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiktoken_estimator() {
        let estimator = TiktokenEstimator::for_model("gpt-4").unwrap();
        let text = "Hello, world! This is a test.";
        let tokens = estimator.estimate(text);
        assert!(tokens > 0);
        assert!(tokens < 20); // Should be around 8-10 tokens
    }

    #[test]
    fn test_unknown_model_falls_back_to_default_encoding() {
        let fallback = TiktokenEstimator::for_model("my-local-model").unwrap();
        let default = TiktokenEstimator::new().unwrap();
        let text = "fn main() { println!(\"hi\"); }";
        assert_eq!(fallback.estimate(text), default.estimate(text));
    }

    #[test]
    fn test_multibyte_text_is_counted() {
        let estimator = TiktokenEstimator::new().unwrap();
        assert!(estimator.estimate("Привет, мир! 你好") > 0);
        assert_eq!(estimator.estimate(""), 0);
    }

    #[test]
    fn test_batch_estimation() {
        let estimator = TiktokenEstimator::new().unwrap();
        let texts = vec!["Hello", "world", "test"];
        let tokens = estimator.estimate_batch(&texts);
        assert_eq!(tokens.len(), 3);
        assert!(tokens.iter().all(|&t| t > 0));
    }
}
