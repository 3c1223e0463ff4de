//! Conversation context and token accounting
//!
//! This module provides the message model, the conversation history owned by
//! a session, and token accounting against a model's context window.

pub mod models;
pub mod token_budget;
pub mod token_estimator;

pub use models::{ConversationHistory, Message, Role};
pub use token_budget::{known_context_window, BudgetError, TokenAccountant, TokenBudget};
pub use token_estimator::{TiktokenEstimator, TokenEstimator};
