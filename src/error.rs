//! Crate-wide error type

use thiserror::Error;

use crate::context::BudgetError;
use crate::transport::TransportError;

/// Errors surfaced by the dialogue engine
#[derive(Debug, Error)]
pub enum DialogueError {
    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DialogueError {
    /// Whether the request was rejected before reaching the provider
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, DialogueError::Budget(BudgetError::BudgetExceeded { .. }))
    }
}

pub type Result<T> = std::result::Result<T, DialogueError>;
