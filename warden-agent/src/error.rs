//! Errors from command handlers and jobs

use thiserror::Error;

use warden_core::CategoryError;
use warden_exchange::ExchangeError;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Category error: {0}")]
    Category(#[from] CategoryError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Missing attachment for {0}")]
    MissingAttachment(String),

    #[error("Inactive category: {0}")]
    InactiveCategory(String),
}

impl AgentError {
    pub fn invalid(what: impl Into<String>) -> Self {
        AgentError::InvalidData(what.into())
    }
}
