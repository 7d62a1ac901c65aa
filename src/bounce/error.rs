use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Failure of a single account operation (send or scan).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("account {account} unavailable: {message}")]
    AccountUnavailable { account: String, message: String },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("message rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn unavailable(account: impl Into<String>, message: impl ToString) -> Self {
        Self::AccountUnavailable {
            account: account.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BounceError {
    #[error("no accounts available")]
    NoAccounts,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("background task failed: {0}")]
    Task(String),
}
