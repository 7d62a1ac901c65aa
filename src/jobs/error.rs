use thiserror::Error;

use crate::bounce::{BounceError, TransportError};
use crate::pipeline::PipelineError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("progress stream of job '{0}' is not available (unknown job or already taken)")]
    StreamUnavailable(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("bounce transport setup failed: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Bounce(#[from] BounceError),
}

impl OrchestratorError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Store(err) | Self::Bounce(BounceError::Store(err)) => err.is_not_found(),
            _ => false,
        }
    }
}
