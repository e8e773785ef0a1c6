//! Lifecycle controller errors

use thiserror::Error;

use crate::models::ContainerStatus;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Command exceeds {limit} bytes")]
    CommandTooLarge { limit: usize },

    #[error("Cannot {action} container {id} while it is {status}")]
    InvalidState {
        id: String,
        status: ContainerStatus,
        action: &'static str,
    },

    #[error("Container operation failed: {0}")]
    OperationFailed(String),
}

impl ContainerError {
    /// Wrap a runtime failure, keeping the whole context chain
    pub fn operation(err: anyhow::Error) -> Self {
        ContainerError::OperationFailed(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;
