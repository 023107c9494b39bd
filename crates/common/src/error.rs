//! Error types for parley.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Payload is missing the tenant key `user_id`")]
    MissingTenantKey,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding model failed to load: {0}")]
    ModelLoad(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ParleyError {
    /// Input errors are rejected synchronously and must never be retried.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput(_) | Self::MissingTenantKey | Self::InvalidInput(_)
        )
    }

    /// Fatal errors need operator remediation; retrying blindly will not help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ModelLoad(_) | Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
