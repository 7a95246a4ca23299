use thiserror::Error;

pub type RecsResult<T> = Result<T, RecsError>;

#[derive(Error, Debug)]
pub enum RecsError {
    /// Valid input that produced no result. Engine operations return empty
    /// collections instead; this variant is for callers that need to surface it.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RecsError {
    pub fn model_not_initialized() -> Self {
        RecsError::InvalidState("model not initialized".to_string())
    }
}
