use thiserror::Error;

/// Shared error type for cross-cutting concerns (config loading). Each
/// downstream crate (graph, providers, pipeline) defines its own error
/// enum for its own failure modes.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
