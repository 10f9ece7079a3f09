use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("node not found: {id}")]
    NodeNotFound { id: String },

    #[error("node {id} is superseded by {superseded_by} and cannot be mutated directly")]
    AlreadySuperseded { id: String, superseded_by: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid node type: {0}")]
    InvalidNodeType(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
