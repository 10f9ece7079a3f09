use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("graph error: {0}")]
    Graph(#[from] memcore_graph::GraphError),

    #[error("provider error: {0}")]
    Provider(#[from] memcore_providers::ProviderError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
