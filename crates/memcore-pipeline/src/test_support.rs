//! Shared no-op provider stubs for unit tests across this crate's modules.

use async_trait::async_trait;

use memcore_providers::error::ProviderError;
use memcore_providers::{ChatProvider, ChatRequest, ChatResponse, EmbeddingProvider, InputType};

pub struct NoopChat;

#[async_trait]
impl ChatProvider for NoopChat {
    async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        Ok(ChatResponse { content: String::new(), tool_calls: vec![] })
    }
}

pub struct NoopEmbeddings;

#[async_trait]
impl EmbeddingProvider for NoopEmbeddings {
    async fn embed_batch(&self, inputs: &[String], _input_type: InputType) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(inputs.iter().map(|_| vec![0.0f32; 4]).collect())
    }
}
