pub mod chat;
pub mod embedding;
pub mod error;
pub mod retry;

pub use chat::{ChatMessage, ChatProvider, ChatRequest, ChatResponse, ChatRole, HttpChatProvider, ToolCall, ToolDefinition};
pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider, InputType};
pub use error::ProviderError;
