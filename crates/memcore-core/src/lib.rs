pub mod config;
pub mod error;
pub mod types;

pub use config::MemcoreConfig;
pub use error::CoreError;
pub use types::{EdgeId, NodeId, SessionId};
