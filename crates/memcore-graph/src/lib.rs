pub mod db;
pub mod error;
pub mod stemmer;
pub mod store;
pub mod types;
pub mod vector;

pub use error::GraphError;
pub use store::GraphStore;
pub use types::{
    edge_type, subtype, Edge, Embedding, Node, NodeType, Relationship, Source,
};
pub use vector::{ScoredNodeId, VectorFilter};
