//! Shared handles every pipeline stage needs: the graph store, the
//! embedding/chat providers, and the model name to send chat calls to.
//!
//! A small bag of `Arc`s handed to every tool and pipeline stage by
//! construction, never a global. A single concrete struct suffices here
//! because `memcore-pipeline` only ever talks to one graph store and one
//! pair of providers; the providers themselves stay trait objects so
//! tests can swap in stubs.

use std::sync::Arc;

use memcore_graph::vector::VectorFilter;
use memcore_graph::{GraphStore, Node};
use memcore_providers::{ChatProvider, EmbeddingProvider, InputType};

use crate::error::Result;

#[derive(Clone)]
pub struct PipelineContext {
    pub graph: Arc<GraphStore>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub chat: Arc<dyn ChatProvider>,
    pub chat_model: String,
}

impl PipelineContext {
    pub fn new(
        graph: Arc<GraphStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatProvider>,
        chat_model: impl Into<String>,
    ) -> Self {
        Self { graph, embeddings, chat, chat_model: chat_model.into() }
    }

    /// Embed a single query string (spec §6: `input_type: query`).
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self
            .embeddings
            .embed_batch(&[text.to_string()], InputType::Query)
            .await?;
        Ok(out.pop().unwrap_or_default())
    }
}

/// Cosine top-K over `filter`, resolved into live `(Node, score)` pairs.
/// Graph-store operations are non-suspending (spec §5), so this runs
/// synchronously on the calling task — no `spawn_blocking` needed.
pub fn vector_search_nodes(
    ctx: &PipelineContext,
    query_vec: &[f32],
    top_k: usize,
    filter: &VectorFilter,
) -> Result<Vec<(Node, f32)>> {
    let hits = ctx.graph.search_similar(query_vec, top_k, filter)?;
    let mut out = Vec::with_capacity(hits.len());
    for hit in hits {
        if let Some(node) = ctx.graph.get_node(&hit.node_id)? {
            out.push((node, hit.score));
        }
    }
    Ok(out)
}
