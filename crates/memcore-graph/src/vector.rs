//! Cosine-similarity vector index over the `embeddings` table (spec §4.2).
//!
//! Deliberately a table scan: at the scale this store targets, an ANN
//! index buys nothing and costs a dependency, so every `search_similar`
//! call decodes candidate rows and ranks them in Rust — the same
//! load-then-rank shape as `mem0::cosine_similarity` and
//! `Rapheal7-My-Agent`'s `semantic_search`.

use rusqlite::Connection;

use crate::error::Result;
use crate::types::NodeType;

/// Encode a vector as raw little-endian f32 bytes (spec §3/§9 wire format).
pub fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    bytes
}

/// Decode raw little-endian f32 bytes back into a vector.
pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// `dot(a, b) / (‖a‖ · ‖b‖)`. A zero denominator (either vector all-zero)
/// yields score 0 rather than NaN (spec §4.2).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Filter applied to a vector search (spec §4.2).
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub node_type: Option<NodeType>,
    pub node_types: Option<Vec<NodeType>>,
    pub node_ids: Option<Vec<String>>,
}

impl VectorFilter {
    pub fn node_type(node_type: NodeType) -> Self {
        Self {
            node_type: Some(node_type),
            ..Default::default()
        }
    }

    pub fn node_types(node_types: Vec<NodeType>) -> Self {
        Self {
            node_types: Some(node_types),
            ..Default::default()
        }
    }
}

/// A scored hit from a vector search.
#[derive(Debug, Clone)]
pub struct ScoredNodeId {
    pub node_id: String,
    pub score: f32,
}

/// Cosine top-K over `embeddings`, excluding superseded nodes, filtered by
/// `filter` (spec §4.2).
pub fn search_similar(
    conn: &Connection,
    query_vec: &[f32],
    top_k: usize,
    filter: &VectorFilter,
) -> Result<Vec<ScoredNodeId>> {
    // Always exclude superseded nodes via a join against `nodes`.
    let mut sql = String::from(
        "SELECT e.node_id, e.vector FROM embeddings e
         JOIN nodes n ON n.id = e.node_id
         WHERE n.superseded_by IS NULL",
    );

    if let Some(nt) = &filter.node_type {
        sql.push_str(&format!(" AND e.node_type = '{}'", nt));
    }
    if let Some(nts) = &filter.node_types {
        if nts.is_empty() {
            // An empty explicit set matches nothing.
            return Ok(Vec::new());
        }
        let list = nts
            .iter()
            .map(|t| format!("'{}'", t))
            .collect::<Vec<_>>()
            .join(",");
        sql.push_str(&format!(" AND e.node_type IN ({})", list));
    }
    if let Some(ids) = &filter.node_ids {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let list = ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(",");
        sql.push_str(&format!(" AND e.node_id IN ({})", list));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        let node_id: String = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        Ok((node_id, blob))
    })?;

    let mut scored: Vec<ScoredNodeId> = Vec::new();
    for row in rows {
        let (node_id, blob) = row?;
        let vector = decode_vector(&blob);
        let score = cosine_similarity(query_vec, &vector);
        scored.push(ScoredNodeId { node_id, score });
    }

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_behaves() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 1.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn cosine_similarity_zero_vector_yields_zero() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn vector_roundtrips_through_bytes() {
        let v = vec![1.5f32, -2.25, 0.0, 100.125];
        let bytes = encode_vector(&v);
        let back = decode_vector(&bytes);
        assert_eq!(v, back);
    }
}
