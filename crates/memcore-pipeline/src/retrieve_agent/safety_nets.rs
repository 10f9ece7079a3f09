//! Retrieval safety nets (spec §4.6) — three deterministic post-agent
//! queries whose results are synthesised as extra tool-result lines so
//! the assembler sees them exactly like real tool output.

use std::collections::HashMap;

use memcore_graph::vector::{cosine_similarity, VectorFilter};
use memcore_graph::NodeType;

use crate::context::{vector_search_nodes, PipelineContext};
use crate::error::Result;
use crate::format::format_node_line;

/// Cap on the top-instructions net after template dedup (spec §4.6).
pub const MAX_INSTRUCTIONS: usize = 15;
/// At most this many survivors per template-dedup key.
const TEMPLATE_MAX_PER_PATTERN: usize = 2;
/// Broad-search net width.
const BROAD_TOP_K: usize = 20;
/// Global-scope auto-inject cosine floor / injected-score floor.
const GLOBAL_COSINE_BAR: f32 = 0.15;
const GLOBAL_SCORE_FLOOR: f32 = 0.6;

/// First 15 space-separated tokens of `content`, each capital-initial
/// token collapsed to a run-deduped `_`, the rest lowercased (spec §4.6).
pub fn template_key(content: &str) -> String {
    let tokens: Vec<String> = content
        .split_whitespace()
        .take(15)
        .map(|t| {
            if t.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
                "_".to_string()
            } else {
                t.to_lowercase()
            }
        })
        .collect();

    let mut collapsed: Vec<String> = Vec::with_capacity(tokens.len());
    for t in tokens {
        if t == "_" && collapsed.last().map(|l| l == "_").unwrap_or(false) {
            continue;
        }
        collapsed.push(t);
    }
    collapsed.join(" ")
}

/// Net 1: cosine top-(MAX_INSTRUCTIONS×10) over instructions, deduped by
/// template key (at most 2 survivors per key), capped at MAX_INSTRUCTIONS.
pub fn top_instructions(ctx: &PipelineContext, query_vec: &[f32]) -> Result<Vec<String>> {
    let filter = VectorFilter::node_type(NodeType::Instruction);
    let hits = vector_search_nodes(ctx, query_vec, MAX_INSTRUCTIONS * 10, &filter)?;

    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut kept = Vec::new();
    for (node, score) in hits {
        let key = template_key(&node.content);
        let count = counts.entry(key).or_insert(0);
        if *count >= TEMPLATE_MAX_PER_PATTERN {
            continue;
        }
        *count += 1;
        kept.push(format_node_line(&node, Some(score)));
        if kept.len() >= MAX_INSTRUCTIONS {
            break;
        }
    }
    Ok(kept)
}

/// Net 2: cosine top-20 across every non-superseded node, no type filter.
pub fn broad_search(ctx: &PipelineContext, query_vec: &[f32]) -> Result<Vec<String>> {
    let hits = vector_search_nodes(ctx, query_vec, BROAD_TOP_K, &VectorFilter::default())?;
    Ok(hits.iter().map(|(n, s)| format_node_line(n, Some(*s))).collect())
}

/// Net 3: every instruction with scope ≥ 0.8 whose cosine similarity to
/// the query exceeds `GLOBAL_COSINE_BAR`, score clamped up to
/// `GLOBAL_SCORE_FLOOR` so it survives the assembler's sectioning.
pub fn global_scope_auto_inject(ctx: &PipelineContext, query_vec: &[f32]) -> Result<Vec<String>> {
    let globals = ctx.graph.global_instructions()?;
    let mut out = Vec::new();
    for node in globals {
        let Some(emb) = ctx.graph.get_embedding(&node.id)? else { continue };
        let score = cosine_similarity(query_vec, &emb.vector);
        if score > GLOBAL_COSINE_BAR {
            out.push(format_node_line(&node, Some(score.max(GLOBAL_SCORE_FLOOR))));
        }
    }
    Ok(out)
}

/// Run all three nets, in order, producing the lines the assembler will
/// append after the real agent-loop tool results (spec §5 ordering).
pub fn run_all(ctx: &PipelineContext, query_vec: &[f32]) -> Result<Vec<String>> {
    let mut lines = top_instructions(ctx, query_vec)?;
    lines.extend(broad_search(ctx, query_vec)?);
    lines.extend(global_scope_auto_inject(ctx, query_vec)?);
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_key_collapses_capitalised_runs() {
        let key = template_key("Monthly GSC reports must be sent to clients by the 5th of each month");
        assert_eq!(key, "_ reports must be sent to clients by the 5th of each month");
    }

    #[test]
    fn template_key_truncates_to_15_tokens() {
        let long = (0..30).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let key = template_key(&long);
        assert_eq!(key.split_whitespace().count(), 15);
    }
}
