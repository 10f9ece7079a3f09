//! Force-store net (spec §4.12) — deterministic coverage check run after
//! the store agent loop finishes. Any instruction/store-filter candidate
//! not covered by a real `store_memory`/`supersede_memory` call in the
//! turn log gets written directly, linked to any entity harvested from
//! the loop's `search_entity` calls.

use std::sync::Arc;

use tracing::warn;

use memcore_graph::{edge_type, Node, NodeType, Source};
use memcore_providers::InputType;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::extract::ExtractedInstruction;
use crate::format::parse_result_line;
use crate::store_filter::StoreItem;
use crate::tools::store_tools::normalize_type;
use crate::tools::tool_loop::AgentTurn;

/// Prefix length used for the coverage substring check (spec §4.12/§9 Open
/// Question decision #2 — implemented exactly as specified, over/under
/// matching accepted).
const COVERAGE_PREFIX_LEN: usize = 30;

fn coverage_key(content: &str) -> String {
    content.chars().take(COVERAGE_PREFIX_LEN).collect::<String>().to_lowercase()
}

fn is_covered(content: &str, turns: &[AgentTurn]) -> bool {
    let key = coverage_key(content);
    if key.trim().is_empty() {
        return false;
    }
    turns.iter().any(|t| {
        if t.tool_name != "store_memory" && t.tool_name != "supersede_memory" {
            return false;
        }
        let arg_content = t
            .arguments
            .get("content")
            .and_then(|v| v.as_str())
            .or_else(|| t.arguments.get("new_content").and_then(|v| v.as_str()))
            .unwrap_or("");
        let arg_key = coverage_key(arg_content);
        !arg_key.is_empty() && (key.contains(&arg_key) || arg_key.contains(&key))
    })
}

fn parse_entity_line(line: &str) -> Option<(String, String)> {
    let start = line.find("] ")? + 2;
    let rest = &line[start..];
    let end = rest.find(" (id:")?;
    let name = rest[..end].trim().to_lowercase();
    let (id, _) = parse_result_line(line)?;
    Some((name, id))
}

fn harvest_entities(turns: &[AgentTurn]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for t in turns {
        if t.tool_name != "search_entity" || t.result.is_error {
            continue;
        }
        out.extend(t.result.content.lines().filter_map(parse_entity_line));
    }
    out
}

async fn link_matching_entities(
    ctx: &PipelineContext,
    node_id: &str,
    content: &str,
    edge_kind: &str,
    entities: &[(String, String)],
) -> Result<()> {
    let lower = content.to_lowercase();
    for (name, entity_id) in entities {
        if !name.is_empty() && lower.contains(name.as_str()) {
            ctx.graph.create_edge(node_id, entity_id, edge_kind, serde_json::json!({}))?;
        }
    }
    Ok(())
}

async fn force_write_instruction(
    ctx: &Arc<PipelineContext>,
    instr: &ExtractedInstruction,
    entities: &[(String, String)],
) -> Result<String> {
    let mut node = Node::new(NodeType::Instruction, instr.content.clone(), Source::User);
    node.subtype = Some(instr.subtype.clone());
    node.scope = Some(instr.scope);
    let node = ctx.graph.create_node(node)?;

    link_matching_entities(ctx, &node.id, &instr.content, edge_type::HAS_INSTRUCTION, entities).await?;

    let mut vecs = ctx.embeddings.embed_batch(&[node.content.clone()], InputType::Document).await?;
    let vec = vecs.pop().unwrap_or_default();
    ctx.graph.insert_embedding(&node.id, node.node_type, &vec)?;
    Ok(node.id)
}

async fn force_write_item(
    ctx: &Arc<PipelineContext>,
    item: &StoreItem,
    entities: &[(String, String)],
) -> Result<String> {
    let (node_type, subtype) = normalize_type(&item.item_type, item.subtype.as_deref()).unwrap_or_else(|| {
        warn!(item_type = %item.item_type, "force-store: unknown type, defaulting to fact");
        (NodeType::Fact, item.subtype.clone())
    });

    let mut node = Node::new(node_type, item.content.clone(), Source::User);
    node.subtype = subtype;
    if let Some(scope) = item.scope {
        node.scope = Some(scope);
    }
    if let Some(salience) = item.salience {
        node.salience = salience;
    }
    if let Some(valid_from) = &item.valid_from {
        node.valid_from = Some(valid_from.clone());
    }
    let node = ctx.graph.create_node(node)?;

    link_matching_entities(ctx, &node.id, &item.content, edge_type::ABOUT, entities).await?;

    let mut vecs = ctx.embeddings.embed_batch(&[node.content.clone()], InputType::Document).await?;
    let vec = vecs.pop().unwrap_or_default();
    ctx.graph.insert_embedding(&node.id, node.node_type, &vec)?;
    Ok(node.id)
}

/// Run the force-store net, returning the ids of every node it had to
/// write directly (anything the agent already covered is left alone).
pub async fn force_store(
    ctx: &Arc<PipelineContext>,
    turns: &[AgentTurn],
    instructions: &[ExtractedInstruction],
    store_items: &[StoreItem],
) -> Result<Vec<String>> {
    let entities = harvest_entities(turns);
    let mut forced_ids = Vec::new();

    for instr in instructions {
        if is_covered(&instr.content, turns) {
            continue;
        }
        forced_ids.push(force_write_instruction(ctx, instr, &entities).await?);
    }
    for item in store_items {
        if is_covered(&item.content, turns) {
            continue;
        }
        forced_ids.push(force_write_item(ctx, item, &entities).await?);
    }
    Ok(forced_ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(tool_name: &str, content: &str, arg_key: &str, arg_value: &str) -> AgentTurn {
        AgentTurn {
            tool_name: tool_name.to_string(),
            arguments: serde_json::json!({arg_key: arg_value}),
            result: crate::tools::ToolResult::success(content.to_string()),
            reasoning: String::new(),
        }
    }

    #[test]
    fn coverage_check_matches_either_direction_prefix() {
        let turns = vec![turn(
            "store_memory",
            "ok",
            "content",
            "Clients must be cc'd on every monthly GSC report going forward",
        )];
        assert!(is_covered("Clients must be cc'd on every monthly GSC report", &turns));
        assert!(!is_covered("Completely unrelated statement about pricing", &turns));
    }

    #[test]
    fn harvests_entity_ids_from_search_entity_turns() {
        let turns = vec![turn(
            "search_entity",
            "[entity/person] Dave Park (id: e-42, salience: 1) [score: 0.9000]",
            "name",
            "Dave",
        )];
        let entities = harvest_entities(&turns);
        assert_eq!(entities, vec![("dave park".to_string(), "e-42".to_string())]);
    }
}
