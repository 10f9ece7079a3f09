//! Storage tool vocabulary for the L2-S agent loop (spec §4.11):
//! `search_entity`, `search_facts` (shared with retrieval — same tools,
//! same struct), `store_memory`, `supersede_memory`, `done(stored_count)`.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use memcore_graph::{edge_type, Node, NodeType, Source};
use memcore_providers::InputType;

use crate::context::PipelineContext;

use super::{Tool, ToolResult};

/// Normalize the model's `type` (and optional `subtype`) into the actual
/// `NodeType` + subtype to store, per the dispatch shim in spec §4.11:
/// `tool_usage`/`process` become `instruction` with that subtype,
/// `preference` becomes `opinion`, `rule` becomes `instruction/rule`.
pub(crate) fn normalize_type(type_str: &str, subtype: Option<&str>) -> Option<(NodeType, Option<String>)> {
    match type_str {
        "tool_usage" | "process" => Some((NodeType::Instruction, Some(type_str.to_string()))),
        "preference" => Some((NodeType::Opinion, Some(subtype.unwrap_or("user_opinion").to_string()))),
        "rule" => Some((NodeType::Instruction, Some("rule".to_string()))),
        other => NodeType::from_str(other).ok().map(|nt| (nt, subtype.map(str::to_string))),
    }
}

pub struct StoreMemoryTool {
    ctx: Arc<PipelineContext>,
}

impl StoreMemoryTool {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for StoreMemoryTool {
    fn name(&self) -> &str {
        "store_memory"
    }
    fn description(&self) -> &str {
        "Write a new node to the memory graph (entity, fact, event, opinion, instruction, or \
         plan), linking it to any named entities. Use supersede_memory instead if this replaces \
         an existing fact rather than adding a new one."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "type": {"type": "string", "enum": ["entity", "fact", "event", "opinion", "instruction", "plan", "rule", "tool_usage", "process", "preference"]},
                "subtype": {"type": "string"},
                "content": {"type": "string"},
                "entity_ids": {"type": "array", "items": {"type": "string"}},
                "edge_type": {"type": "string"},
                "salience": {"type": "number"},
                "source": {"type": "string", "enum": ["user", "assistant"]},
                "scope": {"type": "number"},
                "related_ids": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["type", "content"]
        })
    }
    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let type_str = match input.get("type").and_then(|v| v.as_str()) {
            Some(t) => t,
            None => return ToolResult::error("missing required parameter: type"),
        };
        let content = match input.get("content").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c.trim().to_string(),
            _ => return ToolResult::error("missing required parameter: content"),
        };
        let subtype_in = input.get("subtype").and_then(|v| v.as_str());
        let (node_type, subtype) = match normalize_type(type_str, subtype_in) {
            Some(v) => v,
            None => return ToolResult::error(format!("unknown type: {type_str}")),
        };

        let source = input
            .get("source")
            .and_then(|v| v.as_str())
            .and_then(|s| Source::from_str(s).ok())
            .unwrap_or(Source::User);

        let mut node = Node::new(node_type, content, source);
        node.subtype = subtype;
        if let Some(salience) = input.get("salience").and_then(|v| v.as_f64()) {
            node.salience = salience;
        }
        if let Some(scope) = input.get("scope").and_then(|v| v.as_f64()) {
            node.scope = Some(scope);
        }

        let node = match self.ctx.graph.create_node(node) {
            Ok(n) => n,
            Err(e) => return ToolResult::error(format!("store_memory failed: {e}")),
        };

        let edge_kind = input.get("edge_type").and_then(|v| v.as_str()).unwrap_or(edge_type::ABOUT);
        if let Some(entity_ids) = input.get("entity_ids").and_then(|v| v.as_array()) {
            for id in entity_ids.iter().filter_map(|v| v.as_str()) {
                if let Err(e) = self.ctx.graph.create_edge(&node.id, id, edge_kind, serde_json::json!({})) {
                    return ToolResult::error(format!("store_memory: failed linking entity {id}: {e}"));
                }
            }
        }
        if let Some(related_ids) = input.get("related_ids").and_then(|v| v.as_array()) {
            for id in related_ids.iter().filter_map(|v| v.as_str()) {
                if let Err(e) = self.ctx.graph.create_edge(&node.id, id, edge_type::SEE_ALSO, serde_json::json!({})) {
                    return ToolResult::error(format!("store_memory: failed linking related {id}: {e}"));
                }
            }
        }

        match self.ctx.embeddings.embed_batch(&[node.content.clone()], InputType::Document).await {
            Ok(mut vecs) => {
                let vec = vecs.pop().unwrap_or_default();
                if let Err(e) = self.ctx.graph.insert_embedding(&node.id, node.node_type, &vec) {
                    return ToolResult::error(format!("store_memory: embedding insert failed: {e}"));
                }
            }
            Err(e) => return ToolResult::error(format!("store_memory: embedding failed: {e}")),
        }

        ToolResult::success(format!("Stored {} node (id: {})", node.node_type, node.id))
    }
}

pub struct SupersedeMemoryTool {
    ctx: Arc<PipelineContext>,
}

impl SupersedeMemoryTool {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for SupersedeMemoryTool {
    fn name(&self) -> &str {
        "supersede_memory"
    }
    fn description(&self) -> &str {
        "Replace an existing node's content with corrected information. The old node stays \
         queryable for audit but is excluded from normal reads; use this for corrections \
         instead of store_memory."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "old_id": {"type": "string"},
                "new_content": {"type": "string"}
            },
            "required": ["old_id", "new_content"]
        })
    }
    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let old_id = match input.get("old_id").and_then(|v| v.as_str()) {
            Some(id) if !id.trim().is_empty() => id.trim(),
            _ => return ToolResult::error("missing required parameter: old_id"),
        };
        let new_content = match input.get("new_content").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c.trim().to_string(),
            _ => return ToolResult::error("missing required parameter: new_content"),
        };

        let new_node = match self.ctx.graph.supersede_node(old_id, new_content) {
            Ok(n) => n,
            Err(e) => return ToolResult::error(format!("supersede_memory failed: {e}")),
        };

        match self.ctx.embeddings.embed_batch(&[new_node.content.clone()], InputType::Document).await {
            Ok(mut vecs) => {
                let vec = vecs.pop().unwrap_or_default();
                if let Err(e) = self.ctx.graph.insert_embedding(&new_node.id, new_node.node_type, &vec) {
                    return ToolResult::error(format!("supersede_memory: embedding insert failed: {e}"));
                }
            }
            Err(e) => return ToolResult::error(format!("supersede_memory: embedding failed: {e}")),
        }

        ToolResult::success(format!("Superseded {} with new node (id: {})", old_id, new_node.id))
    }
}

/// `done(stored_count)` — present for the tool list; `run_tool_loop`
/// intercepts calls to it before dispatch runs.
pub struct StoreDoneTool;

#[async_trait]
impl Tool for StoreDoneTool {
    fn name(&self) -> &str {
        "done"
    }
    fn description(&self) -> &str {
        "Call once everything has been written, reporting how many nodes were stored."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"stored_count": {"type": "integer"}}
        })
    }
    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        ToolResult::success("done")
    }
}

/// Build the fixed storage tool vocabulary (spec §4.11).
pub fn store_tools(ctx: Arc<PipelineContext>) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(super::retrieve_tools::SearchEntityTool::new(Arc::clone(&ctx))),
        Box::new(super::retrieve_tools::SearchFactsTool::new(Arc::clone(&ctx))),
        Box::new(StoreMemoryTool::new(Arc::clone(&ctx))),
        Box::new(SupersedeMemoryTool::new(Arc::clone(&ctx))),
        Box::new(StoreDoneTool),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_type_applies_dispatch_shim() {
        let (nt, st) = normalize_type("tool_usage", None).unwrap();
        assert_eq!(nt, NodeType::Instruction);
        assert_eq!(st.as_deref(), Some("tool_usage"));

        let (nt, st) = normalize_type("preference", None).unwrap();
        assert_eq!(nt, NodeType::Opinion);
        assert_eq!(st.as_deref(), Some("user_opinion"));

        let (nt, st) = normalize_type("rule", None).unwrap();
        assert_eq!(nt, NodeType::Instruction);
        assert_eq!(st.as_deref(), Some("rule"));
    }

    #[test]
    fn normalize_type_passes_through_known_types() {
        let (nt, st) = normalize_type("fact", Some("definitional")).unwrap();
        assert_eq!(nt, NodeType::Fact);
        assert_eq!(st.as_deref(), Some("definitional"));
    }

    #[test]
    fn normalize_type_rejects_unknown() {
        assert!(normalize_type("nonsense", None).is_none());
    }
}
