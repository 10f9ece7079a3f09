//! Retrieval tool vocabulary for the L2-R agent loop (spec §4.5):
//! `search_entity`, `get_relationships`, `search_facts`, `search_events`,
//! `search_processes`, `get_instructions`, `done`.
//!
//! Each tool is a struct holding an `Arc<PipelineContext>` — construct
//! with the shared context, dispatch through the `Tool` trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use memcore_graph::vector::VectorFilter;
use memcore_graph::NodeType;

use crate::context::{vector_search_nodes, PipelineContext};
use crate::format::format_node_line;

use super::{Tool, ToolResult};

const ENTITY_TOP_K: usize = 5;
const FACT_TOP_K: usize = 10;
const EVENT_TOP_K: usize = 10;

fn process_subtypes() -> [&'static str; 2] {
    [memcore_graph::subtype::TOOL_USAGE, memcore_graph::subtype::PROCESS]
}

pub struct SearchEntityTool {
    ctx: Arc<PipelineContext>,
}

impl SearchEntityTool {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for SearchEntityTool {
    fn name(&self) -> &str {
        "search_entity"
    }
    fn description(&self) -> &str {
        "Look up an entity (person, org, project, tool, place, document, concept, or account) \
         by name. Returns the closest matching entity nodes with their ids."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"name": {"type": "string", "description": "Entity name to look up"}},
            "required": ["name"]
        })
    }
    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let name = match input.get("name").and_then(|v| v.as_str()) {
            Some(n) if !n.trim().is_empty() => n.trim(),
            _ => return ToolResult::error("missing required parameter: name"),
        };
        let query_vec = match self.ctx.embed_query(name).await {
            Ok(v) => v,
            Err(e) => return ToolResult::error(format!("embedding failed: {e}")),
        };
        let filter = VectorFilter::node_type(NodeType::Entity);
        match vector_search_nodes(&self.ctx, &query_vec, ENTITY_TOP_K, &filter) {
            Ok(hits) if hits.is_empty() => ToolResult::success(format!("No entities found matching: {name}")),
            Ok(hits) => {
                let lines: Vec<String> = hits.iter().map(|(n, s)| format_node_line(n, Some(*s))).collect();
                ToolResult::success(lines.join("\n"))
            }
            Err(e) => ToolResult::error(format!("search_entity failed: {e}")),
        }
    }
}

pub struct GetRelationshipsTool {
    ctx: Arc<PipelineContext>,
}

impl GetRelationshipsTool {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for GetRelationshipsTool {
    fn name(&self) -> &str {
        "get_relationships"
    }
    fn description(&self) -> &str {
        "Get every edge touching an entity (role, employer, manages, client-of, etc.) along \
         with the node at the other end."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"entity_id": {"type": "string"}},
            "required": ["entity_id"]
        })
    }
    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let entity_id = match input.get("entity_id").and_then(|v| v.as_str()) {
            Some(id) if !id.trim().is_empty() => id.trim(),
            _ => return ToolResult::error("missing required parameter: entity_id"),
        };
        match self.ctx.graph.relationships(entity_id) {
            Ok(rels) if rels.is_empty() => ToolResult::success("No relationships found"),
            Ok(rels) => {
                let lines: Vec<String> = rels
                    .iter()
                    .map(|r| format!("{} — via {}", format_node_line(&r.far_node, None), r.edge.edge_type))
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            Err(e) => ToolResult::error(format!("get_relationships failed: {e}")),
        }
    }
}

pub struct SearchFactsTool {
    ctx: Arc<PipelineContext>,
}

impl SearchFactsTool {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for SearchFactsTool {
    fn name(&self) -> &str {
        "search_facts"
    }
    fn description(&self) -> &str {
        "Search facts and opinions. Pass entity_id to list everything known about one entity, \
         or omit it to search by semantic similarity to `query`."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "entity_id": {"type": "string"}
            },
            "required": ["query"]
        })
    }
    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let query = input.get("query").and_then(|v| v.as_str()).unwrap_or_default();
        let entity_id = input.get("entity_id").and_then(|v| v.as_str());

        if let Some(entity_id) = entity_id.filter(|s| !s.trim().is_empty()) {
            return match self.ctx.graph.facts_by_entity(entity_id) {
                Ok(nodes) if nodes.is_empty() => ToolResult::success("No facts found for that entity"),
                Ok(nodes) => {
                    let lines: Vec<String> = nodes.iter().map(|n| format_node_line(n, None)).collect();
                    ToolResult::success(lines.join("\n"))
                }
                Err(e) => ToolResult::error(format!("search_facts failed: {e}")),
            };
        }

        if query.trim().is_empty() {
            return ToolResult::error("missing required parameter: query (or entity_id)");
        }
        let query_vec = match self.ctx.embed_query(query).await {
            Ok(v) => v,
            Err(e) => return ToolResult::error(format!("embedding failed: {e}")),
        };
        let filter = VectorFilter::node_types(vec![NodeType::Fact, NodeType::Opinion]);
        match vector_search_nodes(&self.ctx, &query_vec, FACT_TOP_K, &filter) {
            Ok(hits) if hits.is_empty() => ToolResult::success(format!("No facts found matching: {query}")),
            Ok(hits) => {
                let lines: Vec<String> = hits.iter().map(|(n, s)| format_node_line(n, Some(*s))).collect();
                ToolResult::success(lines.join("\n"))
            }
            Err(e) => ToolResult::error(format!("search_facts failed: {e}")),
        }
    }
}

pub struct SearchEventsTool {
    ctx: Arc<PipelineContext>,
}

impl SearchEventsTool {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for SearchEventsTool {
    fn name(&self) -> &str {
        "search_events"
    }
    fn description(&self) -> &str {
        "Search events (actions, incidents, conversations, outcomes). Pass entity_id to list \
         events tied to one entity, or omit it to search by semantic similarity to `query`. \
         `days` optionally restricts to recent activity."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "entity_id": {"type": "string"},
                "days": {"type": "integer"}
            },
            "required": ["query"]
        })
    }
    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let query = input.get("query").and_then(|v| v.as_str()).unwrap_or_default();
        let entity_id = input.get("entity_id").and_then(|v| v.as_str());
        let days = input.get("days").and_then(|v| v.as_i64());

        if let Some(entity_id) = entity_id.filter(|s| !s.trim().is_empty()) {
            return match self.ctx.graph.events_by_entity(entity_id, days) {
                Ok(nodes) if nodes.is_empty() => ToolResult::success("No events found for that entity"),
                Ok(nodes) => {
                    let lines: Vec<String> = nodes.iter().map(|n| format_node_line(n, None)).collect();
                    ToolResult::success(lines.join("\n"))
                }
                Err(e) => ToolResult::error(format!("search_events failed: {e}")),
            };
        }

        if query.trim().is_empty() {
            return ToolResult::error("missing required parameter: query (or entity_id)");
        }
        let query_vec = match self.ctx.embed_query(query).await {
            Ok(v) => v,
            Err(e) => return ToolResult::error(format!("embedding failed: {e}")),
        };
        let filter = VectorFilter::node_type(NodeType::Event);
        let hits = match vector_search_nodes(&self.ctx, &query_vec, EVENT_TOP_K, &filter) {
            Ok(h) => h,
            Err(e) => return ToolResult::error(format!("search_events failed: {e}")),
        };
        let hits: Vec<_> = match days {
            Some(d) => {
                let cutoff = Utc::now() - Duration::days(d);
                hits.into_iter()
                    .filter(|(n, _)| {
                        chrono::DateTime::parse_from_rfc3339(&n.created_at)
                            .map(|t| t.with_timezone(&Utc) >= cutoff)
                            .unwrap_or(true)
                    })
                    .collect()
            }
            None => hits,
        };
        if hits.is_empty() {
            return ToolResult::success(format!("No events found matching: {query}"));
        }
        let lines: Vec<String> = hits.iter().map(|(n, s)| format_node_line(n, Some(*s))).collect();
        ToolResult::success(lines.join("\n"))
    }
}

pub struct SearchProcessesTool {
    ctx: Arc<PipelineContext>,
}

impl SearchProcessesTool {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for SearchProcessesTool {
    fn name(&self) -> &str {
        "search_processes"
    }
    fn description(&self) -> &str {
        "Search standing processes and tool-usage instructions (a narrower slice of \
         get_instructions restricted to how-to-do-X rules rather than plain rules)."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "entity_id": {"type": "string"}
            },
            "required": ["query"]
        })
    }
    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let query = input.get("query").and_then(|v| v.as_str()).unwrap_or_default();
        let entity_id = input.get("entity_id").and_then(|v| v.as_str());
        let subtypes = process_subtypes();

        let result = if let Some(entity_id) = entity_id.filter(|s| !s.trim().is_empty()) {
            self.ctx.graph.instructions_by_entity(entity_id)
        } else {
            self.ctx.graph.instructions(Some(query))
        };

        match result {
            Ok(nodes) => {
                let filtered: Vec<_> = nodes
                    .into_iter()
                    .filter(|n| n.subtype.as_deref().map(|st| subtypes.contains(&st)).unwrap_or(false))
                    .collect();
                if filtered.is_empty() {
                    ToolResult::success("No matching processes found")
                } else {
                    let lines: Vec<String> = filtered.iter().map(|n| format_node_line(n, None)).collect();
                    ToolResult::success(lines.join("\n"))
                }
            }
            Err(e) => ToolResult::error(format!("search_processes failed: {e}")),
        }
    }
}

pub struct GetInstructionsTool {
    ctx: Arc<PipelineContext>,
}

impl GetInstructionsTool {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for GetInstructionsTool {
    fn name(&self) -> &str {
        "get_instructions"
    }
    fn description(&self) -> &str {
        "Look up standing instructions. Pass entity_id for rules scoped to one entity, topic \
         for a keyword-stemmed match, or neither for everything, ranked by scope."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "topic": {"type": "string"},
                "entity_id": {"type": "string"}
            }
        })
    }
    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let topic = input.get("topic").and_then(|v| v.as_str());
        let entity_id = input.get("entity_id").and_then(|v| v.as_str());

        let result = if let Some(entity_id) = entity_id.filter(|s| !s.trim().is_empty()) {
            self.ctx.graph.instructions_by_entity(entity_id)
        } else {
            self.ctx.graph.instructions(topic.filter(|s| !s.trim().is_empty()))
        };

        match result {
            Ok(nodes) if nodes.is_empty() => ToolResult::success("No instructions found"),
            Ok(nodes) => {
                let lines: Vec<String> = nodes.iter().map(|n| format_node_line(n, None)).collect();
                ToolResult::success(lines.join("\n"))
            }
            Err(e) => ToolResult::error(format!("get_instructions failed: {e}")),
        }
    }
}

/// `done()` — present only so the model sees it in the tool list;
/// `run_tool_loop` intercepts calls to it before dispatch ever runs.
pub struct RetrieveDoneTool;

#[async_trait]
impl Tool for RetrieveDoneTool {
    fn name(&self) -> &str {
        "done"
    }
    fn description(&self) -> &str {
        "Call this once you have gathered everything relevant. Ends the search."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        ToolResult::success("done")
    }
}

/// Build the fixed retrieval tool vocabulary (spec §4.5).
pub fn retrieve_tools(ctx: Arc<PipelineContext>) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(SearchEntityTool::new(Arc::clone(&ctx))),
        Box::new(GetRelationshipsTool::new(Arc::clone(&ctx))),
        Box::new(SearchFactsTool::new(Arc::clone(&ctx))),
        Box::new(SearchEventsTool::new(Arc::clone(&ctx))),
        Box::new(SearchProcessesTool::new(Arc::clone(&ctx))),
        Box::new(GetInstructionsTool::new(ctx)),
        Box::new(RetrieveDoneTool),
    ]
}
