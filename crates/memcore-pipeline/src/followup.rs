//! Follow-up short-circuit (spec §4.14) — when recent conversation state
//! exists, a single chat call resolves pronouns/references against up to
//! five prior turns and proposes a minimal, fixed retrieve/store plan,
//! bypassing the full classify → plan → agent cascade. Invalid JSON from
//! the analyzer means "no plan" — the orchestrator falls back to the full
//! pipeline in that case.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use memcore_graph::vector::VectorFilter;
use memcore_graph::NodeType;
use memcore_providers::{ChatMessage, ChatProvider, ChatRequest};

use crate::context::{vector_search_nodes, PipelineContext};
use crate::conversation_state::Turn;
use crate::error::Result;
use crate::format::format_node_line;
use crate::tools::retrieve_tools::retrieve_tools;
use crate::tools::Tool;

/// Cosine floor for the gap-filling broadening search over node-type
/// buckets no explicit tool call touched (spec §4.14).
const GAP_FILL_THRESHOLD: f32 = 0.25;
const GAP_FILL_TOP_K: usize = 10;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolvedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrieveCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FollowupPlan {
    #[serde(default)]
    pub resolved_entities: Vec<ResolvedEntity>,
    pub retrieval_needed: bool,
    #[serde(default)]
    pub retrieve_calls: Vec<RetrieveCall>,
    pub storage_needed: bool,
    #[serde(default)]
    pub resolved_prompt: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

fn render_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| {
            format!(
                "Prompt: {}\nEntities: {}\nSummary: {}",
                t.prompt,
                if t.entities.is_empty() { "none".to_string() } else { t.entities.join(", ") },
                t.context_summary.as_deref().unwrap_or("none"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    trimmed.to_string()
}

/// Run the single-call analyzer. Returns `None` on invalid JSON (spec
/// §4.14: the orchestrator falls back to the full pipeline in that case).
pub async fn analyze(
    chat: &dyn ChatProvider,
    model: &str,
    recent_turns: &[Turn],
    new_prompt: &str,
) -> Option<FollowupPlan> {
    let user_prompt =
        format!("Recent turns:\n{}\n\nNew prompt: {new_prompt}", render_turns(recent_turns));
    let req = ChatRequest::new(
        model,
        vec![ChatMessage::system(crate::prompts::FOLLOWUP_SYSTEM), ChatMessage::user(user_prompt)],
    );
    let response = chat.send(&req).await.ok()?;
    serde_json::from_str(&strip_code_fences(&response.content)).ok()
}

/// Node-type buckets a given retrieve-tool call is known to cover. Used
/// only to decide what the gap-filling broad search still needs to sweep
/// (spec §4.14) — `get_relationships` isn't mapped because the far nodes'
/// types aren't known up front.
fn node_types_for_tool(tool: &str) -> &'static [NodeType] {
    match tool {
        "search_entity" => &[NodeType::Entity],
        "search_facts" => &[NodeType::Fact, NodeType::Opinion],
        "search_events" => &[NodeType::Event],
        "search_processes" | "get_instructions" => &[NodeType::Instruction],
        _ => &[],
    }
}

const ALL_BUCKETS: [NodeType; 6] = [
    NodeType::Entity,
    NodeType::Fact,
    NodeType::Opinion,
    NodeType::Event,
    NodeType::Plan,
    NodeType::Instruction,
];

/// Execute the fixed plan: resolved-entity lookups, then the model's own
/// retrieve calls, then a gap-filling broad search over any of the six
/// node-type buckets none of those calls touched. Context is the
/// concatenation of the kept tool results — no curation step (spec §4.14).
pub async fn run_retrieval(ctx: &Arc<PipelineContext>, plan: &FollowupPlan, raw_query: &str) -> Result<String> {
    let tools = retrieve_tools(Arc::clone(ctx));
    let mut lines: Vec<String> = Vec::new();
    let mut touched: HashSet<NodeType> = HashSet::new();

    let mut seen_entities: HashSet<String> = HashSet::new();
    for entity in &plan.resolved_entities {
        if !seen_entities.insert(entity.name.to_lowercase()) {
            continue;
        }
        if let Some(tool) = tools.iter().find(|t| t.name() == "search_entity") {
            let result = tool.execute(serde_json::json!({"name": entity.name})).await;
            if !result.is_error {
                lines.extend(result.content.lines().map(|l| l.to_string()));
            }
        }
        touched.insert(NodeType::Entity);
    }

    for call in &plan.retrieve_calls {
        if call.tool == "done" {
            continue;
        }
        if let Some(tool) = tools.iter().find(|t| t.name() == call.tool) {
            let result = tool.execute(call.args.clone()).await;
            if !result.is_error {
                lines.extend(result.content.lines().map(|l| l.to_string()));
            }
            touched.extend(node_types_for_tool(&call.tool));
        }
    }

    let uncovered: Vec<NodeType> = ALL_BUCKETS.into_iter().filter(|t| !touched.contains(t)).collect();
    if !uncovered.is_empty() {
        let query_vec = ctx.embed_query(raw_query).await?;
        let filter = VectorFilter::node_types(uncovered);
        let hits = vector_search_nodes(ctx, &query_vec, GAP_FILL_TOP_K, &filter)?;
        for (node, score) in hits {
            if score >= GAP_FILL_THRESHOLD {
                lines.push(format_node_line(&node, Some(score)));
            }
        }
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memcore_graph::{GraphStore, Node, Source};
    use memcore_providers::error::ProviderError;
    use memcore_providers::ChatResponse;
    use rusqlite::Connection;

    fn store() -> GraphStore {
        GraphStore::from_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    struct StubChat(&'static str);

    #[async_trait]
    impl ChatProvider for StubChat {
        async fn send(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            Ok(ChatResponse { content: self.0.to_string(), tool_calls: vec![] })
        }
    }

    #[tokio::test]
    async fn invalid_json_yields_none() {
        let chat = StubChat("not json at all");
        let plan = analyze(&chat, "test-model", &[], "what about him?").await;
        assert!(plan.is_none());
    }

    #[tokio::test]
    async fn valid_json_parses_into_plan() {
        let raw = r#"{"resolved_entities":[{"name":"Peter","type":"person"}],"retrieval_needed":true,"retrieve_calls":[{"tool":"search_facts","args":{"entity_id":"e1"}}],"storage_needed":false,"resolved_prompt":"What is Peter's title?","reasoning":"pronoun resolution"}"#;
        let chat = StubChat(raw);
        let plan = analyze(&chat, "test-model", &[], "what is his title?").await.unwrap();
        assert_eq!(plan.resolved_entities[0].name, "Peter");
        assert!(plan.retrieval_needed);
        assert!(!plan.storage_needed);
    }

    #[test]
    fn node_types_for_tool_maps_known_tools() {
        assert_eq!(node_types_for_tool("search_entity"), &[NodeType::Entity]);
        assert!(node_types_for_tool("get_relationships").is_empty());
    }

    #[tokio::test]
    async fn run_retrieval_gap_fills_uncovered_buckets() {
        let graph = store();
        let entity = graph.create_node(Node::new(NodeType::Entity, "Peter", Source::User)).unwrap();
        graph.insert_embedding(&entity.id, NodeType::Entity, &[1.0, 0.0]).unwrap();

        let ctx = Arc::new(PipelineContext::new(
            Arc::new(graph),
            Arc::new(crate::test_support::NoopEmbeddings),
            Arc::new(crate::test_support::NoopChat),
            "test-model",
        ));
        let plan = FollowupPlan {
            resolved_entities: vec![],
            retrieval_needed: true,
            retrieve_calls: vec![],
            storage_needed: false,
            resolved_prompt: None,
            reasoning: String::new(),
        };
        // NoopEmbeddings returns an all-zero vector, so cosine similarity is
        // always 0 here — this just exercises that the gap-fill path runs
        // over every bucket without panicking when nothing is touched yet.
        let context = run_retrieval(&ctx, &plan, "Peter").await.unwrap();
        assert!(context.is_empty() || context.contains("Peter"));
    }
}
