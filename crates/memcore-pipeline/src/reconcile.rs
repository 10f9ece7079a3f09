//! Reconciler (spec §4.13) — runs once per newly written instruction.
//! Embeds the new content, takes the cosine top-10 over existing
//! instructions, and asks the model to classify each close candidate as
//! `NO_CONFLICT`, `SUPERSEDES`, or `CONTRADICTION`. Supersessions are
//! applied immediately via `GraphStore::supersede_with_existing`;
//! contradictions are collected as an advisory question rather than acted
//! on automatically.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use memcore_graph::vector::VectorFilter;
use memcore_graph::{Node, NodeType};
use memcore_providers::{ChatMessage, ChatProvider, ChatRequest, InputType};

use crate::context::{vector_search_nodes, PipelineContext};
use crate::error::Result;

pub const RECONCILE_TOP_K: usize = 10;
/// Candidates below this cosine score aren't worth a model call (spec §9).
pub const RECONCILE_COSINE_THRESHOLD: f32 = 0.45;

#[derive(Debug, Clone)]
pub struct Contradiction {
    pub new_id: String,
    pub new_content: String,
    pub old_id: String,
    pub old_content: String,
    pub question: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub superseded: Vec<(String, String)>,
    pub contradictions: Vec<Contradiction>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    id: String,
    verdict: String,
}

#[derive(Debug, Deserialize, Default)]
struct ReconcilerResponse {
    #[serde(default)]
    results: Vec<Verdict>,
    #[serde(default)]
    question: Option<String>,
}

fn parse_response(raw: &str) -> Result<ReconcilerResponse, serde_json::Error> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    serde_json::from_str(trimmed)
}

fn numbered_candidates(candidates: &[(Node, f32)]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, (n, _))| format!("{}. (id: {}) {}", i + 1, n.id, n.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reconcile one node. Non-instructions return immediately with an empty
/// outcome — the reconciler only ever runs on instructions (spec §4.13).
pub async fn reconcile_instruction(ctx: &Arc<PipelineContext>, new_id: &str) -> Result<ReconcileOutcome> {
    let mut outcome = ReconcileOutcome::default();

    let Some(new_node) = ctx.graph.get_node(new_id)? else {
        return Ok(outcome);
    };
    if new_node.node_type != NodeType::Instruction {
        return Ok(outcome);
    }

    let mut vecs = ctx.embeddings.embed_batch(&[new_node.content.clone()], InputType::Document).await?;
    let query_vec = vecs.pop().unwrap_or_default();

    let filter = VectorFilter::node_type(NodeType::Instruction);
    let hits = vector_search_nodes(ctx, &query_vec, RECONCILE_TOP_K, &filter)?;

    let candidates: Vec<(Node, f32)> = hits
        .into_iter()
        .filter(|(n, score)| n.id != new_node.id && n.superseded_by.is_none() && *score >= RECONCILE_COSINE_THRESHOLD)
        .collect();
    if candidates.is_empty() {
        return Ok(outcome);
    }

    let user_prompt = format!(
        "New instruction: {}\n\nCandidates:\n{}",
        new_node.content,
        numbered_candidates(&candidates)
    );
    let req = ChatRequest::new(
        &ctx.chat_model,
        vec![ChatMessage::system(crate::prompts::RECONCILER_SYSTEM), ChatMessage::user(user_prompt)],
    );
    let response = match ctx.chat.send(&req).await {
        Ok(r) => r,
        Err(e) => {
            warn!(err = %e, "reconciler chat call failed, leaving candidates unreconciled");
            return Ok(outcome);
        }
    };

    let parsed: ReconcilerResponse = match parse_response(&response.content) {
        Ok(p) => p,
        Err(e) => {
            warn!(err = %e, "reconciler JSON parse failed, leaving candidates unreconciled");
            return Ok(outcome);
        }
    };

    let candidates_by_id: HashMap<String, Node> =
        candidates.into_iter().map(|(n, _)| (n.id.clone(), n)).collect();

    for verdict in parsed.results {
        let Some(old) = candidates_by_id.get(&verdict.id) else { continue };
        if old.superseded_by.is_some() {
            continue;
        }
        match verdict.verdict.as_str() {
            "SUPERSEDES" => {
                if ctx.graph.supersede_with_existing(&old.id, &new_node.id).is_ok() {
                    outcome.superseded.push((old.id.clone(), new_node.id.clone()));
                }
            }
            "CONTRADICTION" => {
                outcome.contradictions.push(Contradiction {
                    new_id: new_node.id.clone(),
                    new_content: new_node.content.clone(),
                    old_id: old.id.clone(),
                    old_content: old.content.clone(),
                    question: parsed.question.clone().unwrap_or_default(),
                });
            }
            _ => {}
        }
    }

    Ok(outcome)
}

/// Reconcile every id the store agent produced this turn. Non-instruction
/// ids are cheap no-ops (spec §4.13).
pub async fn reconcile_all(ctx: &Arc<PipelineContext>, new_ids: &[String]) -> Result<ReconcileOutcome> {
    let mut outcome = ReconcileOutcome::default();
    for id in new_ids {
        let r = reconcile_instruction(ctx, id).await?;
        outcome.superseded.extend(r.superseded);
        outcome.contradictions.extend(r.contradictions);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memcore_graph::{GraphStore, Source};
    use memcore_providers::error::ProviderError;
    use memcore_providers::{ChatResponse, EmbeddingProvider};
    use rusqlite::Connection;

    fn store() -> GraphStore {
        GraphStore::from_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    struct FixedEmbeddings(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbeddings {
        async fn embed_batch(&self, inputs: &[String], _input_type: InputType) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            Ok(inputs.iter().map(|_| self.0.clone()).collect())
        }
    }

    struct StubChat(&'static str);

    #[async_trait]
    impl ChatProvider for StubChat {
        async fn send(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            Ok(ChatResponse { content: self.0.to_string(), tool_calls: vec![] })
        }
    }

    #[tokio::test]
    async fn non_instruction_node_is_a_no_op() {
        let graph = Arc::new(store());
        let node = graph.create_node(Node::new(NodeType::Fact, "Bob likes tea", Source::User)).unwrap();
        let ctx = Arc::new(PipelineContext::new(
            graph,
            Arc::new(FixedEmbeddings(vec![1.0, 0.0])),
            Arc::new(StubChat(r#"{"results":[],"question":null}"#)),
            "test-model",
        ));
        let outcome = reconcile_instruction(&ctx, &node.id).await.unwrap();
        assert!(outcome.superseded.is_empty());
        assert!(outcome.contradictions.is_empty());
    }

    #[tokio::test]
    async fn no_close_candidates_skips_chat_call() {
        let graph = store();
        let old = graph
            .create_node(Node::new(NodeType::Instruction, "Reply formally", Source::User))
            .unwrap();
        graph.insert_embedding(&old.id, NodeType::Instruction, &[0.0, 1.0]).unwrap();
        let new = graph
            .create_node(Node::new(NodeType::Instruction, "Always use dark mode", Source::User))
            .unwrap();

        let ctx = Arc::new(PipelineContext::new(
            Arc::new(graph),
            Arc::new(FixedEmbeddings(vec![1.0, 0.0])),
            Arc::new(StubChat("should not be called")),
            "test-model",
        ));
        let outcome = reconcile_instruction(&ctx, &new.id).await.unwrap();
        assert!(outcome.superseded.is_empty());
    }

    #[tokio::test]
    async fn supersedes_verdict_applies_supersession() {
        let graph = store();
        let old = graph
            .create_node(Node::new(NodeType::Instruction, "Reply in a formal tone", Source::User))
            .unwrap();
        graph.insert_embedding(&old.id, NodeType::Instruction, &[1.0, 0.0]).unwrap();
        let new = graph
            .create_node(Node::new(NodeType::Instruction, "Reply in a casual tone", Source::User))
            .unwrap();

        let verdict = format!(
            r#"{{"results":[{{"id":"{}","verdict":"SUPERSEDES","reason":"tone changed"}}],"question":null}}"#,
            old.id
        );
        let ctx = Arc::new(PipelineContext::new(
            Arc::new(graph),
            Arc::new(FixedEmbeddings(vec![1.0, 0.0])),
            Arc::new(StubChat(Box::leak(verdict.into_boxed_str()))),
            "test-model",
        ));
        let outcome = reconcile_instruction(&ctx, &new.id).await.unwrap();
        assert_eq!(outcome.superseded, vec![(old.id.clone(), new.id.clone())]);

        let refreshed = ctx.graph.get_node(&old.id).unwrap().unwrap();
        assert_eq!(refreshed.superseded_by.as_deref(), Some(new.id.as_str()));
    }

    #[tokio::test]
    async fn contradiction_verdict_is_collected_not_applied() {
        let graph = store();
        let old = graph
            .create_node(Node::new(NodeType::Instruction, "Never contact the client directly", Source::User))
            .unwrap();
        graph.insert_embedding(&old.id, NodeType::Instruction, &[1.0, 0.0]).unwrap();
        let new = graph
            .create_node(Node::new(NodeType::Instruction, "Always contact the client directly", Source::User))
            .unwrap();

        let verdict = format!(
            r#"{{"results":[{{"id":"{}","verdict":"CONTRADICTION","reason":"direct conflict"}}],"question":"Should I contact the client directly or not?"}}"#,
            old.id
        );
        let ctx = Arc::new(PipelineContext::new(
            Arc::new(graph),
            Arc::new(FixedEmbeddings(vec![1.0, 0.0])),
            Arc::new(StubChat(Box::leak(verdict.into_boxed_str()))),
            "test-model",
        ));
        let outcome = reconcile_instruction(&ctx, &new.id).await.unwrap();
        assert!(outcome.superseded.is_empty());
        assert_eq!(outcome.contradictions.len(), 1);
        assert_eq!(outcome.contradictions[0].old_id, old.id);

        let refreshed = ctx.graph.get_node(&old.id).unwrap().unwrap();
        assert!(refreshed.superseded_by.is_none());
    }
}
