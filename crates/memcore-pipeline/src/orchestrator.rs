//! Top-level per-turn orchestration (spec §2 "Data flow per turn").
//!
//! One entry point per turn: loads prior state, decides what to run, and
//! persists state back before returning. The orchestrator picks between
//! the follow-up short-circuit and the full retrieve/store pipeline, and
//! the retrieve and store halves of the full pipeline run concurrently.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::assemble::{self};
use crate::classify::{self, ClassificationResult};
use crate::context::PipelineContext;
use crate::conversation_state::{ConversationState, Turn};
use crate::curate;
use crate::error::Result;
use crate::extract;
use crate::followup;
use crate::plan;
use crate::reconcile::{self, Contradiction};
use crate::retrieve_agent;
use crate::store_agent;
use crate::store_filter;

/// Chars of the final context kept as the next turn's context summary —
/// the ring holds only a short snippet, not the whole rendered context
/// (spec §3 "weak references").
const CONTEXT_SUMMARY_CHARS: usize = 300;

pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    state_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    pub context: String,
    pub curated_context: String,
    pub stored_ids: Vec<String>,
    pub contradictions: Vec<Contradiction>,
}

impl TurnResult {
    /// Prefer curated context when present, per spec §4.8.
    pub fn best_context(&self) -> &str {
        if self.curated_context.trim().is_empty() {
            &self.context
        } else {
            &self.curated_context
        }
    }
}

impl Orchestrator {
    pub fn new(ctx: Arc<PipelineContext>, state_path: impl Into<String>) -> Self {
        Self { ctx, state_path: state_path.into() }
    }

    /// Run one full turn: decide follow-up vs. full pipeline, run it,
    /// reconcile any new instructions, then persist conversation state.
    pub async fn handle_turn(&self, prompt: &str, session_id: Option<&str>) -> Result<TurnResult> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut state = ConversationState::load(&self.state_path).unwrap_or_default();
        let session_matches = match (&state.session_id, session_id) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };

        let result = if session_matches && !state.turns.is_empty() {
            match self.run_followup(prompt, &state.turns).await? {
                Some(result) => result,
                None => {
                    warn!("follow-up analyzer returned invalid JSON, falling back to full pipeline");
                    self.run_full_pipeline(prompt, &today).await?
                }
            }
        } else {
            self.run_full_pipeline(prompt, &today).await?
        };

        state.record_turn(
            session_id,
            Turn {
                prompt: prompt.to_string(),
                entities: extract_entity_names(&result),
                context_summary: summarize(&result),
                timestamp: Utc::now(),
            },
        );
        if let Err(e) = state.save(&self.state_path) {
            warn!(err = %e, "failed to persist conversation state");
        }

        Ok(result)
    }

    async fn run_followup(&self, prompt: &str, turns: &[Turn]) -> Result<Option<TurnResult>> {
        let Some(plan) = followup::analyze(self.ctx.chat.as_ref(), &self.ctx.chat_model, turns, prompt).await
        else {
            return Ok(None);
        };

        let context = if plan.retrieval_needed {
            followup::run_retrieval(&self.ctx, &plan, prompt).await?
        } else {
            String::new()
        };

        let (stored_ids, contradictions) = if plan.storage_needed {
            let canonical = plan.resolved_prompt.clone().unwrap_or_else(|| prompt.to_string());
            self.run_store_chain(&canonical, "(follow-up turn: no classifier summary)").await?
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(Some(TurnResult { context, curated_context: String::new(), stored_ids, contradictions }))
    }

    async fn run_full_pipeline(&self, prompt: &str, today: &str) -> Result<TurnResult> {
        let classification = classify::classify(self.ctx.chat.as_ref(), &self.ctx.chat_model, prompt).await;
        let retrieve = classification.operations.retrieve;
        let store = classification.operations.store;
        let summary = summarize_classification(&classification);

        let retrieve_fut = async {
            if retrieve {
                self.run_retrieve_chain(prompt, &classification, today).await
            } else {
                Ok((String::new(), String::new()))
            }
        };
        let store_fut = async {
            if store {
                self.run_store_chain(prompt, &summary).await
            } else {
                Ok((Vec::new(), Vec::new()))
            }
        };

        let (retrieve_res, store_res) = tokio::join!(retrieve_fut, store_fut);
        let (context, curated_context) = retrieve_res?;
        let (stored_ids, contradictions) = store_res?;

        Ok(TurnResult { context, curated_context, stored_ids, contradictions })
    }

    async fn run_retrieve_chain(
        &self,
        prompt: &str,
        classification: &ClassificationResult,
        today: &str,
    ) -> Result<(String, String)> {
        let search_plan = plan::plan_search(self.ctx.chat.as_ref(), &self.ctx.chat_model, classification, prompt).await;
        let agent_prompt = plan::retrieve_agent_prompt(prompt, &search_plan);
        let outcome = retrieve_agent::run_retrieve(&self.ctx, prompt, &agent_prompt).await?;

        let sections = assemble::assemble(&self.ctx, &outcome.lines, today)?;
        let raw_context = sections.flatten();
        if sections.is_empty() {
            return Ok((raw_context, String::new()));
        }
        let curated = curate::curate(self.ctx.chat.as_ref(), &self.ctx.chat_model, &sections, prompt).await;
        Ok((raw_context, curated))
    }

    /// Run extractor → store filter → store agent → reconciler (spec §5's
    /// "K → L → M" chain plus the post-storage reconciliation step).
    async fn run_store_chain(&self, prompt: &str, classification_summary: &str) -> Result<(Vec<String>, Vec<Contradiction>)> {
        let instructions = extract::extract_instructions(self.ctx.chat.as_ref(), &self.ctx.chat_model, prompt).await;
        let store_items = store_filter::filter_store_items(
            self.ctx.chat.as_ref(),
            &self.ctx.chat_model,
            prompt,
            classification_summary,
            &instructions,
        )
        .await;

        let outcome = store_agent::run_store(&self.ctx, prompt, &instructions, &store_items).await?;

        let contradictions = if outcome.stored_ids.is_empty() {
            Vec::new()
        } else {
            reconcile::reconcile_all(&self.ctx, &outcome.stored_ids).await?.contradictions
        };

        Ok((outcome.stored_ids, contradictions))
    }
}

fn summarize_classification(c: &ClassificationResult) -> String {
    let entities: Vec<&str> = c.entities.iter().map(|e| e.name.as_str()).collect();
    format!(
        "entities: {} | intents: {} | concepts: {}",
        if entities.is_empty() { "none".to_string() } else { entities.join(", ") },
        if c.intents.is_empty() { "none".to_string() } else { c.intents.join(", ") },
        if c.concepts.is_empty() { "none".to_string() } else { c.concepts.join(", ") },
    )
}

/// Best-effort extraction of entity names out of the rendered context, for
/// the next turn's weak-reference ring (spec §3: "entity names as
/// strings", not ids).
fn extract_entity_names(result: &TurnResult) -> Vec<String> {
    result
        .best_context()
        .lines()
        .filter_map(|l| l.strip_prefix("[entity"))
        .filter_map(|rest| {
            let start = rest.find("] ")? + 2;
            let rest = &rest[start..];
            let end = rest.find(" (id:")?;
            Some(rest[..end].trim().to_string())
        })
        .collect()
}

fn summarize(result: &TurnResult) -> Option<String> {
    let text = result.best_context();
    if text.trim().is_empty() {
        None
    } else {
        Some(text.chars().take(CONTEXT_SUMMARY_CHARS).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_context_prefers_curated() {
        let result = TurnResult {
            context: "raw".into(),
            curated_context: "curated".into(),
            ..Default::default()
        };
        assert_eq!(result.best_context(), "curated");
    }

    #[test]
    fn best_context_falls_back_to_raw_when_curated_is_blank() {
        let result = TurnResult { context: "raw".into(), curated_context: "   ".into(), ..Default::default() };
        assert_eq!(result.best_context(), "raw");
    }

    #[test]
    fn extract_entity_names_pulls_names_out_of_entity_lines() {
        let result = TurnResult {
            context: "[entity/person] Peter Quill (id: e1, salience: 1) [score: 0.9]\nFacts\n[fact] x (id: f1, salience: 1)".into(),
            ..Default::default()
        };
        let names = extract_entity_names(&result);
        assert_eq!(names, vec!["Peter Quill".to_string()]);
    }

    #[test]
    fn summarize_returns_none_for_empty_context() {
        let result = TurnResult::default();
        assert!(summarize(&result).is_none());
    }
}
