//! Store agent (L2-S) — spec §4.11: runs the bounded tool loop over the
//! storage tool vocabulary, then always runs the force-store net.

pub mod force_store;

use std::sync::Arc;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::extract::ExtractedInstruction;
use crate::format::parse_result_line;
use crate::store_filter::StoreItem;
use crate::tools::store_tools::store_tools;
use crate::tools::tool_loop::run_tool_loop;

#[derive(Debug, Clone, Default)]
pub struct StoreOutcome {
    /// Every node id created or superseded this turn, whether by the
    /// agent itself or by the force-store net — consumed by the
    /// reconciler (spec §4.13), which only cares about instructions.
    pub stored_ids: Vec<String>,
}

fn build_store_prompt(prompt: &str, instructions: &[ExtractedInstruction], store_items: &[StoreItem]) -> String {
    let mut sections = vec![format!("User message: {prompt}")];

    if !instructions.is_empty() {
        let lines: Vec<String> = instructions
            .iter()
            .map(|i| format!("- [{}] {} (scope: {})", i.subtype, i.content, i.scope))
            .collect();
        sections.push(format!("Instructions to store:\n{}", lines.join("\n")));
    }
    if !store_items.is_empty() {
        let lines: Vec<String> = store_items
            .iter()
            .map(|i| format!("- [{}] {}", i.item_type, i.content))
            .collect();
        sections.push(format!("Other items to store:\n{}", lines.join("\n")));
    }

    sections.join("\n\n")
}

/// Run the store agent loop, then sweep with the force-store net so
/// nothing the model was told to write is silently dropped.
pub async fn run_store(
    ctx: &Arc<PipelineContext>,
    prompt: &str,
    instructions: &[ExtractedInstruction],
    store_items: &[StoreItem],
) -> Result<StoreOutcome> {
    let tools = store_tools(Arc::clone(ctx));
    let store_prompt = build_store_prompt(prompt, instructions, store_items);

    let outcome = run_tool_loop(
        ctx.chat.as_ref(),
        &ctx.chat_model,
        crate::prompts::STORE_AGENT_SYSTEM,
        &store_prompt,
        &tools,
    )
    .await;

    let mut stored_ids: Vec<String> = outcome
        .turns
        .iter()
        .filter(|t| (t.tool_name == "store_memory" || t.tool_name == "supersede_memory") && !t.result.is_error)
        .filter_map(|t| parse_result_line(&t.result.content).map(|(id, _)| id))
        .collect();

    let forced = force_store::force_store(ctx, &outcome.turns, instructions, store_items).await?;
    stored_ids.extend(forced);

    Ok(StoreOutcome { stored_ids })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_store_prompt_lists_instructions_and_items() {
        let instr = vec![ExtractedInstruction {
            content: "Always cc finance".into(),
            subtype: "rule".into(),
            scope: 1.0,
            reason: "explicit rule".into(),
        }];
        let items = vec![crate::store_filter::StoreItem {
            content: "Prefers tea".into(),
            item_type: "opinion".into(),
            subtype: None,
            reason: "stated preference".into(),
            valid_from: None,
            scope: None,
            salience: None,
        }];
        let prompt = build_store_prompt("Always cc finance on reports. I prefer tea.", &instr, &items);
        assert!(prompt.contains("Always cc finance"));
        assert!(prompt.contains("Prefers tea"));
    }
}
