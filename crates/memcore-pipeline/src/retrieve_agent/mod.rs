//! Retrieve agent (L2-R) — spec §4.5/§4.6: runs the bounded tool loop over
//! the retrieval tool vocabulary, then always runs the three deterministic
//! safety nets, and hands the assembler every result line in order (real
//! tool results first, safety nets appended after — spec §5).

pub mod safety_nets;

use std::sync::Arc;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::tools::retrieve_tools::retrieve_tools;
use crate::tools::tool_loop::run_tool_loop;

/// Every result line the assembler will scan, in encounter order: one per
/// non-`done` tool-result turn (may itself be multi-line), followed by the
/// three safety nets' synthesised lines.
pub struct RetrieveOutcome {
    pub lines: Vec<String>,
}

pub async fn run_retrieve(ctx: &Arc<PipelineContext>, raw_query: &str, agent_prompt: &str) -> Result<RetrieveOutcome> {
    let tools = retrieve_tools(Arc::clone(ctx));
    let outcome = run_tool_loop(
        ctx.chat.as_ref(),
        &ctx.chat_model,
        crate::prompts::RETRIEVE_AGENT_SYSTEM,
        agent_prompt,
        &tools,
    )
    .await;

    let mut lines = Vec::new();
    for turn in &outcome.turns {
        if turn.tool_name == "done" || turn.result.is_error {
            continue;
        }
        lines.extend(turn.result.content.lines().map(|l| l.to_string()));
    }

    let query_vec = ctx.embed_query(raw_query).await?;
    lines.extend(safety_nets::run_all(ctx, &query_vec)?);

    Ok(RetrieveOutcome { lines })
}
