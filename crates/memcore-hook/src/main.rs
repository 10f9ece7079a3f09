//! Thin stdin/stdout glue (spec §6): read one JSON turn off stdin, run it
//! through the orchestrator, print the hook envelope, always exit 0.
//!
//! Grounded on `skynet-gateway/src/main.rs`'s init shape (env-filtered
//! tracing, then config-load-with-fallback) but with the server loop
//! replaced by a single request/response pass, since this binary is
//! invoked once per turn by the host rather than run as a long-lived
//! process.

use std::io::Read;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use memcore_core::config::MemcoreConfig;
use memcore_graph::GraphStore;
use memcore_pipeline::orchestrator::{Orchestrator, TurnResult};
use memcore_providers::{HttpChatProvider, HttpEmbeddingProvider};

#[derive(Debug, Deserialize)]
struct HookInput {
    prompt: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct HookOutput {
    #[serde(rename = "hookSpecificOutput")]
    hook_specific_output: HookSpecificOutput,
}

#[derive(Debug, Serialize)]
struct HookSpecificOutput {
    #[serde(rename = "hookEventName")]
    hook_event_name: &'static str,
    #[serde(rename = "additionalContext")]
    additional_context: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "memcore_hook=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        error!(err = %e, "memcore-hook turn failed");
    }
}

async fn run() -> anyhow::Result<()> {
    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw)?;
    let input: HookInput = serde_json::from_str(&raw)?;

    let config_path = std::env::var("MEMCORE_CONFIG").ok();
    let config = match MemcoreConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            warn!(err = %e, "config load failed, skipping this turn");
            return Ok(());
        }
    };

    let graph = Arc::new(GraphStore::open(&config.graph.path)?);
    let embeddings = Arc::new(HttpEmbeddingProvider::new(
        config.providers.embedding.api_key.clone(),
        config.providers.embedding.base_url.clone(),
        config.providers.embedding.model.clone(),
        config.budget.max_retries,
        config.budget.retry_delay_ms,
    ));
    let chat = Arc::new(HttpChatProvider::new(
        config.providers.chat.api_key.clone(),
        config.providers.chat.base_url.clone(),
        config.budget.max_retries,
        config.budget.retry_delay_ms,
    ));

    let ctx = Arc::new(memcore_pipeline::PipelineContext::new(
        graph,
        embeddings,
        chat,
        config.providers.chat.model.clone(),
    ));
    let orchestrator = Orchestrator::new(ctx, config.conversation_state.path.clone());

    let result = orchestrator.handle_turn(&input.prompt, input.session_id.as_deref()).await?;
    if let Some(context) = render_context(&result) {
        let output = HookOutput {
            hook_specific_output: HookSpecificOutput {
                hook_event_name: "UserPromptSubmit",
                additional_context: context,
            },
        };
        println!("{}", serde_json::to_string(&output)?);
    }

    Ok(())
}

/// Wrap the best available context in a `<memory>` block, and append a
/// `<memory-action-needed>` block per unresolved contradiction so the host
/// can surface it to the user (spec §4.13). Returns `None` when there's
/// nothing to say — the hook then prints nothing at all.
fn render_context(result: &TurnResult) -> Option<String> {
    let context = result.best_context();
    let mut parts = Vec::new();
    if !context.trim().is_empty() {
        parts.push(format!("<memory>\n{context}\n</memory>"));
    }
    for c in &result.contradictions {
        parts.push(format!(
            "<memory-action-needed>\n{}\n(existing: {} | new: {})\n</memory-action-needed>",
            c.question, c.old_content, c.new_content
        ));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}
