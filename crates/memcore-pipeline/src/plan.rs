//! Planner (Layer 1.5) — spec §4.4. One chat call, free-text output,
//! forwarded to the retrieve agent unparsed as "a search plan from
//! strategist" (the retrieve agent's user prompt, not a parsed structure).

use memcore_providers::{ChatMessage, ChatProvider, ChatRequest};

use crate::classify::ClassificationResult;

/// Summarize the classifier's output the way the planner's prompt expects
/// (entities, concepts, intents — spec §4.4).
fn summarize_classification(c: &ClassificationResult) -> String {
    let entities: Vec<&str> = c.entities.iter().map(|e| e.name.as_str()).collect();
    format!(
        "Entities: {}\nConcepts: {}\nIntents: {}",
        if entities.is_empty() { "none".to_string() } else { entities.join(", ") },
        if c.concepts.is_empty() { "none".to_string() } else { c.concepts.join(", ") },
        if c.intents.is_empty() { "none".to_string() } else { c.intents.join(", ") },
    )
}

/// Run the planner, returning its raw free-text plan.
pub async fn plan_search(
    chat: &dyn ChatProvider,
    model: &str,
    classification: &ClassificationResult,
    raw_query: &str,
) -> String {
    let user_prompt = format!(
        "{}\n\nRaw query: {}",
        summarize_classification(classification),
        raw_query
    );
    let req = ChatRequest::new(
        model,
        vec![ChatMessage::system(crate::prompts::PLANNER_SYSTEM), ChatMessage::user(user_prompt)],
    );
    match chat.send(&req).await {
        Ok(resp) => resp.content,
        Err(_) => String::new(),
    }
}

/// The message handed to the retrieve agent as its user prompt: raw
/// prompt text plus the planner's output, framed as coming from a
/// strategist (spec §4.4: "forwarded as a 'search plan from strategist'
/// message to the retrieve agent").
pub fn retrieve_agent_prompt(raw_prompt: &str, plan: &str) -> String {
    if plan.trim().is_empty() {
        raw_prompt.to_string()
    } else {
        format!("{raw_prompt}\n\n[Search plan from strategist]\n{plan}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifiedEntity;

    #[test]
    fn summarize_lists_entities_concepts_intents() {
        let c = ClassificationResult {
            entities: vec![ClassifiedEntity { name: "Peter".into(), entity_type: "person".into(), ambiguous: false }],
            concepts: vec!["pricing".into()],
            intents: vec!["information".into()],
            ..Default::default()
        };
        let summary = summarize_classification(&c);
        assert!(summary.contains("Peter"));
        assert!(summary.contains("pricing"));
        assert!(summary.contains("information"));
    }

    #[test]
    fn retrieve_agent_prompt_appends_plan() {
        let out = retrieve_agent_prompt("Who is Peter?", "SIMPLE FACT\nLook up Peter.\nsearch_entity");
        assert!(out.starts_with("Who is Peter?"));
        assert!(out.contains("search plan from strategist"));
    }
}
