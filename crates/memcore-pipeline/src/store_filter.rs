//! Store filter (spec §4.10) — one chat call, informed by what the
//! extractor already claimed, identifying the remaining facts/events/
//! opinions/plans worth writing.

use serde::{Deserialize, Serialize};

use memcore_providers::{ChatMessage, ChatProvider, ChatRequest};

use crate::extract::ExtractedInstruction;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreItem {
    pub content: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub valid_from: Option<String>,
    #[serde(default)]
    pub scope: Option<f64>,
    #[serde(default)]
    pub salience: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFilterResponse {
    #[serde(default)]
    store_items: Vec<StoreItem>,
    #[serde(default)]
    #[allow(dead_code)]
    skip_reason: Option<String>,
}

fn summarize_instructions(already_extracted: &[ExtractedInstruction]) -> String {
    if already_extracted.is_empty() {
        "none".to_string()
    } else {
        already_extracted.iter().map(|i| i.content.as_str()).collect::<Vec<_>>().join("; ")
    }
}

/// Run the store filter. Any `instruction`-typed item surviving in the
/// response is dropped at merge time — the extractor is authoritative for
/// instructions (spec §4.10).
pub async fn filter_store_items(
    chat: &dyn ChatProvider,
    model: &str,
    prompt: &str,
    classification_summary: &str,
    already_extracted: &[ExtractedInstruction],
) -> Vec<StoreItem> {
    let user_prompt = format!(
        "User message: {prompt}\n\nClassifier summary:\n{classification_summary}\n\nInstructions already extracted (do not duplicate): {}",
        summarize_instructions(already_extracted)
    );
    let req = ChatRequest::new(
        model,
        vec![ChatMessage::system(crate::prompts::STORE_FILTER_SYSTEM), ChatMessage::user(user_prompt)],
    );
    let response = match chat.send(&req).await {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };

    let parsed: StoreFilterResponse = parse_response(&response.content).unwrap_or_default();
    parsed
        .store_items
        .into_iter()
        .filter(|item| item.item_type != "instruction")
        .collect()
}

fn parse_response(raw: &str) -> Result<StoreFilterResponse, serde_json::Error> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    serde_json::from_str(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_store_items() {
        let raw = r#"{"store_items":[{"content":"Prefers tea","type":"opinion","reason":"stated preference"}]}"#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.store_items.len(), 1);
        assert_eq!(parsed.store_items[0].item_type, "opinion");
    }

    #[test]
    fn instruction_typed_items_are_dropped_by_caller() {
        let raw = r#"{"store_items":[{"content":"x","type":"instruction","reason":"dup"},{"content":"y","type":"fact","reason":"ok"}]}"#;
        let parsed: StoreFilterResponse = parse_response(raw).unwrap();
        let kept: Vec<_> = parsed.store_items.into_iter().filter(|i| i.item_type != "instruction").collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].content, "y");
    }
}
