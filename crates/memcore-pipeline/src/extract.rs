//! Instruction extractor (spec §4.9) — one chat call pulling standing
//! instructions/rules/processes out of the user's raw message.

use serde::{Deserialize, Serialize};

use memcore_providers::{ChatMessage, ChatProvider, ChatRequest};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedInstruction {
    pub content: String,
    pub subtype: String,
    pub scope: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ExtractorResponse {
    #[serde(default)]
    instructions: Vec<ExtractedInstruction>,
}

/// Run the extractor. Any parse failure yields an empty list rather than
/// propagating an error — a missed instruction is recoverable, a crashed
/// turn is not (spec §4.9/§7).
pub async fn extract_instructions(chat: &dyn ChatProvider, model: &str, prompt: &str) -> Vec<ExtractedInstruction> {
    let req = ChatRequest::new(
        model,
        vec![ChatMessage::system(crate::prompts::EXTRACTOR_SYSTEM), ChatMessage::user(prompt)],
    );
    let response = match chat.send(&req).await {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };
    parse_response(&response.content).unwrap_or_default().instructions
}

fn parse_response(raw: &str) -> Result<ExtractorResponse, serde_json::Error> {
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
    fn parses_instructions_array() {
        let raw = r#"{"instructions":[{"content":"Always cc finance","subtype":"rule","scope":1.0,"reason":"explicit rule"}]}"#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.instructions.len(), 1);
        assert_eq!(parsed.instructions[0].subtype, "rule");
    }

    #[test]
    fn malformed_json_yields_empty_via_default() {
        assert!(parse_response("not json").is_err());
    }
}
