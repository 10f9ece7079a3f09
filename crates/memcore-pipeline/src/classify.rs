//! Classifier (Layer 1) — spec §4.3.

use std::collections::HashSet;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use memcore_providers::{ChatMessage, ChatProvider, ChatRequest};

use crate::sentence::split_sentences;

const STOPWORDS: &[&str] = &[
    "The", "A", "An", "And", "Or", "But", "In", "On", "At", "To", "For", "Of", "With", "Is", "Are",
    "Was", "Were", "I", "You", "We", "They",
];

/// Below this word count, an empty-but-valid classification is taken at
/// face value instead of triggering the deterministic fallback — short
/// prompts ("ok", "thanks") legitimately carry nothing to extract.
const FALLBACK_MIN_TOKENS: usize = 4;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub ambiguous: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Operations {
    #[serde(default)]
    pub retrieve: bool,
    #[serde(default)]
    pub store: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(default)]
    pub entities: Vec<ClassifiedEntity>,
    #[serde(default)]
    pub implied_facts: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub plans: Vec<String>,
    #[serde(default)]
    pub opinions: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub implied_processes: Vec<String>,
    #[serde(default)]
    pub intents: Vec<String>,
    #[serde(default)]
    pub operations: Operations,
}

impl ClassificationResult {
    fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.implied_facts.is_empty()
            && self.events.is_empty()
            && self.plans.is_empty()
            && self.opinions.is_empty()
            && self.concepts.is_empty()
            && self.implied_processes.is_empty()
    }

    fn merge(mut self, other: ClassificationResult) -> Self {
        let mut seen: HashSet<String> =
            self.entities.iter().map(|e| e.name.to_lowercase()).collect();
        for e in other.entities {
            let key = e.name.to_lowercase();
            if seen.insert(key) {
                self.entities.push(e);
            }
        }
        self.implied_facts.extend(other.implied_facts);
        self.events.extend(other.events);
        self.plans.extend(other.plans);
        self.opinions.extend(other.opinions);
        self.implied_processes.extend(other.implied_processes);

        for c in other.concepts {
            if !self.concepts.contains(&c) {
                self.concepts.push(c);
            }
        }
        for i in other.intents {
            if !self.intents.contains(&i) {
                self.intents.push(i);
            }
        }

        self.operations.retrieve |= other.operations.retrieve;
        self.operations.store |= other.operations.store;
        self
    }
}

/// Classify `prompt`, fanning one chat call out per sentence (spec §4.3/§5).
pub async fn classify(chat: &dyn ChatProvider, model: &str, prompt: &str) -> ClassificationResult {
    let sentences = split_sentences(prompt);
    if sentences.is_empty() {
        return fallback(prompt);
    }

    let calls = sentences
        .iter()
        .map(|sentence| classify_sentence(chat, model, sentence, prompt));
    let results = join_all(calls).await;

    let merged = results
        .into_iter()
        .flatten()
        .fold(ClassificationResult::default(), ClassificationResult::merge);

    let token_count = prompt.split_whitespace().count();
    if merged.is_empty() && token_count >= FALLBACK_MIN_TOKENS {
        debug!("classifier produced an empty-but-valid result on a non-trivial prompt, falling back");
        return fallback(prompt);
    }

    merged
}

async fn classify_sentence(
    chat: &dyn ChatProvider,
    model: &str,
    sentence: &str,
    full_message: &str,
) -> Option<ClassificationResult> {
    let user_prompt = format!(
        "Sentence to classify: {sentence}\n\nFull message (for pronoun resolution only): {full_message}"
    );

    for attempt in 0..2 {
        let temperature = if attempt == 0 { None } else { Some(0.7) };
        let mut req = ChatRequest::new(
            model,
            vec![ChatMessage::system(crate::prompts::CLASSIFIER_SYSTEM), ChatMessage::user(&user_prompt)],
        );
        req.temperature = temperature;

        let response = match chat.send(&req).await {
            Ok(r) => r,
            Err(e) => {
                warn!(err = %e, "classifier chat call failed");
                continue;
            }
        };

        match parse_classification(&response.content) {
            Ok(result) => return Some(result),
            Err(e) => {
                warn!(attempt, err = %e, "classifier JSON parse failed, retrying");
            }
        }
    }

    None
}

fn parse_classification(raw: &str) -> Result<ClassificationResult, serde_json::Error> {
    let stripped = strip_code_fences(raw);
    serde_json::from_str(&stripped)
}

fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim_end_matches("```").trim().to_string()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim_end_matches("```").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Deterministic fallback when every classify attempt fails, or succeeds
/// with an empty result on a non-trivial prompt (spec §4.3).
fn fallback(prompt: &str) -> ClassificationResult {
    let entities = prompt
        .split_whitespace()
        .filter(|w| {
            w.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
                && !STOPWORDS.contains(w)
        })
        .map(|w| {
            let cleaned = w.trim_matches(|c: char| !c.is_alphanumeric());
            ClassifiedEntity { name: cleaned.to_string(), entity_type: "concept".to_string(), ambiguous: true }
        })
        .filter(|e| !e.name.is_empty())
        .collect();

    ClassificationResult {
        entities,
        implied_facts: vec![prompt.to_string()],
        intents: vec!["information".to_string()],
        operations: Operations { retrieve: true, store: true },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fences_removes_json_fence() {
        let raw = "```json\n{\"entities\":[]}\n```";
        assert_eq!(strip_code_fences(raw), "{\"entities\":[]}");
    }

    #[test]
    fn merge_dedupes_entities_case_insensitively() {
        let a = ClassificationResult {
            entities: vec![ClassifiedEntity { name: "Peter".into(), entity_type: "person".into(), ambiguous: false }],
            ..Default::default()
        };
        let b = ClassificationResult {
            entities: vec![ClassifiedEntity { name: "peter".into(), entity_type: "person".into(), ambiguous: false }],
            ..Default::default()
        };
        let merged = a.merge(b);
        assert_eq!(merged.entities.len(), 1);
    }

    #[test]
    fn fallback_extracts_capitalised_tokens() {
        let result = fallback("Peter works at WOBS in London.");
        assert!(result.entities.iter().any(|e| e.name.contains("Peter")));
        assert!(result.operations.retrieve);
        assert!(result.operations.store);
    }
}
