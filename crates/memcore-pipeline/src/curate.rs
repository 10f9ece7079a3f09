//! Curator (spec §4.8) — five parallel chat calls, one per assembled
//! section, each trimming its section down to only the lines that answer
//! the query. If every section comes back empty the raw assembled context
//! is used instead (spec §7).

use futures_util::future::join_all;

use memcore_providers::{ChatMessage, ChatProvider, ChatRequest};

use crate::assemble::Sections;

/// Sentinel the curator prompt asks for when nothing in a section is
/// relevant (spec §4.8/§9 — prompt-coupled, kept as a named constant).
pub const NO_RELEVANT_RECORDS: &str = "NO_RELEVANT_RECORDS";

async fn curate_section(
    chat: &dyn ChatProvider,
    model: &str,
    heading: &str,
    content: &str,
    query: &str,
) -> Option<String> {
    let user_prompt = format!("Section: {heading}\n\n{content}\n\nUser query: {query}");
    let req = ChatRequest::new(
        model,
        vec![ChatMessage::system(crate::prompts::CURATOR_SYSTEM), ChatMessage::user(user_prompt)],
    );
    let response = match chat.send(&req).await {
        Ok(r) => r,
        Err(_) => return None,
    };
    let trimmed = response.content.trim();
    if trimmed.is_empty() || trimmed == NO_RELEVANT_RECORDS {
        None
    } else {
        Some(format!("{heading}\n{trimmed}"))
    }
}

/// Curate every present section in parallel, concatenating survivors in
/// section order. Falls back to the raw assembled context if nothing
/// survives curation.
pub async fn curate(chat: &dyn ChatProvider, model: &str, sections: &Sections, query: &str) -> String {
    let candidates: Vec<(&str, &Option<String>)> = vec![
        ("People & things", &sections.entities),
        ("Instructions", &sections.instructions),
        ("Facts", &sections.facts),
        ("Events", &sections.events),
        ("Upcoming plans", &sections.plans),
    ];

    let futures = candidates.iter().filter_map(|(heading, content)| {
        content.as_ref().map(|c| curate_section(chat, model, heading, c, query))
    });
    let curated: Vec<Option<String>> = join_all(futures).await;
    let survivors: Vec<String> = curated.into_iter().flatten().collect();

    if survivors.is_empty() {
        sections.flatten()
    } else {
        survivors.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memcore_providers::error::ProviderError;
    use memcore_providers::ChatResponse;

    struct StubChat(&'static str);

    #[async_trait]
    impl ChatProvider for StubChat {
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse { content: self.0.to_string(), tool_calls: vec![] })
        }
    }

    #[tokio::test]
    async fn falls_back_to_raw_when_every_section_is_empty() {
        let chat = StubChat(NO_RELEVANT_RECORDS);
        let sections = Sections { facts: Some("fact line".into()), ..Default::default() };
        let out = curate(&chat, "test-model", &sections, "who?").await;
        assert_eq!(out, sections.flatten());
    }

    #[tokio::test]
    async fn keeps_curated_text_when_present() {
        let chat = StubChat("Dave handles Brightwell (id: x, salience: 1)");
        let sections = Sections { facts: Some("fact line".into()), ..Default::default() };
        let out = curate(&chat, "test-model", &sections, "who handles Brightwell?").await;
        assert!(out.contains("Dave handles Brightwell"));
        assert!(out.starts_with("Facts"));
    }
}
