//! Conversation state (spec §4.15) — a file-backed ring of up to
//! `MAX_TURNS_KEPT` recent turns, consulted by the follow-up short-circuit.
//! Turns hold only prompt text, resolved entity names, and a short context
//! summary — weak references into the graph, never node ids.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use memcore_core::config::MAX_TURNS_KEPT;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub prompt: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub context_summary: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl ConversationState {
    /// Read the state file. Returns `None` if it doesn't exist, is
    /// malformed, or carries no turns — callers treat all three the same
    /// way: there is no recent conversation to resume (spec §4.15).
    pub fn load(path: impl AsRef<Path>) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        let state: Self = serde_json::from_str(&raw).ok()?;
        if state.turns.is_empty() {
            None
        } else {
            Some(state)
        }
    }

    /// Write atomically: serialize to a sibling `.tmp` file, then rename
    /// over the target, so a reader never observes a half-written file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = tmp_path_for(path);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Append a turn, capping at `MAX_TURNS_KEPT` most recent. Clears every
    /// existing turn first when both sides carry a session id and they
    /// differ — the orchestrator's signal that this is a new conversation,
    /// not a continuation (spec §4.15).
    pub fn record_turn(&mut self, session_id: Option<&str>, turn: Turn) {
        if let (Some(existing), Some(incoming)) = (&self.session_id, session_id) {
            if existing != incoming {
                self.turns.clear();
            }
        }
        if let Some(sid) = session_id {
            self.session_id = Some(sid.to_string());
        }
        self.turns.push(turn);
        if self.turns.len() > MAX_TURNS_KEPT {
            let overflow = self.turns.len() - MAX_TURNS_KEPT;
            self.turns.drain(0..overflow);
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(prompt: &str) -> Turn {
        Turn { prompt: prompt.to_string(), entities: vec![], context_summary: None, timestamp: Utc::now() }
    }

    #[test]
    fn missing_file_loads_as_none() {
        let path = std::env::temp_dir().join(format!("memcore-test-missing-{}.json", uuid::Uuid::new_v4()));
        assert!(ConversationState::load(&path).is_none());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let path = std::env::temp_dir().join(format!("memcore-test-state-{}.json", uuid::Uuid::new_v4()));
        let mut state = ConversationState::default();
        state.record_turn(Some("session-1"), turn("Hello"));
        state.save(&path).unwrap();

        let loaded = ConversationState::load(&path).unwrap();
        assert_eq!(loaded.session_id.as_deref(), Some("session-1"));
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.turns[0].prompt, "Hello");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn session_id_mismatch_clears_turns() {
        let mut state = ConversationState::default();
        state.record_turn(Some("session-1"), turn("first"));
        state.record_turn(Some("session-1"), turn("second"));
        assert_eq!(state.turns.len(), 2);

        state.record_turn(Some("session-2"), turn("new conversation"));
        assert_eq!(state.turns.len(), 1);
        assert_eq!(state.turns[0].prompt, "new conversation");
        assert_eq!(state.session_id.as_deref(), Some("session-2"));
    }

    #[test]
    fn caps_at_max_turns_kept() {
        let mut state = ConversationState::default();
        for i in 0..(MAX_TURNS_KEPT + 3) {
            state.record_turn(None, turn(&format!("turn {i}")));
        }
        assert_eq!(state.turns.len(), MAX_TURNS_KEPT);
        assert_eq!(state.turns.last().unwrap().prompt, format!("turn {}", MAX_TURNS_KEPT + 2));
    }
}
