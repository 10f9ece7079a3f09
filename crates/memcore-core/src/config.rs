use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Budget constants from the pipeline contract (spec §5) — kept here so
// both memcore-providers and memcore-pipeline can read them off a single
// loaded config without duplicating the defaults.
pub const MAX_LAYER2_TURNS: u32 = 8;
pub const LAYER2_TIMEOUT_MS: u64 = 30_000;
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;
pub const MAX_RESULT_CHARS: usize = 4000;
pub const MAX_TURNS_KEPT: usize = 5;
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_DELAY_MS: u64 = 1000;
pub const EMBEDDING_DIMS: usize = 1024;
pub const EMBEDDING_BATCH_SIZE: usize = 128;

/// Top-level config (memcore.toml + MEMCORE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemcoreConfig {
    #[serde(default)]
    pub graph: GraphConfig,
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub conversation_state: ConversationStateConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_path")]
    pub path: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            path: default_graph_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationStateConfig {
    #[serde(default = "default_state_path")]
    pub path: String,
}

impl Default for ConversationStateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// Tunable overrides of the budget constants above — every field defaults
/// to its own constant, so a stock config file need not set any of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_layer2_turns")]
    pub max_layer2_turns: u32,
    #[serde(default = "default_layer2_timeout_ms")]
    pub layer2_timeout_ms: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default = "default_max_turns_kept")]
    pub max_turns_kept: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_layer2_turns: MAX_LAYER2_TURNS,
            layer2_timeout_ms: LAYER2_TIMEOUT_MS,
            max_consecutive_errors: MAX_CONSECUTIVE_ERRORS,
            max_result_chars: MAX_RESULT_CHARS,
            max_turns_kept: MAX_TURNS_KEPT,
            max_retries: MAX_RETRIES,
            retry_delay_ms: RETRY_DELAY_MS,
        }
    }
}

fn default_max_layer2_turns() -> u32 {
    MAX_LAYER2_TURNS
}
fn default_layer2_timeout_ms() -> u64 {
    LAYER2_TIMEOUT_MS
}
fn default_max_consecutive_errors() -> u32 {
    MAX_CONSECUTIVE_ERRORS
}
fn default_max_result_chars() -> usize {
    MAX_RESULT_CHARS
}
fn default_max_turns_kept() -> usize {
    MAX_TURNS_KEPT
}
fn default_max_retries() -> u32 {
    MAX_RETRIES
}
fn default_retry_delay_ms() -> u64 {
    RETRY_DELAY_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub chat: ChatProviderConfig,
    pub embedding: EmbeddingProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatProviderConfig {
    pub api_key: String,
    #[serde(default = "default_chat_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    pub api_key: String,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

fn default_graph_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.memcore/graph.db", home)
}
fn default_state_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.memcore/conversation_state.json", home)
}
fn default_chat_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_chat_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_embedding_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}

impl MemcoreConfig {
    /// Load config from a TOML file with MEMCORE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.memcore/memcore.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: MemcoreConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MEMCORE_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.memcore/memcore.toml", home)
}
