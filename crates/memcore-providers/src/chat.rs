//! Chat client: OpenAI-compatible `/chat/completions` wire contract (spec
//! §6). Request/response shape reuses the same request building and
//! error handling as a typical provider client, swapped onto the
//! `choices[0].message` response shape rather than a `content` block
//! array.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use crate::retry::with_backoff;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into(), tool_calls: None, tool_call_id: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into(), tool_calls: None, tool_call_id: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into(), tool_calls: None, tool_call_id: None }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool definition offered to the model (spec §6: `{type:"function",
/// function:{name, description, parameters}}`).
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ToolFunctionDef,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolFunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            kind: "function",
            function: ToolFunctionDef { name: name.into(), description: description.into(), parameters },
        }
    }
}

/// A tool call the model asked for. `arguments` on the wire may be a JSON
/// string or an already-parsed object — both deserialize into `Value` here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    #[serde(deserialize_with = "deserialize_arguments")]
    pub arguments: serde_json::Value,
}

/// Tolerant: a string that isn't valid JSON is kept as `Value::String` rather
/// than failing the whole `ChatResponse` deserialize. The tool-call dispatch
/// layer is what's supposed to record the arg-parse error as a turn and
/// count it toward the three-strike cap (spec §4.5/§7) — failing here
/// instead would abort the entire agent loop on one malformed tool call.
fn deserialize_arguments<'de, D>(deserializer: D) -> std::result::Result<serde_json::Value, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    match raw {
        serde_json::Value::String(s) => Ok(serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s))),
        other => Ok(other),
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self { model: model.into(), messages, tools: Vec::new(), max_tokens: None, temperature: None }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse>;
}

pub struct HttpChatProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl HttpChatProvider {
    pub fn new(api_key: String, base_url: String, max_retries: u32, retry_delay_ms: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_key,
            base_url,
            max_retries,
            retry_delay_ms,
        }
    }

    async fn send_once(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = build_request_body(req);

        debug!(model = %req.model, "sending chat request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat API error");
            return Err(ProviderError::Api { status, message: text });
        }

        let api_resp: ApiResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        parse_response(api_resp)
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse> {
        with_backoff("chat.send", self.max_retries, self.retry_delay_ms, || self.send_once(req)).await
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": req.model,
        "messages": req.messages,
    });
    if !req.tools.is_empty() {
        body["tools"] = serde_json::to_value(&req.tools).unwrap_or(serde_json::Value::Null);
    }
    if let Some(mt) = req.max_tokens {
        body["max_tokens"] = serde_json::json!(mt);
    }
    if let Some(t) = req.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    body
}

fn parse_response(resp: ApiResponse) -> Result<ChatResponse> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("no choices in chat response".to_string()))?;
    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls: choice.message.tool_calls.unwrap_or_default(),
    })
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_arguments_parse_from_json_string() {
        let raw = r#"{"id":"call_1","function":{"name":"search_entity","arguments":"{\"name\":\"Peter\"}"}}"#;
        let call: ToolCall = serde_json::from_str(raw).unwrap();
        assert_eq!(call.function.arguments["name"], "Peter");
    }

    #[test]
    fn tool_call_arguments_keeps_raw_string_on_parse_failure() {
        let raw = r#"{"id":"call_3","function":{"name":"search_entity","arguments":"not valid json"}}"#;
        let call: ToolCall = serde_json::from_str(raw).unwrap();
        assert_eq!(call.function.arguments, serde_json::Value::String("not valid json".to_string()));
    }

    #[test]
    fn tool_call_arguments_accepts_object() {
        let raw = r#"{"id":"call_2","function":{"name":"done","arguments":{"stored_count":3}}}"#;
        let call: ToolCall = serde_json::from_str(raw).unwrap();
        assert_eq!(call.function.arguments["stored_count"], 3);
    }

    #[test]
    fn parse_response_extracts_first_choice() {
        let resp = ApiResponse {
            choices: vec![Choice {
                message: ApiMessage { content: Some("hi".into()), tool_calls: None },
            }],
        };
        let parsed = parse_response(resp).unwrap();
        assert_eq!(parsed.content, "hi");
        assert!(parsed.tool_calls.is_empty());
    }
}
