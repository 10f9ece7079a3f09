//! Bounded tool-calling loop shared by the retrieve agent (L2-R) and the
//! store agent (L2-S) — spec §4.5/§4.11:
//! - a turn cap AND a wall-clock cap,
//! - a turn-0 "nudge and retry once" when the model returns no tool calls,
//! - a three-consecutive-error abort instead of running the cap to exhaustion,
//! - per-call result truncation to a fixed byte ceiling before feeding the
//!   model back its own tool output.

use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use memcore_core::config::{MAX_CONSECUTIVE_ERRORS, MAX_LAYER2_TURNS, MAX_RESULT_CHARS};
use memcore_providers::{ChatMessage, ChatProvider, ChatRequest, ChatResponse, ToolCall};

use super::{to_definitions, Tool, ToolResult};

const DONE_TOOL: &str = "done";
const NUDGE: &str = "You have not called a tool yet. Call one of the available tools, or `done` if nothing further is needed.";

/// One step of the agent loop's turn log (spec glossary: "turn log").
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub result: ToolResult,
    /// Any free text the model produced alongside the tool call.
    pub reasoning: String,
}

#[derive(Debug, Clone, Default)]
pub struct AgentLoopOutcome {
    pub turns: Vec<AgentTurn>,
    pub final_text: String,
    pub done_called: bool,
    pub timed_out: bool,
}

/// Run the bounded tool loop to completion (or to its turn/time/error cap).
pub async fn run_tool_loop(
    chat: &dyn ChatProvider,
    model: &str,
    system_prompt: &str,
    user_prompt: &str,
    tools: &[Box<dyn Tool>],
) -> AgentLoopOutcome {
    let deadline = Duration::from_millis(memcore_core::config::LAYER2_TIMEOUT_MS);
    let start = Instant::now();

    let mut messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(user_prompt)];
    let tool_defs = to_definitions(tools);
    let mut outcome = AgentLoopOutcome::default();
    let mut consecutive_errors = 0u32;
    let mut nudged = false;

    for turn in 0..MAX_LAYER2_TURNS {
        if start.elapsed() >= deadline {
            info!(turn, "agent loop hit wall-clock cap, returning partial results");
            outcome.timed_out = true;
            break;
        }

        let mut req = ChatRequest::new(model, messages.clone());
        req.tools = tool_defs.clone();

        // Bound the in-flight call by what's left of the loop's own
        // wall-clock budget, not just its own per-request timeout — a call
        // entered near the deadline must not be allowed to run past it
        // (spec §8: "total turns ≤ MAX_LAYER2_TURNS and wall-clock ≤
        // LAYER2_TIMEOUT_MS").
        let remaining = deadline.saturating_sub(start.elapsed());
        let response = match timeout(remaining, chat.send(&req)).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                warn!(turn, err = %e, "chat call failed inside agent loop");
                break;
            }
            Err(_) => {
                info!(turn, "chat call exceeded remaining wall-clock budget, returning partial results");
                outcome.timed_out = true;
                break;
            }
        };

        if response.tool_calls.is_empty() {
            if turn == 0 && !nudged {
                debug!("no tool calls on turn 0 — nudging once");
                nudged = true;
                messages.push(ChatMessage::assistant(response.content));
                messages.push(ChatMessage::user(NUDGE));
                continue;
            }
            outcome.final_text = response.content;
            return outcome;
        }

        messages.push(ChatMessage::assistant(response.content.clone()));
        let mut saw_done = false;

        for call in &response.tool_calls {
            if call.function.name == DONE_TOOL {
                saw_done = true;
                messages.push(ChatMessage::tool_result(call.id.clone(), "done"));
                outcome.turns.push(AgentTurn {
                    tool_name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                    result: ToolResult::success("done"),
                    reasoning: response.content.clone(),
                });
                continue;
            }

            let result = dispatch(tools, call).await;
            if result.is_error {
                consecutive_errors += 1;
            } else {
                consecutive_errors = 0;
            }

            let truncated = truncate_result(&result.content);
            messages.push(ChatMessage::tool_result(call.id.clone(), truncated));
            outcome.turns.push(AgentTurn {
                tool_name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
                result,
                reasoning: response.content.clone(),
            });

            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                warn!(turn, "three consecutive tool errors, terminating agent loop");
                outcome.final_text = response.content.clone();
                return outcome;
            }
        }

        if saw_done {
            outcome.done_called = true;
            outcome.final_text = response.content;
            return outcome;
        }
    }

    outcome
}

/// `deserialize_arguments` keeps an unparseable `arguments` string verbatim
/// as `Value::String` instead of failing the whole response (spec §4.5:
/// "on parse error record an error-result turn and increment a
/// consecutive-error counter"). Catch that case here, before dispatch,
/// so it counts as an error turn rather than silently reaching a tool
/// whose schema expects an object.
async fn dispatch(tools: &[Box<dyn Tool>], call: &ToolCall) -> ToolResult {
    if let serde_json::Value::String(raw) = &call.function.arguments {
        warn!(tool = %call.function.name, "tool call arguments were not valid JSON");
        return ToolResult::error(format!("Error: could not parse tool arguments as JSON: {raw}"));
    }
    match tools.iter().find(|t| t.name() == call.function.name) {
        Some(tool) => {
            debug!(tool = %call.function.name, "dispatching tool call");
            tool.execute(call.function.arguments.clone()).await
        }
        None => ToolResult::error(format!("unknown tool: {}", call.function.name)),
    }
}

fn truncate_result(content: &str) -> String {
    if content.len() <= MAX_RESULT_CHARS {
        content.to_string()
    } else {
        let mut end = MAX_RESULT_CHARS;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}… (truncated)", &content[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memcore_providers::chat::ToolCallFunction;
    use memcore_providers::error::ProviderError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubChat {
        responses: Mutex<Vec<ChatResponse>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatProvider for StubChat {
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(ChatResponse { content: "done already".into(), tool_calls: vec![] })
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            "noop"
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _input: serde_json::Value) -> ToolResult {
            ToolResult::success("ok")
        }
    }

    fn done_call() -> ToolCall {
        serde_json::from_value(serde_json::json!({
            "id": "1", "function": {"name": "done", "arguments": {}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn terminates_on_done() {
        let chat = StubChat {
            responses: Mutex::new(vec![ChatResponse {
                content: "wrapping up".into(),
                tool_calls: vec![done_call()],
            }]),
            calls: AtomicUsize::new(0),
        };
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(NoopTool)];
        let outcome = run_tool_loop(&chat, "test-model", "sys", "hi", &tools).await;
        assert!(outcome.done_called);
    }

    fn malformed_call() -> ToolCall {
        ToolCall {
            id: "2".into(),
            function: ToolCallFunction {
                name: "noop".into(),
                arguments: serde_json::Value::String("not valid json".into()),
            },
        }
    }

    #[tokio::test]
    async fn malformed_arguments_record_an_error_turn_instead_of_aborting() {
        let chat = StubChat {
            responses: Mutex::new(vec![
                ChatResponse { content: "calling noop".into(), tool_calls: vec![malformed_call()] },
                ChatResponse { content: "wrapping up".into(), tool_calls: vec![done_call()] },
            ]),
            calls: AtomicUsize::new(0),
        };
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(NoopTool)];
        let outcome = run_tool_loop(&chat, "test-model", "sys", "hi", &tools).await;
        assert!(outcome.turns[0].result.is_error);
        assert!(outcome.done_called);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn nudges_once_on_empty_turn_zero() {
        let chat = StubChat {
            responses: Mutex::new(vec![
                ChatResponse { content: "thinking...".into(), tool_calls: vec![] },
                ChatResponse { content: "final answer".into(), tool_calls: vec![] },
            ]),
            calls: AtomicUsize::new(0),
        };
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(NoopTool)];
        let outcome = run_tool_loop(&chat, "test-model", "sys", "hi", &tools).await;
        assert_eq!(outcome.final_text, "final answer");
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }
}
