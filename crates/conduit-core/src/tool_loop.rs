//! Tool-Call Loop
//!
//! Drives one `chat()` call: ask the model, run whatever tools it requests
//! against the active provider, feed the results back, and repeat until the
//! model answers in plain text.
//!
//! ```text
//! AwaitingModel -> EvaluatingResponse -> Done
//!       ^                  |
//!       +-- ExecutingTools <+
//! ```
//!
//! Only the prompt and the final answer are committed to memory, and only
//! when the loop reaches `Done`. Tool failures are reported to the model as
//! data; backend failures and the round limit abort the call with memory
//! untouched.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::backend::{ModelBackend, ModelResponse, ToolCallRequest, ToolResultMessage, TurnMessage};
use crate::connection::{ConnectionManager, ToolInvocationResult};
use crate::error::{Error, Result};
use crate::memory::{ConversationMemory, Role};

/// Answer used when the model stops calling tools without saying anything
pub const NO_TEXT_FALLBACK: &str = "Task completed (No text output).";

pub const DEFAULT_MAX_ROUNDS: usize = 10;

const DEFAULT_SYSTEM_TEMPLATE: &str = "You are a helpful AI assistant connected to an MCP (Model Context Protocol) server named '{provider}'. \
You have access to the tools listed in your context. \
You should use these tools whenever they help answer the user's question. \
If asked, acknowledge that you are using tools from this server.";

/// System instruction naming the active provider.
///
/// `template` may contain `{provider}`; `None` uses the built-in wording.
pub fn system_instruction(provider: &str, template: Option<&str>) -> String {
    template
        .unwrap_or(DEFAULT_SYSTEM_TEMPLATE)
        .replace("{provider}", provider)
}

enum LoopState {
    AwaitingModel,
    EvaluatingResponse(ModelResponse),
    ExecutingTools(ModelResponse),
    Done(String),
}

/// Summary of a completed loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub answer: String,
    /// Model requests issued
    pub rounds: usize,
    /// Tool calls executed, failed ones included
    pub tool_calls: usize,
}

pub struct ToolCallLoop<'a> {
    backend: &'a dyn ModelBackend,
    connections: &'a ConnectionManager,
    max_rounds: usize,
    system_template: Option<&'a str>,
}

impl<'a> ToolCallLoop<'a> {
    pub fn new(backend: &'a dyn ModelBackend, connections: &'a ConnectionManager) -> Self {
        Self {
            backend,
            connections,
            max_rounds: DEFAULT_MAX_ROUNDS,
            system_template: None,
        }
    }

    /// Model requests allowed per call; at least one.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_system_template(mut self, template: Option<&'a str>) -> Self {
        self.system_template = template;
        self
    }

    /// Run the loop for `prompt` and commit the exchange to `memory` on success.
    pub async fn run(&self, memory: &mut ConversationMemory, prompt: &str) -> Result<LoopOutcome> {
        let provider = self
            .connections
            .active_provider()
            .ok_or(Error::NotConnected)?
            .to_string();
        let tools = self.connections.list_tools().await?;
        let system = system_instruction(&provider, self.system_template);

        let mut messages: Vec<TurnMessage> = memory
            .iter()
            .map(|m| match m.role {
                Role::User => TurnMessage::User(m.content.clone()),
                Role::Assistant => TurnMessage::Assistant(m.content.clone()),
            })
            .collect();
        messages.push(TurnMessage::User(prompt.to_string()));

        debug!(provider = %provider, tools = tools.len(), history = memory.len(), "starting tool-call loop");

        let mut rounds = 0usize;
        let mut tool_calls = 0usize;
        let mut state = LoopState::AwaitingModel;

        let answer = loop {
            state = match state {
                LoopState::AwaitingModel => {
                    rounds += 1;
                    debug!(round = rounds, "awaiting model");
                    let response = self
                        .backend
                        .generate(&messages, &tools, &system)
                        .await
                        .map_err(|e| match e {
                            Error::Generation(_) => e,
                            other => Error::Generation(other.to_string()),
                        })?;
                    LoopState::EvaluatingResponse(response)
                }
                LoopState::EvaluatingResponse(response) => {
                    if response.has_tool_calls() {
                        if rounds >= self.max_rounds {
                            warn!(max_rounds = self.max_rounds, "model is still requesting tools, giving up");
                            return Err(Error::MaxRoundsExceeded(self.max_rounds));
                        }
                        LoopState::ExecutingTools(response)
                    } else {
                        match response.usable_text() {
                            Some(text) => LoopState::Done(text.to_string()),
                            None => {
                                warn!(round = rounds, "model returned no text");
                                LoopState::Done(NO_TEXT_FALLBACK.to_string())
                            }
                        }
                    }
                }
                LoopState::ExecutingTools(response) => {
                    let calls = assign_call_ids(response.tool_calls, rounds);
                    let mut results = Vec::with_capacity(calls.len());
                    // One at a time, in emitted order.
                    for call in &calls {
                        results.push(self.execute(call).await?);
                    }
                    tool_calls += calls.len();

                    messages.push(TurnMessage::ToolCalls {
                        text: response.text,
                        calls,
                    });
                    messages.push(TurnMessage::ToolResults(results));
                    LoopState::AwaitingModel
                }
                LoopState::Done(answer) => break answer,
            };
        };

        memory.commit_exchange(prompt, answer.clone());
        info!(provider = %provider, rounds, tool_calls, "chat complete");

        Ok(LoopOutcome {
            answer,
            rounds,
            tool_calls,
        })
    }

    /// Run one tool call. Only a lost active provider is an `Err`.
    async fn execute(&self, call: &ToolCallRequest) -> Result<ToolResultMessage> {
        let result = match normalize_arguments(&call.arguments) {
            Ok(arguments) => {
                debug!(tool = %call.name, call_id = %call.call_id, "executing tool");
                self.connections.invoke(&call.name, arguments).await?
            }
            Err(message) => {
                warn!(tool = %call.name, error = %message, "rejecting malformed tool arguments");
                ToolInvocationResult::failure(&call.name, message)
            }
        };

        Ok(ToolResultMessage {
            call_id: call.call_id.clone(),
            tool_name: result.tool_name,
            content: result.content,
            is_error: result.is_error,
        })
    }
}

/// Fill in ids for calls the backend left anonymous, so results can be matched.
fn assign_call_ids(calls: Vec<ToolCallRequest>, round: usize) -> Vec<ToolCallRequest> {
    calls
        .into_iter()
        .enumerate()
        .map(|(index, mut call)| {
            if call.call_id.is_empty() {
                call.call_id = format!("call_{}_{}", round, index);
            }
            call
        })
        .collect()
}

/// Coerce model-supplied arguments into a JSON object.
///
/// `null` and blank strings mean "no arguments"; a string holding a JSON
/// object is decoded. Anything else is rejected with a message for the model.
pub fn normalize_arguments(arguments: &Value) -> std::result::Result<Map<String, Value>, String> {
    match arguments {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(raw) if raw.trim().is_empty() => Ok(Map::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!("arguments must be a JSON object, got {}", other)),
            Err(e) => Err(format!("arguments are not valid JSON: {}", e)),
        },
        other => Err(format!("arguments must be a JSON object, got {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_arguments() {
        assert_eq!(normalize_arguments(&json!({"a": 1})).unwrap()["a"], 1);
        assert!(normalize_arguments(&Value::Null).unwrap().is_empty());
        assert!(normalize_arguments(&json!("  ")).unwrap().is_empty());
        assert_eq!(normalize_arguments(&json!("{\"a\": 2}")).unwrap()["a"], 2);
        assert!(normalize_arguments(&json!("[1, 2]")).unwrap_err().contains("JSON object"));
        assert!(normalize_arguments(&json!("{oops")).unwrap_err().contains("not valid JSON"));
        assert!(normalize_arguments(&json!(42)).is_err());
    }

    #[test]
    fn test_system_instruction_names_provider() {
        let default = system_instruction("calc", None);
        assert!(default.contains("server named 'calc'"));

        let custom = system_instruction("calc", Some("Use {provider} wisely."));
        assert_eq!(custom, "Use calc wisely.");
    }

    #[test]
    fn test_assign_call_ids_keeps_existing() {
        let calls = vec![
            ToolCallRequest::new("given", "a", Value::Null),
            ToolCallRequest::new("", "b", Value::Null),
        ];
        let calls = assign_call_ids(calls, 3);
        assert_eq!(calls[0].call_id, "given");
        assert_eq!(calls[1].call_id, "call_3_1");
    }
}
