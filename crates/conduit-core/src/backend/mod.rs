//! Model Backend Adapter
//!
//! The tool-call loop talks to a language model only through
//! [`ModelBackend`]. Messages, tool catalogs and responses use conduit's own
//! types; each implementation translates to and from its wire format.

mod genai_backend;
mod scripted;

pub use genai_backend::GenAIBackend;
pub use scripted::{RecordedRequest, ScriptedBackend};

use async_trait::async_trait;
use conduit_mcp::McpTool;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Model identity and sampling parameters, fixed for the duration of a loop
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    /// Usually an object, but models do emit strings and nulls here.
    pub arguments: Value,
    /// Opaque reasoning signatures some models attach to a call and expect
    /// back unchanged when the call is replayed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signatures: Option<Vec<String>>,
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
            thought_signatures: None,
        }
    }
}

/// Result of one tool call, as fed back to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResultMessage {
    /// Payload sent to the model: `{"result": ...}` or `{"error": ...}`
    pub fn payload(&self) -> Value {
        if self.is_error {
            serde_json::json!({ "error": self.content })
        } else {
            serde_json::json!({ "result": self.content })
        }
    }
}

/// Message in the working list of a single chat call
#[derive(Debug, Clone, PartialEq)]
pub enum TurnMessage {
    User(String),
    Assistant(String),
    /// The model's own tool-call turn, with any text it emitted alongside
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
    /// Results for every call of the preceding `ToolCalls` turn
    ToolResults(Vec<ToolResultMessage>),
}

/// What the model answered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            text: None,
            tool_calls: calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Text, unless missing or only whitespace
    pub fn usable_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// A language model that can answer with text or tool-call requests
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Model identifier requests are sent to
    fn model(&self) -> &str;

    /// Switch models. Takes effect on the next `generate`.
    fn set_model(&mut self, model: &str);

    /// One blocking round trip to the model
    async fn generate(
        &self,
        messages: &[TurnMessage],
        tools: &[McpTool],
        system: &str,
    ) -> Result<ModelResponse>;
}
