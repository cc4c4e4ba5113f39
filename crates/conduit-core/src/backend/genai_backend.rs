//! Model backend using the genai crate
//!
//! genai picks the wire adapter (Gemini, OpenAI, Anthropic, ...) from the
//! model name, so one implementation covers every hosted backend.

use std::time::Duration;

use async_trait::async_trait;
use conduit_mcp::McpTool;
use futures::StreamExt;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent, Tool, ToolCall, ToolResponse};
use genai::resolver::{AuthData, AuthResolver};
use genai::{Client, WebConfig};
use tracing::{debug, error};

use super::{GenerationSettings, ModelBackend, ModelResponse, ToolCallRequest, TurnMessage};
use crate::error::{Error, Result};

pub struct GenAIBackend {
    client: Client,
    settings: GenerationSettings,
}

impl GenAIBackend {
    /// Default timeout for LLM API requests (5 minutes)
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    fn default_web_config() -> WebConfig {
        WebConfig::default()
            .with_timeout(Self::DEFAULT_TIMEOUT)
            .with_connect_timeout(Duration::from_secs(30))
    }

    /// Backend that resolves credentials from the environment
    pub fn new(settings: GenerationSettings) -> Self {
        let client = Client::builder()
            .with_web_config(Self::default_web_config())
            .build();
        Self { client, settings }
    }

    /// Backend with an explicit API key
    pub fn with_api_key(settings: GenerationSettings, api_key: &str) -> Self {
        let api_key = api_key.to_string();
        let auth_resolver = AuthResolver::from_resolver_fn(
            move |_model_iden| -> std::result::Result<Option<AuthData>, genai::resolver::Error> {
                Ok(Some(AuthData::from_single(api_key.clone())))
            },
        );

        let client = Client::builder()
            .with_web_config(Self::default_web_config())
            .with_auth_resolver(auth_resolver)
            .build();

        Self { client, settings }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    fn chat_options(&self) -> ChatOptions {
        ChatOptions::default()
            .with_temperature(self.settings.temperature as f64)
            .with_max_tokens(self.settings.max_tokens)
    }

    fn build_request(messages: &[TurnMessage], tools: &[McpTool], system: &str) -> ChatRequest {
        let mut chat_req = ChatRequest::default().with_system(system);

        for message in messages {
            match message {
                TurnMessage::User(text) => {
                    chat_req = chat_req.append_message(ChatMessage::user(text.as_str()));
                }
                TurnMessage::Assistant(text) => {
                    chat_req = chat_req.append_message(ChatMessage::assistant(text.as_str()));
                }
                TurnMessage::ToolCalls { text, calls } => {
                    if let Some(text) = text.as_deref().filter(|t| !t.trim().is_empty()) {
                        chat_req = chat_req.append_message(ChatMessage::assistant(text));
                    }
                    // genai turns Vec<ToolCall> into an assistant tool-call message
                    let genai_calls: Vec<ToolCall> = calls
                        .iter()
                        .map(|call| ToolCall {
                            call_id: call.call_id.clone(),
                            fn_name: call.name.clone(),
                            fn_arguments: call.arguments.clone(),
                            thought_signatures: call.thought_signatures.clone(),
                        })
                        .collect();
                    chat_req = chat_req.append_message(genai_calls);
                }
                TurnMessage::ToolResults(results) => {
                    for result in results {
                        let response =
                            ToolResponse::new(result.call_id.clone(), result.payload().to_string());
                        chat_req = chat_req.append_message(response);
                    }
                }
            }
        }

        if !tools.is_empty() {
            let genai_tools: Vec<Tool> = tools
                .iter()
                .map(|t| {
                    Tool::new(&t.name)
                        .with_description(&t.description)
                        .with_schema(t.input_schema.clone())
                })
                .collect();
            chat_req = chat_req.with_tools(genai_tools);
        }

        chat_req
    }
}

#[async_trait]
impl ModelBackend for GenAIBackend {
    fn model(&self) -> &str {
        &self.settings.model
    }

    fn set_model(&mut self, model: &str) {
        self.settings.model = model.to_string();
    }

    async fn generate(
        &self,
        messages: &[TurnMessage],
        tools: &[McpTool],
        system: &str,
    ) -> Result<ModelResponse> {
        let chat_req = Self::build_request(messages, tools, system);
        let options = self.chat_options();

        debug!(model = %self.settings.model, messages = messages.len(), tools = tools.len(), "sending chat request");

        // Streaming keeps long generations clear of request timeouts
        let stream_response = self
            .client
            .exec_chat_stream(&self.settings.model, chat_req, Some(&options))
            .await
            .map_err(|e| {
                error!(error = ?e, model = %self.settings.model, "LLM request failed");
                Error::Generation(format!("GenAI error: {}", e))
            })?;

        let mut content = String::new();
        let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
        let mut stream = stream_response.stream;

        while let Some(event) = stream.next().await {
            match event {
                Ok(ChatStreamEvent::Chunk(chunk)) => {
                    content.push_str(&chunk.content);
                }
                Ok(ChatStreamEvent::ToolCallChunk(tc)) => {
                    // Each chunk carries a complete call
                    let call = tc.tool_call;
                    tool_calls.push(ToolCallRequest {
                        call_id: call.call_id,
                        name: call.fn_name,
                        arguments: call.fn_arguments,
                        thought_signatures: call.thought_signatures,
                    });
                }
                Ok(ChatStreamEvent::End(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    error!(error = ?e, model = %self.settings.model, "LLM stream error");
                    return Err(Error::Generation(format!("GenAI stream error: {}", e)));
                }
            }
        }

        debug!(
            model = %self.settings.model,
            text_len = content.len(),
            tool_calls = tool_calls.len(),
            "chat response complete"
        );

        Ok(ModelResponse {
            text: if content.is_empty() { None } else { Some(content) },
            tool_calls,
        })
    }
}
