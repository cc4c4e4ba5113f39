//! Deterministic backend that replays queued responses.
//!
//! Clones share the same script and request log, so a test can keep one
//! handle while the orchestrator owns another.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_mcp::McpTool;
use parking_lot::Mutex;

use super::{ModelBackend, ModelResponse, TurnMessage};
use crate::error::{Error, Result};

/// Snapshot of one `generate` call
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<TurnMessage>,
    pub tool_names: Vec<String>,
    pub system: String,
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Result<ModelResponse>>,
    fallback: Option<ModelResponse>,
    requests: Vec<RecordedRequest>,
}

#[derive(Clone)]
pub struct ScriptedBackend {
    model: String,
    script: Arc<Mutex<Script>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            model: "scripted".to_string(),
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Backend that answers every call with `response` once the queue is empty
    pub fn repeating(response: ModelResponse) -> Self {
        let backend = Self::new();
        backend.script.lock().fallback = Some(response);
        backend
    }

    pub fn push_response(&self, response: ModelResponse) -> &Self {
        self.script.lock().queue.push_back(Ok(response));
        self
    }

    /// Queue a transport-style failure
    pub fn push_error(&self, message: impl Into<String>) -> &Self {
        self.script
            .lock()
            .queue
            .push_back(Err(Error::Generation(message.into())));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.script.lock().requests.len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().queue.len()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn model(&self) -> &str {
        &self.model
    }

    fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
    }

    async fn generate(
        &self,
        messages: &[TurnMessage],
        tools: &[McpTool],
        system: &str,
    ) -> Result<ModelResponse> {
        let mut script = self.script.lock();
        script.requests.push(RecordedRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            system: system.to_string(),
        });

        match script.queue.pop_front() {
            Some(next) => next,
            None => script
                .fallback
                .clone()
                .ok_or_else(|| Error::Generation("scripted backend has no more responses".to_string())),
        }
    }
}
