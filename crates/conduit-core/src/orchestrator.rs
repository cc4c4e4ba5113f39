//! Orchestrator facade
//!
//! One instance per conversation: it owns the provider registry, the
//! connection pool, the conversation memory and the model backend, and
//! exposes the operations a front end needs.

use std::sync::Arc;

use conduit_mcp::McpTool;
use tracing::{info, warn};

use crate::backend::ModelBackend;
use crate::config::Config;
use crate::connection::{ConnectionManager, ProcessLauncher, ProviderLauncher};
use crate::error::{Error, Result};
use crate::memory::{ConversationMemory, ConversationMessage};
use crate::registry::{ProviderDescriptor, ProviderRegistry};
use crate::tool_loop::{DEFAULT_MAX_ROUNDS, LoopOutcome, ToolCallLoop};

pub struct Orchestrator {
    registry: ProviderRegistry,
    connections: ConnectionManager,
    memory: ConversationMemory,
    backend: Box<dyn ModelBackend>,
    max_rounds: usize,
    system_template: Option<String>,
}

impl Orchestrator {
    pub fn new(
        registry: ProviderRegistry,
        connections: ConnectionManager,
        backend: Box<dyn ModelBackend>,
    ) -> Self {
        Self {
            registry,
            connections,
            memory: ConversationMemory::default(),
            backend,
            max_rounds: DEFAULT_MAX_ROUNDS,
            system_template: None,
        }
    }

    /// Build from application config, launching providers as child processes.
    pub fn from_config(config: &Config, registry: ProviderRegistry, backend: Box<dyn ModelBackend>) -> Self {
        Self::from_config_with_launcher(config, registry, backend, Arc::new(ProcessLauncher))
    }

    pub fn from_config_with_launcher(
        config: &Config,
        registry: ProviderRegistry,
        backend: Box<dyn ModelBackend>,
        launcher: Arc<dyn ProviderLauncher>,
    ) -> Self {
        let connections = ConnectionManager::new(launcher, config.connection_timeouts());
        Self::new(registry, connections, backend)
            .with_memory_capacity(config.memory.max_messages)
            .with_max_rounds(config.tool_loop.max_rounds)
            .with_system_template(config.model.system_prompt.clone())
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    /// Replaces the memory, dropping anything already committed.
    pub fn with_memory_capacity(mut self, max_messages: usize) -> Self {
        self.memory = ConversationMemory::new(max_messages);
        self
    }

    pub fn with_system_template(mut self, template: Option<String>) -> Self {
        self.system_template = template;
        self
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    // Providers

    pub fn add_provider(&mut self, descriptor: ProviderDescriptor) -> Result<()> {
        self.registry.add(descriptor)
    }

    /// Unregister `name`, tearing down its connection if one is live.
    pub async fn remove_provider(&mut self, name: &str) -> Result<bool> {
        let removed = self.registry.remove(name)?;
        if self.connections.is_connected(name) {
            self.connections.disconnect(Some(name)).await;
        }
        Ok(removed)
    }

    pub fn list_providers(&self) -> Vec<String> {
        self.registry.list()
    }

    pub fn provider(&self, name: &str) -> Result<&ProviderDescriptor> {
        self.registry.get(name)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    // Connections

    pub async fn connect(&mut self, name: &str) -> Result<()> {
        self.connections.connect(&self.registry, name).await?;
        Ok(())
    }

    /// Connect to the first candidate that comes up, falling back to every
    /// registered provider in order. Returns the name that connected.
    pub async fn connect_any(&mut self, preferred: &[&str]) -> Result<String> {
        let mut candidates: Vec<String> = preferred.iter().map(|s| s.to_string()).collect();
        for name in self.registry.list() {
            if !candidates.contains(&name) {
                candidates.push(name);
            }
        }

        let mut last_error = Error::Validation("No providers registered".to_string());
        for name in candidates {
            match self.connect(&name).await {
                Ok(()) => return Ok(name),
                Err(e) => {
                    warn!(provider = %name, error = %e, "auto-connect candidate failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    pub async fn disconnect(&mut self, name: Option<&str>) {
        self.connections.disconnect(name).await;
    }

    pub fn active_provider(&self) -> Option<&str> {
        self.connections.active_provider()
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.connections.list_tools().await
    }

    // Conversation

    /// Answer `prompt`, calling tools on the active provider as needed.
    pub async fn chat(&mut self, prompt: &str) -> Result<String> {
        self.chat_with_outcome(prompt).await.map(|outcome| outcome.answer)
    }

    /// Like [`chat`](Self::chat), but also reports rounds and tool calls.
    pub async fn chat_with_outcome(&mut self, prompt: &str) -> Result<LoopOutcome> {
        if prompt.trim().is_empty() {
            return Err(Error::Validation("Prompt must not be empty".to_string()));
        }

        ToolCallLoop::new(self.backend.as_ref(), &self.connections)
            .with_max_rounds(self.max_rounds)
            .with_system_template(self.system_template.as_deref())
            .run(&mut self.memory, prompt)
            .await
    }

    pub fn history(&self) -> Vec<ConversationMessage> {
        self.memory.history()
    }

    pub fn clear_history(&mut self) {
        self.memory.clear();
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    // Model

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub fn set_model(&mut self, model: &str) {
        info!(from = %self.backend.model(), to = %model, "switching model");
        self.backend.set_model(model);
    }

    /// Tear down every provider connection. Safe to call more than once.
    pub async fn close(&mut self) {
        self.connections.close().await;
    }
}
