//! Conduit Core - tool-augmented conversation orchestration
//!
//! This crate provides:
//! - A persistent registry of tool providers and how to launch them
//! - A connection manager holding live MCP connections and the active provider
//! - Bounded per-conversation memory
//! - The tool-call loop that alternates between the model and provider tools
//! - A model backend abstraction with a genai implementation
//! - A session manager giving each conversation its own orchestrator

pub mod backend;
pub mod config;
pub mod connection;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod tool_loop;

pub use backend::{
    GenAIBackend, GenerationSettings, ModelBackend, ModelResponse, ScriptedBackend, ToolCallRequest,
    ToolResultMessage, TurnMessage,
};
pub use config::{Config, ConfigManager};
pub use connection::{
    ConnectionManager, ConnectionTimeouts, InProcessLauncher, ProcessLauncher, ProviderConnection,
    ProviderLauncher, ToolInvocationResult,
};
pub use error::{Error, Result};
pub use memory::{ConversationMemory, ConversationMessage, Role};
pub use orchestrator::Orchestrator;
pub use registry::{ProviderDescriptor, ProviderRegistry, RuntimeKind};
pub use session::{ConversationSession, SessionFactory, SessionManager};
pub use tool_loop::{LoopOutcome, NO_TEXT_FALLBACK, ToolCallLoop};

pub use conduit_mcp::McpTool;
