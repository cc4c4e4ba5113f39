//! Error types for Conduit Core

use thiserror::Error;

/// Result type alias using Conduit Error
pub type Result<T> = std::result::Result<T, Error>;

/// Conduit error types
#[derive(Error, Debug)]
pub enum Error {
    /// Bad registration input
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Provider '{0}' is already registered")]
    DuplicateName(String),

    #[error("Provider '{0}' not found")]
    NotFound(String),

    /// Spawn or handshake failure
    #[error("Failed to connect to provider '{name}': {message}")]
    Connection { name: String, message: String },

    #[error("Not connected to any provider")]
    NotConnected,

    /// Never returned by `chat()`; rendered into the tool result instead.
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// Model backend failure, fatal to the current chat call
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Exceeded maximum tool-call rounds ({0})")]
    MaxRoundsExceeded(usize),

    /// Fault talking to the active provider outside a tool invocation
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn connection(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Connection {
            name: name.into(),
            message: message.to_string(),
        }
    }

    pub fn tool_execution(tool: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::ToolExecution {
            tool: tool.into(),
            message: message.to_string(),
        }
    }
}
