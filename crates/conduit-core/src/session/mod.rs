//! Conversation sessions
//!
//! Each conversation id gets a private [`Orchestrator`](crate::Orchestrator)
//! with its own memory and provider connections. Sessions are created the
//! first time an id is used and disposed after sitting idle.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                SessionManager                │
//! │                                              │
//! │  chat(conversation_id, prompt) ───────────▶  │
//! │                                              │
//! │  conversation_a -> Mutex<Orchestrator>       │
//! │  conversation_b -> Mutex<Orchestrator>       │
//! │                                              │
//! │  reaper: dispose_idle() every interval       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! One conversation runs one chat at a time; different conversations run
//! concurrently.

mod manager;

pub use manager::{ConversationSession, SessionFactory, SessionManager};
