//! Conversation Memory
//!
//! Bounded log of committed user/assistant turns for one conversation.
//! Intermediate tool exchanges never land here.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Smallest cap that still fits one user/assistant pair
const MIN_MAX_MESSAGES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    messages: VecDeque<ConversationMessage>,
    max_messages: usize,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl ConversationMemory {
    /// Eviction works in pairs, so an odd cap is rounded down to the
    /// nearest even number. Caps below 2 become 2.
    pub fn new(max_messages: usize) -> Self {
        let max_messages = (max_messages & !1).max(MIN_MAX_MESSAGES);
        Self {
            messages: VecDeque::with_capacity(max_messages + 1),
            max_messages,
        }
    }

    /// Add to the tail, then drop the oldest pair while over the cap.
    pub fn append(&mut self, message: ConversationMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
            self.messages.pop_front();
        }
    }

    /// Record one settled exchange.
    pub fn commit_exchange(&mut self, prompt: impl Into<String>, answer: impl Into<String>) {
        self.append(ConversationMessage::user(prompt));
        self.append(ConversationMessage::assistant(answer));
    }

    /// Snapshot of the committed messages, oldest first
    pub fn history(&self) -> Vec<ConversationMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_messages
    }
}
