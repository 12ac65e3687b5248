//! Conversation transcript
//!
//! Append-only store of the user/assistant exchange, shared between the
//! orchestrator (which appends) and the host UI (which renders it).

use crate::{PatterError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Whether the message was (or is being) spoken aloud.
    pub spoken: bool,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn with_spoken(mut self, spoken: bool) -> Self {
        self.spoken = spoken;
        self
    }

    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            spoken: false,
        }
    }
}

/// Shared, append-only conversation history.
#[derive(Clone, Default)]
pub struct Transcript {
    messages: Arc<RwLock<Vec<ChatMessage>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, message: ChatMessage) {
        self.messages.write().push(message);
    }

    pub fn get_all(&self) -> Vec<ChatMessage> {
        self.messages.read().clone()
    }

    pub fn clear(&self) {
        self.messages.write().clear();
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Flatten the history into a chat-format prompt ending with an open
    /// assistant turn.
    pub fn render_prompt(&self, system_prompt: &str) -> String {
        let messages = self.messages.read();
        let mut prompt = String::new();
        if !system_prompt.is_empty() {
            prompt.push_str("system: ");
            prompt.push_str(system_prompt);
            prompt.push('\n');
        }
        for message in messages.iter() {
            prompt.push_str(message.role.as_str());
            prompt.push_str(": ");
            prompt.push_str(&message.text);
            prompt.push('\n');
        }
        prompt.push_str("assistant: ");
        prompt
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&*self.messages.read())
            .map_err(|e| PatterError::Config(format!("transcript serialization failed: {}", e)))
    }
}
