//! Message types for room transcripts and provider history.
//!
//! Transcript messages always carry content in canonical-id form
//! (`@<participant-id>`); display names and ordinal ids only exist inside a
//! single outbound request or in rendered output.

use crate::id::{MessageId, ParticipantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who wrote a transcript message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Sender {
    /// The human user
    Human,
    /// A simulated participant
    Participant(ParticipantId),
    /// Application notices
    System,
}

impl Sender {
    /// The participant id, if a participant sent this
    pub fn participant(&self) -> Option<&ParticipantId> {
        match self {
            Sender::Participant(id) => Some(id),
            _ => None,
        }
    }

    /// Check if the human sent this
    pub fn is_human(&self) -> bool {
        matches!(self, Sender::Human)
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::Human => write!(f, "human"),
            Sender::Participant(id) => write!(f, "{id}"),
            Sender::System => write!(f, "system"),
        }
    }
}

/// A message in a room transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Who wrote it
    pub sender: Sender,
    /// Content in canonical-id form
    pub content: String,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a message from the human
    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Sender::Human, content)
    }

    /// Create a message from a participant
    pub fn participant(id: ParticipantId, content: impl Into<String>) -> Self {
        Self::new(Sender::Participant(id), content)
    }

    /// Create a system notice
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Sender::System, content)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.sender, self.content)
    }
}

/// Role of a turn in the history sent to a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Input side of the conversation
    User,
    /// The persona being asked to reply
    Model,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Model => write!(f, "model"),
        }
    }
}

/// One role-tagged entry of provider history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Role of the turn
    pub role: Role,
    /// Text as sent on the wire
    pub text: String,
}

impl Turn {
    /// Create a user turn
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    /// Create a model turn
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::human("@U1 hello");
        assert!(msg.sender.is_human());
        assert_eq!(msg.to_string(), "[human] @U1 hello");
    }

    #[test]
    fn test_participant_sender() {
        let msg = Message::participant(ParticipantId::new("U1"), "hi");
        assert_eq!(msg.sender.participant().map(|p| p.as_str()), Some("U1"));
    }

    #[test]
    fn test_message_serde() {
        let msg = Message::participant(ParticipantId::new("U2"), "Test message");
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sender, msg.sender);
        assert_eq!(parsed.content, msg.content);
    }
}
