//! Type-safe ID types for the orchestration engine.
//!
//! Two families of identifiers exist:
//! - UUID-backed ids for things the engine creates itself (messages,
//!   long-term memory records).
//! - String-backed keys for things owned by the surrounding application
//!   (participants, rooms). These are the canonical ids that appear in
//!   persisted message content as `@<id>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to define a newtype ID wrapper around UUID
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random ID
            #[inline]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Get the underlying UUID
            #[inline]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Create a nil (all zeros) ID - useful for testing
            #[inline]
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0.to_string()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Macro to define a newtype key wrapper around an application-assigned string
macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an application-assigned id
            #[inline]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw id
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a transcript message
    MessageId
);

define_id!(
    /// Unique identifier for a durable long-term memory record
    RecordId
);

define_key!(
    /// Canonical id of a simulated participant
    ParticipantId
);

define_key!(
    /// Id of a chat room
    RoomId
);

/// The unit a short-term memory buffer is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ScopeId {
    /// Memory shared by everyone in a room
    Room(RoomId),
    /// Memory private to one participant, possibly spanning rooms
    Participant(ParticipantId),
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeId::Room(id) => write!(f, "room:{id}"),
            ScopeId::Participant(id) => write!(f, "participant:{id}"),
        }
    }
}

impl From<RoomId> for ScopeId {
    fn from(id: RoomId) -> Self {
        ScopeId::Room(id)
    }
}

impl From<ParticipantId> for ScopeId {
    fn from(id: ParticipantId) -> Self {
        ScopeId::Participant(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_creation() {
        let id1 = MessageId::new();
        let id2 = MessageId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_id_debug_format() {
        let id = RecordId::nil();
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("RecordId("));
    }

    #[test]
    fn test_key_serde_is_transparent() {
        let id = ParticipantId::new("U1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"U1\"");
        let parsed: ParticipantId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_scope_display() {
        let room: ScopeId = RoomId::new("lobby").into();
        let who: ScopeId = ParticipantId::new("U1").into();
        assert_eq!(room.to_string(), "room:lobby");
        assert_eq!(who.to_string(), "participant:U1");
    }
}
