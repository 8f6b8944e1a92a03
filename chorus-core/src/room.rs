//! Participants, the human profile, and rooms.

use crate::config::AffectionConfig;
use crate::id::{ParticipantId, RoomId};
use crate::presence::{Presence, PresenceSchedule};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// A simulated chat member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Canonical id
    pub id: ParticipantId,
    /// Display name
    pub name: String,
    /// Persona instructions sent as the system prompt
    pub persona: String,
    /// Age in years, if known
    pub age: Option<u32>,
    /// Daily presence pattern
    pub schedule: PresenceSchedule,
    /// Relationship score toward the human
    pub affection: i32,
}

impl Participant {
    /// Create an always-online participant with neutral affection
    pub fn new(id: impl Into<ParticipantId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            persona: String::new(),
            age: None,
            schedule: PresenceSchedule::always(Presence::Online),
            affection: 0,
        }
    }

    /// Set persona instructions
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// Set age
    pub fn with_age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }

    /// Set presence schedule
    pub fn with_schedule(mut self, schedule: PresenceSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Set starting affection
    pub fn with_affection(mut self, affection: i32) -> Self {
        self.affection = affection;
        self
    }

    /// Presence at a time of day
    pub fn presence_at(&self, time: NaiveTime) -> Presence {
        self.schedule.presence_at(time)
    }

    /// Apply an affection update, clamped to bounds; returns the new value
    pub fn apply_affection(&mut self, update: AffectionUpdate, bounds: &AffectionConfig) -> i32 {
        let next = match update {
            AffectionUpdate::Delta(delta) => self.affection.saturating_add(delta),
            AffectionUpdate::Set(value) => value,
        };
        self.affection = bounds.clamp(next);
        self.affection
    }
}

/// Affection change carried on a reply's last line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AffectionUpdate {
    /// Signed change (`+3`, `-2`)
    Delta(i32),
    /// Absolute value (`42`, `affection: 42`)
    Set(i32),
}

/// The human on the other side of the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanProfile {
    /// Display name
    pub name: String,
    /// Age in years, if known
    pub age: Option<u32>,
}

impl HumanProfile {
    /// Create a profile with unknown age
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age: None,
        }
    }

    /// Set age
    pub fn with_age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }
}

/// Room mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomMode {
    /// One persona and the human
    Single,
    /// Several personas and the human
    Group,
}

/// A chat room
///
/// Roster order is the basis for ordinal ids in outbound requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    /// Room id
    pub id: RoomId,
    /// Ordered participant ids
    pub roster: Vec<ParticipantId>,
    /// Room mode
    pub mode: RoomMode,
}

impl Room {
    /// Create a room; mode follows roster size
    pub fn new(id: impl Into<RoomId>, roster: Vec<ParticipantId>) -> Self {
        let mode = if roster.len() > 1 {
            RoomMode::Group
        } else {
            RoomMode::Single
        };
        Self {
            id: id.into(),
            roster,
            mode,
        }
    }

    /// Check roster membership
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.roster.contains(id)
    }
}
