//! Time-of-day presence and the reply odds it drives.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Availability of a participant at a given time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Active and responsive
    #[default]
    Online,
    /// Around but busy
    Away,
    /// Asleep or otherwise unreachable
    Offline,
}

impl Presence {
    /// Online participants reply without being asked
    pub fn is_available(&self) -> bool {
        matches!(self, Presence::Online)
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Online => write!(f, "online"),
            Presence::Away => write!(f, "away"),
            Presence::Offline => write!(f, "offline"),
        }
    }
}

/// A half-open `[start, end)` time-of-day window; `end < start` wraps midnight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSlot {
    /// First minute covered
    pub start: NaiveTime,
    /// First minute no longer covered
    pub end: NaiveTime,
    /// Presence inside the window
    pub presence: Presence,
}

impl PresenceSlot {
    /// Create a slot
    pub fn new(start: NaiveTime, end: NaiveTime, presence: Presence) -> Self {
        Self {
            start,
            end,
            presence,
        }
    }

    /// Check if a time falls inside this slot
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// A participant's daily presence pattern
///
/// The first matching slot wins; times outside every slot use `default`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresenceSchedule {
    /// Ordered slots
    pub slots: Vec<PresenceSlot>,
    /// Presence outside every slot
    pub default: Presence,
}

impl PresenceSchedule {
    /// Always the same presence
    pub fn always(presence: Presence) -> Self {
        Self {
            slots: Vec::new(),
            default: presence,
        }
    }

    /// Add a slot
    pub fn with_slot(mut self, start: NaiveTime, end: NaiveTime, presence: Presence) -> Self {
        self.slots.push(PresenceSlot::new(start, end, presence));
        self
    }

    /// Resolve presence at a time of day
    pub fn presence_at(&self, time: NaiveTime) -> Presence {
        self.slots
            .iter()
            .find(|slot| slot.contains(time))
            .map(|slot| slot.presence)
            .unwrap_or(self.default)
    }
}

/// Probability that a candidate replies, by presence
///
/// Defaults to the [`direct`](ReplyOdds::direct) table, and missing fields
/// take their value from it when deserialized on their own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyOdds {
    /// Odds when online
    pub online: f64,
    /// Odds when away
    pub away: f64,
    /// Odds when offline
    pub offline: f64,
}

impl ReplyOdds {
    /// Odds for candidates addressed by `@all`
    pub const fn broadcast() -> Self {
        Self {
            online: 1.0,
            away: 0.5,
            offline: 0.1,
        }
    }

    /// Odds for directly mentioned candidates
    pub const fn direct() -> Self {
        Self {
            online: 1.0,
            away: 0.8,
            offline: 0.3,
        }
    }

    /// Certain reply regardless of presence
    pub const fn always() -> Self {
        Self {
            online: 1.0,
            away: 1.0,
            offline: 1.0,
        }
    }

    /// Odds for a presence
    pub fn for_presence(&self, presence: Presence) -> f64 {
        match presence {
            Presence::Online => self.online,
            Presence::Away => self.away,
            Presence::Offline => self.offline,
        }
    }

    /// All odds are probabilities
    pub fn is_valid(&self) -> bool {
        [self.online, self.away, self.offline]
            .iter()
            .all(|p| (0.0..=1.0).contains(p))
    }

    /// Replace the entries the patch sets
    pub fn patched(self, patch: ReplyOddsPatch) -> Self {
        Self {
            online: patch.online.unwrap_or(self.online),
            away: patch.away.unwrap_or(self.away),
            offline: patch.offline.unwrap_or(self.offline),
        }
    }
}

impl Default for ReplyOdds {
    fn default() -> Self {
        Self::direct()
    }
}

/// Partial odds table, as written in configuration overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ReplyOddsPatch {
    /// Odds when online
    pub online: Option<f64>,
    /// Odds when away
    pub away: Option<f64>,
    /// Odds when offline
    pub offline: Option<f64>,
}
