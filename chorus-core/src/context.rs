//! Room session state threaded through every exchange.
//!
//! A [`RoomSession`] owns everything one room's scheduler loop mutates: the
//! transcript, each participant's affection, and the situational context
//! handed to the generation adapter. Nothing is read from ambient globals.

use crate::error::{Error, Result};
use crate::id::{MessageId, ParticipantId};
use crate::mention::{MentionMap, OrdinalMap};
use crate::message::{Message, Sender};
use crate::room::{HumanProfile, Participant, Room};
use std::collections::HashMap;

/// Mutable state of one room
#[derive(Debug, Clone)]
pub struct RoomSession {
    room: Room,
    human: HumanProfile,
    participants: HashMap<ParticipantId, Participant>,
    transcript: Vec<Message>,
    memory_excerpts: HashMap<ParticipantId, Vec<String>>,
}

impl RoomSession {
    /// Create a session; every roster id needs a matching participant
    pub fn new(room: Room, human: HumanProfile, participants: Vec<Participant>) -> Result<Self> {
        let participants: HashMap<ParticipantId, Participant> = participants
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        if let Some(missing) = room.roster.iter().find(|id| !participants.contains_key(*id)) {
            return Err(Error::Config(format!(
                "roster of room {} names unknown participant {}",
                room.id, missing
            )));
        }
        Ok(Self {
            room,
            human,
            participants,
            transcript: Vec::new(),
            memory_excerpts: HashMap::new(),
        })
    }

    /// Seed the transcript
    pub fn with_transcript(mut self, transcript: Vec<Message>) -> Self {
        self.transcript = transcript;
        self
    }

    /// The room
    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Ordered roster
    pub fn roster(&self) -> &[ParticipantId] {
        &self.room.roster
    }

    /// The human profile
    pub fn human(&self) -> &HumanProfile {
        &self.human
    }

    /// Look up a participant
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Look up a participant for mutation
    pub fn participant_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.participants.get_mut(id)
    }

    /// Participants in roster order
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.room
            .roster
            .iter()
            .filter_map(|id| self.participants.get(id))
    }

    /// Full transcript, oldest first
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        self.transcript.push(message);
    }

    /// Replace the memory excerpts shown to a participant
    pub fn set_memory_excerpts(&mut self, id: ParticipantId, excerpts: Vec<String>) {
        self.memory_excerpts.insert(id, excerpts);
    }

    /// Memory excerpts shown to a participant
    pub fn memory_excerpts(&self, id: &ParticipantId) -> &[String] {
        self.memory_excerpts.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Display name of a sender
    pub fn sender_name(&self, sender: &Sender) -> String {
        match sender {
            Sender::Human => self.human.name.clone(),
            Sender::Participant(id) => self
                .participants
                .get(id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| id.to_string()),
            Sender::System => "system".to_string(),
        }
    }

    /// Name lookup for mention rendering and cleanup
    pub fn mention_map(&self) -> MentionMap {
        MentionMap::new(
            self.participants().map(|p| (p.id.clone(), p.name.clone())),
            self.human.name.clone(),
        )
    }

    /// Ordinal numbering of the roster
    pub fn ordinals(&self) -> OrdinalMap {
        OrdinalMap::new(&self.room.roster)
    }

    /// The most recent `limit` conversational messages before a trigger
    ///
    /// Only messages that precede the trigger count, so replies appended
    /// after it never show up ahead of it. System notices are skipped. The
    /// window is then trimmed so it opens on a human message; a window with
    /// no human message comes back empty.
    pub fn history_window(&self, trigger: MessageId, limit: usize) -> Vec<&Message> {
        let end = self
            .transcript
            .iter()
            .position(|m| m.id == trigger)
            .unwrap_or(self.transcript.len());
        let conversational: Vec<&Message> = self.transcript[..end]
            .iter()
            .filter(|m| m.sender != Sender::System)
            .collect();
        let start = conversational.len().saturating_sub(limit);
        let window = &conversational[start..];
        match window.iter().position(|m| m.sender.is_human()) {
            Some(first_human) => window[first_human..].to_vec(),
            None => Vec::new(),
        }
    }
}
