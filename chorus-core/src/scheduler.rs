//! Turn-taking scheduler.
//!
//! An exchange starts with one human message and runs in rounds. Round 1
//! candidates come from the trigger: `@all` addresses the whole roster,
//! otherwise mentioned participants plus everyone currently online. Each
//! candidate independently draws against a reply probability that depends
//! on how it was addressed and on its presence. Later rounds take the
//! participants mentioned in the previous round's accepted replies.
//!
//! The loop always terminates: on an empty candidate set, when two
//! consecutive rounds have the same candidate set, or at the round cap.
//! Rounds and turns run strictly in sequence, so the transcript and
//! affection updates are deterministic for a given random source.

use crate::adapter::GenerationAdapter;
use crate::config::{AffectionConfig, EngineConfig, SchedulerConfig};
use crate::context::RoomSession;
use crate::error::{GenerationError, Result};
use crate::id::{MessageId, ParticipantId};
use crate::mention::extract_mentions;
use crate::message::Message;
use crate::presence::{Presence, ReplyOdds};
use chrono::NaiveTime;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Why an exchange stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// No one was addressed by the last round
    NoCandidates,
    /// Two consecutive rounds had the same candidate set
    CycleDetected,
    /// The round cap was reached
    RoundCap,
}

/// What happened to one candidate in a round
#[derive(Debug)]
pub enum TurnOutcome {
    /// A reply was appended to the transcript
    Replied {
        /// Author
        participant: ParticipantId,
        /// Appended message
        message: MessageId,
        /// Provider calls spent
        attempts: usize,
    },
    /// Affection-only reply; nothing was appended
    Silent {
        /// Author
        participant: ParticipantId,
    },
    /// The candidate lost the reply draw
    Declined {
        /// Candidate
        participant: ParticipantId,
    },
    /// Generation failed; only this turn is lost
    Failed {
        /// Candidate
        participant: ParticipantId,
        /// Classified failure
        error: GenerationError,
    },
}

impl TurnOutcome {
    /// The candidate this outcome belongs to
    pub fn participant(&self) -> &ParticipantId {
        match self {
            TurnOutcome::Replied { participant, .. }
            | TurnOutcome::Silent { participant }
            | TurnOutcome::Declined { participant }
            | TurnOutcome::Failed { participant, .. } => participant,
        }
    }
}

/// One round of an exchange
#[derive(Debug)]
pub struct RoundReport {
    /// 1-based round number
    pub round: usize,
    /// Sorted, comma-joined candidate ids
    pub signature: String,
    /// Candidates in turn order
    pub candidates: Vec<ParticipantId>,
    /// Per-candidate outcomes in turn order
    pub turns: Vec<TurnOutcome>,
}

/// Summary of a whole exchange
#[derive(Debug)]
pub struct ExchangeReport {
    /// The human message that started it
    pub trigger: MessageId,
    /// Rounds that ran
    pub rounds: Vec<RoundReport>,
    /// Why it stopped
    pub termination: Termination,
    /// Affection after each applied update, in order
    pub affection: Vec<(ParticipantId, i32)>,
}

impl ExchangeReport {
    /// Messages appended by participants, in order
    pub fn replies(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.rounds.iter().flat_map(|r| &r.turns).filter_map(|t| match t {
            TurnOutcome::Replied { message, .. } => Some(*message),
            _ => None,
        })
    }

    /// Participants that replied (visibly or silently), without duplicates
    pub fn responders(&self) -> Vec<ParticipantId> {
        let mut seen = Vec::new();
        for turn in self.rounds.iter().flat_map(|r| &r.turns) {
            if let TurnOutcome::Replied { participant, .. } | TurnOutcome::Silent { participant } = turn {
                if !seen.contains(participant) {
                    seen.push(participant.clone());
                }
            }
        }
        seen
    }

    /// Failed turns
    pub fn failures(&self) -> impl Iterator<Item = (&ParticipantId, &GenerationError)> + '_ {
        self.rounds.iter().flat_map(|r| &r.turns).filter_map(|t| match t {
            TurnOutcome::Failed { participant, error } => Some((participant, error)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    id: ParticipantId,
    odds: ReplyOdds,
    broadcast: bool,
    trigger: Message,
}

/// Runs exchanges for one room at a time
pub struct TurnScheduler<'a> {
    adapter: &'a GenerationAdapter,
    config: SchedulerConfig,
    affection: AffectionConfig,
}

impl<'a> TurnScheduler<'a> {
    /// Create a new scheduler
    ///
    /// Fails when `config` does not pass [`EngineConfig::validate`].
    pub fn new(adapter: &'a GenerationAdapter, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::prevalidated(adapter, config))
    }

    /// Create a scheduler from a config that already passed validation
    pub(crate) fn prevalidated(adapter: &'a GenerationAdapter, config: &EngineConfig) -> Self {
        Self {
            adapter,
            config: config.scheduler.clone(),
            affection: config.affection,
        }
    }

    /// Run one exchange triggered by human-typed text
    ///
    /// `@name` references in the text are converted to canonical ids and
    /// cleaned before the message is appended. `at` is the local time of
    /// day used to resolve presence.
    pub async fn run<R: Rng + Send>(
        &self,
        session: &mut RoomSession,
        human_text: &str,
        at: NaiveTime,
        rng: &mut R,
    ) -> ExchangeReport {
        let map = session.mention_map();
        let trigger = Message::human(map.cleanup(&map.to_canonical(human_text)));
        session.push(trigger.clone());
        self.run_from(session, trigger, at, rng).await
    }

    /// Run an exchange for a trigger already in the transcript
    pub async fn run_from<R: Rng + Send>(
        &self,
        session: &mut RoomSession,
        trigger: Message,
        at: NaiveTime,
        rng: &mut R,
    ) -> ExchangeReport {
        let mut rounds = Vec::new();
        let mut affection = Vec::new();
        let mut woken: HashSet<ParticipantId> = HashSet::new();
        let mut previous_signature: Option<String> = None;
        let mut candidates = self.first_round(session, &trigger, at);
        let mut termination = Termination::RoundCap;

        for round in 1..=self.config.max_rounds {
            if candidates.is_empty() {
                termination = Termination::NoCandidates;
                break;
            }
            let signature = signature(&candidates);
            if previous_signature.as_deref() == Some(signature.as_str()) {
                info!(round, %signature, "candidate set repeated, stopping");
                termination = Termination::CycleDetected;
                break;
            }
            debug!(round, %signature, "starting round");

            let mut turns = Vec::with_capacity(candidates.len());
            let mut accepted: Vec<Message> = Vec::new();

            for candidate in &candidates {
                let presence = session
                    .participant(&candidate.id)
                    .map_or(Presence::Offline, |p| p.presence_at(at));
                let odds = candidate.odds.for_presence(presence).clamp(0.0, 1.0);
                if !rng.gen_bool(odds) {
                    debug!(round, participant = %candidate.id, %presence, odds, "declined to reply");
                    turns.push(TurnOutcome::Declined {
                        participant: candidate.id.clone(),
                    });
                    continue;
                }

                let is_woken = candidate.broadcast && presence != Presence::Online;
                if is_woken {
                    woken.insert(candidate.id.clone());
                }

                match self
                    .adapter
                    .reply(session, &candidate.id, &candidate.trigger, is_woken)
                    .await
                {
                    Ok(reply) => {
                        if let Some(update) = reply.affection {
                            if let Some(p) = session.participant_mut(&candidate.id) {
                                let value = p.apply_affection(update, &self.affection);
                                affection.push((candidate.id.clone(), value));
                            }
                        }
                        match reply.text {
                            Some(text) => {
                                let message = Message::participant(candidate.id.clone(), text);
                                turns.push(TurnOutcome::Replied {
                                    participant: candidate.id.clone(),
                                    message: message.id,
                                    attempts: reply.attempts,
                                });
                                session.push(message.clone());
                                accepted.push(message);
                            }
                            None => turns.push(TurnOutcome::Silent {
                                participant: candidate.id.clone(),
                            }),
                        }
                    }
                    Err(error) => {
                        warn!(round, participant = %candidate.id, %error, "turn failed");
                        turns.push(TurnOutcome::Failed {
                            participant: candidate.id.clone(),
                            error,
                        });
                    }
                }
            }

            info!(
                round,
                %signature,
                accepted = accepted.len(),
                "round finished"
            );
            rounds.push(RoundReport {
                round,
                signature: signature.clone(),
                candidates: candidates.iter().map(|c| c.id.clone()).collect(),
                turns,
            });
            previous_signature = Some(signature);
            candidates = self.next_round(session, &accepted, &woken);
        }

        if termination == Termination::RoundCap && candidates.is_empty() {
            termination = Termination::NoCandidates;
        }
        info!(?termination, rounds = rounds.len(), "exchange finished");
        ExchangeReport {
            trigger: trigger.id,
            rounds,
            termination,
            affection,
        }
    }

    fn first_round(&self, session: &RoomSession, trigger: &Message, at: NaiveTime) -> Vec<Candidate> {
        let mentions = extract_mentions(&trigger.content);
        session
            .participants()
            .filter_map(|p| {
                let (odds, broadcast) = if mentions.everyone {
                    (self.config.broadcast, true)
                } else if mentions.names(&p.id) {
                    (self.config.direct, false)
                } else if p.presence_at(at).is_available() {
                    (ReplyOdds::always(), false)
                } else {
                    return None;
                };
                Some(Candidate {
                    id: p.id.clone(),
                    odds,
                    broadcast,
                    trigger: trigger.clone(),
                })
            })
            .collect()
    }

    fn next_round(
        &self,
        session: &RoomSession,
        accepted: &[Message],
        woken: &HashSet<ParticipantId>,
    ) -> Vec<Candidate> {
        let mut chosen: HashMap<ParticipantId, Candidate> = HashMap::new();
        for reply in accepted {
            let Some(author) = reply.sender.participant() else {
                continue;
            };
            let mentions = extract_mentions(&reply.content);
            for id in session.roster() {
                if id == author {
                    continue;
                }
                let direct = mentions.names(id);
                let broadcast = mentions.everyone && !woken.contains(id);
                if !direct && !broadcast {
                    continue;
                }
                let upgrade = direct && chosen.get(id).is_some_and(|c| c.broadcast);
                if chosen.contains_key(id) && !upgrade {
                    continue;
                }
                chosen.insert(
                    id.clone(),
                    Candidate {
                        id: id.clone(),
                        odds: if direct { self.config.direct } else { self.config.broadcast },
                        broadcast: !direct,
                        trigger: reply.clone(),
                    },
                );
            }
        }

        session
            .roster()
            .iter()
            .filter_map(|id| chosen.remove(id))
            .collect()
    }
}

fn signature(candidates: &[Candidate]) -> String {
    let mut ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
    ids.sort_unstable();
    ids.join(",")
}
