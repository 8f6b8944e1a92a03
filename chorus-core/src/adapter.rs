//! Generation adapter and the moderation degradation ladder.
//!
//! One call to [`GenerationAdapter::reply`] produces at most one persona
//! reply. The request carries the persona's instructions, a role-tagged
//! history window, the trigger, and the safety tier picked by the age gate.
//! When the service blocks a reply on moderation grounds the context is
//! shrunk and the call repeated:
//!
//! 1. the full history window (20 messages by default);
//! 2. the reduced window (5), re-trimmed to open on a human message;
//! 3. no history at all, only the trigger.
//!
//! A block on the last rung is terminal. Transport failures, truncation and
//! empty replies are never retried here. Every attempt goes through the
//! rate-limited queue for (provider, tier).

use crate::config::{EngineConfig, GenerationConfig};
use crate::context::RoomSession;
use crate::error::{GenerationError, GenerationResult};
use crate::id::ParticipantId;
use crate::llm::{FinishReason, GenerationResponse, PersonaPrompt, ProviderRegistry};
use crate::mention::{MentionMap, OrdinalMap};
use crate::message::{Message, Sender, Turn};
use crate::postprocess::PostProcessor;
use crate::queue::QueueRegistry;
use crate::room::AffectionUpdate;
use crate::safety::{AgeGate, SafetyTier};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Number of rungs on the degradation ladder
pub const LADDER_ATTEMPTS: usize = 3;

/// An accepted persona reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaReply {
    /// Canonical-form text; `None` for a silent affection-only reply
    pub text: Option<String>,
    /// Affection update parsed from the reply's last line
    pub affection: Option<AffectionUpdate>,
    /// Provider calls spent, including blocked ones
    pub attempts: usize,
    /// Safety tier used for every attempt
    pub tier: SafetyTier,
}

impl PersonaReply {
    /// Nothing will be shown in the transcript
    pub fn is_silent(&self) -> bool {
        self.text.is_none()
    }
}

/// Wraps calls to the generation service for persona turns
pub struct GenerationAdapter {
    providers: ProviderRegistry,
    queues: Arc<QueueRegistry>,
    config: GenerationConfig,
    gate: AgeGate,
}

impl GenerationAdapter {
    /// Create a new adapter
    pub fn new(providers: ProviderRegistry, queues: Arc<QueueRegistry>, config: &EngineConfig) -> Self {
        Self {
            providers,
            queues,
            config: config.generation.clone(),
            gate: config.safety,
        }
    }

    /// Provider registry
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Queue registry shared with other adapters
    pub fn queues(&self) -> &Arc<QueueRegistry> {
        &self.queues
    }

    /// History sizes for each rung of the ladder
    pub fn ladder(&self) -> [usize; LADDER_ATTEMPTS] {
        [self.config.history_window, self.config.reduced_window, 0]
    }

    /// Safety tier for a participant talking to this session's human
    pub fn tier_for(&self, session: &RoomSession, participant: &ParticipantId) -> SafetyTier {
        let persona_age = session.participant(participant).and_then(|p| p.age);
        self.gate.tier_for(session.human().age, persona_age)
    }

    /// Generate one participant's reply to a trigger message
    ///
    /// `woken` marks a participant pulled in by a broadcast while away or
    /// offline; the prompt asks for a short, reluctant reply.
    pub async fn reply(
        &self,
        session: &RoomSession,
        participant_id: &ParticipantId,
        trigger: &Message,
        woken: bool,
    ) -> GenerationResult<PersonaReply> {
        let participant = session
            .participant(participant_id)
            .ok_or_else(|| GenerationError::UnknownParticipant(participant_id.clone()))?;
        let tier = self.tier_for(session, participant_id);
        let provider = self.providers.get(&self.config.provider)?;
        let queue = self.queues.queue(provider.name(), tier);

        let map = session.mention_map();
        let ordinals = session.ordinals();
        let message = render_turn(session, &ordinals, participant_id, trigger).text;
        let context = self.context_lines(session, participant_id, &map, &ordinals);
        let processor = PostProcessor::new(
            participant.name.clone(),
            self.config.quote_threshold,
            self.config.preamble_ratio,
        );

        let mut last_reason = String::new();
        for (rung, window) in self.ladder().into_iter().enumerate() {
            let attempt = rung + 1;
            let history: Vec<Turn> = session
                .history_window(trigger.id, window)
                .into_iter()
                .map(|m| render_turn(session, &ordinals, participant_id, m))
                .collect();
            debug!(
                participant = %participant_id,
                attempt,
                window,
                turns = history.len(),
                %tier,
                "requesting persona reply"
            );

            let prompt = PersonaPrompt {
                persona_name: participant.name.clone(),
                instructions: participant.persona.clone(),
                human_name: session.human().name.clone(),
                context: context.clone(),
                history,
                message: message.clone(),
                woken,
                model: self.config.model.clone(),
                sampling: self.config.sampling,
                safety: tier,
            };
            let provider = Arc::clone(&provider);
            let response: GenerationResponse = queue
                .enqueue(
                    move || async move {
                        provider
                            .get_persona_reply(prompt)
                            .await
                            .map_err(GenerationError::from)
                    },
                    format!("reply {participant_id} attempt {attempt}"),
                )
                .await?;

            if response.is_blocked() {
                last_reason = response
                    .block_reason
                    .clone()
                    .unwrap_or_else(|| "safety".to_string());
                warn!(
                    participant = %participant_id,
                    attempt,
                    reason = %last_reason,
                    "reply blocked by moderation"
                );
                continue;
            }

            let canonical = map.to_canonical(&ordinals.to_canonical(&response.text));
            if response.finish_reason == FinishReason::MaxTokens {
                warn!(participant = %participant_id, attempt, "reply truncated");
                return Err(GenerationError::Truncated {
                    partial: map.cleanup(&canonical),
                });
            }
            if canonical.trim().is_empty() {
                return Err(GenerationError::EmptyReply);
            }

            let processed = processor.process(&canonical);
            let body = map.cleanup(&processed.body);
            if body.is_empty() && processed.affection.is_none() {
                return Err(GenerationError::EmptyReply);
            }

            info!(
                participant = %participant_id,
                attempt,
                silent = body.is_empty(),
                affection = ?processed.affection,
                "persona reply accepted"
            );
            return Ok(PersonaReply {
                text: (!body.is_empty()).then_some(body),
                affection: processed.affection,
                attempts: attempt,
                tier,
            });
        }

        Err(GenerationError::ContentBlocked {
            attempts: LADDER_ATTEMPTS,
            reason: last_reason,
        })
    }

    fn context_lines(
        &self,
        session: &RoomSession,
        participant_id: &ParticipantId,
        map: &MentionMap,
        ordinals: &OrdinalMap,
    ) -> Vec<String> {
        let mut lines = Vec::new();
        let roster: Vec<String> = session
            .roster()
            .iter()
            .filter_map(|id| {
                let ordinal = ordinals.ordinal_of(id)?;
                let name = map.name_of(id.as_str())?;
                Some(format!("@{ordinal} = {name}"))
            })
            .collect();
        if !roster.is_empty() {
            lines.push(format!("Participants: {}", roster.join(", ")));
        }
        if let Some(p) = session.participant(participant_id) {
            lines.push(format!(
                "Your affection toward {}: {}",
                session.human().name,
                p.affection
            ));
        }
        for excerpt in session.memory_excerpts(participant_id) {
            lines.push(format!("Memory: {excerpt}"));
        }
        lines
    }
}

/// Role-tag a transcript message for one participant's request
///
/// The participant's own messages are model turns. Everyone else's are
/// user turns with a `[name]: ` prefix. Mentions are compacted to ordinals.
pub fn render_turn(
    session: &RoomSession,
    ordinals: &OrdinalMap,
    participant_id: &ParticipantId,
    message: &Message,
) -> Turn {
    let text = ordinals.to_ordinal(&message.content);
    match &message.sender {
        Sender::Participant(id) if id == participant_id => Turn::model(text),
        sender => Turn::user(format!("[{}]: {}", session.sender_name(sender), text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::message::Role;
    use crate::room::{HumanProfile, Participant, Room};
    use crate::testing::{ScriptedProvider, ScriptedReply};
    use std::time::Duration;

    fn session(human_age: Option<u32>) -> RoomSession {
        let mut human = HumanProfile::new("Sam");
        human.age = human_age;
        let room = Room::new("room", vec!["A".into(), "B".into()]);
        let mut s = RoomSession::new(
            room,
            human,
            vec![
                Participant::new("A", "Alice").with_age(25).with_persona("Barista."),
                Participant::new("B", "Bob").with_age(30),
            ],
        )
        .unwrap();
        for i in 0..12 {
            s.push(Message::human(format!("h{i} @B")));
            s.push(Message::participant("A".into(), format!("a{i}")));
        }
        s
    }

    fn adapter(provider: Arc<ScriptedProvider>) -> GenerationAdapter {
        let config = EngineConfig::default().with_provider("scripted").with_jitter_ms(0);
        let registry = ProviderRegistry::new().with_provider(provider);
        let queues = Arc::new(QueueRegistry::new(config.queue.clone()));
        GenerationAdapter::new(registry, queues, &config)
    }

    fn trigger(s: &mut RoomSession, text: &str) -> Message {
        let m = Message::human(text);
        s.push(m.clone());
        m
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_then_success_on_reduced_window() {
        let provider = Arc::new(
            ScriptedProvider::new("scripted")
                .with_reply(ScriptedReply::Blocked("SAFETY".into()))
                .with_reply(ScriptedReply::Text("Hi @2!\n+1".into())),
        );
        let adapter = adapter(provider.clone());
        let mut s = session(Some(30));
        let t = trigger(&mut s, "@A hello");

        let reply = adapter.reply(&s, &"A".into(), &t, false).await.unwrap();
        assert_eq!(reply.text.as_deref(), Some("Hi @B!"));
        assert_eq!(reply.affection, Some(AffectionUpdate::Delta(1)));
        assert_eq!(reply.attempts, 2);
        assert_eq!(reply.tier, SafetyTier::Relaxed);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].history.len(), 20);
        assert!(requests[1].history.len() <= 5);
        assert_eq!(requests[1].history.first().map(|t| t.role), Some(Role::User));
        assert!(requests[1].history[0].text.starts_with("[Sam]: "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_blocks_is_terminal() {
        let provider = Arc::new(
            ScriptedProvider::new("scripted")
                .with_reply(ScriptedReply::Blocked("SAFETY".into()))
                .with_reply(ScriptedReply::Blocked("SAFETY".into()))
                .with_reply(ScriptedReply::Blocked("PROHIBITED_CONTENT".into()))
                .with_reply(ScriptedReply::Text("never sent".into())),
        );
        let adapter = adapter(provider.clone());
        let mut s = session(Some(30));
        let t = trigger(&mut s, "hello");

        let err = adapter.reply(&s, &"A".into(), &t, false).await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::ContentBlocked { attempts: 3, ref reason } if reason == "PROHIBITED_CONTENT"
        ));

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].history.is_empty());
        assert_eq!(requests[2].message, "[Sam]: hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncation_and_empty_are_not_retried() {
        let provider = Arc::new(
            ScriptedProvider::new("scripted")
                .with_reply(ScriptedReply::Truncated("I was saying".into()))
                .with_reply(ScriptedReply::Text("   ".into())),
        );
        let adapter = adapter(provider.clone());
        let mut s = session(None);
        let t = trigger(&mut s, "hello");

        let err = adapter.reply(&s, &"A".into(), &t, false).await.unwrap_err();
        assert!(matches!(err, GenerationError::Truncated { ref partial } if partial == "I was saying"));
        assert_eq!(provider.request_count(), 1);

        let err = adapter.reply(&s, &"A".into(), &t, false).await.unwrap_err();
        assert!(matches!(err, GenerationError::EmptyReply));
        assert_eq!(provider.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_surfaces_without_retry() {
        let provider = Arc::new(
            ScriptedProvider::new("scripted").with_reply(ScriptedReply::Fail("connection reset".into())),
        );
        let adapter = adapter(provider.clone());
        let mut s = session(Some(30));
        let t = trigger(&mut s, "hello");

        let err = adapter.reply(&s, &"A".into(), &t, false).await.unwrap_err();
        assert!(matches!(err, GenerationError::Provider(LlmError::Network(_))));
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_affection_reply() {
        let provider = Arc::new(ScriptedProvider::new("scripted").with_reply(ScriptedReply::Text("-2".into())));
        let adapter = adapter(provider);
        let mut s = session(Some(30));
        let t = trigger(&mut s, "hello");

        let reply = adapter.reply(&s, &"A".into(), &t, false).await.unwrap();
        assert!(reply.is_silent());
        assert_eq!(reply.affection, Some(AffectionUpdate::Delta(-2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_shape() {
        let provider = Arc::new(ScriptedProvider::new("scripted").with_reply(ScriptedReply::Text("ok".into())));
        let adapter = adapter(provider.clone());
        let mut s = session(Some(15));
        s.set_memory_excerpts("A".into(), vec!["Sam likes jazz".into()]);
        let t = trigger(&mut s, "@A and @B, thoughts?");

        adapter.reply(&s, &"A".into(), &t, true).await.unwrap();
        let request = &provider.requests()[0];

        assert_eq!(request.safety, SafetyTier::Strict);
        assert_eq!(request.message, "[Sam]: @1 and @2, thoughts?");
        assert!(request.system.contains("You are Alice"));
        assert!(request.system.contains("Barista."));
        assert!(request.system.contains("@1 = Alice, @2 = Bob"));
        assert!(request.system.contains("Memory: Sam likes jazz"));
        assert!(request.system.contains("reluctant"));
        // own turns go out as model turns without a label
        assert!(request.history.iter().any(|t| t.role == Role::Model && t.text == "a11"));
        assert!(request.history.iter().all(|t| t.role == Role::Model || t.text.starts_with("[Sam]: ")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_rate_limited() {
        let provider = Arc::new(
            ScriptedProvider::new("scripted")
                .with_reply(ScriptedReply::Blocked("SAFETY".into()))
                .with_reply(ScriptedReply::Text("ok".into())),
        );
        let adapter = adapter(provider);
        let mut s = session(Some(30));
        let t = trigger(&mut s, "hello");

        let started = tokio::time::Instant::now();
        adapter.reply(&s, &"A".into(), &t, false).await.unwrap();
        // default 15 rpm spaces the retry by 4s
        assert!(started.elapsed() >= Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_unknown_provider_and_participant() {
        let provider = Arc::new(ScriptedProvider::new("other"));
        let adapter = adapter(provider);
        let mut s = session(Some(30));
        let t = trigger(&mut s, "hello");

        let err = adapter.reply(&s, &"A".into(), &t, false).await.unwrap_err();
        assert!(matches!(err, GenerationError::Provider(LlmError::ProviderNotFound { .. })));

        let err = adapter.reply(&s, &"Z".into(), &t, false).await.unwrap_err();
        assert!(matches!(err, GenerationError::UnknownParticipant(_)));
    }
}
