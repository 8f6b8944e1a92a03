//! Chat engine facade.
//!
//! [`ChatEngine`] wires the generation adapter, the turn scheduler and the
//! memory pipeline together. One call to [`ChatEngine::handle_message`]
//! runs a whole exchange and writes its digest to memory.

use crate::adapter::GenerationAdapter;
use crate::config::EngineConfig;
use crate::context::RoomSession;
use crate::error::{MemoryError, Result};
use crate::id::ScopeId;
use crate::llm::ProviderRegistry;
use crate::memory::{LongTermStore, MemoryPipeline, MemoryRecord, Summarizer};
use crate::queue::QueueRegistry;
use crate::scheduler::{ExchangeReport, TurnScheduler};
use chrono::NaiveTime;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

/// Long-term facts shown to a participant per exchange
pub const RECALL_LIMIT: usize = 5;

/// Result of one handled message
#[derive(Debug)]
pub struct ExchangeOutcome {
    /// What the scheduler did
    pub report: ExchangeReport,
    /// Records promoted while writing the digest
    pub promoted: Vec<MemoryRecord>,
    /// Memory writes that failed; the exchange itself still stands
    pub memory_errors: Vec<MemoryError>,
}

/// Orchestrates exchanges for any number of rooms
pub struct ChatEngine {
    config: EngineConfig,
    adapter: GenerationAdapter,
    memory: MemoryPipeline,
}

impl ChatEngine {
    /// Create an engine; the configuration is validated first
    ///
    /// `queues` carries every provider call the engine makes. Hand the same
    /// registry to an [`LlmSummarizer`](crate::memory::LlmSummarizer) so
    /// promotions count against the same rate budget.
    pub fn new(
        config: EngineConfig,
        providers: ProviderRegistry,
        queues: Arc<QueueRegistry>,
        summarizer: Arc<dyn Summarizer>,
        store: Arc<dyn LongTermStore>,
    ) -> Result<Self> {
        config.validate()?;
        let adapter = GenerationAdapter::new(providers, queues, &config);
        let memory = MemoryPipeline::new(config.memory.capacity, summarizer, store);
        Ok(Self {
            config,
            adapter,
            memory,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Generation adapter
    pub fn adapter(&self) -> &GenerationAdapter {
        &self.adapter
    }

    /// Memory pipeline
    pub fn memory(&self) -> &MemoryPipeline {
        &self.memory
    }

    /// Run one exchange for a human message
    ///
    /// Each participant's recalled memory is loaded into the session, the
    /// scheduler runs to termination, and a digest of the exchange is
    /// written to the room scope and to every responder's scope.
    pub async fn handle_message<R: Rng + Send>(
        &self,
        session: &mut RoomSession,
        text: &str,
        at: NaiveTime,
        rng: &mut R,
    ) -> ExchangeOutcome {
        let mut memory_errors = Vec::new();
        self.load_memory(session, &mut memory_errors).await;

        let scheduler = TurnScheduler::prevalidated(&self.adapter, &self.config);
        let report = scheduler.run(session, text, at, rng).await;

        let mut promoted = Vec::new();
        if let Some(digest) = self.digest(session, &report) {
            let mut scopes: Vec<ScopeId> = vec![session.room().id.clone().into()];
            scopes.extend(report.responders().into_iter().map(ScopeId::from));
            for scope in scopes {
                match self.memory.record(&scope, digest.clone()).await {
                    Ok(outcome) => promoted.extend(outcome.promoted),
                    Err(error) => {
                        warn!(%scope, %error, "failed to record exchange digest");
                        memory_errors.push(error);
                    }
                }
            }
        }

        ExchangeOutcome {
            report,
            promoted,
            memory_errors,
        }
    }

    /// Promote a scope's pending entries now
    pub async fn flush(&self, scope: &ScopeId) -> Result<Vec<MemoryRecord>> {
        Ok(self.memory.flush(scope).await?)
    }

    /// Delete everything remembered for a scope
    pub async fn delete_scope(&self, scope: &ScopeId) -> Result<usize> {
        Ok(self.memory.delete_scope(scope).await?)
    }

    async fn load_memory(&self, session: &mut RoomSession, errors: &mut Vec<MemoryError>) {
        let roster = session.roster().to_vec();
        for id in roster {
            let scope = ScopeId::from(id.clone());
            match self.memory.recall(&scope, RECALL_LIMIT).await {
                Ok(lines) => session.set_memory_excerpts(id, lines),
                Err(error) => {
                    warn!(%scope, %error, "failed to recall memory");
                    errors.push(error);
                }
            }
        }
    }

    fn digest(&self, session: &RoomSession, report: &ExchangeReport) -> Option<String> {
        let mut ids = vec![report.trigger];
        ids.extend(report.replies());
        if ids.len() < 2 {
            return None;
        }

        let map = session.mention_map();
        let lines: Vec<String> = session
            .transcript()
            .iter()
            .filter(|m| ids.contains(&m.id))
            .map(|m| format!("{}: {}", session.sender_name(&m.sender), map.to_display(&m.content)))
            .collect();
        let digest: String = lines.join("\n").chars().take(self.config.memory.digest_chars).collect();
        debug!(chars = digest.chars().count(), "exchange digest built");
        Some(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ParticipantId;
    use crate::memory::{InMemoryStore, InsertOutcome};
    use crate::room::{HumanProfile, Participant, Room};
    use crate::testing::{FixedSummarizer, ScriptedProvider, ScriptedReply};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    fn engine(provider: Arc<ScriptedProvider>, summarizer: Arc<FixedSummarizer>, capacity: usize) -> ChatEngine {
        let mut config = EngineConfig::default()
            .with_provider("scripted")
            .with_rpm(6000)
            .with_jitter_ms(0);
        config.memory.capacity = capacity;
        let queues = Arc::new(QueueRegistry::new(config.queue.clone()));
        ChatEngine::new(
            config,
            ProviderRegistry::new().with_provider(provider),
            queues,
            summarizer,
            Arc::new(InMemoryStore::new()),
        )
        .unwrap()
    }

    fn session() -> RoomSession {
        RoomSession::new(
            Room::new("den", vec!["A".into(), "B".into()]),
            HumanProfile::new("Sam").with_age(30),
            vec![
                Participant::new("A", "Alice").with_age(30),
                Participant::new("B", "Bob").with_age(30),
            ],
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_digest_written_to_room_and_responders() {
        let provider = Arc::new(ScriptedProvider::new("scripted").with_fallback(ScriptedReply::text("hey @user")));
        let engine = engine(provider, Arc::new(FixedSummarizer::new(vec![])), 6);
        let mut s = session();
        let mut rng = StdRng::seed_from_u64(0);

        let outcome = engine.handle_message(&mut s, "hello @Alice", noon(), &mut rng).await;
        assert!(outcome.memory_errors.is_empty());
        assert_eq!(outcome.report.replies().count(), 2);

        let room = engine.memory().slots(&ScopeId::Room("den".into())).await;
        assert_eq!(room.len(), 1);
        assert_eq!(room[0].content, "Sam: hello @Alice\nAlice: hey @Sam\nBob: hey @Sam");
        for id in ["A", "B"] {
            let slots = engine.memory().slots(&ScopeId::from(ParticipantId::new(id))).await;
            assert_eq!(slots.len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_promotes() {
        let provider = Arc::new(ScriptedProvider::new("scripted"));
        let summarizer = Arc::new(FixedSummarizer::new(vec!["Sam greets a lot".into()]));
        let engine = engine(provider, summarizer.clone(), 2);
        let mut s = session();
        let mut rng = StdRng::seed_from_u64(0);

        for text in ["one", "two"] {
            let outcome = engine.handle_message(&mut s, text, noon(), &mut rng).await;
            assert!(outcome.promoted.is_empty());
        }
        let outcome = engine.handle_message(&mut s, "three", noon(), &mut rng).await;
        // room, A and B each promote once
        assert_eq!(outcome.promoted.len(), 3);
        assert_eq!(summarizer.calls().len(), 3);

        let room = ScopeId::Room("den".into());
        let records = engine.memory().store().records(&room).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content(), "Sam greets a lot");
    }

    #[tokio::test(start_paused = true)]
    async fn test_recalled_memory_reaches_prompt() {
        let provider = Arc::new(ScriptedProvider::new("scripted"));
        let engine = engine(provider.clone(), Arc::new(FixedSummarizer::new(vec![])), 6);
        let alice = ScopeId::from(ParticipantId::new("A"));
        let outcome = engine.memory().record(&alice, "Sam likes green tea").await.unwrap();
        assert_eq!(outcome.outcome, InsertOutcome::Appended { index: 0 });

        let mut s = session();
        let mut rng = StdRng::seed_from_u64(0);
        engine.handle_message(&mut s, "@Alice morning", noon(), &mut rng).await;

        let requests = provider.requests();
        assert!(requests[0].system.contains("Sam likes green tea"));
        assert!(!requests[1].system.contains("Sam likes green tea"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_promotion_is_reported() {
        let provider = Arc::new(ScriptedProvider::new("scripted"));
        let engine = engine(provider, Arc::new(FixedSummarizer::failing("service down")), 1);
        let mut s = session();
        let mut rng = StdRng::seed_from_u64(0);

        engine.handle_message(&mut s, "first", noon(), &mut rng).await;
        let outcome = engine.handle_message(&mut s, "second", noon(), &mut rng).await;
        assert_eq!(outcome.memory_errors.len(), 3);
        assert_eq!(outcome.report.replies().count(), 2);

        let room = engine.memory().slots(&ScopeId::Room("den".into())).await;
        assert_eq!(room.len(), 1);
        assert!(room[0].content.starts_with("Sam: first"));
        assert!(!room[0].processed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_and_delete_passthrough() {
        let provider = Arc::new(ScriptedProvider::new("scripted"));
        let engine = engine(provider, Arc::new(FixedSummarizer::new(vec!["fact".into()])), 6);
        let mut s = session();
        let mut rng = StdRng::seed_from_u64(0);
        engine.handle_message(&mut s, "hi", noon(), &mut rng).await;

        let room = ScopeId::Room("den".into());
        let records = engine.flush(&room).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(engine.delete_scope(&room).await.unwrap(), 1);
        assert!(engine.memory().store().records(&room).await.unwrap().is_empty());
        assert!(engine.memory().slots(&room).await.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.generation.history_window = 2;
        config.generation.reduced_window = 5;
        let queues = Arc::new(QueueRegistry::new(config.queue.clone()));
        let result = ChatEngine::new(
            config,
            ProviderRegistry::new(),
            queues,
            Arc::new(FixedSummarizer::new(vec![])),
            Arc::new(InMemoryStore::new()),
        );
        assert!(result.is_err());
    }
}
