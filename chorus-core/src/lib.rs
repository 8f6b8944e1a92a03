//! # Chorus
//!
//! Conversation orchestration for roleplay chat rooms where one human talks
//! with one or more simulated personas backed by a remote text-generation
//! service.
//!
//! ## Core Concepts
//!
//! - **Scheduler**: Decides who replies to a message, in what order, and
//!   when an exchange stops
//! - **Mentions**: Canonical `@id` tokens, converted to names for display
//!   and to ordinals for the model
//! - **Adapter**: One persona reply, retried down a ladder of shrinking
//!   history windows when moderation blocks it
//! - **Queue**: Serialized, rate-limited access to each provider
//! - **Memory**: Fixed-capacity buffers promoted into long-term facts
//!
//! ## Example
//!
//! ```rust,ignore
//! use chorus_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let provider = Arc::new(GeminiProvider::from_env()?);
//!     let queues = Arc::new(QueueRegistry::new(config.queue.clone()));
//!     let summarizer = Arc::new(LlmSummarizer::new(provider.clone(), queues.clone()));
//!     let engine = ChatEngine::new(
//!         config,
//!         ProviderRegistry::new().with_provider(provider),
//!         queues,
//!         summarizer,
//!         Arc::new(InMemoryStore::new()),
//!     )?;
//!
//!     let room = Room::new("den", vec!["mika".into()]);
//!     let mut session = RoomSession::new(
//!         room,
//!         HumanProfile::new("Sam").with_age(30),
//!         vec![Participant::new("mika", "Mika").with_age(24)],
//!     )?;
//!
//!     let now = chrono::Local::now().time();
//!     let outcome = engine
//!         .handle_message(&mut session, "@Mika are you awake?", now, &mut rand::thread_rng())
//!         .await;
//!     println!("{:?}", outcome.report.termination);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod id;
pub mod message;
pub mod error;
pub mod config;
pub mod safety;
pub mod presence;
pub mod room;
pub mod mention;
pub mod queue;
pub mod llm;
pub mod postprocess;
pub mod context;
pub mod adapter;
pub mod scheduler;
pub mod memory;
pub mod engine;
pub mod testing;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::id::*;
    pub use crate::message::*;
    pub use crate::error::*;
    pub use crate::config::EngineConfig;
    pub use crate::safety::{AgeGate, SafetyTier};
    pub use crate::presence::{Presence, PresenceSchedule, ReplyOdds};
    pub use crate::room::{AffectionUpdate, HumanProfile, Participant, Room, RoomMode};
    pub use crate::mention::{MentionMap, OrdinalMap};
    pub use crate::queue::{QueueRegistry, RateLimitedQueue};
    pub use crate::llm::{GenerationProvider, GenerationRequest, GenerationResponse, ProviderRegistry};
    pub use crate::llm::anthropic::AnthropicProvider;
    pub use crate::llm::gemini::GeminiProvider;
    pub use crate::context::RoomSession;
    pub use crate::adapter::{GenerationAdapter, PersonaReply};
    pub use crate::scheduler::{ExchangeReport, Termination, TurnScheduler};
    pub use crate::memory::{InMemoryStore, LlmSummarizer, LongTermStore, MemoryPipeline, Summarizer};
    pub use crate::engine::{ChatEngine, ExchangeOutcome};
    pub use std::sync::Arc;
}
