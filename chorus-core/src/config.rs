//! Engine configuration.
//!
//! Every section has a `Default` matching the engine's documented behavior,
//! and every field is `#[serde(default)]`, so a JSON document only needs to
//! mention what it overrides.

use crate::error::{Error, Result};
use crate::llm::SamplingParams;
use crate::presence::{ReplyOdds, ReplyOddsPatch};
use crate::safety::{AgeGate, SafetyTier};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Top-level configuration for the orchestration engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rate-limited request queue settings
    pub queue: QueueConfig,
    /// Age gate for safety tier selection
    pub safety: AgeGate,
    /// Generation adapter settings
    pub generation: GenerationConfig,
    /// Turn-taking scheduler settings
    pub scheduler: SchedulerConfig,
    /// Short-term memory settings
    pub memory: MemoryConfig,
    /// Affection bounds
    pub affection: AffectionConfig,
}

impl EngineConfig {
    /// Parse a JSON document, filling in defaults, and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue.rpm == 0 || self.queue.tier_rpm.values().any(|&rpm| rpm == 0) {
            return Err(Error::Config("rpm must be positive".to_string()));
        }
        if self.scheduler.max_rounds == 0 {
            return Err(Error::Config("max_rounds must be at least 1".to_string()));
        }
        if self.memory.capacity == 0 {
            return Err(Error::Config("memory capacity must be at least 1".to_string()));
        }
        if self.generation.reduced_window > self.generation.history_window {
            return Err(Error::Config(
                "reduced_window cannot exceed history_window".to_string(),
            ));
        }
        if !self.scheduler.broadcast.is_valid() || !self.scheduler.direct.is_valid() {
            return Err(Error::Config(
                "reply odds must lie within 0.0..=1.0".to_string(),
            ));
        }
        if self.affection.min > self.affection.max {
            return Err(Error::Config("affection min exceeds max".to_string()));
        }
        Ok(())
    }

    /// Set the provider used for persona replies
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.generation.provider = provider.into();
        self
    }

    /// Set the requests-per-minute budget for every tier
    pub fn with_rpm(mut self, rpm: u32) -> Self {
        self.queue.rpm = rpm;
        self
    }

    /// Set the queue jitter ceiling
    pub fn with_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.queue.jitter_ms = jitter_ms;
        self
    }
}

/// Rate-limited queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Requests per minute for tiers without an override
    pub rpm: u32,
    /// Upper bound of the uniform random delay added before each request
    pub jitter_ms: u64,
    /// Per-tier requests-per-minute overrides
    pub tier_rpm: HashMap<SafetyTier, u32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            rpm: 15,
            jitter_ms: 500,
            tier_rpm: HashMap::new(),
        }
    }
}

impl QueueConfig {
    /// Requests per minute for a tier
    pub fn rpm_for(&self, tier: SafetyTier) -> u32 {
        self.tier_rpm.get(&tier).copied().unwrap_or(self.rpm)
    }
}

/// Generation adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Registry name of the provider to call
    pub provider: String,
    /// Model override; providers fall back to their own default
    pub model: Option<String>,
    /// Turns of history on the first attempt
    pub history_window: usize,
    /// Turns of history after the first moderation block
    pub reduced_window: usize,
    /// Sampling parameters sent with every request
    pub sampling: SamplingParams,
    /// Quoted spans longer than this (in chars) are never collapsed
    pub quote_threshold: usize,
    /// Maximum share of the reply a preamble may take before a quoted span
    pub preamble_ratio: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: None,
            history_window: 20,
            reduced_window: 5,
            sampling: SamplingParams::default(),
            quote_threshold: 12,
            preamble_ratio: 0.3,
        }
    }
}

/// Turn-taking scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Hard cap on rounds per exchange
    pub max_rounds: usize,
    /// Reply odds when addressed through `@all`
    #[serde(deserialize_with = "broadcast_odds")]
    pub broadcast: ReplyOdds,
    /// Reply odds when directly mentioned
    #[serde(deserialize_with = "direct_odds")]
    pub direct: ReplyOdds,
}

// Each table fills missing entries from its own defaults
fn broadcast_odds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<ReplyOdds, D::Error> {
    Ok(ReplyOdds::broadcast().patched(ReplyOddsPatch::deserialize(deserializer)?))
}

fn direct_odds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<ReplyOdds, D::Error> {
    Ok(ReplyOdds::direct().patched(ReplyOddsPatch::deserialize(deserializer)?))
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            broadcast: ReplyOdds::broadcast(),
            direct: ReplyOdds::direct(),
        }
    }
}

/// Short-term memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Slots per scope
    pub capacity: usize,
    /// Maximum characters of an exchange digest written to a slot
    pub digest_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 6,
            digest_chars: 600,
        }
    }
}

/// Affection bounds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AffectionConfig {
    /// Lowest affection value
    pub min: i32,
    /// Highest affection value
    pub max: i32,
}

impl Default for AffectionConfig {
    fn default() -> Self {
        Self { min: -100, max: 100 }
    }
}

impl AffectionConfig {
    /// Clamp a value into range
    pub fn clamp(&self, value: i32) -> i32 {
        value.clamp(self.min, self.max)
    }
}
