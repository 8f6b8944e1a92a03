//! Error types for the orchestration engine.
//!
//! Uses thiserror for ergonomic error definition. Classification is kept
//! intact all the way up to the caller so the surrounding application can
//! decide how to present each condition.

use crate::id::{ParticipantId, ScopeId};

/// Main error type for the orchestration engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Generation failed for a single persona turn
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Rate-limited queue error
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Memory buffer or promotion error
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    /// Provider/transport error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Provider and transport errors
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// API error from provider
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Network/connection error
    #[error("Network error: {0}")]
    Network(String),

    /// Response parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Rate limited
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        retry_after: Option<std::time::Duration>,
    },

    /// Authentication failed
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// No provider registered under the requested name
    #[error("Provider not registered: {provider}")]
    ProviderNotFound { provider: String },

    /// Request timeout
    #[error("Request timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },
}

/// Errors delivered to callers of the rate-limited queue
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue was cleared before this request started
    #[error("Request cancelled before it started: {description}")]
    Cancelled { description: String },

    /// The task panicked while running
    #[error("Task panicked: {description}")]
    Panicked { description: String },
}

/// Outcome classification for one persona turn
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Every rung of the degradation ladder was blocked by moderation
    #[error("Content blocked after {attempts} attempts: {reason}")]
    ContentBlocked { attempts: usize, reason: String },

    /// The reply hit the output-length cap
    #[error("Reply truncated at the output length cap")]
    Truncated { partial: String },

    /// No text and no recognized block reason
    #[error("Empty reply")]
    EmptyReply,

    /// The request was cancelled while waiting in the rate-limited queue
    #[error("Request cancelled: {0}")]
    QueueCancelled(String),

    /// The queued generation task panicked
    #[error("Generation task panicked: {0}")]
    TaskPanicked(String),

    /// The requested participant is not part of the room
    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    /// Provider or transport failure (not retried by the ladder)
    #[error("Provider error: {0}")]
    Provider(#[from] LlmError),
}

impl From<QueueError> for GenerationError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Cancelled { description } => GenerationError::QueueCancelled(description),
            QueueError::Panicked { description } => GenerationError::TaskPanicked(description),
        }
    }
}

/// Memory-specific errors
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Summarizing a full buffer failed; slots stay unprocessed
    #[error("Summarization failed for {scope}: {reason}")]
    Summarization { scope: ScopeId, reason: String },

    /// Long-term store rejected a record
    #[error("Storage error: {reason}")]
    Storage { reason: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for provider operations
pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Result type for a single persona turn
pub type GenerationResult<T> = std::result::Result<T, GenerationError>;

/// Result type for queued work
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Result type for memory operations
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;
