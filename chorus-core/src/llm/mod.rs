//! Generation provider implementations.
//!
//! Every remote text-generation service sits behind [`GenerationProvider`].
//! Wire formats never leak past this module: callers build a
//! [`GenerationRequest`] (or a [`PersonaPrompt`]) and get back a
//! [`GenerationResponse`] with a normalized finish reason and an optional
//! moderation block indicator.

pub mod anthropic;
pub mod gemini;

use crate::error::{LlmError, LlmResult};
use crate::message::{Role, Turn};
use crate::safety::SafetyTier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Connect timeout for provider HTTP clients
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-request timeout for provider HTTP clients
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Core trait for generation providers
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Send a generation request
    async fn generate(&self, request: GenerationRequest) -> LlmResult<GenerationResponse>;

    /// Check that the configured credentials are accepted
    ///
    /// Returns `Ok(false)` for a rejected key and `Err` when the check
    /// itself could not be made.
    async fn validate_key(&self) -> LlmResult<bool>;

    /// Ask for one persona's reply
    async fn get_persona_reply(&self, prompt: PersonaPrompt) -> LlmResult<GenerationResponse> {
        self.generate(prompt.into_request()).await
    }

    /// Get the provider name
    fn name(&self) -> &str;

    /// Model used when a request does not name one
    fn default_model(&self) -> &str;
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Temperature
    pub temperature: f32,
    /// Nucleus sampling
    pub top_p: f32,
    /// Top-k sampling
    pub top_k: u32,
    /// Output length cap in tokens
    pub max_output_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.9,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 1024,
        }
    }
}

/// Request for one generation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model override; `None` uses the provider default
    pub model: Option<String>,
    /// System instructions
    pub system: String,
    /// Ordered role-tagged history, oldest first
    pub history: Vec<Turn>,
    /// The new input turn
    pub message: String,
    /// Sampling parameters
    pub sampling: SamplingParams,
    /// Filtering policy
    pub safety: SafetyTier,
}

impl GenerationRequest {
    /// Create a new request for a single input turn
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            model: None,
            system: String::new(),
            history: Vec::new(),
            message: message.into(),
            sampling: SamplingParams::default(),
            safety: SafetyTier::Strict,
        }
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the system instructions
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    /// Set history
    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    /// Set sampling parameters
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Set the safety tier
    pub fn with_safety(mut self, safety: SafetyTier) -> Self {
        self.safety = safety;
        self
    }

    /// History plus the new message, with same-role neighbours merged
    ///
    /// Providers that require strictly alternating roles get a valid
    /// sequence; the result always ends on a user turn.
    pub fn conversation(&self) -> Vec<Turn> {
        let mut merged: Vec<Turn> = Vec::with_capacity(self.history.len() + 1);
        for turn in self
            .history
            .iter()
            .cloned()
            .chain(std::iter::once(Turn::user(self.message.clone())))
        {
            match merged.last_mut() {
                Some(last) if last.role == turn.role => {
                    last.text.push('\n');
                    last.text.push_str(&turn.text);
                }
                _ => merged.push(turn),
            }
        }
        // Some services reject a conversation opening on a model turn
        if merged.first().is_some_and(|t| t.role == Role::Model) {
            merged.remove(0);
        }
        merged
    }
}

/// A persona reply request before provider formatting
#[derive(Debug, Clone)]
pub struct PersonaPrompt {
    /// Display name of the persona
    pub persona_name: String,
    /// Persona instructions
    pub instructions: String,
    /// Display name of the human
    pub human_name: String,
    /// Context lines appended to the instructions (relationship, memory)
    pub context: Vec<String>,
    /// Role-tagged history window
    pub history: Vec<Turn>,
    /// Trigger text
    pub message: String,
    /// Drawn into the conversation while away or offline
    pub woken: bool,
    /// Model override
    pub model: Option<String>,
    /// Sampling parameters
    pub sampling: SamplingParams,
    /// Filtering policy
    pub safety: SafetyTier,
}

impl PersonaPrompt {
    /// Build the system instructions for this persona
    pub fn system_prompt(&self) -> String {
        let mut system = format!(
            "You are {name}, chatting with {human} and others in a messaging app.\n\
             Stay in character. Reply only as {name}, in a single chat message, \
             without a name label. Earlier messages from other speakers are \
             shown as \"[name]: text\". Participants are referenced as @1, @2 \
             and so on; @user is {human} and @all is everyone.",
            name = self.persona_name,
            human = self.human_name,
        );
        if !self.instructions.is_empty() {
            system.push_str("\n\n");
            system.push_str(&self.instructions);
        }
        for line in &self.context {
            system.push('\n');
            system.push_str(line);
        }
        if self.woken {
            system.push_str(
                "\n\nYou were busy or asleep and got pulled into the chat. \
                 Keep your reply short and a little reluctant.",
            );
        }
        system
    }

    /// Lower into a plain generation request
    pub fn into_request(self) -> GenerationRequest {
        let system = self.system_prompt();
        GenerationRequest {
            model: self.model,
            system,
            history: self.history,
            message: self.message,
            sampling: self.sampling,
            safety: self.safety,
        }
    }
}

/// Response from one generation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Reply text (possibly empty)
    pub text: String,
    /// Why generation stopped
    pub finish_reason: FinishReason,
    /// Moderation block indicator reported by the service
    pub block_reason: Option<String>,
}

impl GenerationResponse {
    /// A normal completed reply
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: FinishReason::Stop,
            block_reason: None,
        }
    }

    /// A reply blocked by moderation
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            finish_reason: FinishReason::Safety,
            block_reason: Some(reason.into()),
        }
    }

    /// A reply cut at the output length cap
    pub fn truncated(partial: impl Into<String>) -> Self {
        Self {
            text: partial.into(),
            finish_reason: FinishReason::MaxTokens,
            block_reason: None,
        }
    }

    /// Moderation stopped this reply
    pub fn is_blocked(&self) -> bool {
        self.block_reason.is_some() || self.finish_reason == FinishReason::Safety
    }
}

/// Normalized reason a provider stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the reply
    Stop,
    /// Hit the output length cap
    MaxTokens,
    /// Stopped by moderation
    Safety,
    /// Anything else the service reports
    Other,
}

/// Providers resolved by name at call time
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn GenerationProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn GenerationProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Builder-style registration
    pub fn with_provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Look up a provider
    pub fn get(&self, name: &str) -> LlmResult<Arc<dyn GenerationProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| LlmError::ProviderNotFound {
                provider: name.to_string(),
            })
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

/// Shared HTTP client with provider timeouts
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Classify a transport failure
pub(crate) fn transport_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout {
            duration: REQUEST_TIMEOUT,
        }
    } else {
        LlmError::Network(err.to_string())
    }
}

/// Classify a non-success HTTP status
pub(crate) fn status_error(
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
    body: String,
) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::AuthenticationFailed { reason: body },
        429 => LlmError::RateLimited { retry_after },
        code => LlmError::Api {
            status: code,
            message: body,
        },
    }
}

/// Read a `retry-after` header given in seconds
pub(crate) fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
