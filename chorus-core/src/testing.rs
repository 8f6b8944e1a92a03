//! Testing utilities for the orchestration engine.
//!
//! This module provides deterministic doubles for integration tests:
//! - `ScriptedProvider` returns queued replies and records every request
//! - `FixedSummarizer` returns fixed facts, or fails on demand

use crate::error::{LlmError, LlmResult, MemoryError, MemoryResult};
use crate::id::ScopeId;
use crate::llm::{GenerationProvider, GenerationRequest, GenerationResponse, PersonaPrompt};
use crate::memory::Summarizer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// A scripted provider reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Completed reply text
    Text(String),
    /// Moderation block with a reason
    Blocked(String),
    /// Reply cut at the length cap
    Truncated(String),
    /// Transport failure
    Fail(String),
}

impl ScriptedReply {
    /// Shorthand for a text reply
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }

    fn into_response(self) -> LlmResult<GenerationResponse> {
        match self {
            ScriptedReply::Text(text) => Ok(GenerationResponse::text(text)),
            ScriptedReply::Blocked(reason) => Ok(GenerationResponse::blocked(reason)),
            ScriptedReply::Truncated(partial) => Ok(GenerationResponse::truncated(partial)),
            ScriptedReply::Fail(message) => Err(LlmError::Network(message)),
        }
    }
}

/// A provider that returns scripted replies.
///
/// Persona replies are taken from that persona's own script first, then
/// from the shared script, then the fallback reply. Every request is kept
/// for inspection.
pub struct ScriptedProvider {
    name: String,
    shared: Mutex<VecDeque<ScriptedReply>>,
    by_persona: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    fallback: ScriptedReply,
    requests: Mutex<Vec<GenerationRequest>>,
    key_valid: bool,
}

impl ScriptedProvider {
    /// Create a provider with empty scripts
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Mutex::new(VecDeque::new()),
            by_persona: Mutex::new(HashMap::new()),
            fallback: ScriptedReply::text("ok"),
            requests: Mutex::new(Vec::new()),
            key_valid: true,
        }
    }

    /// Queue a reply on the shared script
    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        self.shared.lock().push_back(reply);
        self
    }

    /// Queue a reply for one persona, by display name
    pub fn with_persona_reply(self, persona: impl Into<String>, reply: ScriptedReply) -> Self {
        self.by_persona
            .lock()
            .entry(persona.into())
            .or_default()
            .push_back(reply);
        self
    }

    /// Reply used once the scripts run dry
    pub fn with_fallback(mut self, reply: ScriptedReply) -> Self {
        self.fallback = reply;
        self
    }

    /// Make `validate_key` report a rejected key
    pub fn with_invalid_key(mut self) -> Self {
        self.key_valid = false;
        self
    }

    /// Queue a reply after construction
    pub fn push_reply(&self, reply: ScriptedReply) {
        self.shared.lock().push_back(reply);
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_reply(&self, persona: Option<&str>) -> ScriptedReply {
        if let Some(reply) = persona.and_then(|p| self.by_persona.lock().get_mut(p).and_then(VecDeque::pop_front)) {
            return reply;
        }
        self.shared
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> LlmResult<GenerationResponse> {
        self.requests.lock().push(request);
        self.next_reply(None).into_response()
    }

    async fn validate_key(&self) -> LlmResult<bool> {
        Ok(self.key_valid)
    }

    async fn get_persona_reply(&self, prompt: PersonaPrompt) -> LlmResult<GenerationResponse> {
        let persona = prompt.persona_name.clone();
        self.requests.lock().push(prompt.into_request());
        self.next_reply(Some(&persona)).into_response()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        "scripted"
    }
}

/// A summarizer that returns the same facts every time.
pub struct FixedSummarizer {
    facts: Vec<String>,
    failure: Option<String>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FixedSummarizer {
    /// Return `facts` for every promotion
    pub fn new(facts: Vec<String>) -> Self {
        Self {
            facts,
            failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail every promotion with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            facts: Vec::new(),
            failure: Some(reason.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Entries passed to each call
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Summarizer for FixedSummarizer {
    async fn summarize(&self, scope: &ScopeId, entries: &[String]) -> MemoryResult<Vec<String>> {
        self.calls.lock().push(entries.to_vec());
        match &self.failure {
            Some(reason) => Err(MemoryError::Summarization {
                scope: scope.clone(),
                reason: reason.clone(),
            }),
            None => Ok(self.facts.clone()),
        }
    }
}
