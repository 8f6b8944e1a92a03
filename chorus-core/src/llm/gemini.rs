//! Google Gemini `generateContent` provider.

use super::{
    FinishReason, GenerationProvider, GenerationRequest, GenerationResponse, http_client,
    retry_after, status_error, transport_error,
};
use crate::error::{LlmError, LlmResult};
use crate::message::Role;
use crate::safety::SafetyTier;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Gemini API base URL
const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Harm categories covered by `safetySettings`
const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Finish reasons that mean moderation stopped the reply
const BLOCK_FINISH_REASONS: [&str; 5] = [
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// Google Gemini provider
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create from environment variable GEMINI_API_KEY
    pub fn from_env() -> LlmResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| LlmError::Configuration("GEMINI_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Set the default model
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Point at a different API base
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn threshold(tier: SafetyTier) -> &'static str {
        match tier {
            SafetyTier::Strict => "BLOCK_LOW_AND_ABOVE",
            SafetyTier::Relaxed => "BLOCK_NONE",
        }
    }

    /// Build the JSON body for `generateContent`
    fn build_body(request: &GenerationRequest) -> Value {
        let contents: Vec<Value> = request
            .conversation()
            .into_iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Model => "model",
                };
                json!({ "role": role, "parts": [{ "text": turn.text }] })
            })
            .collect();

        let threshold = Self::threshold(request.safety);
        let safety_settings: Vec<Value> = HARM_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": threshold }))
            .collect();

        let mut body = json!({
            "contents": contents,
            "safetySettings": safety_settings,
            "generationConfig": {
                "temperature": request.sampling.temperature,
                "topP": request.sampling.top_p,
                "topK": request.sampling.top_k,
                "maxOutputTokens": request.sampling.max_output_tokens,
            },
        });
        if !request.system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": request.system }] });
        }
        body
    }

    /// Normalize a `generateContent` response body
    fn parse_response(v: &Value) -> LlmResult<GenerationResponse> {
        if let Some(reason) = v["promptFeedback"]["blockReason"].as_str() {
            warn!(reason, "gemini blocked the prompt");
            return Ok(GenerationResponse::blocked(reason));
        }

        let Some(candidate) = v["candidates"].as_array().and_then(|c| c.first()) else {
            if v.get("candidates").is_some() || v.get("promptFeedback").is_some() {
                return Ok(GenerationResponse {
                    text: String::new(),
                    finish_reason: FinishReason::Other,
                    block_reason: None,
                });
            }
            return Err(LlmError::Parse("response has no candidates".to_string()));
        };

        let text = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter(|p| !p["thought"].as_bool().unwrap_or(false))
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let reason = candidate["finishReason"].as_str().unwrap_or("STOP");
        let (finish_reason, block_reason) = match reason {
            "STOP" => (FinishReason::Stop, None),
            "MAX_TOKENS" => (FinishReason::MaxTokens, None),
            r if BLOCK_FINISH_REASONS.contains(&r) => (FinishReason::Safety, Some(r.to_string())),
            _ => (FinishReason::Other, None),
        };

        Ok(GenerationResponse {
            text,
            finish_reason,
            block_reason,
        })
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    async fn generate(&self, request: GenerationRequest) -> LlmResult<GenerationResponse> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            model,
            self.api_key
        );
        let body = Self::build_body(&request);
        debug!(model, tier = %request.safety, "sending gemini request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let wait = retry_after(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            return Err(status_error(status, wait, error_body));
        }

        let v: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        Self::parse_response(&v)
    }

    async fn validate_key(&self) -> LlmResult<bool> {
        let url = format!(
            "{}/models?key={}",
            self.base_url.trim_end_matches('/'),
            self.api_key
        );
        let response = self.client.get(&url).send().await.map_err(transport_error)?;

        match response.status().as_u16() {
            200..=299 => Ok(true),
            // An unknown key comes back as 400 API_KEY_INVALID
            400 | 401 | 403 => Ok(false),
            _ => {
                let status = response.status();
                let wait = retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                Err(status_error(status, wait, body))
            }
        }
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Turn;

    #[test]
    fn test_body_carries_tier_and_sampling() {
        let request = GenerationRequest::new("hi")
            .with_system("You are Alice")
            .with_history(vec![Turn::user("hello"), Turn::model("hey")])
            .with_safety(SafetyTier::Relaxed);
        let body = GeminiProvider::build_body(&request);

        assert_eq!(body["contents"].as_array().map(Vec::len), Some(3));
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are Alice");
        assert_eq!(body["safetySettings"][0]["threshold"], "BLOCK_NONE");
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);

        let strict = GeminiProvider::build_body(&GenerationRequest::new("hi"));
        assert_eq!(strict["safetySettings"][2]["threshold"], "BLOCK_LOW_AND_ABOVE");
        assert!(strict.get("systemInstruction").is_none());
    }

    #[test]
    fn test_parse_text_and_finish_reasons() {
        let ok = GeminiProvider::parse_response(&json!({
            "candidates": [{ "content": { "parts": [{ "text": "he" }, { "text": "llo" }] }, "finishReason": "STOP" }]
        }))
        .unwrap();
        assert_eq!(ok.text, "hello");
        assert_eq!(ok.finish_reason, FinishReason::Stop);

        let cut = GeminiProvider::parse_response(&json!({
            "candidates": [{ "content": { "parts": [{ "text": "hal" }] }, "finishReason": "MAX_TOKENS" }]
        }))
        .unwrap();
        assert_eq!(cut.finish_reason, FinishReason::MaxTokens);

        let unsafe_reply = GeminiProvider::parse_response(&json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        }))
        .unwrap();
        assert!(unsafe_reply.is_blocked());
        assert_eq!(unsafe_reply.block_reason.as_deref(), Some("SAFETY"));
    }

    #[test]
    fn test_prompt_feedback_block() {
        let blocked = GeminiProvider::parse_response(&json!({
            "promptFeedback": { "blockReason": "PROHIBITED_CONTENT" }
        }))
        .unwrap();
        assert!(blocked.is_blocked());
        assert!(blocked.text.is_empty());
    }

    #[test]
    fn test_garbage_body_is_parse_error() {
        assert!(matches!(
            GeminiProvider::parse_response(&json!({ "unexpected": true })),
            Err(LlmError::Parse(_))
        ));
    }
}
