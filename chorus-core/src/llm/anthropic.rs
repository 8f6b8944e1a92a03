//! Anthropic Messages API provider.
//!
//! The Messages API has no per-request safety settings, so the strict tier
//! is expressed as an extra line of system instructions. A `refusal` stop
//! reason is reported as a moderation block.

use super::{
    FinishReason, GenerationProvider, GenerationRequest, GenerationResponse, http_client,
    retry_after, status_error, transport_error,
};
use crate::error::{LlmError, LlmResult};
use crate::message::Role;
use crate::safety::SafetyTier;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Anthropic API base URL
const API_BASE: &str = "https://api.anthropic.com/v1";

/// API version header value
const API_VERSION: &str = "2023-06-01";

/// Default model
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// System line added for the strict tier
const STRICT_GUIDELINE: &str =
    "Keep every reply suitable for a general audience. Avoid sexual or graphic content.";

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create from environment variable ANTHROPIC_API_KEY
    pub fn from_env() -> LlmResult<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| LlmError::Configuration("ANTHROPIC_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Set the default model
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Point at a different API base (proxies, test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build headers for API requests
    fn build_headers(&self) -> LlmResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| LlmError::Configuration(format!("Invalid API key: {}", e)))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    /// Convert our request format to Anthropic's API format
    fn to_api_request(&self, request: &GenerationRequest) -> ApiRequest {
        let messages = request
            .conversation()
            .into_iter()
            .map(|turn| ApiMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Model => "assistant",
                },
                content: turn.text,
            })
            .collect();

        let mut system = request.system.clone();
        if request.safety == SafetyTier::Strict {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(STRICT_GUIDELINE);
        }

        ApiRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            max_tokens: request.sampling.max_output_tokens,
            system: (!system.is_empty()).then_some(system),
            messages,
            temperature: Some(request.sampling.temperature.clamp(0.0, 1.0)),
            top_p: Some(request.sampling.top_p),
            top_k: Some(request.sampling.top_k),
        }
    }

    /// Parse API response to our format
    fn parse_response(api_response: ApiResponse) -> GenerationResponse {
        let text = api_response
            .content
            .into_iter()
            .filter_map(|c| match c {
                ApiContent::Text { text } => Some(text),
                ApiContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let stop_reason = api_response.stop_reason.unwrap_or_default();
        let (finish_reason, block_reason) = match stop_reason.as_str() {
            "end_turn" | "stop_sequence" => (FinishReason::Stop, None),
            "max_tokens" => (FinishReason::MaxTokens, None),
            "refusal" => (FinishReason::Safety, Some("refusal".to_string())),
            _ => (FinishReason::Other, None),
        };

        GenerationResponse {
            text,
            finish_reason,
            block_reason,
        }
    }
}

#[async_trait]
impl GenerationProvider for AnthropicProvider {
    async fn generate(&self, request: GenerationRequest) -> LlmResult<GenerationResponse> {
        let headers = self.build_headers()?;
        let api_request = self.to_api_request(&request);
        debug!(
            model = %api_request.model,
            turns = api_request.messages.len(),
            "sending anthropic request"
        );

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let wait = retry_after(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            return Err(status_error(status, wait, error_body));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(Self::parse_response(api_response))
    }

    async fn validate_key(&self) -> LlmResult<bool> {
        let headers = self.build_headers()?;
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .headers(headers)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status().as_u16() {
            200..=299 => Ok(true),
            401 | 403 => Ok(false),
            _ => {
                let status = response.status();
                let wait = retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                Err(status_error(status, wait, body))
            }
        }
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// API request/response types

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Turn;

    #[test]
    fn test_provider_creation() {
        let provider = AnthropicProvider::new("test-key");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_request_mapping() {
        let provider = AnthropicProvider::new("test-key").with_default_model("claude-test");
        let request = GenerationRequest::new("[Bob]: hi @1")
            .with_system("You are Alice")
            .with_history(vec![Turn::user("hello"), Turn::model("hey")]);

        let api = provider.to_api_request(&request);
        assert_eq!(api.model, "claude-test");
        assert_eq!(api.messages.len(), 3);
        assert_eq!(api.messages[1].role, "assistant");
        let system = api.system.unwrap_or_default();
        assert!(system.starts_with("You are Alice"));
        assert!(system.contains(STRICT_GUIDELINE));

        let relaxed = provider.to_api_request(&request.with_safety(SafetyTier::Relaxed));
        assert_eq!(relaxed.system.as_deref(), Some("You are Alice"));
    }

    #[test]
    fn test_stop_reason_mapping() {
        let parse = |json: &str| {
            AnthropicProvider::parse_response(serde_json::from_str(json).unwrap())
        };

        let ok = parse(r#"{"content":[{"type":"text","text":"hi"}],"stop_reason":"end_turn"}"#);
        assert_eq!(ok.text, "hi");
        assert_eq!(ok.finish_reason, FinishReason::Stop);

        let cut = parse(r#"{"content":[{"type":"text","text":"lo"}],"stop_reason":"max_tokens"}"#);
        assert_eq!(cut.finish_reason, FinishReason::MaxTokens);

        let refused = parse(r#"{"content":[],"stop_reason":"refusal"}"#);
        assert!(refused.is_blocked());

        let other = parse(r#"{"content":[{"type":"thinking","thinking":"hm"}],"stop_reason":null}"#);
        assert_eq!(other.text, "");
        assert_eq!(other.finish_reason, FinishReason::Other);
    }
}
