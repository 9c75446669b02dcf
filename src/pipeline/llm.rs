//! VLM interaction: send the cover URL and the extraction prompt, return text.
//!
//! This module is intentionally thin. The prompt lives in
//! [`crate::prompts`] and all interpretation of the answer lives in
//! [`crate::pipeline::extract`]; here we only build one request, send it
//! once, and classify what went wrong.
//!
//! ## No retries
//!
//! Each scan makes exactly one call. Failures go straight back to the
//! caller; 401/403 become [`CoverError::Unauthorized`], everything else
//! [`CoverError::InferenceFailure`] or [`CoverError::InferenceTimeout`].

use crate::config::ScanConfig;
use crate::error::CoverError;
use crate::prompts::{EXTRACTION_PROMPT, EXTRACTION_PROMPT_VERSION, MAX_RESPONSE_TOKENS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Raw answer from the model, opaque until parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelResponse {
    pub raw_text: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

impl ModelResponse {
    pub fn from_text(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            ..Default::default()
        }
    }
}

/// A vision-capable completion service.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Service name used in log lines and error messages.
    fn name(&self) -> &str;

    /// Fail fast when the credential is missing. Must not touch the network.
    fn ensure_configured(&self) -> Result<(), CoverError> {
        Ok(())
    }

    /// Ask the model to read the cover at `image_url`. Exactly one request.
    async fn extract(&self, image_url: &Url) -> Result<ModelResponse, CoverError>;
}

/// Parse an image address, requiring an absolute URL.
///
/// Blank input and unparsable input are both [`CoverError::InvalidInput`].
pub fn parse_image_url(input: &str) -> Result<Url, CoverError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CoverError::InvalidInput {
            input: input.to_string(),
            reason: "no image URL provided".into(),
        });
    }
    Url::parse(trimmed).map_err(|e| CoverError::InvalidInput {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrlPart<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrlPart<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

/// Build the single-message request body for a cover.
fn build_request<'a>(config: &'a ScanConfig, image_url: &'a str) -> ChatRequest<'a> {
    ChatRequest {
        model: &config.model,
        messages: vec![ChatMessage {
            role: "user",
            content: vec![
                ContentPart::Text {
                    text: EXTRACTION_PROMPT,
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrlPart { url: image_url },
                },
            ],
        }],
        max_tokens: MAX_RESPONSE_TOKENS,
    }
}

// ── OpenAI-compatible client ─────────────────────────────────────────────

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiVisionClient {
    client: reqwest::Client,
    config: ScanConfig,
}

impl OpenAiVisionClient {
    pub fn new(config: ScanConfig) -> Result<Self, CoverError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| CoverError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    fn transport_error(&self, e: reqwest::Error) -> CoverError {
        if e.is_timeout() {
            CoverError::InferenceTimeout {
                secs: self.config.api_timeout_secs,
            }
        } else {
            CoverError::InferenceFailure {
                status: e.status().map(|s| s.as_u16()),
                detail: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl VisionModel for OpenAiVisionClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn ensure_configured(&self) -> Result<(), CoverError> {
        if self.config.has_api_key() {
            Ok(())
        } else {
            Err(CoverError::Unconfigured {
                service: "Inference API".into(),
                hint: "Set OPENAI_API_KEY or pass --api-key.".into(),
            })
        }
    }

    async fn extract(&self, image_url: &Url) -> Result<ModelResponse, CoverError> {
        self.ensure_configured()?;
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        let start = Instant::now();
        let body = build_request(&self.config, image_url.as_str());

        debug!(
            model = %self.config.model,
            prompt_version = EXTRACTION_PROMPT_VERSION,
            "Sending cover to completion service"
        );

        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = upstream_error_message(&text).unwrap_or_else(|| status.to_string());
            warn!(status = status.as_u16(), "Completion service returned an error: {}", detail);

            return Err(if status.as_u16() == 401 || status.as_u16() == 403 {
                CoverError::Unauthorized {
                    service: self.name().to_string(),
                    status: status.as_u16(),
                    detail,
                }
            } else {
                CoverError::InferenceFailure {
                    status: Some(status.as_u16()),
                    detail,
                }
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoverError::InferenceFailure {
                status: Some(status.as_u16()),
                detail: "response contained no choices".into(),
            })?;

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((None, None));

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            input_tokens = ?input_tokens,
            output_tokens = ?output_tokens,
            "Completion received"
        );

        Ok(ModelResponse {
            raw_text: choice.message.content.unwrap_or_default(),
            input_tokens,
            output_tokens,
        })
    }
}

/// Extract `error.message` from an OpenAI-style error body.
fn upstream_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .or_else(|| value.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> ScanConfig {
        ScanConfig::builder()
            .api_key("sk-test")
            .api_base_url(format!("{}/v1", server.uri()))
            .api_timeout_secs(2)
            .build()
            .unwrap()
    }

    fn cover_url() -> Url {
        Url::parse("https://blobs.test/covers/u1/dune.jpg").unwrap()
    }

    #[test]
    fn request_body_shape() {
        let config = ScanConfig::default();
        let body = serde_json::to_value(build_request(&config, "https://x.test/a.png")).unwrap();
        assert_eq!(body["max_tokens"], 300);
        assert_eq!(body["model"], "gpt-4o");
        let content = &body["messages"][0]["content"];
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], EXTRACTION_PROMPT);
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "https://x.test/a.png");
    }

    #[test]
    fn token_ceiling_ignores_other_tunables() {
        let config = ScanConfig::builder()
            .model("gpt-4o-mini")
            .api_timeout_secs(5)
            .build()
            .unwrap();
        let body = serde_json::to_value(build_request(&config, "https://x.test/a.png")).unwrap();
        assert_eq!(body["max_tokens"], MAX_RESPONSE_TOKENS);
        assert_eq!(body["model"], "gpt-4o-mini");
    }

    #[test]
    fn parse_image_url_rules() {
        assert!(parse_image_url("https://example.com/cover.jpg").is_ok());
        assert!(parse_image_url("  https://example.com/cover.jpg ").is_ok());
        for bad in ["", "   ", "cover.jpg", "/covers/a.jpg", "http//broken"] {
            let err = parse_image_url(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{bad:?}");
        }
    }

    #[test]
    fn missing_key_is_unconfigured() {
        let client = OpenAiVisionClient::new(ScanConfig::default()).unwrap();
        let err = client.ensure_configured().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unconfigured);
    }

    #[tokio::test]
    async fn successful_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({ "max_tokens": 300 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "{\"title\":\"Dune\",\"author\":\"Frank Herbert\"}" } }],
                "usage": { "prompt_tokens": 812, "completion_tokens": 14 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiVisionClient::new(config_for(&server)).unwrap();
        let response = client.extract(&cover_url()).await.unwrap();

        assert_eq!(response.raw_text, r#"{"title":"Dune","author":"Frank Herbert"}"#);
        assert_eq!(response.input_tokens, Some(812));
        assert_eq!(response.output_tokens, Some(14));
    }

    #[tokio::test]
    async fn null_content_is_empty_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": null } }]
            })))
            .mount(&server)
            .await;

        let client = OpenAiVisionClient::new(config_for(&server)).unwrap();
        let response = client.extract(&cover_url()).await.unwrap();
        assert_eq!(response.raw_text, "");
        assert_eq!(response.input_tokens, None);
    }

    #[tokio::test]
    async fn no_choices_is_inference_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&server)
            .await;

        let client = OpenAiVisionClient::new(config_for(&server)).unwrap();
        let err = client.extract(&cover_url()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InferenceFailure);
    }

    #[tokio::test]
    async fn status_401_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiVisionClient::new(config_for(&server)).unwrap();
        let err = client.extract(&cover_url()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.upstream_status(), Some(401));
        assert!(err.to_string().contains("Incorrect API key provided"));
    }

    #[tokio::test]
    async fn server_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiVisionClient::new(config_for(&server)).unwrap();
        let err = client.extract(&cover_url()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InferenceFailure);
        assert_eq!(err.upstream_status(), Some(503));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&server)
            .await;

        let config = ScanConfig::builder()
            .api_key("sk-test")
            .api_base_url(server.uri())
            .api_timeout_secs(1)
            .build()
            .unwrap();
        let client = OpenAiVisionClient::new(config).unwrap();
        let err = client.extract(&cover_url()).await.unwrap_err();

        assert!(err.is_timeout(), "got {err:?}");
        assert_eq!(err.kind(), ErrorKind::InferenceFailure);
    }

    #[tokio::test]
    async fn unconfigured_client_never_calls_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let config = ScanConfig::builder()
            .api_base_url(server.uri())
            .build()
            .unwrap();
        let client = OpenAiVisionClient::new(config).unwrap();
        let err = client.extract(&cover_url()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unconfigured);
    }

    #[test]
    fn upstream_message_extraction() {
        assert_eq!(
            upstream_error_message(r#"{"error":{"message":"quota exceeded"}}"#).as_deref(),
            Some("quota exceeded")
        );
        assert_eq!(upstream_error_message("<html>502</html>"), None);
    }
}
