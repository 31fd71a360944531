//! VLM interaction: build the vision request and call the backend.
//!
//! [`VisionBackend`] is the only seam between the library and the remote
//! model. The production implementation, [`AzureOpenAiBackend`], speaks the
//! Azure OpenAI chat-completions REST API with an Entra ID bearer token.
//! Tests and library users can substitute any other implementation through
//! [`crate::config::RecognizerConfig::backend`].
//!
//! No retries: every failure is surfaced to the caller as-is.

use crate::config::{AzureTarget, RecognizerConfig};
use crate::error::FormulaError;
use crate::pipeline::auth::{TokenCredential, COGNITIVE_SERVICES_SCOPE};
use crate::pipeline::encode::ImageData;
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_PROMPT};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Everything a backend needs for one recognition call.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub image: ImageData,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl VisionRequest {
    /// Assemble a request for `image` using the prompts and sampling
    /// settings in `config`.
    pub fn new(image: ImageData, config: &RecognizerConfig) -> Self {
        Self {
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            user_prompt: config
                .user_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_PROMPT.to_string()),
            image,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// A hosted vision-language model that answers one image + prompt with text.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Submit the request and return the raw text of the single reply.
    async fn complete(&self, request: &VisionRequest) -> Result<String, FormulaError>;
}

/// Run one recognition through `backend` and return the trimmed reply.
pub async fn recognize_image(
    backend: &Arc<dyn VisionBackend>,
    image: ImageData,
    config: &RecognizerConfig,
) -> Result<String, FormulaError> {
    let start = Instant::now();
    let request = VisionRequest::new(image, config);

    let text = backend.complete(&request).await?;
    debug!(
        "{}: {} chars in {:?}",
        backend.name(),
        text.len(),
        start.elapsed()
    );

    Ok(text.trim().to_string())
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum ChatMessage<'a> {
    System { content: &'a str },
    User { content: Vec<ContentPart<'a>> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

/// Serialise the two-message chat request for `request`.
pub fn build_request_body(request: &VisionRequest) -> serde_json::Value {
    let body = ChatRequest {
        messages: vec![
            ChatMessage::System {
                content: &request.system_prompt,
            },
            ChatMessage::User {
                content: vec![
                    ContentPart::Text {
                        text: &request.user_prompt,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: request.image.to_data_uri(),
                        },
                    },
                ],
            },
        ],
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    };
    // Plain structs of strings and numbers always serialise.
    serde_json::to_value(&body).unwrap_or(serde_json::Value::Null)
}

/// Extract the reply text from a successful chat-completions body.
pub fn parse_response_body(body: &str) -> Result<String, FormulaError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| FormulaError::LlmApiError {
        status: 200,
        message: format!("unreadable response body: {e}"),
    })?;

    if let Some(usage) = parsed.usage {
        debug!(
            "{} input tokens, {} output tokens",
            usage.prompt_tokens, usage.completion_tokens
        );
    }

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or(FormulaError::EmptyResponse)?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(FormulaError::LlmApiError {
            status: 200,
            message: "response was blocked by the content filter".into(),
        });
    }

    choice.message.content.ok_or(FormulaError::EmptyResponse)
}

/// Pull the human-readable message out of an Azure error body, if present.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => match env.error.code {
            Some(code) => format!("{}: {}", code, env.error.message),
            None => env.error.message,
        },
        Err(_) if body.trim().is_empty() => "(empty body)".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

// ── Azure OpenAI ─────────────────────────────────────────────────────────

/// Azure OpenAI chat-completions backend authenticated with a bearer token.
pub struct AzureOpenAiBackend {
    client: reqwest::Client,
    target: AzureTarget,
    credential: Arc<dyn TokenCredential>,
}

impl AzureOpenAiBackend {
    /// Create a backend with its own HTTP client.
    ///
    /// `timeout` of `None` keeps reqwest's default (no overall timeout).
    pub fn new(
        target: AzureTarget,
        credential: Arc<dyn TokenCredential>,
        timeout: Option<Duration>,
    ) -> Result<Self, FormulaError> {
        let client = build_http_client(timeout)?;
        Ok(Self::with_client(client, target, credential))
    }

    /// Create a backend sharing an existing HTTP client.
    pub fn with_client(
        client: reqwest::Client,
        target: AzureTarget,
        credential: Arc<dyn TokenCredential>,
    ) -> Self {
        Self {
            client,
            target,
            credential,
        }
    }

    pub fn target(&self) -> &AzureTarget {
        &self.target
    }
}

/// HTTP client shared by the backend and the credential chain.
pub fn build_http_client(timeout: Option<Duration>) -> Result<reqwest::Client, FormulaError> {
    let mut builder = reqwest::Client::builder();
    if let Some(t) = timeout {
        builder = builder.timeout(t);
    }
    builder
        .build()
        .map_err(|e| FormulaError::Internal(format!("Failed to build HTTP client: {e}")))
}

#[async_trait]
impl VisionBackend for AzureOpenAiBackend {
    fn name(&self) -> &str {
        "azure-openai"
    }

    async fn complete(&self, request: &VisionRequest) -> Result<String, FormulaError> {
        let token = self.credential.get_token(COGNITIVE_SERVICES_SCOPE).await?;
        let endpoint = self.target.chat_completions_url()?;
        let url = endpoint.to_string();
        let body = build_request_body(request);

        debug!("POST {}", url);
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&token.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| FormulaError::RequestFailed {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let text = response
            .text()
            .await
            .map_err(|e| FormulaError::RequestFailed {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        if status.is_success() {
            return parse_response_body(&text);
        }

        warn!("{} returned HTTP {}", url, status.as_u16());
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FormulaError::AuthError {
                endpoint: self.target.endpoint.clone(),
                status: status.as_u16(),
                detail: error_message(&text),
            },
            StatusCode::TOO_MANY_REQUESTS => FormulaError::RateLimitExceeded {
                deployment: self.target.deployment.clone(),
                retry_after_secs: retry_after,
            },
            _ => FormulaError::LlmApiError {
                status: status.as_u16(),
                message: error_message(&text),
            },
        })
    }
}
