//! Text generation backends.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::ServiceConfig;
use crate::error::PipelineError;
use crate::prompts::PromptRequest;
use crate::report::truncate;

/// A model reply, either bare text or text lifted out of a response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextResponse {
    Plain(String),
    Wrapped {
        raw: String,
        finish_reason: Option<String>,
    },
}

impl TextResponse {
    pub fn raw(&self) -> &str {
        match self {
            TextResponse::Plain(text) => text,
            TextResponse::Wrapped { raw, .. } => raw,
        }
    }
}

#[async_trait]
pub trait TextGenerationService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &PromptRequest) -> Result<TextResponse, PipelineError>;
}

/// Runs one call under `limit`, turning expiry and blank replies into errors.
pub async fn generate_text(
    service: &dyn TextGenerationService,
    request: &PromptRequest,
    limit: Duration,
) -> Result<String, PipelineError> {
    tracing::info!(service = service.name(), stage = request.stage, "text generation started");
    let started = Instant::now();

    let response = tokio::time::timeout(limit, service.generate(request))
        .await
        .map_err(|_| PipelineError::ServiceTimeout(limit))??;

    if let TextResponse::Wrapped {
        finish_reason: Some(reason),
        ..
    } = &response
    {
        tracing::debug!(finish_reason = %reason, "model finished");
    }
    let text = response.raw().to_string();
    if text.trim().is_empty() {
        return Err(PipelineError::ServiceUnavailable(format!(
            "{} returned an empty response",
            service.name()
        )));
    }

    tracing::info!(
        stage = request.stage,
        latency_ms = started.elapsed().as_millis() as u64,
        chars = text.len(),
        "text generation finished"
    );
    Ok(text)
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

pub struct AzureChatService {
    client: Client,
    config: ServiceConfig,
}

impl AzureChatService {
    pub fn new(config: ServiceConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                PipelineError::ServiceUnavailable(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl TextGenerationService for AzureChatService {
    fn name(&self) -> &'static str {
        "azure_openai"
    }

    async fn generate(&self, request: &PromptRequest) -> Result<TextResponse, PipelineError> {
        let payload = json!({
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": self.config.temperature,
        });

        let response = self
            .client
            .post(self.config.chat_url())
            .header("api-key", &self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::ServiceTimeout(self.config.timeout)
                } else {
                    PipelineError::ServiceUnavailable(format!("request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::ServiceUnavailable(format!(
                "azure openai error {}: {}",
                status,
                truncate(&body, 320)
            )));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        let text = response.text().await.map_err(|e| {
            PipelineError::ServiceUnavailable(format!("failed to read response body: {e}"))
        })?;

        // gateways in front of the deployment may answer with bare text
        if !is_json {
            return Ok(TextResponse::Plain(text));
        }
        let body: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            PipelineError::ServiceUnavailable(format!("invalid chat completion response: {e}"))
        })?;
        parse_chat_response(body)
    }
}

fn parse_chat_response(body: ChatResponse) -> Result<TextResponse, PipelineError> {
    let choice = body.choices.into_iter().next().ok_or_else(|| {
        PipelineError::ServiceUnavailable("response did not include choices".to_string())
    })?;
    let raw = choice
        .message
        .content
        .as_ref()
        .map(extract_text)
        .unwrap_or_default();
    Ok(TextResponse::Wrapped {
        raw,
        finish_reason: choice.finish_reason,
    })
}

// Content is a string, or a list of typed parts on newer API versions.
fn extract_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.trim().to_string(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        _ => String::new(),
    }
}
