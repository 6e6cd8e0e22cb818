use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::agents::errors::{AgentError, AgentResult};
use crate::agents::worker::{Capability, CapabilityError};
use crate::config::Settings;

/// Capability backed by an OpenAI-compatible `/chat/completions` endpoint
///
/// Each request becomes one user turn; the first choice's content is the
/// response. Rate limiting and server errors surface as
/// [`CapabilityError::Unavailable`], anything else as
/// [`CapabilityError::Failed`]. Both end up in the worker's retry path.
#[derive(Clone)]
pub struct ChatCompletionsCapability {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatTurn<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatTurn<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletionsCapability {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    /// Build from `MODEL_BASE_URL`, `MODEL_API_KEY`, `MODEL_NAME` and
    /// `MODEL_TIMEOUT_SECS`
    pub fn from_settings(settings: &Settings) -> AgentResult<Self> {
        let base_url = settings
            .model_base_url
            .clone()
            .ok_or_else(|| AgentError::ConfigError("MODEL_BASE_URL is not set".to_string()))?;
        let capability = Self::new(
            base_url,
            settings.model_api_key.clone(),
            settings.model_name.as_str(),
            settings.model_timeout,
        )?;
        tracing::debug!(
            base_url = %capability.base_url,
            model = %capability.model,
            "Initialized chat completions capability"
        );
        Ok(capability)
    }
}

#[async_trait]
impl Capability for ChatCompletionsCapability {
    async fn invoke(&self, request: &str) -> Result<String, CapabilityError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatTurn {
                role: "user",
                content: request,
            }],
        };

        let mut call = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| CapabilityError::Unavailable(format!("model request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = format!("model endpoint returned {}: {}", status, detail);
            return Err(if transient(status) {
                CapabilityError::Unavailable(message)
            } else {
                CapabilityError::Failed(message)
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Failed(format!("unreadable model response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CapabilityError::Failed("model response carried no content".to_string()))
    }
}

fn transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
