use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

/// Remote LLM provider using an OpenAI-compatible chat completions endpoint
pub struct RemoteLlmProvider {
    base_url: String,
    api_key: String,
    default_timeout: Duration,
    /// Output cap applied when a request leaves `max_tokens` unset; `None` sends no cap
    default_max_tokens: Option<usize>,
    default_temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            default_timeout: Duration::from_secs(120),
            default_max_tokens: None,
            default_temperature: 0.3,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(mut self, timeout_secs: u64, max_tokens: Option<usize>, temperature: f32) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }

    /// Build from the `[llm]` section. The API key is read from the env var named by `api_key_env`.
    pub fn from_config(cfg: &common::LlmConfig) -> Result<Self> {
        let api_key_env = cfg
            .api_key_env
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Missing api_key_env in [llm] config"))?;
        let api_key = std::env::var(api_key_env)
            .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;
        let api_url = cfg
            .api_url
            .clone()
            .unwrap_or_else(|| "https://openrouter.ai/api/v1/chat/completions".to_string());
        let timeout = cfg.classification_timeout_seconds.unwrap_or(120);

        Ok(Self::new(api_url, api_key).with_defaults(timeout, None, 0.3))
    }
}

impl RemoteLlmProvider {
    fn request_body(&self, request: LlmRequest) -> OpenAiRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(Message {
                role: "system".to_string(),
                content: system,
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: request.prompt,
        });

        OpenAiRequest {
            model: request.model,
            messages,
            max_tokens: request.max_tokens.or(self.default_max_tokens),
            temperature: Some(request.temperature.unwrap_or(self.default_temperature)),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let model = request.model.clone();
        let req_body = self.request_body(request);

        let response = tokio::time::timeout(
            timeout,
            self.client
                .post(&self.base_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send(),
        )
        .await
        .context("LLM request timed out")?
        .context("LLM HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {}: {}", status, body);
        }

        let resp_body: OpenAiResponse = tokio::time::timeout(timeout, response.json())
            .await
            .context("LLM response body timed out")?
            .context("Failed to parse LLM response")?;

        let choice = resp_body
            .choices
            .first()
            .context("LLM response has no choices")?;

        let usage = resp_body
            .usage
            .map(|u| UsageMetadata {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: choice.message.content.clone(),
            usage,
            model: resp_body.model.unwrap_or(model),
        })
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(max_tokens: Option<usize>) -> LlmRequest {
        LlmRequest {
            model: "openai/gpt-4o".to_string(),
            system: Some("Clasifica".to_string()),
            prompt: "[]".to_string(),
            max_tokens,
            temperature: None,
            timeout_seconds: None,
        }
    }

    #[test]
    fn uncapped_request_sends_no_max_tokens() {
        let provider = RemoteLlmProvider::new("http://localhost", "k");
        let body = serde_json::to_value(provider.request_body(request(None))).unwrap();
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn explicit_cap_wins_over_default() {
        let provider = RemoteLlmProvider::new("http://localhost", "k").with_defaults(30, Some(512), 0.3);
        let body = serde_json::to_value(provider.request_body(request(None))).unwrap();
        assert_eq!(body["max_tokens"], 512);
        let body = serde_json::to_value(provider.request_body(request(Some(64)))).unwrap();
        assert_eq!(body["max_tokens"], 64);
    }
}
