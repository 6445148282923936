use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub mod json;
pub mod policy;
pub mod remote;

pub use policy::{call_with_policy, CallPolicy, PolicyOutcome};

/// Core trait for chat-completion providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for the given system + user prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier understood by the provider, e.g. "openai/gpt-4o-mini"
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

pub const DEFAULT_PRIMARY_MODEL: &str = "anthropic/claude-sonnet-4";
pub const DEFAULT_FALLBACK_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_FAST_MODEL: &str = "openai/gpt-4o-mini";

/// Model line-up and per-phase call policies, built once and shared by reference.
#[derive(Clone)]
pub struct AiClient {
    provider: Arc<dyn LlmProvider>,
    classification: CallPolicy,
    summarization: CallPolicy,
}

impl AiClient {
    pub fn new(provider: Arc<dyn LlmProvider>, classification: CallPolicy, summarization: CallPolicy) -> Self {
        Self {
            provider,
            classification,
            summarization,
        }
    }

    /// Build policies from the `[llm]` section, filling gaps with the stock line-up.
    ///
    /// Classification: primary model with retries and the configured delay schedule, then
    /// one fallback attempt when `use_fallback` is on. Summaries: fast model once, then the
    /// primary model once, no delay in between.
    pub fn from_config(provider: Arc<dyn LlmProvider>, cfg: Option<&common::LlmConfig>) -> Self {
        let default_cfg = common::LlmConfig::default();
        let cfg = cfg.unwrap_or(&default_cfg);

        let primary = cfg.primary_model.clone().unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.to_string());
        let fallback = cfg.fallback_model.clone().unwrap_or_else(|| DEFAULT_FALLBACK_MODEL.to_string());
        let fast = cfg.fast_model.clone().unwrap_or_else(|| DEFAULT_FAST_MODEL.to_string());
        let use_fallback = cfg.use_fallback.unwrap_or(true);

        let delays = cfg
            .retry_delays_seconds
            .clone()
            .unwrap_or_else(|| vec![3, 6])
            .into_iter()
            .map(Duration::from_secs)
            .collect();

        let classification = CallPolicy {
            primary_model: primary.clone(),
            primary_attempts: cfg.max_attempts.unwrap_or(2).max(1),
            delays,
            fallback_model: use_fallback.then_some(fallback),
            timeout: Duration::from_secs(cfg.classification_timeout_seconds.unwrap_or(120)),
            max_tokens: None,
        };

        let summarization = CallPolicy {
            primary_model: fast,
            primary_attempts: 1,
            delays: Vec::new(),
            fallback_model: Some(primary),
            timeout: Duration::from_secs(cfg.summarization_timeout_seconds.unwrap_or(45)),
            max_tokens: cfg.summarization_max_tokens,
        };

        Self::new(provider, classification, summarization)
    }

    pub fn classification_policy(&self) -> &CallPolicy {
        &self.classification
    }

    pub fn summarization_policy(&self) -> &CallPolicy {
        &self.summarization
    }

    pub async fn complete_classification(&self, system: &str, prompt: &str) -> Result<PolicyOutcome, PipelineError> {
        call_with_policy(self.provider.as_ref(), &self.classification, system, prompt).await
    }

    pub async fn complete_summary(&self, system: &str, prompt: &str) -> Result<PolicyOutcome, PipelineError> {
        call_with_policy(self.provider.as_ref(), &self.summarization, system, prompt).await
    }
}
